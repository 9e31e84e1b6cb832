use std::time::Duration;

use hover_tts::{
    ambient_locale, engines::scripted::ScriptedHost, ReaderEvent, Settings, SpeechReader, Voice,
};

fn print_events(reader: &mut SpeechReader<ScriptedHost>) {
    for event in reader.drain_events() {
        println!("[{:?}] {event:?}", reader.now());
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // A host whose catalog is empty at startup and fills in later.
    let host = ScriptedHost::new();
    let mut reader = SpeechReader::new(host, Settings::default(), ambient_locale());
    reader.start();

    reader.advance_by(Duration::from_millis(600));
    reader.host_mut().set_voices(vec![
        Voice::new("Amelie", "fr-FR", true),
        Voice::new("Kyoko", "ja-JP", true),
        Voice::new("Samantha", "en-US", true),
        Voice::new("Google Deutsch", "de-DE", false),
    ]);
    reader.on_voices_changed();
    println!("Catalog loaded with {} voices", reader.catalog().len());

    for text in ["Ça va très bien?", "こんにちは世界", "Die Straße ist groß", "Hello there"] {
        reader.handle(text)?;
        reader.advance_by(Duration::from_millis(100));

        if let Some((id, event)) = reader.host_mut().start() {
            reader.on_host_event(id, event);
        }
        if let Some((id, event)) = reader.host_mut().finish() {
            reader.on_host_event(id, event);
        }
        print_events(&mut reader);
    }

    // An utterance that never starts goes through recovery once.
    reader.handle("This one stalls")?;
    reader.advance_by(Duration::from_millis(1400));
    if let Some((id, event)) = reader.host_mut().finish() {
        reader.on_host_event(id, event);
    }
    reader.advance_by(Duration::from_millis(300));
    if let Some((id, event)) = reader.host_mut().start() {
        reader.on_host_event(id, event);
    }
    if let Some((id, event)) = reader.host_mut().finish() {
        reader.on_host_event(id, event);
    }
    print_events(&mut reader);
    println!("Recoveries: {}", reader.recovery_count());

    let report = reader.diagnostics();
    println!("{report}");
    println!("{}", serde_json::to_string_pretty(&report)?);

    assert!(!reader
        .drain_events()
        .iter()
        .any(|e| matches!(e, ReaderEvent::Error(_))));
    Ok(())
}
