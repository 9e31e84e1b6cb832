use std::collections::HashMap;
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::SpeechError;

/// Language used when neither detection nor the environment gives one.
pub const DEFAULT_LANGUAGE: &str = "en-US";
pub const DEFAULT_RATE: f32 = 1.0;
pub const DEFAULT_PITCH: f32 = 1.0;
/// Inclusive bounds for rate and pitch.
pub const MIN_PROSODY: f32 = 0.5;
pub const MAX_PROSODY: f32 = 2.0;

/// Store keys written by older builds, mapped to their current names.
const KEY_ALIASES: &[(&str, &str)] = &[
    ("autoDetect", "languageAutoDetect"),
    ("forcedLanguage", "forcedLanguageTag"),
];

/// Which gesture reads text automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    #[default]
    Hover,
    Selection,
}

/// The gesture behind a read request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Pointer rested on an element.
    Hover,
    /// Text selected with the mouse.
    Selection,
    /// Keyboard shortcut on the current selection.
    Shortcut,
    /// "Speak selected text" context menu entry.
    ContextMenu,
}

/// Reader settings as decoded from the flat key-value settings store.
///
/// Missing keys take their defaults, unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub auto_speech_enabled: bool,
    #[serde(alias = "autoDetect")]
    pub language_auto_detect: bool,
    #[serde(alias = "forcedLanguage")]
    pub forced_language_tag: String,
    #[serde(deserialize_with = "lenient_rate")]
    pub voice_rate: f32,
    #[serde(deserialize_with = "lenient_pitch")]
    pub voice_pitch: f32,
    pub trigger_mode: TriggerMode,
    /// Hostname -> enabled. Sites not listed are enabled.
    pub site_settings: HashMap<String, bool>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_speech_enabled: true,
            language_auto_detect: true,
            forced_language_tag: DEFAULT_LANGUAGE.to_string(),
            voice_rate: DEFAULT_RATE,
            voice_pitch: DEFAULT_PITCH,
            trigger_mode: TriggerMode::Hover,
            site_settings: HashMap::new(),
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self, SpeechError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Decode a full snapshot of the settings store.
    pub fn from_store(store: &Map<String, Value>) -> Result<Self, SpeechError> {
        let mut settings = Settings::default();
        settings.apply_changes(store)?;
        Ok(settings)
    }

    /// Overlay a change notification on the current settings.
    ///
    /// A `null` value means the key was removed and reverts it to its default.
    pub fn apply_changes(&mut self, changes: &Map<String, Value>) -> Result<(), SpeechError> {
        let mut merged = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        for (key, value) in changes {
            let key = canonical_key(key);
            if value.is_null() {
                merged.remove(key);
            } else {
                merged.insert(key.to_string(), value.clone());
            }
        }

        *self = serde_json::from_value(Value::Object(merged))?;
        Ok(())
    }

    /// Language used when detection is off. An empty tag means the default.
    pub fn forced_language(&self) -> &str {
        match self.forced_language_tag.trim() {
            "" => DEFAULT_LANGUAGE,
            tag => tag,
        }
    }

    /// Speaking rate clamped to the accepted range.
    pub fn effective_rate(&self) -> f32 {
        sanitize_prosody(self.voice_rate, DEFAULT_RATE)
    }

    /// Pitch clamped to the accepted range.
    pub fn effective_pitch(&self) -> f32 {
        sanitize_prosody(self.voice_pitch, DEFAULT_PITCH)
    }

    pub fn site_enabled(&self, site: &str) -> bool {
        self.site_settings.get(site).copied().unwrap_or(true)
    }

    /// Whether `trigger` on `site` should start reading.
    pub fn permits(&self, trigger: Trigger, site: &str) -> bool {
        match trigger {
            Trigger::Hover => {
                self.auto_speech_enabled
                    && self.site_enabled(site)
                    && self.trigger_mode == TriggerMode::Hover
            }
            Trigger::Selection => {
                self.auto_speech_enabled && self.trigger_mode == TriggerMode::Selection
            }
            Trigger::Shortcut | Trigger::ContextMenu => true,
        }
    }
}

fn canonical_key(key: &str) -> &str {
    KEY_ALIASES
        .iter()
        .find(|(old, _)| *old == key)
        .map(|(_, new)| *new)
        .unwrap_or(key)
}

fn sanitize_prosody(value: f32, default: f32) -> f32 {
    if value.is_finite() && value > 0.0 {
        value.clamp(MIN_PROSODY, MAX_PROSODY)
    } else {
        default
    }
}

fn lenient_rate<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_prosody(deserializer, DEFAULT_RATE)
}

fn lenient_pitch<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_prosody(deserializer, DEFAULT_PITCH)
}

/// Accept numbers or numeric strings; anything unusable becomes `default`.
fn lenient_prosody<'de, D>(deserializer: D, default: f32) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    let parsed = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().map(|v| v as f32),
        Value::String(s) => s.trim().parse::<f32>().ok(),
        _ => None,
    };
    Ok(parsed.filter(|v| v.is_finite() && *v > 0.0).unwrap_or(default))
}

/// Every timeout the reader uses.
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(default)]
pub struct Timings {
    /// Pause between cancelling the engine and issuing the next utterance.
    pub settle_delay: Duration,
    /// Interval of the resume pulse while speaking.
    pub keep_alive_interval: Duration,
    /// How long an issued utterance may take to start.
    pub stall_window: Duration,
    /// Pause after cancelling before the recovery probe.
    pub recovery_settle: Duration,
    /// Pause between a successful recovery probe and re-issuing the request.
    pub recovery_reissue_delay: Duration,
    /// Catalog retry backoff is `loader_step * attempt`.
    pub loader_step: Duration,
    pub loader_max_attempts: u32,
    /// Final catalog read, independent of ladder progress.
    pub loader_horizon: Duration,
    pub liveness_interval: Duration,
    pub focus_refresh_delay: Duration,
    /// Refresh once shortly after start. `None` disables it.
    pub startup_refresh_delay: Option<Duration>,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(100),
            keep_alive_interval: Duration::from_secs(5),
            stall_window: Duration::from_secs(1),
            recovery_settle: Duration::from_millis(300),
            recovery_reissue_delay: Duration::from_millis(200),
            loader_step: Duration::from_millis(300),
            loader_max_attempts: 5,
            loader_horizon: Duration::from_millis(2000),
            liveness_interval: Duration::from_secs(30),
            focus_refresh_delay: Duration::from_millis(300),
            startup_refresh_delay: Some(Duration::from_millis(500)),
        }
    }
}

impl Timings {
    /// Linear backoff before ladder attempt `attempt + 1`.
    pub fn loader_backoff(&self, attempt: u32) -> Duration {
        self.loader_step * attempt
    }
}

/// Language tag of the process environment (`LC_ALL`, `LC_MESSAGES`, `LANG`).
pub fn ambient_locale() -> String {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find_map(|raw| locale_to_tag(&raw))
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
}

/// `fr_FR.UTF-8` -> `fr-FR`. `C`, `POSIX` and empty values carry no language.
pub fn locale_to_tag(raw: &str) -> Option<String> {
    let base = raw.split(['.', '@']).next().unwrap_or("").trim();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return None;
    }
    Some(base.replace('_', "-"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn empty_store_gives_defaults() {
        let s = Settings::from_store(&Map::new()).unwrap();
        assert_eq!(s, Settings::default());
        assert!(s.language_auto_detect);
        assert_eq!(s.forced_language_tag, "en-US");
    }

    #[test]
    fn legacy_keys_and_string_numbers() {
        let s = Settings::from_store(&map(json!({
            "autoDetect": false,
            "forcedLanguage": "de-DE",
            "voiceRate": "1.5",
            "voicePitch": 0,
            "highlightStyle": "subtle",
            "triggerMode": "selection"
        })))
        .unwrap();

        assert!(!s.language_auto_detect);
        assert_eq!(s.forced_language_tag, "de-DE");
        assert_eq!(s.voice_rate, 1.5);
        assert_eq!(s.voice_pitch, 1.0);
        assert_eq!(s.trigger_mode, TriggerMode::Selection);
    }

    #[test]
    fn changes_overlay_and_null_resets() {
        let mut s = Settings::from_json(r#"{"voiceRate": 1.8, "forcedLanguageTag": "it-IT"}"#).unwrap();
        s.apply_changes(&map(json!({"voiceRate": null, "autoSpeechEnabled": false})))
            .unwrap();
        assert_eq!(s.voice_rate, 1.0);
        assert_eq!(s.forced_language_tag, "it-IT");
        assert!(!s.auto_speech_enabled);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = Settings::from_json(r#"{"autoSpeechEnabled": "yes"}"#).unwrap_err();
        assert!(matches!(err, SpeechError::Settings(_)));
    }

    #[test]
    fn prosody_is_clamped() {
        let s = Settings {
            voice_rate: 9.0,
            voice_pitch: 0.1,
            ..Default::default()
        };
        assert_eq!(s.effective_rate(), 2.0);
        assert_eq!(s.effective_pitch(), 0.5);
    }

    #[test]
    fn unusable_prosody_takes_field_default() {
        let s = Settings::from_json(r#"{"voiceRate": "fast", "voicePitch": -3}"#).unwrap();
        assert_eq!(s.voice_rate, DEFAULT_RATE);
        assert_eq!(s.voice_pitch, DEFAULT_PITCH);

        let s = Settings::from_json(r#"{"voicePitch": "1.25"}"#).unwrap();
        assert_eq!(s.voice_pitch, 1.25);
        assert_eq!(s.voice_rate, DEFAULT_RATE);
    }

    #[test]
    fn empty_forced_language_means_default() {
        let s = Settings::from_store(&map(json!({"forcedLanguage": ""}))).unwrap();
        assert_eq!(s.forced_language(), DEFAULT_LANGUAGE);

        let s = Settings::from_store(&map(json!({"forcedLanguageTag": "ja-JP"}))).unwrap();
        assert_eq!(s.forced_language(), "ja-JP");
    }

    #[test]
    fn trigger_gating() {
        let mut s = Settings::default();
        s.site_settings.insert("news.example".to_string(), false);

        assert!(s.permits(Trigger::Hover, "docs.example"));
        assert!(!s.permits(Trigger::Hover, "news.example"));
        assert!(!s.permits(Trigger::Selection, "docs.example"));
        assert!(s.permits(Trigger::ContextMenu, "news.example"));

        s.trigger_mode = TriggerMode::Selection;
        assert!(s.permits(Trigger::Selection, "news.example"));
        assert!(!s.permits(Trigger::Hover, "docs.example"));

        s.auto_speech_enabled = false;
        assert!(!s.permits(Trigger::Selection, "docs.example"));
        assert!(s.permits(Trigger::Shortcut, "docs.example"));
    }

    #[test]
    fn locale_tags() {
        assert_eq!(locale_to_tag("fr_FR.UTF-8").as_deref(), Some("fr-FR"));
        assert_eq!(locale_to_tag("de_DE@euro").as_deref(), Some("de-DE"));
        assert_eq!(locale_to_tag("C"), None);
        assert_eq!(locale_to_tag(""), None);
    }

    #[test]
    fn timings_builder_keeps_defaults() {
        let t = TimingsBuilder::default()
            .stall_window(Duration::from_secs(2))
            .build()
            .unwrap();
        assert_eq!(t.stall_window, Duration::from_secs(2));
        assert_eq!(t.settle_delay, Duration::from_millis(100));
        assert_eq!(t.loader_backoff(3), Duration::from_millis(900));
    }
}
