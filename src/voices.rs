use serde::{Deserialize, Serialize};

use crate::language::primary_subtag;

/// A synthesis voice as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voice {
    pub name: String,
    /// Language tag (e.g. `"en-GB"`).
    #[serde(rename = "lang")]
    pub language_tag: String,
    /// True for voices synthesised on-device rather than by a remote service.
    #[serde(rename = "localService", default)]
    pub is_local: bool,
}

impl Voice {
    pub fn new(name: impl Into<String>, language_tag: impl Into<String>, is_local: bool) -> Self {
        Self {
            name: name.into(),
            language_tag: language_tag.into(),
            is_local,
        }
    }
}

/// The cached host voice list.
///
/// Writers only ever replace the list wholesale, and only with a non-empty
/// list: once populated the catalog never reverts to empty, a stale list is
/// kept instead.
#[derive(Debug, Clone, Default)]
pub struct VoiceCatalog {
    voices: Vec<Voice>,
}

impl VoiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a freshly read voice list. Returns `true` if it replaced the catalog.
    pub fn offer(&mut self, voices: Vec<Voice>) -> bool {
        if voices.is_empty() {
            return false;
        }
        self.voices = voices;
        true
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    /// Best voice for `language_tag`; see [`resolve`].
    pub fn resolve(&self, language_tag: &str) -> Option<&Voice> {
        resolve(language_tag, &self.voices)
    }
}

/// Pick a voice for `language_tag`.
///
/// Tiers, first hit wins:
/// 1. exact tag equality,
/// 2. a voice whose tag starts with the request's primary subtag,
/// 3. the first voice in the catalog.
///
/// Returns `None` only for an empty catalog.
pub fn resolve<'a>(language_tag: &str, catalog: &'a [Voice]) -> Option<&'a Voice> {
    if !language_tag.is_empty() {
        if let Some(voice) = catalog.iter().find(|v| v.language_tag == language_tag) {
            return Some(voice);
        }

        let prefix = primary_subtag(language_tag);
        if let Some(voice) = catalog.iter().find(|v| v.language_tag.starts_with(prefix)) {
            return Some(voice);
        }
    }

    catalog.first()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<Voice> {
        vec![
            Voice::new("Daniel", "en-GB", true),
            Voice::new("Amelie", "fr-FR", true),
            Voice::new("Samantha", "en-US", false),
        ]
    }

    #[test]
    fn empty_catalog_resolves_nothing() {
        assert_eq!(resolve("en-US", &[]), None);
        assert_eq!(resolve("", &[]), None);
    }

    #[test]
    fn exact_match_outranks_earlier_prefix_match() {
        let voices = catalog();
        assert_eq!(resolve("en-US", &voices).map(|v| v.name.as_str()), Some("Samantha"));
    }

    #[test]
    fn primary_subtag_prefix_match() {
        let voices = catalog();
        assert_eq!(resolve("en", &voices).map(|v| v.name.as_str()), Some("Daniel"));
        assert_eq!(resolve("fr-CA", &voices).map(|v| v.name.as_str()), Some("Amelie"));
    }

    #[test]
    fn falls_back_to_first_voice() {
        let voices = catalog();
        assert_eq!(resolve("ja-JP", &voices).map(|v| v.name.as_str()), Some("Daniel"));
        assert_eq!(resolve("", &voices).map(|v| v.name.as_str()), Some("Daniel"));
    }

    #[test]
    fn catalog_ignores_empty_offers() {
        let mut cat = VoiceCatalog::new();
        assert!(!cat.offer(vec![]));
        assert!(cat.is_empty());

        assert!(cat.offer(catalog()));
        assert!(!cat.offer(vec![]));
        assert_eq!(cat.len(), 3);

        assert!(cat.offer(vec![Voice::new("Kyoko", "ja-JP", true)]));
        assert_eq!(cat.resolve("ja-JP").map(|v| v.name.as_str()), Some("Kyoko"));
    }

    #[test]
    fn deserializes_host_voice_payloads() {
        let voice: Voice =
            serde_json::from_str(r#"{"name":"Amelie","lang":"fr-FR","localService":true,"default":false}"#)
                .unwrap();
        assert_eq!(voice, Voice::new("Amelie", "fr-FR", true));
    }
}
