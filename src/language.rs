//! Script-range language detection.
//!
//! Detection is a coarse heuristic: the text is tested against a fixed,
//! ordered list of character classes and the first class with any matching
//! character wins. There is no frequency scoring, so mixed-script text reports
//! the earliest-declared script, and accented Latin letters shared by several
//! languages resolve to whichever of them is listed first.

/// How a [`LanguagePattern`] recognises its characters.
#[derive(Debug, Clone, Copy)]
enum Matcher {
    /// Case-insensitive membership in a set of (lowercase) letters.
    Letters(&'static str),
    /// Inclusive code point ranges.
    Ranges(&'static [(char, char)]),
}

impl Matcher {
    fn matches(&self, ch: char) -> bool {
        match self {
            Matcher::Letters(set) => ch.to_lowercase().any(|lower| set.contains(lower)),
            Matcher::Ranges(ranges) => ranges.iter().any(|&(lo, hi)| (lo..=hi).contains(&ch)),
        }
    }
}

/// One detectable language.
#[derive(Debug, Clone, Copy)]
pub struct LanguagePattern {
    pub tag: &'static str,
    pub display_name: &'static str,
    matcher: Matcher,
}

impl LanguagePattern {
    /// True if any character of `text` belongs to this pattern's class.
    pub fn matches(&self, text: &str) -> bool {
        text.chars().any(|ch| self.matcher.matches(ch))
    }
}

/// Detection order. Earlier entries win.
pub static PATTERNS: [LanguagePattern; 10] = [
    LanguagePattern {
        tag: "pt-BR",
        display_name: "Portuguese",
        matcher: Matcher::Letters("ãõáàâéêíóôúç"),
    },
    LanguagePattern {
        tag: "es-ES",
        display_name: "Spanish",
        matcher: Matcher::Letters("áéíóúüñ¿¡"),
    },
    LanguagePattern {
        tag: "fr-FR",
        display_name: "French",
        matcher: Matcher::Letters("éèêëàâçîïôûùü"),
    },
    LanguagePattern {
        tag: "de-DE",
        display_name: "German",
        matcher: Matcher::Letters("äöüß"),
    },
    LanguagePattern {
        tag: "it-IT",
        display_name: "Italian",
        matcher: Matcher::Letters("àèéìíîòóùú"),
    },
    LanguagePattern {
        tag: "ja-JP",
        display_name: "Japanese",
        matcher: Matcher::Ranges(&[
            ('\u{3040}', '\u{30ff}'),
            ('\u{3400}', '\u{4dbf}'),
            ('\u{4e00}', '\u{9fff}'),
        ]),
    },
    LanguagePattern {
        tag: "zh-CN",
        display_name: "Chinese",
        matcher: Matcher::Ranges(&[('\u{4e00}', '\u{9fff}')]),
    },
    LanguagePattern {
        tag: "ru-RU",
        display_name: "Russian",
        matcher: Matcher::Ranges(&[('\u{0400}', '\u{04ff}')]),
    },
    LanguagePattern {
        tag: "ar-SA",
        display_name: "Arabic",
        matcher: Matcher::Ranges(&[('\u{0600}', '\u{06ff}')]),
    },
    LanguagePattern {
        tag: "hi-IN",
        display_name: "Hindi",
        matcher: Matcher::Ranges(&[('\u{0900}', '\u{097f}')]),
    },
];

/// Primary subtags the patterns do not cover but hosts commonly report.
const EXTRA_NAMES: &[(&str, &str)] = &[
    ("en", "English"),
    ("nl", "Dutch"),
    ("ko", "Korean"),
    ("pl", "Polish"),
    ("sv", "Swedish"),
    ("tr", "Turkish"),
];

/// Maps text to a language tag, falling back to the ambient locale.
#[derive(Debug, Clone)]
pub struct LanguageDetector {
    locale: String,
}

impl LanguageDetector {
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
        }
    }

    /// The tag returned when nothing matches.
    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Detect the language of `text`.
    ///
    /// Missing or empty input yields the ambient locale; this never fails.
    pub fn detect(&self, text: Option<&str>) -> &str {
        let Some(text) = text.filter(|t| !t.is_empty()) else {
            return &self.locale;
        };

        match PATTERNS.iter().find(|p| p.matches(text)) {
            Some(pattern) => {
                log::debug!("Detected {}", pattern.display_name);
                pattern.tag
            }
            None => &self.locale,
        }
    }
}

/// Human-readable name for a language tag.
///
/// Known pattern tags use the pattern's name; otherwise the primary subtag is
/// looked up, and the tag itself is returned when nothing is known.
pub fn display_name(tag: &str) -> String {
    if let Some(pattern) = PATTERNS.iter().find(|p| p.tag == tag) {
        return pattern.display_name.to_string();
    }

    let primary = primary_subtag(tag);
    PATTERNS
        .iter()
        .map(|p| (primary_subtag(p.tag), p.display_name))
        .chain(EXTRA_NAMES.iter().copied())
        .find(|(subtag, _)| subtag.eq_ignore_ascii_case(primary))
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| tag.to_string())
}

/// Leading component of a tag before any region suffix (`"en"` in `"en-US"`).
pub fn primary_subtag(tag: &str) -> &str {
    tag.split(['-', '_']).next().unwrap_or(tag)
}
