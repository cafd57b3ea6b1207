//! Voice catalog types.

use serde::{Deserialize, Serialize};

/// Opaque voice identifier.
///
/// The engine only uses it to partition the audio cache; the synthesis
/// provider gives it meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoiceId(String);

impl VoiceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VoiceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for VoiceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Perceived gender of a voice, used for display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Female => f.write_str("female"),
            Self::Male => f.write_str("male"),
        }
    }
}

/// A selectable voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    pub id: VoiceId,
    pub gender: Gender,
}

impl Voice {
    pub fn new(name: impl Into<String>, id: impl Into<VoiceId>, gender: Gender) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            gender,
        }
    }
}

/// Built-in prebuilt voices: (display name, provider id, gender).
const PREBUILT_VOICES: &[(&str, &str, Gender)] = &[
    ("Kore", "Kore", Gender::Female),
    ("Puck", "Puck", Gender::Male),
    ("Zephyr", "Zephyr", Gender::Female),
    ("Charon", "Charon", Gender::Male),
    ("Leda", "Leda", Gender::Female),
    ("Fenrir", "Fenrir", Gender::Male),
    ("Aoede", "Aoede", Gender::Female),
    ("Orus", "Orus", Gender::Male),
];

/// Fixed set of voices offered to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceCatalog {
    voices: Vec<Voice>,
}

impl VoiceCatalog {
    /// Create a catalog from an explicit voice list.
    pub const fn new(voices: Vec<Voice>) -> Self {
        Self { voices }
    }

    /// The built-in prebuilt voice set.
    pub fn prebuilt() -> Self {
        Self::new(
            PREBUILT_VOICES
                .iter()
                .map(|&(name, id, gender)| Voice::new(name, id, gender))
                .collect(),
        )
    }

    /// All voices, in display order.
    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    /// The first voice in the catalog.
    pub fn default_voice(&self) -> Option<&Voice> {
        self.voices.first()
    }

    /// Look up a voice by its id.
    pub fn get(&self, id: &VoiceId) -> Option<&Voice> {
        self.voices.iter().find(|v| &v.id == id)
    }

    /// Look up a voice by id or case-insensitive display name.
    pub fn find(&self, query: &str) -> Option<&Voice> {
        self.voices
            .iter()
            .find(|v| v.id.as_str() == query)
            .or_else(|| {
                self.voices
                    .iter()
                    .find(|v| v.name.eq_ignore_ascii_case(query))
            })
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}

impl Default for VoiceCatalog {
    fn default() -> Self {
        Self::prebuilt()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_prebuilt_catalog() {
        let catalog = VoiceCatalog::prebuilt();
        assert_eq!(catalog.len(), 8);
        assert_eq!(catalog.default_voice().unwrap().name, "Kore");
    }

    #[test]
    fn test_find_by_name_ignores_case() {
        let catalog = VoiceCatalog::prebuilt();
        let voice = catalog.find("puck").unwrap();
        assert_eq!(voice.id, VoiceId::new("Puck"));
        assert_eq!(voice.gender, Gender::Male);
        assert!(catalog.find("nobody").is_none());
    }

    #[test]
    fn test_voice_id_serializes_transparently() {
        let json = serde_json::to_string(&VoiceId::new("Kore")).unwrap();
        assert_eq!(json, "\"Kore\"");
    }
}
