//! Voice pipeline profiles: which speech, language and voice backends run.
//!
//! The catalog is fixed at compile time. Only the current selection is
//! mutable, behind an `RwLock` in [`PipelineState`].

use serde::Serialize;
use std::sync::RwLock;
use tracing::info;

use crate::error::{HearthError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Asr {
    Whisper,
    Deepgram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Llm {
    Ollama,
    OpenAi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tts {
    Piper,
    ElevenLabs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineProfile {
    pub name: &'static str,
    pub asr: Asr,
    pub llm: Llm,
    pub tts: Tts,
    pub description: &'static str,
}

pub const PROFILES: &[PipelineProfile] = &[
    PipelineProfile {
        name: "local",
        asr: Asr::Whisper,
        llm: Llm::Ollama,
        tts: Tts::Piper,
        description: "Everything on-device; nothing leaves the house",
    },
    PipelineProfile {
        name: "cloud",
        asr: Asr::Deepgram,
        llm: Llm::OpenAi,
        tts: Tts::ElevenLabs,
        description: "Hosted speech and language services for best quality",
    },
    PipelineProfile {
        name: "hybrid",
        asr: Asr::Whisper,
        llm: Llm::OpenAi,
        tts: Tts::Piper,
        description: "Local speech in and out, hosted language model",
    },
];

pub fn find_profile(name: &str) -> Option<&'static PipelineProfile> {
    PROFILES.iter().find(|p| p.name == name)
}

pub struct PipelineState {
    current: RwLock<&'static PipelineProfile>,
}

impl PipelineState {
    /// Start on `default_profile`; an unknown name is an error.
    pub fn new(default_profile: &str) -> Result<Self> {
        let profile = find_profile(default_profile)
            .ok_or_else(|| HearthError::UnknownProfile(default_profile.to_string()))?;
        Ok(Self {
            current: RwLock::new(profile),
        })
    }

    pub fn current(&self) -> &'static PipelineProfile {
        match self.current.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn select(&self, name: &str) -> Result<&'static PipelineProfile> {
        let profile =
            find_profile(name).ok_or_else(|| HearthError::UnknownProfile(name.to_string()))?;
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = profile;
        info!(profile = profile.name, "pipeline profile selected");
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names() {
        let names: Vec<_> = PROFILES.iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["local", "cloud", "hybrid"]);
    }

    #[test]
    fn test_select_switches_current() {
        let state = PipelineState::new("local").unwrap();
        assert_eq!(state.current().llm, Llm::Ollama);
        let p = state.select("cloud").unwrap();
        assert_eq!(p.tts, Tts::ElevenLabs);
        assert_eq!(state.current().name, "cloud");
    }

    #[test]
    fn test_unknown_profile_keeps_selection() {
        let state = PipelineState::new("hybrid").unwrap();
        let err = state.select("turbo").unwrap_err();
        assert_eq!(err.code(), "unknown_profile");
        assert_eq!(state.current().name, "hybrid");
        assert!(PipelineState::new("turbo").is_err());
    }

    #[test]
    fn test_profile_serializes_lowercase_backends() {
        let json = serde_json::to_value(find_profile("cloud").unwrap()).unwrap();
        assert_eq!(json["asr"], "deepgram");
        assert_eq!(json["llm"], "openai");
        assert_eq!(json["tts"], "elevenlabs");
    }
}
