//! Built-in persona and model defaults for the live session.

use crate::generic_types::LiveSessionConfig;
use crate::tools;

pub const LIVE_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_VOICE: &str = "Kore";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Calm,
    Alert,
    Empathic,
}

#[derive(Debug, Clone)]
pub struct PersonaConfig {
    pub name: String,
    pub tone: Tone,
    pub system_instruction: String,
}

impl PersonaConfig {
    pub fn jarvis() -> Self {
        Self {
            name: "JARVIS".to_string(),
            tone: Tone::Calm,
            system_instruction: JARVIS_INSTRUCTION.to_string(),
        }
    }

    /// Builds the fixed session configuration: audio replies, transcription in
    /// both directions and every declared tool.
    pub fn live_config(&self, model: impl Into<String>, voice: impl Into<String>) -> LiveSessionConfig {
        LiveSessionConfig {
            model: model.into(),
            instructions: self.system_instruction.clone(),
            voice: voice.into(),
            tools: tools::declarations(),
            input_transcription: true,
            output_transcription: true,
        }
    }
}

const JARVIS_INSTRUCTION: &str = "\
You are J.A.R.V.I.S (Just A Rather Very Intelligent System).

Role:
You are a highly capable assistant. You are composed, precise and professional.

How to respond:
1. Speak concisely and get to the point, executive-summary style.
2. Keep a formal but modern register.
3. You can control the interface: call switch_camera when the user wants you to look at something,
   play_youtube to search for and open a video, and reset_mirror to restore the default display.
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_config_declares_all_tools_and_transcription() {
        let config = PersonaConfig::jarvis().live_config(LIVE_MODEL, DEFAULT_VOICE);
        assert_eq!(config.model, LIVE_MODEL);
        assert_eq!(config.voice, "Kore");
        assert!(config.instructions.contains("J.A.R.V.I.S"));
        assert_eq!(config.tools.len(), 3);
        assert!(config.input_transcription);
        assert!(config.output_transcription);
    }
}
