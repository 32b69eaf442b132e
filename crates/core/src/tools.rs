//! The fixed set of local actions the realtime engine may invoke.
//!
//! The engine only knows the tools declared here. Each declaration carries a
//! name, a description and an argument schema in the engine's OpenAPI subset
//! (upper-case type names).

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;

/// Every tool the session declares to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    /// Switch the user's video input camera (e.g. front to back).
    SwitchCamera,
    /// Search for a video and open the results.
    PlayYoutube,
    /// Reset the UI to its default state.
    ResetMirror,
}

impl ToolName {
    pub const ALL: [ToolName; 3] = [
        ToolName::SwitchCamera,
        ToolName::PlayYoutube,
        ToolName::ResetMirror,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::SwitchCamera => "switch_camera",
            ToolName::PlayYoutube => "play_youtube",
            ToolName::ResetMirror => "reset_mirror",
        }
    }

    /// The declaration sent to the engine in the session setup.
    pub fn declaration(&self) -> FunctionDeclaration {
        match self {
            ToolName::SwitchCamera => FunctionDeclaration {
                name: self.as_str().to_string(),
                description: "Switch the user video input camera (e.g. front to back).".to_string(),
                parameters: json!({ "type": "OBJECT", "properties": {} }),
            },
            ToolName::PlayYoutube => FunctionDeclaration {
                name: self.as_str().to_string(),
                description: "Play a YouTube video or search for a video.".to_string(),
                parameters: json!({
                    "type": "OBJECT",
                    "properties": {
                        "query": { "type": "STRING", "description": "Search query for the video" }
                    },
                    "required": ["query"]
                }),
            },
            ToolName::ResetMirror => FunctionDeclaration {
                name: self.as_str().to_string(),
                description: "Reset the UI or mirror display to default state.".to_string(),
                parameters: json!({ "type": "OBJECT", "properties": {} }),
            },
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when the engine names a tool outside the declared set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown tool: {0}")]
pub struct UnknownTool(pub String);

impl FromStr for ToolName {
    type Err = UnknownTool;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTool(s.to_string()))
    }
}

/// Declarations for every tool, in declaration order.
pub fn declarations() -> Vec<FunctionDeclaration> {
    ToolName::ALL.iter().map(ToolName::declaration).collect()
}

/// A function declaration as the engine expects it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Arguments of the `play_youtube` tool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayYoutubeArgs {
    pub query: String,
}

/// A request from the engine to run a local action.
///
/// `name` stays a raw string: the engine is not bound to our enum, and an
/// unknown name still needs an answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// The single answer to a [`ToolCall`], correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl ToolResponse {
    pub fn result(call: &ToolCall, response: Value) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            response,
        }
    }

    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self::result(call, json!({ "error": message.into() }))
    }

    pub fn is_error(&self) -> bool {
        self.response.get("error").is_some()
    }
}
