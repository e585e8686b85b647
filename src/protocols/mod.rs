use std::{fmt, str::FromStr};

use serde_json::{Map, Value};

pub mod ollama_protocol;
pub mod open_webui_protocol;

pub use ollama_protocol::OllamaProtocol;
pub use open_webui_protocol::OpenWebUiProtocol;

/// Free-form generation options, passed through without validation.
pub type Options = Map<String, Value>;

/// Request body layout of one model-serving backend.
pub trait Protocol {
    fn request_json_body(&self, model: &str, prompt: &str, options: &Options) -> Value;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Ollama,
    OpenWebUi,
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown target: {0}")]
pub struct UnknownTarget(pub String);

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Ollama => "ollama",
            Target::OpenWebUi => "open-webui",
        }
    }

    pub fn protocol(&self) -> &'static dyn Protocol {
        match self {
            Target::Ollama => &OllamaProtocol,
            Target::OpenWebUi => &OpenWebUiProtocol,
        }
    }

    pub fn build_payload(&self, model: &str, prompt: &str, options: &Options) -> Value {
        self.protocol().request_json_body(model, prompt, options)
    }
}

impl FromStr for Target {
    type Err = UnknownTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ollama" => Ok(Target::Ollama),
            "open-webui" => Ok(Target::OpenWebUi),
            _ => Err(UnknownTarget(s.to_string())),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the request body for a target given by name.
///
/// An unknown target is logged and yields `None`; callers cannot proceed
/// without a payload.
pub fn build_payload(target: &str, model: &str, prompt: &str, options: &Options) -> Option<Value> {
    match target.parse::<Target>() {
        Ok(target) => Some(target.build_payload(model, prompt, options)),
        Err(e) => {
            tracing::error!("!!ERROR!! {}", e);
            None
        }
    }
}
