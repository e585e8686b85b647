use serde_json::Value;

use super::{Options, Protocol};

/// `POST /api/generate` of an Ollama server, non-streaming.
pub struct OllamaProtocol;

impl Protocol for OllamaProtocol {
    fn request_json_body(&self, model: &str, prompt: &str, options: &Options) -> Value {
        let mut json_body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
        });
        if !options.is_empty() {
            json_body["options"] = Value::Object(options.clone());
        }
        json_body
    }
}
