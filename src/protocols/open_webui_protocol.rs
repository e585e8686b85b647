use serde_json::Value;

use super::{Options, Protocol};

/// OpenAI-style chat completion body as served by Open WebUI.
pub struct OpenWebUiProtocol;

impl Protocol for OpenWebUiProtocol {
    /// Options are not attached: none of the layouts tried so far (top level
    /// keys, nested `options`) were honoured by the server, so the body only
    /// carries the model and the user message.
    fn request_json_body(&self, model: &str, prompt: &str, options: &Options) -> Value {
        if !options.is_empty() {
            tracing::debug!(
                dropped = ?options.keys().collect::<Vec<_>>(),
                "open-webui payload does not carry options"
            );
        }
        serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
        })
    }
}
