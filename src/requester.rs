use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use reqwest::{header::CONTENT_TYPE, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{Config, ConfigError};

/// `elapsed` value of a failed request.
pub const FAILED: f64 = -1.0;

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("!!ERROR!! Problem loading prompt-eng/_config")]
    Config(#[source] Arc<ConfigError>),
    #[error("!!ERROR!! Request failed! You need to adjust prompt-eng/config with URL({url})")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("!!ERROR!! There was no response (?)")]
    NoResponse(#[source] reqwest::Error),
    #[error("!!ERROR!! Authentication issue. You need to adjust prompt-eng/config with API_KEY ({url})")]
    Unauthorized { url: String },
    #[error("!!ERROR!! HTTP Response={code}, {body}")]
    Status { code: u16, body: String },
}

/// Elapsed seconds and text of one request.
///
/// `elapsed == FAILED` marks a failure, `text` is then the error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseOutcome {
    pub elapsed: f64,
    pub text: String,
}

impl ResponseOutcome {
    pub fn success(elapsed: f64, text: String) -> Self {
        Self { elapsed, text }
    }

    pub fn failure(error: &RequestError) -> Self {
        Self {
            elapsed: FAILED,
            text: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.elapsed >= 0.0
    }
}

impl From<Result<(f64, String), RequestError>> for ResponseOutcome {
    fn from(result: Result<(f64, String), RequestError>) -> Self {
        match result {
            Ok((elapsed, text)) => Self::success(elapsed, text),
            Err(e) => Self::failure(&e),
        }
    }
}

fn round_millis(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}

/// Client of the model server.
///
/// Holds the configuration it was built with; nothing is re-read between
/// requests. One request is in flight per `send` and nothing is retried.
pub struct ModelClient {
    config: Result<Config, Arc<ConfigError>>,
    http: reqwest::Client,
    timeout: Option<Duration>,
}

impl ModelClient {
    /// Fails only when the HTTP client cannot be built (TLS backend init).
    pub fn new(config: Config) -> reqwest::Result<Self> {
        Self::from_config(Ok(config))
    }

    /// Load the config from the default locations. A failed load is kept and
    /// reported by every `send`.
    pub fn discover() -> reqwest::Result<Self> {
        Self::from_config(Config::discover())
    }

    pub fn discover_in(base: impl AsRef<std::path::Path>) -> reqwest::Result<Self> {
        Self::from_config(Config::discover_in(base))
    }

    fn from_config(config: Result<Config, ConfigError>) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().no_proxy().build()?;
        if let Err(e) = &config {
            tracing::error!("{}", e);
        }
        Ok(Self {
            config: config.map_err(Arc::new),
            http,
            timeout: None,
        })
    }

    /// Bound every request by `timeout`. Without it an unresponsive server
    /// blocks the caller indefinitely.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn config(&self) -> Option<&Config> {
        self.config.as_ref().ok()
    }

    /// Send `payload` and fold the outcome into the `(elapsed, text)` contract.
    pub async fn send(&self, payload: Option<&Value>) -> ResponseOutcome {
        let result = self.try_send(payload).await;
        if let Err(e) = &result {
            tracing::error!("{}", e);
        }
        result.into()
    }

    pub async fn try_send(&self, payload: Option<&Value>) -> Result<(f64, String), RequestError> {
        let config = self.config.as_ref().map_err(|e| RequestError::Config(e.clone()))?;
        let url = config
            .url_generate()
            .map_err(|e| RequestError::Config(Arc::new(e)))?;

        let mut request = self
            .http
            .post(url.as_str())
            .header(CONTENT_TYPE, "application/json");
        if let Some(api_key) = config.api_key() {
            request = request.bearer_auth(api_key);
        }
        match payload.filter(|payload| !is_empty(payload)) {
            Some(payload) => {
                tracing::info!("{}", payload);
                request = request.body(payload.to_string());
            }
            None => tracing::info!("sending request without payload"),
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let start = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|source| RequestError::Transport {
                url: url.clone(),
                source,
            })?;
        let (status, body) = read_response(response).await?;
        let elapsed = start.elapsed().as_secs_f64();

        if status == StatusCode::OK {
            Ok((round_millis(elapsed), extract_text(&body)))
        } else if status == StatusCode::UNAUTHORIZED {
            Err(RequestError::Unauthorized { url })
        } else {
            Err(RequestError::Status {
                code: status.as_u16(),
                body,
            })
        }
    }
}

fn is_empty(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

async fn read_response(response: Response) -> Result<(StatusCode, String), RequestError> {
    let status = response.status();
    let body = response.text().await.map_err(RequestError::NoResponse)?;
    Ok((status, body))
}

/// Generated text of a successful response body.
///
/// Ollama answers with `response`, OpenAI-style servers with
/// `choices[0].message.content`. Anything else is returned pretty-printed.
pub fn extract_text(body: &str) -> String {
    let json = match serde_json::from_str::<Value>(body) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("Warning: Response body is not JSON ({}), returning it as is.", e);
            return body.to_string();
        }
    };

    if let Some(response) = json.get("response") {
        return match response {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
    }
    if json.get("choices").is_some() {
        if let Some(content) = json
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
        {
            return content.to_string();
        }
    }

    tracing::warn!("Warning: Unknown response format. Check the model server documentation.");
    serde_json::to_string_pretty(&json).unwrap_or_else(|_| body.to_string())
}
