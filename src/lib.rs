pub mod config;
pub mod experiment;
pub mod mock;
pub mod prompts;
pub mod protocols;
pub mod requester;
pub mod sanitizer;

pub use config::{Config, ConfigError};
pub use experiment::{ExperimentError, ExperimentResult, ExperimentRunner};
pub use prompts::Technique;
pub use protocols::{build_payload, Options, Protocol, Target};
pub use requester::{ModelClient, RequestError, ResponseOutcome};
pub use sanitizer::clean_json_response;

pub const DEFAULT_MODEL: &str = "Llama-3.2-3B-Instruct";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Context window requested from the model, in tokens.
pub const NUM_CTX: u64 = 100;
/// Tokens the model may generate per answer.
pub const NUM_PREDICT: u64 = 100;
