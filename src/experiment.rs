use std::{io, time::Instant};

use serde::{Deserialize, Serialize};
use serde_json::{ser::Formatter, Value};

use crate::{
    prompts::{Technique, UnknownTechnique},
    protocols::{Options, Target},
    requester::ModelClient,
    sanitizer::clean_json_response,
    DEFAULT_TEMPERATURE, NUM_CTX, NUM_PREDICT,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub technique: String,
    /// Parsed model answer, `None` when any step of the call failed.
    pub result: Option<Value>,
    /// Seconds spent in the model call, including sanitizing.
    pub time: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    #[error(transparent)]
    UnknownTechnique(#[from] UnknownTechnique),
    #[error("Failed to render prompt template: {0}")]
    Template(#[from] formatx::Error),
}

/// Runs prompting techniques against one model server.
pub struct ExperimentRunner<'a> {
    client: &'a ModelClient,
    target: Target,
}

impl<'a> ExperimentRunner<'a> {
    /// Requests go out in the Open WebUI format unless overridden.
    pub fn new(client: &'a ModelClient) -> Self {
        Self {
            client,
            target: Target::OpenWebUi,
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Send `prompt` and parse the answer as JSON.
    ///
    /// Failures are logged and turned into `None`, nothing is raised.
    pub async fn call_model(&self, model: &str, prompt: &str, temperature: f64) -> Option<Value> {
        let mut options = Options::new();
        options.insert("temperature".to_string(), temperature.into());
        options.insert("num_ctx".to_string(), NUM_CTX.into());
        options.insert("num_predict".to_string(), NUM_PREDICT.into());
        let payload = self.target.build_payload(model, prompt, &options);

        // failures are already logged by the client
        let outcome = self.client.send(Some(&payload)).await;
        if !outcome.is_success() {
            return None;
        }

        let Some(cleaned) = clean_json_response(&outcome.text) else {
            tracing::warn!(
                "Error: Could not clean JSON response. Raw response: {}",
                outcome.text
            );
            return None;
        };
        match serde_json::from_str(&cleaned) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::warn!("JSON Decode Error: {}", e);
                tracing::warn!("Problematic Response: {}", outcome.text);
                None
            }
        }
    }

    /// Run the technique named `technique` on `input_text`.
    ///
    /// An unknown name fails before any request is made.
    pub async fn run(
        &self,
        model: &str,
        technique: &str,
        input_text: &str,
        temperature: f64,
    ) -> Result<ExperimentResult, ExperimentError> {
        let technique = technique.parse::<Technique>()?;
        self.run_technique(model, technique, input_text, temperature)
            .await
    }

    pub async fn run_technique(
        &self,
        model: &str,
        technique: Technique,
        input_text: &str,
        temperature: f64,
    ) -> Result<ExperimentResult, ExperimentError> {
        let prompt = technique.render(input_text)?;
        let start = Instant::now();
        let result = self.call_model(model, &prompt, temperature).await;
        Ok(ExperimentResult {
            technique: technique.key().to_string(),
            result,
            time: start.elapsed().as_secs_f64(),
        })
    }

    /// Every technique in catalogue order, one after the other.
    pub async fn run_all(
        &self,
        model: &str,
        input_text: &str,
        temperature: f64,
    ) -> Result<Vec<ExperimentResult>, ExperimentError> {
        let mut results = Vec::with_capacity(Technique::ALL.len());
        for technique in Technique::ALL {
            results.push(
                self.run_technique(model, technique, input_text, temperature)
                    .await?,
            );
        }
        Ok(results)
    }

    /// Zero-shot analysis refined by a chain-of-thought call.
    ///
    /// The first answer, successful or not, is appended to the second prompt
    /// as "Initial Analysis".
    pub async fn chain(&self, model: &str, input_text: &str) -> Result<Option<Value>, ExperimentError> {
        let initial_prompt = Technique::ZeroShot.render(input_text)?;
        let initial_output = self
            .call_model(model, &initial_prompt, DEFAULT_TEMPERATURE)
            .await;

        let refined_prompt = chain_prompt(&Technique::Cot.render(input_text)?, initial_output.as_ref());
        Ok(self
            .call_model(model, &refined_prompt, DEFAULT_TEMPERATURE)
            .await)
    }
}

/// Second prompt of a chain: `base` followed by the first call's output.
///
/// Objects are embedded as spaced JSON in the order the model wrote them,
/// strings as their raw text, a missing output as `None`.
pub fn chain_prompt(base: &str, initial_output: Option<&Value>) -> String {
    let context = match initial_output {
        Some(object @ Value::Object(_)) => to_spaced_json(object),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => "None".to_string(),
    };
    format!("{}\n\nInitial Analysis: {}", base, context)
}

fn to_spaced_json(value: &Value) -> String {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    match value.serialize(&mut serializer) {
        Ok(()) => String::from_utf8(out).unwrap_or_else(|_| value.to_string()),
        Err(_) => value.to_string(),
    }
}

/// Single-line JSON with `", "` and `": "` separators and non-ASCII
/// characters escaped as `\uXXXX`.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        for c in fragment.chars() {
            if c.is_ascii() {
                writer.write_all(&[c as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use serde_json::json;

    use super::*;
    use crate::{
        config::Config,
        mock::{open_webui_reply, ollama_reply, MockReply, MockServer},
    };

    const MODEL: &str = "Llama-3.2-3B-Instruct";
    const INPUT: &str = "A system for managing library resources, including books, journals, and digital media.";

    fn client_for(server: &MockServer) -> ModelClient {
        ModelClient::new(Config::from_pairs([("URL_GENERATE", server.url())])).unwrap()
    }

    #[test]
    fn test_chain_prompt_embeds_object_as_json() {
        let initial = json!({"functional": ["Borrow books"], "non_functional": []});
        let prompt = chain_prompt("BASE", Some(&initial));
        assert_eq!(
            prompt,
            "BASE\n\nInitial Analysis: {\"functional\": [\"Borrow books\"], \"non_functional\": []}"
        );
    }

    #[test]
    fn test_chain_prompt_keeps_model_key_order() {
        let initial: Value =
            serde_json::from_str(r#"{"non_functional":["Secure"],"functional":["Borrow", "Return"]}"#).unwrap();
        assert_eq!(
            chain_prompt("BASE", Some(&initial)),
            r#"BASE

Initial Analysis: {"non_functional": ["Secure"], "functional": ["Borrow", "Return"]}"#
        );
    }

    #[test]
    fn test_chain_prompt_escapes_non_ascii() {
        let initial = json!({"functional": ["Café 📚"], "note": "a\"b"});
        assert_eq!(
            chain_prompt("BASE", Some(&initial)),
            r#"BASE

Initial Analysis: {"functional": ["Caf\u00e9 \ud83d\udcda"], "note": "a\"b"}"#
        );
    }

    #[test]
    fn test_chain_prompt_embeds_raw_values() {
        assert_eq!(chain_prompt("BASE", None), "BASE\n\nInitial Analysis: None");
        assert_eq!(
            chain_prompt("BASE", Some(&json!("plain answer"))),
            "BASE\n\nInitial Analysis: plain answer"
        );
        assert_eq!(
            chain_prompt("BASE", Some(&json!(["p1", "p2"]))),
            "BASE\n\nInitial Analysis: [\"p1\",\"p2\"]"
        );
    }

    #[tokio::test]
    async fn test_run_parses_fenced_answer() {
        let answer = "Here you go:\n```json\n{\"functional\": [\"Catalog search\",], \"non_functional\": [\"Available 24/7\"]}\n```";
        let server = MockServer::start(move |_| open_webui_reply(MODEL, answer))
            .await
            .unwrap();
        let client = client_for(&server);

        let result = ExperimentRunner::new(&client)
            .run(MODEL, "few_shot", INPUT, 0.3)
            .await
            .unwrap();
        assert_eq!(result.technique, "few_shot");
        assert_eq!(
            result.result,
            Some(json!({"functional": ["Catalog search"], "non_functional": ["Available 24/7"]}))
        );
        assert!(result.time >= 0.0);

        let request = server.requests().recv_async().await.unwrap();
        let payload = request.json().unwrap();
        assert_eq!(payload["model"], json!(MODEL));
        assert!(payload["messages"][0]["content"]
            .as_str()
            .unwrap()
            .ends_with(INPUT));
        assert!(payload.get("options").is_none());
    }

    #[tokio::test]
    async fn test_ollama_target_carries_options() {
        let server = MockServer::start(|_| ollama_reply(MODEL, "{\"functional\": [], \"non_functional\": []}"))
            .await
            .unwrap();
        let client = client_for(&server);

        let result = ExperimentRunner::new(&client)
            .with_target(Target::Ollama)
            .run(MODEL, "cot", INPUT, 0.7)
            .await
            .unwrap();
        assert_eq!(result.result, Some(json!({"functional": [], "non_functional": []})));

        let payload = server.requests().recv_async().await.unwrap().json().unwrap();
        assert_eq!(payload["stream"], json!(false));
        assert_eq!(
            payload["options"],
            json!({"temperature": 0.7, "num_ctx": NUM_CTX, "num_predict": NUM_PREDICT})
        );
    }

    #[tokio::test]
    async fn test_unknown_technique_is_an_error() {
        let server = MockServer::start(|_| open_webui_reply(MODEL, "{}")).await.unwrap();
        let client = client_for(&server);

        let err = ExperimentRunner::new(&client)
            .run(MODEL, "tree_of_thought", INPUT, 0.7)
            .await
            .unwrap_err();
        assert!(matches!(err, ExperimentError::UnknownTechnique(_)));
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn test_failures_become_null_results() {
        let server = MockServer::start(|_| MockReply::new(http::StatusCode::INTERNAL_SERVER_ERROR, "{\"error\": \"boom\"}"))
            .await
            .unwrap();
        let client = client_for(&server);
        let runner = ExperimentRunner::new(&client);

        let result = runner.run(MODEL, "zero_shot", INPUT, 0.7).await.unwrap();
        assert_eq!(result.result, None);

        let server = MockServer::start(|_| open_webui_reply(MODEL, "I cannot help with that."))
            .await
            .unwrap();
        let client = client_for(&server);
        let result = ExperimentRunner::new(&client)
            .run(MODEL, "zero_shot", INPUT, 0.7)
            .await
            .unwrap();
        assert_eq!(result.result, None);
    }

    #[tokio::test]
    async fn test_run_all_in_catalogue_order() {
        let server = MockServer::start(|_| open_webui_reply(MODEL, "[\"Prompt 1\", \"Prompt 2\", \"Prompt 3\"]"))
            .await
            .unwrap();
        let client = client_for(&server);

        let results = ExperimentRunner::new(&client)
            .run_all(MODEL, INPUT, 0.7)
            .await
            .unwrap();
        let techniques = results.iter().map(|r| r.technique.as_str()).collect::<Vec<_>>();
        assert_eq!(techniques, ["zero_shot", "few_shot", "cot", "automated_prompt"]);
        assert!(results
            .iter()
            .all(|r| r.result == Some(json!(["Prompt 1", "Prompt 2", "Prompt 3"]))));
    }

    #[tokio::test]
    async fn test_chain_feeds_first_answer_into_second_prompt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let server = MockServer::start(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                open_webui_reply(MODEL, "```json\n{\"non_functional\":[\"Secure\"],\"functional\":[\"Borrow books\"]}\n```")
            } else {
                open_webui_reply(MODEL, "{\"functional\": [\"Borrow books\", \"Return books\"], \"non_functional\": [\"Secure\"]}")
            }
        })
        .await
        .unwrap();
        let client = client_for(&server);

        let result = ExperimentRunner::new(&client).chain(MODEL, INPUT).await.unwrap();
        assert_eq!(
            result,
            Some(json!({"functional": ["Borrow books", "Return books"], "non_functional": ["Secure"]}))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let _first = server.requests().recv_async().await.unwrap();
        let second = server.requests().recv_async().await.unwrap().json().unwrap();
        let content = second["messages"][0]["content"].as_str().unwrap();
        assert!(content.starts_with(&Technique::Cot.render(INPUT).unwrap()));
        assert!(content.ends_with(
            "\n\nInitial Analysis: {\"non_functional\": [\"Secure\"], \"functional\": [\"Borrow books\"]}"
        ));
    }

    #[tokio::test]
    async fn test_chain_with_failed_first_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let server = MockServer::start(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                open_webui_reply(MODEL, "no json at all")
            } else {
                open_webui_reply(MODEL, "{\"functional\": [], \"non_functional\": []}")
            }
        })
        .await
        .unwrap();
        let client = client_for(&server);

        let result = ExperimentRunner::new(&client).chain(MODEL, INPUT).await.unwrap();
        assert!(result.is_some());

        let _first = server.requests().recv_async().await.unwrap();
        let second = server.requests().recv_async().await.unwrap().json().unwrap();
        assert!(second["messages"][0]["content"]
            .as_str()
            .unwrap()
            .ends_with("\n\nInitial Analysis: None"));
    }
}
