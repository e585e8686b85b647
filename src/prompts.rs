//! Prompt templates for requirement extraction.
//!
//! Every template carries a single `{input}` placeholder; literal braces are
//! doubled.

use std::{fmt, str::FromStr};

use formatx::formatx;

const ZERO_SHOT: &str = r#"You are an AI assistant for software requirement analyst. Extract functional and non-functional requirements from the following user story.  Provide the output in JSON format with "functional" and "non_functional" keys, each containing a list of strings.
    The JSON must be a valid JSON object with two keys: "functional" and "non_functional".  Each key should have a value that is a JSON array of strings.
    The JSON should have the following format:

    ```json
    {{
        Extract functional requirements", "Extract non-functional requirements", "Summarize key features"
    }}
    ```
    user story: {input}"#;

const FEW_SHOT: &str = r#"
    You are a meticulous software requirements analyst. Extract highly specific and actionable functional and non-functional requirements from the following description and return them as valid JSON.  Do NOT include any other text in your response.  Just the JSON.

    The JSON must be a valid JSON object with two keys: "functional" and "non_functional".  Each key should have a value that is a JSON array of strings.

    Example 1:
    user story: A mobile banking app.
    {{
      "functional": ["Users can transfer money", "Users can check balance"],
      "non_functional": ["Security: Multi-factor authentication", "Performance: Fast processing"]
    }}

    Now analyze: {input}"#;

const COT: &str = r#"Step-by-step requirement analysis:
    You are an AI assistant for software requirement analysis.  Your ONLY job is to extract functional and non-functional requirements from the following description and return them as valid JSON.  Do NOT include any other text in your response.  Just the JSON.

    The JSON must be a valid JSON object with two keys: "functional" and "non_functional".  Each key should have a value that is a JSON array of strings.

    1. Identify key features.
    2. Separate functional and non-functional needs.
    3. Format output in JSON with "functional" and "non_functional" keys, each containing a list of strings.

    Project Description: {input}"#;

const AUTOMATED_PROMPT: &str = r#"
    You are an AI assistant for software requirement analysis.  Your ONLY job is to generate three different prompts for requirement extraction from the following description.  Return the prompts as a valid JSON array of strings. Do NOT include any other text in your response.  Just the JSON.

    Example:
    ```json
    [
      "Prompt 1",
      "Prompt 2",
      "Prompt 3"
    ]
    ```

    Description: {input}
    "#;

/// A prompting strategy with its fixed template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Technique {
    ZeroShot,
    FewShot,
    Cot,
    AutomatedPrompt,
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown technique: {0}")]
pub struct UnknownTechnique(pub String);

impl Technique {
    /// Catalogue order, used when running every technique.
    pub const ALL: [Technique; 4] = [
        Technique::ZeroShot,
        Technique::FewShot,
        Technique::Cot,
        Technique::AutomatedPrompt,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Technique::ZeroShot => "zero_shot",
            Technique::FewShot => "few_shot",
            Technique::Cot => "cot",
            Technique::AutomatedPrompt => "automated_prompt",
        }
    }

    pub fn template(&self) -> &'static str {
        match self {
            Technique::ZeroShot => ZERO_SHOT,
            Technique::FewShot => FEW_SHOT,
            Technique::Cot => COT,
            Technique::AutomatedPrompt => AUTOMATED_PROMPT,
        }
    }

    /// Substitute `input` into the template.
    pub fn render(&self, input: &str) -> Result<String, formatx::Error> {
        formatx!(self.template(), input = input)
    }
}

impl FromStr for Technique {
    type Err = UnknownTechnique;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Technique::ALL
            .into_iter()
            .find(|technique| technique.key() == s)
            .ok_or_else(|| UnknownTechnique(s.to_string()))
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
