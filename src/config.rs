use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// Candidate locations of the config file, searched in order.
pub const CONFIG_LOCATIONS: [&str; 3] = ["./_config", "prompt-eng/_config", "../_config"];

pub const URL_GENERATE: &str = "URL_GENERATE";
pub const API_KEY: &str = "API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found in any of the expected locations: {searched:?}")]
    NotFound { searched: Vec<PathBuf> },
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed configuration line {line}: {text:?}")]
    Parse { line: usize, text: String },
    #[error("Missing configuration key: {0}")]
    MissingKey(&'static str),
}

/// Key/value settings of the model server.
///
/// Loaded once and then only read. Keys missing from the file fall back to
/// the process environment.
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: BTreeMap<String, String>,
    source: Option<PathBuf>,
}

impl Config {
    /// Find the config file relative to the current directory.
    pub fn discover() -> Result<Self, ConfigError> {
        Self::discover_in(".")
    }

    /// Find the config file relative to `base`, first hit in [`CONFIG_LOCATIONS`] wins.
    pub fn discover_in(base: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let candidates = CONFIG_LOCATIONS
            .iter()
            .map(|location| base.as_ref().join(location))
            .collect::<Vec<_>>();

        match candidates.iter().find(|path| path.exists()) {
            Some(path) => Self::load(path),
            None => Err(ConfigError::NotFound {
                searched: candidates,
            }),
        }
    }

    /// Parse `KEY=VALUE` lines. Blank lines and `#` comments are skipped,
    /// a later key overwrites an earlier one.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let values = parse_config(&std::fs::read_to_string(path)?)?;
        tracing::debug!(path = %path.display(), keys = values.len(), "loaded config");
        Ok(Self {
            values,
            source: Some(path.to_path_buf()),
        })
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            source: None,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    }

    pub fn url_generate(&self) -> Result<String, ConfigError> {
        self.get(URL_GENERATE)
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::MissingKey(URL_GENERATE))
    }

    /// Bearer token, an empty value counts as no key.
    pub fn api_key(&self) -> Option<String> {
        self.get(API_KEY).filter(|key| !key.is_empty())
    }

    /// File this config was read from, `None` when built in memory.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

/// Split every line on its first `=` and trim both sides. Values are taken
/// literally: no quoting, no substitution, no inline comments.
pub fn parse_config(content: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut values = BTreeMap::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Parse {
            line: index + 1,
            text: line.to_string(),
        })?;
        values.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(values)
}
