//! Layered JSON configuration.
//!
//! The on-disk document is sparse: users only write the leaves they care
//! about. [`ConfigStore::load`] merges it leaf-by-leaf over the compiled-in
//! [`SCHEMA`] defaults, so the merged view always contains every key with a
//! value of the declared type. Mutations rewrite the whole merged document
//! through a temp file and a rename.
//!
//! # Example file
//!
//! ```json
//! {
//!   "general": { "llm": "openai" },
//!   "openai": { "api_key": "sk-..." },
//!   "search": { "shell_history": "/home/me/.zsh_history" }
//! }
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::history;
use crate::provider::ProviderKind;

/// Declared type of a configuration leaf.
#[derive(Debug, Clone, Copy)]
pub enum LeafType {
    Text,
    Flag,
    Integer { min: u64, max: u64 },
    Choice(&'static [&'static str]),
}

/// Compiled-in default of a configuration leaf.
#[derive(Debug, Clone, Copy)]
pub enum LeafDefault {
    Text(&'static str),
    Flag(bool),
    Integer(u64),
    /// Optional text leaf; resolved by a collaborator at runtime.
    Unset,
}

impl LeafDefault {
    fn to_value(self) -> Value {
        match self {
            LeafDefault::Text(s) => Value::String(s.to_string()),
            LeafDefault::Flag(b) => Value::Bool(b),
            LeafDefault::Integer(n) => Value::from(n),
            LeafDefault::Unset => Value::Null,
        }
    }
}

/// One addressable leaf in the configuration tree.
#[derive(Debug)]
pub struct SchemaEntry {
    pub key: &'static str,
    pub ty: LeafType,
    pub default: LeafDefault,
    pub secret: bool,
    pub description: &'static str,
}

impl SchemaEntry {
    const fn new(
        key: &'static str,
        ty: LeafType,
        default: LeafDefault,
        description: &'static str,
    ) -> Self {
        Self {
            key,
            ty,
            default,
            secret: false,
            description,
        }
    }

    const fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    fn optional(&self) -> bool {
        matches!(self.default, LeafDefault::Unset)
    }

    /// Human-readable description of the accepted values.
    pub fn expected(&self) -> String {
        match self.ty {
            LeafType::Text if self.optional() => "a string (empty to unset)".to_string(),
            LeafType::Text => "a non-empty string".to_string(),
            LeafType::Flag => "a boolean (true or false)".to_string(),
            LeafType::Integer { min, max } => format!("an integer from {} to {}", min, max),
            LeafType::Choice(choices) => format!("one of: {}", choices.join(", ")),
        }
    }

    /// Check an already-typed JSON value against this leaf.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self.ty, value) {
            (_, Value::Null) => self.optional(),
            (LeafType::Text, Value::String(s)) => self.optional() || !s.trim().is_empty(),
            (LeafType::Flag, Value::Bool(_)) => true,
            (LeafType::Integer { min, max }, Value::Number(n)) => {
                n.as_u64().is_some_and(|n| (min..=max).contains(&n))
            }
            (LeafType::Choice(choices), Value::String(s)) => choices.contains(&s.as_str()),
            _ => false,
        }
    }

    /// Parse a raw command-line string into a value of this leaf's type.
    pub fn parse(&self, raw: &str) -> Result<Value, ConfigError> {
        let mismatch = || ConfigError::TypeMismatch {
            key: self.key.to_string(),
            expected: self.expected(),
            value: raw.to_string(),
        };
        let value = match self.ty {
            LeafType::Text if raw.is_empty() && self.optional() => Value::Null,
            LeafType::Text => Value::String(raw.to_string()),
            LeafType::Flag => Value::Bool(raw.trim().parse::<bool>().map_err(|_| mismatch())?),
            LeafType::Integer { .. } => {
                Value::from(raw.trim().parse::<u64>().map_err(|_| mismatch())?)
            }
            LeafType::Choice(_) => Value::String(raw.trim().to_string()),
        };
        if self.accepts(&value) {
            Ok(value)
        } else {
            Err(mismatch())
        }
    }
}

/// Upper bound for integer leaves; fits every numeric settings field.
const U32_MAX: u64 = u32::MAX as u64;

/// Every configuration key the tool understands.
pub const SCHEMA: &[SchemaEntry] = &[
    SchemaEntry::new(
        "general.llm",
        LeafType::Choice(&["ollama", "openai"]),
        LeafDefault::Text("ollama"),
        "The LLM provider used for suggestions and embeddings",
    ),
    SchemaEntry::new(
        "general.access_to_shell_history",
        LeafType::Flag,
        LeafDefault::Flag(true),
        "Whether the shell history may be read (required by search)",
    ),
    SchemaEntry::new(
        "general.timeout_secs",
        LeafType::Integer { min: 1, max: U32_MAX },
        LeafDefault::Integer(30),
        "Timeout in seconds for a single provider request",
    ),
    SchemaEntry::new(
        "general.max_retries",
        LeafType::Integer { min: 0, max: U32_MAX },
        LeafDefault::Integer(2),
        "Retries for rate-limited, failing, or unreachable provider requests",
    ),
    SchemaEntry::new(
        "suggest.mode",
        LeafType::Choice(&["clipboard", "unsafe-execution"]),
        LeafDefault::Text("unsafe-execution"),
        "What to do with an accepted suggestion: copy it or execute it",
    ),
    SchemaEntry::new(
        "suggest.add_to_history",
        LeafType::Flag,
        LeafDefault::Flag(false),
        "Append executed suggestions to the shell history file",
    ),
    SchemaEntry::new(
        "search.allow_remote_llm",
        LeafType::Flag,
        LeafDefault::Flag(true),
        "Allow sending shell history to a remote provider for embedding",
    ),
    SchemaEntry::new(
        "search.shell_history",
        LeafType::Text,
        LeafDefault::Unset,
        "Path to the shell history file (defaults to $HISTFILE or the shell's default)",
    ),
    SchemaEntry::new(
        "search.index_dir",
        LeafType::Text,
        LeafDefault::Unset,
        "Directory holding the embedding index (defaults to the user data directory)",
    ),
    SchemaEntry::new(
        "search.top_k",
        LeafType::Integer { min: 1, max: U32_MAX },
        LeafDefault::Integer(5),
        "Number of matches returned by search",
    ),
    SchemaEntry::new(
        "search.concurrency",
        LeafType::Integer { min: 1, max: U32_MAX },
        LeafDefault::Integer(4),
        "Embedding requests kept in flight while indexing",
    ),
    SchemaEntry::new(
        "ollama.base_url",
        LeafType::Text,
        LeafDefault::Text("http://localhost:11434"),
        "Base URL of the Ollama server",
    ),
    SchemaEntry::new(
        "ollama.model",
        LeafType::Text,
        LeafDefault::Text("codestral:latest"),
        "Ollama model used for suggestions",
    ),
    SchemaEntry::new(
        "ollama.embedding_model",
        LeafType::Text,
        LeafDefault::Text("nomic-embed-text:latest"),
        "Ollama model used for embeddings",
    ),
    SchemaEntry::new(
        "openai.api_endpoint",
        LeafType::Text,
        LeafDefault::Text("https://api.openai.com/v1"),
        "Base URL of the OpenAI-compatible API",
    ),
    SchemaEntry::new(
        "openai.model",
        LeafType::Text,
        LeafDefault::Text("gpt-4o-mini"),
        "OpenAI model used for suggestions",
    ),
    SchemaEntry::new(
        "openai.embedding_model",
        LeafType::Text,
        LeafDefault::Text("text-embedding-ada-002"),
        "OpenAI model used for embeddings",
    ),
    SchemaEntry::new(
        "openai.api_key",
        LeafType::Text,
        LeafDefault::Unset,
        "OpenAI API key",
    )
    .secret(),
];

/// Look up the schema entry for a dot-path.
pub fn schema_entry(key: &str) -> Option<&'static SchemaEntry> {
    SCHEMA.iter().find(|e| e.key == key)
}

/// Default location of the configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("magic-cli").join("config.json"))
}

/// The full document with every leaf at its default.
pub fn defaults_document() -> Value {
    let mut doc = Value::Object(Map::new());
    for entry in SCHEMA {
        insert(&mut doc, entry.key, entry.default.to_value());
    }
    doc
}

fn lookup<'a>(doc: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(doc, |node, segment| node.get(segment))
}

fn insert(doc: &mut Value, key: &str, value: Value) {
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    let Value::Object(map) = doc else {
        return;
    };
    match key.split_once('.') {
        None => {
            map.insert(key.to_string(), value);
        }
        Some((head, rest)) => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            insert(child, rest, value);
        }
    }
}

/// Deep-merge `overlay` into `base`: objects merge per key, anything else
/// replaces the base value.
fn merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                match base_map.get_mut(k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Render a leaf value for `config get` / `config list`.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The merged configuration for one invocation, bound to its file path.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    document: Value,
}

impl ConfigStore {
    /// Load `path` and merge it over the schema defaults.
    ///
    /// A missing file is an empty document. A file that exists but cannot be
    /// read or is not a JSON object is a [`ConfigError::Io`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let user = match std::fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => Value::Object(Map::new()),
            Ok(content) => {
                serde_json::from_str::<Value>(&content).map_err(|e| ConfigError::io(path, e))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Value::Object(Map::new()),
            Err(e) => return Err(ConfigError::io(path, e)),
        };
        if !user.is_object() {
            return Err(ConfigError::io(path, "expected a JSON object at the top level"));
        }

        let mut document = defaults_document();
        merge(&mut document, &user);

        for entry in SCHEMA {
            let valid = lookup(&document, entry.key).is_some_and(|v| entry.accepts(v));
            if !valid {
                tracing::warn!(
                    key = entry.key,
                    "invalid value in {}, using default",
                    path.display()
                );
                insert(&mut document, entry.key, entry.default.to_value());
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            document,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Resolve a dot-path through the merged view.
    pub fn get(&self, key: &str) -> Result<&Value, ConfigError> {
        schema_entry(key).ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        lookup(&self.document, key).ok_or_else(|| ConfigError::UnknownKey(key.to_string()))
    }

    /// Parse `raw` according to the leaf's type, then persist it.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<(), ConfigError> {
        let entry = schema_entry(key).ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        let value = entry.parse(raw)?;
        self.set_value(key, value)
    }

    /// Persist an already-typed value. The stored value is untouched on error.
    pub fn set_value(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        let entry = schema_entry(key).ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        if !entry.accepts(&value) {
            return Err(ConfigError::TypeMismatch {
                key: key.to_string(),
                expected: entry.expected(),
                value: display_value(&value),
            });
        }
        let mut next = self.document.clone();
        insert(&mut next, key, value);
        write_atomic(&self.path, &next)?;
        self.document = next;
        Ok(())
    }

    /// Discard every user override and write the pure-defaults document.
    pub fn reset(&mut self) -> Result<(), ConfigError> {
        let defaults = defaults_document();
        write_atomic(&self.path, &defaults)?;
        self.document = defaults;
        Ok(())
    }

    /// Typed snapshot of the merged view.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        serde_json::from_value(self.document.clone()).map_err(|e| ConfigError::io(&self.path, e))
    }
}

/// Write `doc` next to `path` and rename it into place.
fn write_atomic(path: &Path, doc: &Value) -> Result<(), ConfigError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::io(path, e))?;

    let content = serde_json::to_string_pretty(doc).map_err(|e| ConfigError::io(path, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| ConfigError::io(path, e))?;
    let write = |tmp: &mut tempfile::NamedTempFile| -> std::io::Result<()> {
        tmp.write_all(content.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()
    };
    write(&mut tmp).map_err(|e| ConfigError::io(path, e))?;
    tmp.persist(path).map_err(|e| ConfigError::io(path, e.error))?;
    Ok(())
}

/// What to do with a command the user accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SuggestMode {
    #[serde(rename = "clipboard")]
    Clipboard,
    #[serde(rename = "unsafe-execution")]
    UnsafeExecution,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub general: GeneralSettings,
    pub suggest: SuggestSettings,
    pub search: SearchSettings,
    pub ollama: OllamaSettings,
    pub openai: OpenAiSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralSettings {
    pub llm: ProviderKind,
    pub access_to_shell_history: bool,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuggestSettings {
    pub mode: SuggestMode,
    pub add_to_history: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSettings {
    pub allow_remote_llm: bool,
    pub shell_history: Option<PathBuf>,
    pub index_dir: Option<PathBuf>,
    pub top_k: usize,
    pub concurrency: usize,
}

impl SearchSettings {
    /// Configured history path, or the shell's default.
    pub fn history_path(&self) -> Option<PathBuf> {
        self.shell_history
            .clone()
            .or_else(history::default_history_path)
    }

    /// Configured index directory, or `<data dir>/magic-cli/index`.
    pub fn index_dir(&self) -> Option<PathBuf> {
        self.index_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("magic-cli").join("index")))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaSettings {
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiSettings {
    pub api_endpoint: String,
    pub model: String,
    pub embedding_model: String,
    pub api_key: Option<String>,
}
