//! Natural-language prompt → one shell command.
//!
//! A request moves through `Validate → Invoke → Parse → Emit`:
//!
//! 1. **Validate**: [`Provider::from_settings`] checks the active provider's
//!    sub-keys. Nothing is sent when this fails.
//! 2. **Invoke**: the model gets [`system_prompt`] plus the user's request.
//! 3. **Parse**: [`parse_suggestion`] isolates exactly one command.
//! 4. **Emit**: `--output-only` prints the bare command; otherwise the
//!    [`interactive`](crate::interactive) layer takes over.
//!
//! # Response format
//!
//! The model is asked for one of
//!
//! ```json
//! {"command": "kubectl get pods -n <namespace>", "explanation": "List pods"}
//! {"error": "I could not understand the instructions"}
//! ```
//!
//! Models do not always comply, so a fenced JSON block, or plain text holding
//! a single command line, is accepted as well. Unmarked plain text that reads
//! like a sentence is refused rather than offered for execution.

use anyhow::Result;
use colored::Colorize;
use serde::Deserialize;
use sysinfo::System;

use crate::config::Settings;
use crate::error::SuggestError;
use crate::interactive;
use crate::provider::{LanguageModel, Provider};

/// A parsed model suggestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestedCommand {
    pub command: String,
    pub explanation: Option<String>,
}

/// Host details embedded in the prompt so suggestions fit the user's shell.
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub shell: String,
    pub os: String,
    pub os_version: String,
    pub arch: String,
}

impl SystemInfo {
    /// Falls back to the compile-time target when the OS cannot be queried.
    pub fn detect() -> Self {
        let shell = std::env::var("SHELL")
            .ok()
            .and_then(|s| s.rsplit('/').next().map(str::to_string))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "sh".to_string());
        Self {
            shell,
            os: System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
            os_version: System::os_version().unwrap_or_else(|| "unknown".to_string()),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// Entry point for `magic-cli sysinfo`.
pub fn run_sysinfo() -> Result<()> {
    let info = SystemInfo::detect();
    println!("System information as detected by magic-cli:");
    println!();
    for (label, value) in [
        ("OS", &info.os),
        ("OS version", &info.os_version),
        ("CPU architecture", &info.arch),
        ("Shell", &info.shell),
    ] {
        println!("{}: {}", label.dimmed(), value.blue().bold());
    }
    Ok(())
}

pub fn system_prompt(info: &SystemInfo) -> String {
    format!(
        "You suggest a single command to run on the user's command line.\n\
         Reply with a JSON object and nothing else, in one of two forms:\n\
         - {{\"command\": \"<the command>\", \"explanation\": \"<one short sentence>\"}}\n\
         - {{\"error\": \"<why no command can be suggested>\"}}\n\
         Write every argument the user has to fill in as <argument_name>, \
         for example `kubectl logs -n <namespace> <pod-name>`, including paths \
         such as <path_to_file>.\n\
         Adjust the command to the user's system:\n\
         - Shell: {}\n\
         - OS: {} {}\n\
         - CPU architecture: {}\n",
        info.shell, info.os, info.os_version, info.arch
    )
}

fn revision_prompt(previous: &SuggestedCommand, instruction: &str) -> String {
    format!(
        "The previous command was: `{}` (explanation: '{}')\n\
         Revise the command to satisfy this request: '{}'",
        previous.command,
        previous.explanation.as_deref().unwrap_or(""),
        instruction
    )
}

#[derive(Deserialize)]
struct ModelReply {
    command: Option<String>,
    explanation: Option<String>,
    error: Option<String>,
}

/// Isolate one command from raw model output.
///
/// # Errors
///
/// [`SuggestError::Parse`] for empty output, an `error` reply, JSON without a
/// command, a command spanning several lines, plain text with zero or several
/// candidate lines, or an unmarked line of prose.
pub fn parse_suggestion(raw: &str) -> Result<SuggestedCommand, SuggestError> {
    let (body, fenced) = strip_fence(raw.trim());
    let body = body.trim();
    if body.is_empty() {
        return Err(SuggestError::Parse("the model returned nothing".to_string()));
    }

    if body.starts_with('{') {
        let end = body.rfind('}').map(|i| i + 1).unwrap_or(body.len());
        let reply: ModelReply = serde_json::from_str(&body[..end])
            .map_err(|e| SuggestError::Parse(format!("invalid JSON: {}", e)))?;
        if let Some(error) = reply.error.filter(|e| !e.trim().is_empty()) {
            return Err(SuggestError::Parse(format!("the model declined: {}", error.trim())));
        }
        let command = reply
            .command
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| SuggestError::Parse("JSON reply has no command".to_string()))?;
        ensure_single_line(&command)?;
        return Ok(SuggestedCommand {
            command,
            explanation: reply
                .explanation
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
        });
    }

    let candidates: Vec<(&str, bool)> = body
        .lines()
        .map(clean_line)
        .filter(|(l, _)| !l.is_empty() && !l.starts_with('#'))
        .collect();
    match candidates.as_slice() {
        [(command, marked)] => {
            ensure_single_line(command)?;
            if !fenced && !marked && looks_like_prose(command) {
                return Err(SuggestError::Parse(format!(
                    "the response is not a command: {}",
                    command
                )));
            }
            Ok(SuggestedCommand {
                command: command.to_string(),
                explanation: None,
            })
        }
        [] => Err(SuggestError::Parse("no command line in the response".to_string())),
        many => Err(SuggestError::Parse(format!(
            "expected one command line, found {}",
            many.len()
        ))),
    }
}

/// Contents of the first fenced block and `true`, or `text` unchanged.
fn strip_fence(text: &str) -> (&str, bool) {
    let Some(start) = text.find("```") else {
        return (text, false);
    };
    let after = &text[start + 3..];
    // Skip the info string (```bash, ```json).
    let body = after.find('\n').map(|i| &after[i + 1..]).unwrap_or("");
    match body.find("```") {
        Some(end) => (&body[..end], true),
        None => (body, true),
    }
}

/// Strip a `$ ` prompt or backticks. The flag tells whether either was there.
fn clean_line(line: &str) -> (&str, bool) {
    let line = line.trim();
    let (line, prompt) = match line.strip_prefix("$ ") {
        Some(rest) => (rest, true),
        None => (line, false),
    };
    let quoted = line.len() > 1 && line.starts_with('`') && line.ends_with('`');
    (line.trim_matches('`').trim(), prompt || quoted)
}

fn ensure_single_line(command: &str) -> Result<(), SuggestError> {
    if command.contains(['\n', '\r']) {
        return Err(SuggestError::Parse(
            "the suggested command spans several lines".to_string(),
        ));
    }
    Ok(())
}

/// A sentence rather than a command: a word ending in `:`, `,` or `!`, or a
/// final `.`, `!` or `?` right after a letter.
fn looks_like_prose(line: &str) -> bool {
    if line
        .split_whitespace()
        .any(|w| w.len() > 1 && w.ends_with([':', ',', '!']) && !w.ends_with("::"))
    {
        return true;
    }
    let mut tail = line.chars().rev();
    matches!(
        (tail.next(), tail.next()),
        (Some('.' | '!' | '?'), Some(c)) if c.is_alphabetic()
    )
}

/// Prompts a model for commands.
pub struct SuggestPipeline<'a, M: LanguageModel + ?Sized> {
    model: &'a M,
    system: String,
}

impl<'a, M: LanguageModel + ?Sized> SuggestPipeline<'a, M> {
    pub fn new(model: &'a M, info: &SystemInfo) -> Self {
        Self {
            model,
            system: system_prompt(info),
        }
    }

    pub async fn suggest(&self, prompt: &str) -> Result<SuggestedCommand, SuggestError> {
        let raw = self.model.complete(&self.system, prompt).await?;
        tracing::debug!(raw = %raw, "suggestion response");
        parse_suggestion(&raw)
    }

    /// Ask for a new version of `previous` following `instruction`.
    pub async fn revise(
        &self,
        previous: &SuggestedCommand,
        instruction: &str,
    ) -> Result<SuggestedCommand, SuggestError> {
        let raw = self
            .model
            .complete(&self.system, &revision_prompt(previous, instruction))
            .await?;
        tracing::debug!(raw = %raw, "revision response");
        parse_suggestion(&raw)
    }
}

/// Entry point for `magic-cli suggest`.
pub async fn run_suggest(settings: &Settings, prompt: &str, output_only: bool) -> Result<()> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        anyhow::bail!("prompt must not be empty");
    }

    let provider = Provider::from_settings(settings)?;
    let pipeline = SuggestPipeline::new(&provider, &SystemInfo::detect());

    if output_only {
        let suggestion = pipeline.suggest(prompt).await?;
        println!("{}", suggestion.command);
        return Ok(());
    }

    println!(
        "{}",
        format!("Generating suggested command for \"{}\"...", prompt).dimmed()
    );
    println!();
    let suggestion = pipeline.suggest(prompt).await?;
    interactive::review_suggestion(&pipeline, suggestion, settings).await
}
