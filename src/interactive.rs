//! Terminal interaction for `suggest` and `search` without `--output-only`.
//!
//! Everything here talks to a human: prompts go through `dialoguer`,
//! highlighting through `colored`, the clipboard through `clipboard`. The
//! pure helpers ([`placeholders`], [`fill_placeholders`]) are kept separate
//! so they can be tested without a terminal.

use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use clipboard::{ClipboardContext, ClipboardProvider};
use colored::Colorize;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Select};

use crate::config::{Settings, SuggestMode};
use crate::history;
use crate::index::SearchHit;
use crate::provider::LanguageModel;
use crate::suggest::{SuggestPipeline, SuggestedCommand};

fn show_suggestion(suggestion: &SuggestedCommand) {
    println!(
        "{:>18}: {}",
        "Suggested command".dimmed(),
        suggestion.command.blue().bold()
    );
    if let Some(explanation) = &suggestion.explanation {
        println!("{:>18}: {}", "Explanation".dimmed(), explanation.italic());
    }
    println!();
}

/// Show a suggestion, let the user revise it, fill its placeholders, then
/// act on it per `suggest.mode`.
pub async fn review_suggestion<M>(
    pipeline: &SuggestPipeline<'_, M>,
    suggestion: SuggestedCommand,
    settings: &Settings,
) -> Result<()>
where
    M: LanguageModel + ?Sized,
{
    let theme = ColorfulTheme::default();
    let mut current = suggestion;
    show_suggestion(&current);

    loop {
        let instruction: String = Input::with_theme(&theme)
            .with_prompt("Revise the command (leave empty to continue)")
            .allow_empty(true)
            .interact_text()?;
        if instruction.trim().is_empty() {
            break;
        }
        match pipeline.revise(&current, instruction.trim()).await {
            Ok(revised) => {
                current = revised;
                show_suggestion(&current);
            }
            Err(e) => println!("{}", e.to_string().red()),
        }
    }

    let command = prompt_placeholders(&theme, &current.command)?;
    apply(settings, &command)
}

/// Let the user pick one of the search results, then act on it.
pub fn choose_hit(hits: &[SearchHit], settings: &Settings) -> Result<()> {
    let items: Vec<String> = hits.iter().map(|h| h.text.clone()).collect();
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a command")
        .items(&items)
        .default(0)
        .interact_opt()?;
    match selection {
        Some(i) => apply(settings, &items[i]),
        None => Ok(()),
    }
}

/// Copy or run `command` depending on `suggest.mode`.
pub fn apply(settings: &Settings, command: &str) -> Result<()> {
    match settings.suggest.mode {
        SuggestMode::Clipboard => {
            let copy = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt("Copy to clipboard?")
                .default(true)
                .interact()?;
            if !copy {
                println!("{}", "Command not copied to clipboard.".red());
                return Ok(());
            }
            let mut clipboard = ClipboardContext::new().map_err(clipboard_error)?;
            set_clipboard(&mut clipboard, command)?;
            println!("{}", "Command copied to clipboard.".green());
            Ok(())
        }
        SuggestMode::UnsafeExecution => {
            let run = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("Run `{}`?", command))
                .default(false)
                .interact()?;
            if !run {
                return Ok(());
            }
            execute(command)?;
            if settings.suggest.add_to_history {
                record_in_history(settings.search.history_path().as_deref(), command)?;
            }
            Ok(())
        }
    }
}

fn execute(command: &str) -> Result<()> {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    tracing::debug!(%shell, command, "executing command");
    let status = Command::new(&shell)
        .arg("-c")
        .arg(command)
        .status()
        .with_context(|| format!("Failed to run command with {}", shell))?;
    if !status.success() {
        println!(
            "{}",
            format!("Command exited with {}", status).yellow()
        );
    }
    Ok(())
}

/// Append an executed command to the history file. The command has already
/// run, so the error says so.
fn record_in_history(path: Option<&Path>, command: &str) -> Result<()> {
    let path = path.ok_or_else(|| {
        anyhow!("Command ran but was not added to history: no shell history file known; set 'search.shell_history'")
    })?;
    history::append_command(path, command).with_context(|| {
        format!("Command ran but could not be added to {}", path.display())
    })?;
    tracing::debug!(path = %path.display(), "command added to shell history");
    Ok(())
}

fn clipboard_error(e: Box<dyn std::error::Error>) -> anyhow::Error {
    anyhow!("Clipboard error: {}", e)
}

fn set_clipboard<C: ClipboardProvider>(clipboard: &mut C, text: &str) -> Result<()> {
    clipboard.set_contents(text.to_string()).map_err(clipboard_error)
}

fn prompt_placeholders(theme: &ColorfulTheme, command: &str) -> Result<String> {
    let names = placeholders(command);
    if names.is_empty() {
        return Ok(command.to_string());
    }
    println!("{}", "Fill in the command's arguments:".dimmed());
    let mut values = Vec::with_capacity(names.len());
    for name in names {
        let value: String = Input::with_theme(theme)
            .with_prompt(format!("<{}>", name))
            .interact_text()?;
        values.push((name, value));
    }
    let filled = fill_placeholders(command, &values);
    println!("{:>18}: {}", "Command".dimmed(), filled.blue().bold());
    Ok(filled)
}

/// Distinct `<name>` placeholders in order of first appearance. Names are
/// ASCII alphanumerics, `_` and `-`, so shell redirections are left alone.
pub fn placeholders(command: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = command;
    while let Some(open) = rest.find('<') {
        let after = &rest[open + 1..];
        match placeholder_name(after) {
            Some(name) => {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
                rest = &after[name.len() + 1..];
            }
            None => rest = after,
        }
    }
    names
}

/// The name at the start of `after` (text following a `<`) if a `>` closes it.
fn placeholder_name(after: &str) -> Option<&str> {
    let len = after
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(after.len());
    (len > 0 && after[len..].starts_with('>')).then(|| &after[..len])
}

/// Replace every `<name>` with its value in one pass; placeholders that turn
/// up inside a value are left as typed.
pub fn fill_placeholders(command: &str, values: &[(String, String)]) -> String {
    let mut out = String::with_capacity(command.len());
    let mut rest = command;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let filled = placeholder_name(after)
            .and_then(|name| values.iter().find(|(n, _)| n == name))
            .map(|(name, value)| (name.len(), value));
        match filled {
            Some((len, value)) => {
                out.push_str(value);
                rest = &after[len + 1..];
            }
            None => {
                out.push('<');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
