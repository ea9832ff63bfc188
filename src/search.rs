//! Semantic search over shell history.
//!
//! `magic-cli search <query>` runs the [`SearchPipeline`]:
//!
//! 1. bring the [`EmbeddingIndex`] up to date with the history file
//! 2. embed the query with the active provider
//! 3. take the top K entries by cosine similarity
//! 4. print them (`--output-only`) or offer them for selection
//!
//! Any provider or index failure aborts the request before anything is
//! printed, so a partial ranking never reaches stdout.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::Settings;
use crate::error::{IndexError, ProviderError};
use crate::history::HistorySource;
use crate::index::{EmbeddingIndex, SearchHit};
use crate::interactive;
use crate::progress::{IndexProgressReporter, ProgressMode};
use crate::provider::{LanguageModel, Provider, ProviderKind};

/// Refuse to send history anywhere the configuration does not allow.
pub fn check_history_access(settings: &Settings) -> Result<(), ProviderError> {
    if !settings.general.access_to_shell_history {
        return Err(ProviderError::Config(
            "search needs shell history; set 'general.access_to_shell_history' to true".to_string(),
        ));
    }
    if settings.general.llm == ProviderKind::Remote && !settings.search.allow_remote_llm {
        return Err(ProviderError::Config(
            "search would send shell history to a remote provider; set 'search.allow_remote_llm' to true or use 'ollama'"
                .to_string(),
        ));
    }
    Ok(())
}

/// Indexes a history file and answers queries against it.
pub struct SearchPipeline<'a, M: LanguageModel + ?Sized> {
    model: &'a M,
    history: HistorySource,
    index_dir: PathBuf,
    concurrency: usize,
}

impl<'a, M: LanguageModel + ?Sized> SearchPipeline<'a, M> {
    pub fn new(model: &'a M, history: HistorySource, index_dir: PathBuf, concurrency: usize) -> Self {
        Self {
            model,
            history,
            index_dir,
            concurrency,
        }
    }

    /// Update the index, then return the `k` best matches for `query`.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        progress: &dyn IndexProgressReporter,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let mut index = EmbeddingIndex::open(&self.index_dir)?;
        let stats = index
            .update(&self.history, self.model, self.concurrency, progress)
            .await?;
        tracing::debug!(
            embedded = stats.embedded,
            reused = stats.reused,
            rebuilt = stats.rebuilt,
            entries = index.len(),
            "index updated"
        );

        if k == 0 || index.is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.model.embed(query).await?;
        index.query(&vector, k)
    }
}

/// Entry point for `magic-cli search`.
pub async fn run_search(
    settings: &Settings,
    query: &str,
    output_only: bool,
    limit: Option<usize>,
    reset_index: bool,
) -> Result<()> {
    check_history_access(settings)?;
    let provider = Provider::from_settings(settings)?;

    let index_dir = settings
        .search
        .index_dir()
        .context("Could not determine an index directory; set 'search.index_dir'")?;
    let history_path = settings
        .search
        .history_path()
        .context("Could not determine the shell history file; set 'search.shell_history'")?;

    if reset_index {
        EmbeddingIndex::reset(&index_dir)
            .with_context(|| format!("Failed to reset index at {}", index_dir.display()))?;
        tracing::info!(dir = %index_dir.display(), "index reset");
    }

    let query = query.trim();
    if query.is_empty() {
        if !output_only {
            println!("No results.");
        }
        return Ok(());
    }

    let k = limit.unwrap_or(settings.search.top_k);
    let reporter = ProgressMode::for_output(output_only).reporter();
    let pipeline = SearchPipeline::new(
        &provider,
        HistorySource::new(history_path),
        index_dir,
        settings.search.concurrency,
    );
    let hits = pipeline.search(query, k, reporter.as_ref()).await?;

    if output_only {
        for hit in &hits {
            println!("{}", hit.text);
        }
        return Ok(());
    }
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    interactive::choose_hit(&hits, settings)
}
