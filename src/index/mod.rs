//! Incremental embedding index over shell history.
//!
//! The index is a flat list of [`IndexEntry`]s plus a [`Manifest`], persisted
//! by [`store`]. There is no ANN structure: a shell history holds at most a
//! few tens of thousands of lines, and a linear scan over unit vectors
//! answers a query in well under a millisecond.
//!
//! # Update policy
//!
//! [`EmbeddingIndex::update`] only embeds history lines past the manifest's
//! `last_ordinal`. Everything is discarded and rebuilt from ordinal 1 when:
//!
//! 1. the provider fingerprint differs from the one on record (vectors from
//!    different embedding spaces must never be compared), or
//! 2. the history no longer has the recorded line at `last_ordinal` (the file
//!    was truncated or rewritten, so ordinals no longer line up).
//!
//! Text that is already stored reuses its vector instead of calling the
//! provider again. In case 2 the old vectors stay usable for that purpose.
//!
//! Embedding calls run through an ordered stream bounded by
//! `search.concurrency`, but entries are appended strictly in ordinal order
//! and the manifest only advances past appended entries. A failed update
//! therefore leaves a valid prefix and the next run resumes from it.

pub mod store;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use futures::stream::{self, StreamExt};

use crate::error::{IndexError, ProviderError};
use crate::history::{HistoryLine, HistorySource};
use crate::progress::{IndexProgressEvent, IndexProgressReporter};
use crate::provider::LanguageModel;
use crate::vector::{dot, normalized};

pub use store::{IndexEntry, Manifest};
use store::{anchor_hash, StoreWriter, FORMAT_VERSION};

/// Appended entries between manifest checkpoints.
const CHECKPOINT_EVERY: usize = 32;

/// What an [`EmbeddingIndex::update`] did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpdateStats {
    /// Provider embedding calls that succeeded.
    pub embedded: usize,
    /// Appended entries whose vector was already known.
    pub reused: usize,
    /// Whether the stored index was discarded first.
    pub rebuilt: bool,
}

/// One ranked query result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub text: String,
    pub source_ordinal: u64,
    pub score: f32,
}

pub struct EmbeddingIndex {
    dir: PathBuf,
    manifest: Option<Manifest>,
    entries: Vec<IndexEntry>,
    /// Unit-length copies of `entries[i].vector`.
    units: Vec<Vec<f32>>,
}

impl EmbeddingIndex {
    /// Load the index stored in `dir`. A directory without a manifest is an
    /// empty index; nothing is written until [`update`](Self::update).
    pub fn open(dir: &Path) -> Result<Self, IndexError> {
        let (manifest, entries) = match store::load(dir)? {
            Some((manifest, entries)) => (Some(manifest), entries),
            None => (None, Vec::new()),
        };
        let units = entries.iter().map(|e| normalized(&e.vector)).collect();
        tracing::debug!(dir = %dir.display(), entries = entries.len(), "index loaded");
        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
            entries,
            units,
        })
    }

    /// Delete the artifacts in `dir`.
    pub fn reset(dir: &Path) -> Result<(), IndexError> {
        store::remove(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bring the index up to date with `source`, embedding with `model`.
    pub async fn update<M>(
        &mut self,
        source: &HistorySource,
        model: &M,
        concurrency: usize,
        progress: &dyn IndexProgressReporter,
    ) -> Result<UpdateStats, IndexError>
    where
        M: LanguageModel + ?Sized,
    {
        let fingerprint = model.fingerprint();
        let mut stats = UpdateStats::default();
        let mut known: HashMap<String, Vec<f32>> = HashMap::new();

        let recorded = self
            .manifest
            .as_ref()
            .map(|m| (m.version, m.fingerprint.clone()));
        match recorded {
            None => self.start_over(&fingerprint)?,
            Some((version, previous)) if version != FORMAT_VERSION || previous != fingerprint => {
                let reason = format!("embedding model changed: {} -> {}", previous, fingerprint);
                tracing::info!(%reason, "rebuilding index");
                progress.report(IndexProgressEvent::Rebuilding { reason });
                self.start_over(&fingerprint)?;
                stats.rebuilt = true;
            }
            Some(_) => {}
        }

        let pending = match self.scan(source)? {
            Some(pending) => pending,
            None => {
                let reason = "shell history was rewritten".to_string();
                tracing::info!(%reason, "rebuilding index");
                progress.report(IndexProgressEvent::Rebuilding { reason });
                known.extend(self.entries.drain(..).map(|e| (e.text, e.vector)));
                self.start_over(&fingerprint)?;
                stats.rebuilt = true;
                self.scan(source)?.unwrap_or_default()
            }
        };

        if pending.is_empty() {
            tracing::debug!(entries = self.entries.len(), "index up to date");
            return Ok(stats);
        }

        for entry in &self.entries {
            known
                .entry(entry.text.clone())
                .or_insert_with(|| entry.vector.clone());
        }
        let to_embed: Vec<String> = {
            let mut scheduled = HashSet::new();
            pending
                .iter()
                .filter(|line| !known.contains_key(&line.text))
                .filter(|line| scheduled.insert(line.text.as_str()))
                .map(|line| line.text.clone())
                .collect()
        };
        tracing::debug!(
            pending = pending.len(),
            to_embed = to_embed.len(),
            concurrency,
            "updating index"
        );

        let outcome = self
            .append_pending(pending, known, to_embed, model, concurrency, progress, &mut stats)
            .await;
        let persisted = self.persist();
        outcome?;
        persisted?;

        progress.report(IndexProgressEvent::Done {
            embedded: stats.embedded as u64,
            reused: stats.reused as u64,
        });
        Ok(stats)
    }

    /// Top `k` distinct texts by cosine similarity to `vector`; ties go to the
    /// more recent line. Empty when `k` is 0 or the index is empty.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(dims) = self.manifest.as_ref().and_then(|m| m.dims) {
            if vector.len() != dims {
                return Err(ProviderError::Response(format!(
                    "query embedding has {} dimensions, index has {}",
                    vector.len(),
                    dims
                ))
                .into());
            }
        }

        let query = normalized(vector);
        let mut seen = HashSet::new();
        // Newest first, so a repeated command competes with its latest ordinal.
        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .zip(&self.units)
            .rev()
            .filter(|(entry, _)| seen.insert(entry.text.as_str()))
            .map(|(entry, unit)| SearchHit {
                text: entry.text.clone(),
                source_ordinal: entry.source_ordinal,
                score: dot(&query, unit),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.source_ordinal.cmp(&a.source_ordinal))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Discard everything and record an empty manifest for `fingerprint`.
    /// The manifest goes first so a crash in between leaves only entries
    /// past it, which the next load drops.
    fn start_over(&mut self, fingerprint: &str) -> Result<(), IndexError> {
        let manifest = Manifest::empty(fingerprint);
        store::write_manifest(&self.dir, &manifest)?;
        StoreWriter::open(&self.dir, true)?;
        self.manifest = Some(manifest);
        self.entries.clear();
        self.units.clear();
        Ok(())
    }

    /// Lines past the manifest, or `None` if the anchored line is gone.
    fn scan(&self, source: &HistorySource) -> Result<Option<Vec<HistoryLine>>, IndexError> {
        let (last, anchor) = self
            .manifest
            .as_ref()
            .map(|m| (m.last_ordinal, m.anchor.as_deref()))
            .unwrap_or((0, None));

        let history_err = |e| IndexError::History {
            path: source.path().to_path_buf(),
            source: e,
        };
        let mut anchored = last == 0;
        let mut pending = Vec::new();
        for line in source.lines().map_err(history_err)? {
            let line = line.map_err(history_err)?;
            match line.ordinal.cmp(&last) {
                std::cmp::Ordering::Less => {}
                std::cmp::Ordering::Equal => {
                    anchored = anchor == Some(anchor_hash(&line.text).as_str());
                }
                std::cmp::Ordering::Greater => pending.push(line),
            }
        }

        if !anchored {
            tracing::debug!(last_ordinal = last, "history anchor not found");
            return Ok(None);
        }
        Ok(Some(pending))
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_pending<M>(
        &mut self,
        pending: Vec<HistoryLine>,
        mut known: HashMap<String, Vec<f32>>,
        to_embed: Vec<String>,
        model: &M,
        concurrency: usize,
        progress: &dyn IndexProgressReporter,
        stats: &mut UpdateStats,
    ) -> Result<(), IndexError>
    where
        M: LanguageModel + ?Sized,
    {
        let mut writer = StoreWriter::open(&self.dir, false)?;
        // Results arrive in first-appearance order, which is exactly the
        // order in which `pending` first needs them.
        let mut results = stream::iter(to_embed)
            .map(move |text| async move {
                let result = model.embed(&text).await;
                (text, result)
            })
            .buffered(concurrency.max(1));

        let total = pending.len() as u64;
        let mut since_checkpoint = 0;

        for (n, line) in pending.into_iter().enumerate() {
            while !known.contains_key(&line.text) {
                let Some((text, result)) = results.next().await else {
                    return Err(ProviderError::Response(
                        "embedding stream ended early".to_string(),
                    )
                    .into());
                };
                let vector = result?;
                self.check_dims(&vector)?;
                stats.embedded += 1;
                known.insert(text, vector);
            }

            let vector = known.get(&line.text).cloned().unwrap_or_default();
            self.push(&mut writer, line, vector)?;

            since_checkpoint += 1;
            if since_checkpoint >= CHECKPOINT_EVERY {
                writer.sync()?;
                self.persist()?;
                since_checkpoint = 0;
            }
            progress.report(IndexProgressEvent::Embedding {
                n: n as u64 + 1,
                total,
            });
        }

        writer.sync()?;
        stats.reused = total as usize - stats.embedded;
        Ok(())
    }

    fn check_dims(&self, vector: &[f32]) -> Result<(), ProviderError> {
        match self.manifest.as_ref().and_then(|m| m.dims) {
            Some(dims) if dims != vector.len() => Err(ProviderError::Response(format!(
                "embedding has {} dimensions, index has {}",
                vector.len(),
                dims
            ))),
            _ => Ok(()),
        }
    }

    fn push(
        &mut self,
        writer: &mut StoreWriter,
        line: HistoryLine,
        vector: Vec<f32>,
    ) -> Result<(), IndexError> {
        let entry = IndexEntry {
            text: line.text,
            vector,
            source_ordinal: line.ordinal,
        };
        writer.append(&entry)?;
        if let Some(m) = self.manifest.as_mut() {
            m.last_ordinal = entry.source_ordinal;
            m.anchor = Some(anchor_hash(&entry.text));
            m.dims = Some(entry.vector.len());
            m.entries += 1;
        }
        self.units.push(normalized(&entry.vector));
        self.entries.push(entry);
        Ok(())
    }

    fn persist(&mut self) -> Result<(), IndexError> {
        if let Some(m) = self.manifest.as_mut() {
            m.updated_at = Utc::now();
            store::write_manifest(&self.dir, m)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FakeModel {
        fingerprint: &'static str,
        dims: usize,
        constant: bool,
        fail_on: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl FakeModel {
        fn new(fingerprint: &'static str) -> Self {
            Self {
                fingerprint,
                dims: 16,
                constant: false,
                fail_on: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LanguageModel for FakeModel {
        fn fingerprint(&self) -> String {
            self.fingerprint.to_string()
        }

        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, ProviderError> {
            Ok(String::new())
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(text) {
                return Err(ProviderError::Transport("connection refused".to_string()));
            }
            if self.constant {
                return Ok(vec![1.0; self.dims]);
            }
            Ok(bag_of_words(text, self.dims))
        }
    }

    fn bag_of_words(text: &str, dims: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        for word in text.split_whitespace() {
            let h = word
                .bytes()
                .fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
            v[h % dims] += 1.0;
        }
        v
    }

    struct Fixture {
        tmp: TempDir,
        source: HistorySource,
    }

    impl Fixture {
        fn new(history: &str) -> Self {
            let tmp = TempDir::new().unwrap();
            let path = tmp.path().join("history");
            std::fs::write(&path, history).unwrap();
            Self {
                source: HistorySource::new(path),
                tmp,
            }
        }

        fn dir(&self) -> PathBuf {
            self.tmp.path().join("index")
        }

        fn write_history(&self, history: &str) {
            std::fs::write(self.source.path(), history).unwrap();
        }

        async fn update(&self, model: &FakeModel) -> Result<UpdateStats, IndexError> {
            let mut index = EmbeddingIndex::open(&self.dir())?;
            index.update(&self.source, model, 4, &NoProgress).await
        }

        fn index(&self) -> EmbeddingIndex {
            EmbeddingIndex::open(&self.dir()).unwrap()
        }
    }

    #[tokio::test]
    async fn test_second_update_makes_no_calls() {
        let fx = Fixture::new("ls -la\ngit status\ncargo test\n");
        let model = FakeModel::new("fake:a");

        let stats = fx.update(&model).await.unwrap();
        assert_eq!(stats.embedded, 3);
        assert_eq!(model.calls(), 3);

        let stats = fx.update(&model).await.unwrap();
        assert_eq!(stats, UpdateStats::default());
        assert_eq!(model.calls(), 3);
        assert_eq!(fx.index().len(), 3);
    }

    #[tokio::test]
    async fn test_appended_lines_only() {
        let fx = Fixture::new("ls -la\ngit status\n");
        let model = FakeModel::new("fake:a");
        fx.update(&model).await.unwrap();

        crate::history::append_command(fx.source.path(), "docker ps").unwrap();
        crate::history::append_command(fx.source.path(), "make").unwrap();
        let stats = fx.update(&model).await.unwrap();

        assert_eq!(stats.embedded, 2);
        assert!(!stats.rebuilt);
        assert_eq!(model.calls(), 4);
        let index = fx.index();
        assert_eq!(index.manifest().unwrap().last_ordinal, 4);
        assert_eq!(index.entries()[3].text, "make");
    }

    #[tokio::test]
    async fn test_fingerprint_change_rebuilds() {
        let fx = Fixture::new("ls -la\ngit status\n");
        fx.update(&FakeModel::new("fake:a")).await.unwrap();

        let other = FakeModel::new("fake:b");
        let stats = fx.update(&other).await.unwrap();
        assert!(stats.rebuilt);
        assert_eq!(other.calls(), 2);

        let index = fx.index();
        assert_eq!(index.manifest().unwrap().fingerprint, "fake:b");
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn test_rewritten_history_rebuilds_with_reuse() {
        let fx = Fixture::new("ls -la\ngit status\ncargo test\n");
        let model = FakeModel::new("fake:a");
        fx.update(&model).await.unwrap();

        fx.write_history("git status\nvim notes.md\ncargo build\ncargo test\n");
        let stats = fx.update(&model).await.unwrap();
        assert!(stats.rebuilt);
        assert_eq!(stats.embedded, 2);
        assert_eq!(stats.reused, 2);
        assert_eq!(model.calls(), 5);

        let texts: Vec<_> = fx.index().entries().iter().map(|e| e.text.clone()).collect();
        assert_eq!(texts, vec!["git status", "vim notes.md", "cargo build", "cargo test"]);
    }

    #[tokio::test]
    async fn test_truncated_history_rebuilds() {
        let fx = Fixture::new("a\nb\nc\n");
        let model = FakeModel::new("fake:a");
        fx.update(&model).await.unwrap();

        fx.write_history("a\n");
        let stats = fx.update(&model).await.unwrap();
        assert!(stats.rebuilt);
        assert_eq!(fx.index().len(), 1);
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_repeated_text_reuses_vector() {
        let fx = Fixture::new("ls\npwd\nls\npwd\nls\n");
        let model = FakeModel::new("fake:a");
        let stats = fx.update(&model).await.unwrap();
        assert_eq!(stats.embedded, 2);
        assert_eq!(stats.reused, 3);
        assert_eq!(fx.index().len(), 5);

        let index = fx.index();
        let hits = index.query(&bag_of_words("ls", 16), 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "ls");
        assert_eq!(hits[0].source_ordinal, 5);
    }

    #[tokio::test]
    async fn test_failed_update_resumes() {
        let fx = Fixture::new("echo a\necho b\nboom\necho c\n");
        let mut failing = FakeModel::new("fake:a");
        failing.fail_on = Some("boom");
        let mut index = EmbeddingIndex::open(&fx.dir()).unwrap();
        let err = index
            .update(&fx.source, &failing, 1, &NoProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Provider(ProviderError::Transport(_))));

        let index = fx.index();
        assert_eq!(index.len(), 2);
        assert_eq!(index.manifest().unwrap().last_ordinal, 2);

        let healthy = FakeModel::new("fake:a");
        let stats = fx.update(&healthy).await.unwrap();
        assert!(!stats.rebuilt);
        assert_eq!(healthy.calls(), 2);
        assert_eq!(fx.index().len(), 4);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_response_error() {
        let fx = Fixture::new("ls\n");
        fx.update(&FakeModel::new("fake:a")).await.unwrap();

        crate::history::append_command(fx.source.path(), "pwd").unwrap();
        let mut narrow = FakeModel::new("fake:a");
        narrow.dims = 4;
        let err = fx.update(&narrow).await.unwrap_err();
        assert!(matches!(err, IndexError::Provider(ProviderError::Response(_))));
        assert_eq!(fx.index().len(), 1);
    }

    #[tokio::test]
    async fn test_query_ranking() {
        let fx = Fixture::new("echo foobar\necho lorem ipsum\nls\n");
        let model = FakeModel::new("fake:a");
        fx.update(&model).await.unwrap();
        let index = fx.index();

        let hits = index.query(&bag_of_words("foobar", 16), 10).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].text, "echo foobar");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        assert_eq!(index.query(&bag_of_words("foobar", 16), 1).unwrap().len(), 1);
        assert!(index.query(&bag_of_words("foobar", 16), 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ties_prefer_recent() {
        let fx = Fixture::new("first\nsecond\nthird\n");
        let mut model = FakeModel::new("fake:const");
        model.constant = true;
        fx.update(&model).await.unwrap();

        let hits = fx.index().query(&[1.0; 16], 2).unwrap();
        let ordinals: Vec<u64> = hits.iter().map(|h| h.source_ordinal).collect();
        assert_eq!(ordinals, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_empty_history_and_empty_query() {
        let fx = Fixture::new("\n\n");
        let model = FakeModel::new("fake:a");
        let stats = fx.update(&model).await.unwrap();
        assert_eq!(stats.embedded, 0);
        let index = fx.index();
        assert!(index.is_empty());
        assert!(index.query(&[1.0, 0.0], 5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch() {
        let fx = Fixture::new("ls\n");
        fx.update(&FakeModel::new("fake:a")).await.unwrap();
        assert!(matches!(
            fx.index().query(&[1.0, 0.0], 5),
            Err(IndexError::Provider(ProviderError::Response(_)))
        ));
    }

    #[tokio::test]
    async fn test_missing_history_is_history_error() {
        let fx = Fixture::new("ls\n");
        std::fs::remove_file(fx.source.path()).unwrap();
        let err = fx.update(&FakeModel::new("fake:a")).await.unwrap_err();
        assert!(matches!(err, IndexError::History { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_store_then_reset() {
        let fx = Fixture::new("ls\npwd\n");
        fx.update(&FakeModel::new("fake:a")).await.unwrap();
        std::fs::write(store::store_path(&fx.dir()), "oops\n{}\n").unwrap();
        assert!(matches!(
            EmbeddingIndex::open(&fx.dir()),
            Err(IndexError::Io { .. })
        ));

        EmbeddingIndex::reset(&fx.dir()).unwrap();
        let model = FakeModel::new("fake:a");
        fx.update(&model).await.unwrap();
        assert_eq!(model.calls(), 2);
    }
}
