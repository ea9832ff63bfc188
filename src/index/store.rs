//! On-disk artifacts of the embedding index.
//!
//! ```text
//! <index_dir>/
//!   manifest.json   progress + embedding-space fingerprint, replaced atomically
//!   vectors.jsonl   one entry per line, append-only
//! ```
//!
//! Entries are appended one complete line at a time and the store is flushed
//! before the manifest moves forward, so the manifest never counts an entry
//! that is not on disk. The reverse can happen after a crash (entries on disk
//! past the manifest, or a half-written last line); [`load`] repairs both by
//! rewriting the valid prefix.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::IndexError;
use crate::vector::{decode_vector, encode_vector};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const STORE_FILE: &str = "vectors.jsonl";

/// Bumped whenever the artifact layout changes; older indexes are rebuilt.
pub const FORMAT_VERSION: u32 = 1;

/// Index bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    /// Embedding space of every stored vector, e.g. `ollama:nomic-embed-text:latest`.
    pub fingerprint: String,
    /// Highest history ordinal already indexed; 0 when empty.
    pub last_ordinal: u64,
    /// sha256 of the text at `last_ordinal`, used to detect rewritten history.
    pub anchor: Option<String>,
    pub dims: Option<usize>,
    pub entries: usize,
    pub updated_at: DateTime<Utc>,
}

impl Manifest {
    pub fn empty(fingerprint: &str) -> Self {
        Self {
            version: FORMAT_VERSION,
            fingerprint: fingerprint.to_string(),
            last_ordinal: 0,
            anchor: None,
            dims: None,
            entries: 0,
            updated_at: Utc::now(),
        }
    }
}

/// A history line together with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub text: String,
    pub vector: Vec<f32>,
    pub source_ordinal: u64,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    ordinal: u64,
    text: String,
    vector: String,
}

impl From<&IndexEntry> for StoredEntry {
    fn from(entry: &IndexEntry) -> Self {
        StoredEntry {
            ordinal: entry.source_ordinal,
            text: entry.text.clone(),
            vector: encode_vector(&entry.vector),
        }
    }
}

pub fn anchor_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILE)
}

pub fn store_path(dir: &Path) -> PathBuf {
    dir.join(STORE_FILE)
}

/// Read both artifacts. `Ok(None)` when no manifest exists yet.
pub fn load(dir: &Path) -> Result<Option<(Manifest, Vec<IndexEntry>)>, IndexError> {
    let manifest_path = manifest_path(dir);
    let raw = match std::fs::read_to_string(&manifest_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(IndexError::io(&manifest_path, e)),
    };
    let manifest: Manifest =
        serde_json::from_str(&raw).map_err(|e| IndexError::io(&manifest_path, e))?;

    let store_path = store_path(dir);
    let file = match File::open(&store_path) {
        Ok(file) => Some(file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(IndexError::io(&store_path, e)),
    };
    let (entries, dirty) = match file {
        Some(file) => read_entries(&store_path, file, &manifest)?,
        None => (Vec::new(), false),
    };

    if entries.len() != manifest.entries {
        return Err(IndexError::io(
            &store_path,
            format!(
                "manifest records {} entries but the store holds {}",
                manifest.entries,
                entries.len()
            ),
        ));
    }

    if dirty {
        tracing::warn!(
            path = %store_path.display(),
            entries = entries.len(),
            "repairing vector store: dropping entries not covered by the manifest"
        );
        rewrite(dir, &entries)?;
    }

    Ok(Some((manifest, entries)))
}

/// Parse the store, keeping the prefix the manifest vouches for.
/// The flag is set when anything past that prefix had to be dropped.
fn read_entries(
    path: &Path,
    file: File,
    manifest: &Manifest,
) -> Result<(Vec<IndexEntry>, bool), IndexError> {
    let mut lines = BufReader::new(file).split(b'\n').enumerate().peekable();
    let mut entries: Vec<IndexEntry> = Vec::new();
    let mut dirty = false;

    while let Some((number, line)) = lines.next() {
        let line = line.map_err(|e| IndexError::io(path, e))?;
        let is_last = lines.peek().is_none();
        let corrupt = |what: &str| IndexError::io(path, format!("line {}: {}", number + 1, what));

        if line.iter().all(u8::is_ascii_whitespace) {
            if is_last {
                break;
            }
            return Err(corrupt("blank line"));
        }

        let stored: StoredEntry = match serde_json::from_slice(&line) {
            Ok(stored) => stored,
            // A half-written final line from an interrupted append.
            Err(_) if is_last => {
                dirty = true;
                break;
            }
            Err(e) => return Err(corrupt(&e.to_string())),
        };

        if stored.ordinal > manifest.last_ordinal {
            // Appended after the last manifest write; everything from here on is ignored.
            dirty = true;
            break;
        }

        if entries
            .last()
            .is_some_and(|prev| prev.source_ordinal >= stored.ordinal)
        {
            return Err(corrupt("ordinals out of order"));
        }

        let vector = decode_vector(&stored.vector).ok_or_else(|| corrupt("undecodable vector"))?;
        if manifest.dims.is_some_and(|dims| dims != vector.len()) {
            return Err(corrupt("vector dimensionality differs from the manifest"));
        }

        entries.push(IndexEntry {
            text: stored.text,
            vector,
            source_ordinal: stored.ordinal,
        });
    }

    Ok((entries, dirty))
}

/// Replace the store with exactly `entries`.
fn rewrite(dir: &Path, entries: &[IndexEntry]) -> Result<(), IndexError> {
    let path = store_path(dir);
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| IndexError::io(&path, e))?;
    for entry in entries {
        write_line(tmp.as_file_mut(), entry).map_err(|e| IndexError::io(&path, e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| IndexError::io(&path, e))?;
    tmp.persist(&path)
        .map_err(|e| IndexError::io(&path, e.error))?;
    Ok(())
}

fn write_line(file: &mut File, entry: &IndexEntry) -> io::Result<()> {
    let mut line = serde_json::to_vec(&StoredEntry::from(entry))?;
    line.push(b'\n');
    file.write_all(&line)
}

/// Atomically replace the manifest.
pub fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<(), IndexError> {
    let path = manifest_path(dir);
    std::fs::create_dir_all(dir).map_err(|e| IndexError::io(dir, e))?;
    let json = serde_json::to_vec_pretty(manifest).map_err(|e| IndexError::io(&path, e))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| IndexError::io(&path, e))?;
    tmp.write_all(&json)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| IndexError::io(&path, e))?;
    tmp.persist(&path)
        .map_err(|e| IndexError::io(&path, e.error))?;
    Ok(())
}

/// Delete both artifacts. Missing files are fine.
pub fn remove(dir: &Path) -> Result<(), IndexError> {
    for path in [manifest_path(dir), store_path(dir)] {
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(IndexError::io(&path, e)),
        }
    }
    Ok(())
}

/// Append handle on `vectors.jsonl`.
pub struct StoreWriter {
    path: PathBuf,
    file: File,
}

impl StoreWriter {
    /// Open for appending, or truncate first when `fresh`.
    pub fn open(dir: &Path, fresh: bool) -> Result<Self, IndexError> {
        std::fs::create_dir_all(dir).map_err(|e| IndexError::io(dir, e))?;
        let path = store_path(dir);
        let mut options = OpenOptions::new();
        options.create(true);
        if fresh {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options.open(&path).map_err(|e| IndexError::io(&path, e))?;
        Ok(Self { path, file })
    }

    /// Write one complete line for `entry`.
    pub fn append(&mut self, entry: &IndexEntry) -> Result<(), IndexError> {
        write_line(&mut self.file, entry).map_err(|e| IndexError::io(&self.path, e))
    }

    /// Make appended entries durable before the manifest refers to them.
    pub fn sync(&mut self) -> Result<(), IndexError> {
        self.file
            .sync_data()
            .map_err(|e| IndexError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(ordinal: u64, text: &str) -> IndexEntry {
        IndexEntry {
            text: text.to_string(),
            vector: vec![ordinal as f32, 1.0],
            source_ordinal: ordinal,
        }
    }

    fn save(dir: &Path, entries: &[IndexEntry], last_ordinal: u64) -> Manifest {
        let mut writer = StoreWriter::open(dir, true).unwrap();
        for e in entries {
            writer.append(e).unwrap();
        }
        writer.sync().unwrap();
        let manifest = Manifest {
            last_ordinal,
            dims: Some(2),
            entries: entries.iter().filter(|e| e.source_ordinal <= last_ordinal).count(),
            ..Manifest::empty("test:model")
        };
        write_manifest(dir, &manifest).unwrap();
        manifest
    }

    #[test]
    fn test_missing_manifest_is_none() {
        let tmp = TempDir::new().unwrap();
        assert!(load(tmp.path()).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let entries = vec![entry(1, "ls"), entry(3, "cd /")];
        let manifest = save(tmp.path(), &entries, 3);
        let (loaded_manifest, loaded) = load(tmp.path()).unwrap().unwrap();
        assert_eq!(loaded_manifest, manifest);
        assert_eq!(loaded, entries);
    }

    #[test]
    fn test_truncated_tail_is_repaired() {
        let tmp = TempDir::new().unwrap();
        save(tmp.path(), &[entry(1, "ls"), entry(2, "pwd")], 2);
        let mut file = OpenOptions::new()
            .append(true)
            .open(store_path(tmp.path()))
            .unwrap();
        file.write_all(b"{\"ordinal\":3,\"text\":\"ec").unwrap();

        let (_, loaded) = load(tmp.path()).unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        let on_disk = std::fs::read_to_string(store_path(tmp.path())).unwrap();
        assert_eq!(on_disk.lines().count(), 2);
        assert!(on_disk.ends_with('\n'));
    }

    #[test]
    fn test_entries_past_manifest_are_dropped() {
        let tmp = TempDir::new().unwrap();
        save(tmp.path(), &[entry(1, "ls"), entry(2, "pwd"), entry(3, "top")], 2);
        let (_, loaded) = load(tmp.path()).unwrap().unwrap();
        assert_eq!(loaded.iter().map(|e| e.source_ordinal).collect::<Vec<_>>(), vec![1, 2]);
        assert!(load(tmp.path()).unwrap().is_some());
    }

    #[test]
    fn test_corrupt_middle_line_is_io_error() {
        let tmp = TempDir::new().unwrap();
        save(tmp.path(), &[entry(1, "ls"), entry(2, "pwd")], 2);
        let path = store_path(tmp.path());
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, format!("garbage\n{}", content)).unwrap();
        assert!(matches!(load(tmp.path()), Err(IndexError::Io { .. })));
    }

    #[test]
    fn test_missing_entries_is_io_error() {
        let tmp = TempDir::new().unwrap();
        save(tmp.path(), &[entry(1, "ls"), entry(2, "pwd")], 2);
        std::fs::remove_file(store_path(tmp.path())).unwrap();
        assert!(matches!(load(tmp.path()), Err(IndexError::Io { .. })));
    }

    #[test]
    fn test_malformed_manifest_is_io_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(manifest_path(tmp.path()), "{not json").unwrap();
        assert!(matches!(load(tmp.path()), Err(IndexError::Io { .. })));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        save(tmp.path(), &[entry(1, "ls")], 1);
        remove(tmp.path()).unwrap();
        remove(tmp.path()).unwrap();
        assert!(load(tmp.path()).unwrap().is_none());
    }

    #[test]
    fn test_anchor_hash_is_hex_sha256() {
        let hash = anchor_hash("echo foobar");
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, anchor_hash("echo foobaz"));
    }
}
