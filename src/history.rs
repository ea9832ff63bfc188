//! Shell history ingestion.
//!
//! [`HistorySource::lines`] reads a history file as a lazy, single-pass
//! sequence of [`HistoryLine`]s. Blank lines and exact consecutive
//! duplicates are dropped and ordinals count positions in the *filtered*
//! sequence, starting at 1. Because filtering only looks backwards, appending
//! to the file never renumbers lines already seen, which is what lets the
//! index resume from its last recorded ordinal.
//!
//! Two timestamped formats are understood:
//! - zsh `EXTENDED_HISTORY`: `: 1700000000:0;git status` → `git status`
//! - bash `HISTTIMEFORMAT` comment lines: `#1700000000` → skipped

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// One command from the history source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLine {
    /// 1-based position in the filtered sequence.
    pub ordinal: u64,
    pub text: String,
}

/// A readable shell history file.
#[derive(Debug, Clone)]
pub struct HistorySource {
    path: PathBuf,
}

impl HistorySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the file and start a fresh pass over it.
    pub fn lines(&self) -> io::Result<HistoryLines> {
        let file = File::open(&self.path)?;
        Ok(HistoryLines {
            inner: BufReader::new(file).split(b'\n'),
            ordinal: 0,
            previous: None,
        })
    }
}

/// Iterator returned by [`HistorySource::lines`].
pub struct HistoryLines {
    inner: io::Split<BufReader<File>>,
    ordinal: u64,
    previous: Option<String>,
}

impl Iterator for HistoryLines {
    type Item = io::Result<HistoryLine>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = match self.inner.next()? {
                Ok(raw) => raw,
                Err(e) => return Some(Err(e)),
            };
            let Some(text) = normalize_line(&String::from_utf8_lossy(&raw)) else {
                continue;
            };
            if self.previous.as_deref() == Some(text.as_str()) {
                continue;
            }
            self.previous = Some(text.clone());
            self.ordinal += 1;
            return Some(Ok(HistoryLine {
                ordinal: self.ordinal,
                text,
            }));
        }
    }
}

/// Reduce one raw history line to a command, or `None` if it holds none.
pub fn normalize_line(raw: &str) -> Option<String> {
    let line = raw.trim_end();

    if let Some(digits) = line.strip_prefix('#') {
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }

    let command = strip_zsh_extended(line).unwrap_or(line).trim();
    if command.is_empty() {
        None
    } else {
        Some(command.to_string())
    }
}

fn strip_zsh_extended(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(": ")?;
    let (stamp, command) = rest.split_once(';')?;
    let (epoch, duration) = stamp.split_once(':')?;
    let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if numeric(epoch) && numeric(duration) {
        Some(command)
    } else {
        None
    }
}

/// `$HISTFILE`, else the conventional file for `$SHELL` in the home directory.
pub fn default_history_path() -> Option<PathBuf> {
    if let Some(histfile) = std::env::var_os("HISTFILE").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(histfile));
    }
    let home = dirs::home_dir()?;
    let shell = std::env::var("SHELL").unwrap_or_default();
    let file = if shell.ends_with("zsh") {
        ".zsh_history"
    } else {
        ".bash_history"
    };
    Some(home.join(file))
}

/// Append `command` as a new line of the history file at `path`.
pub fn append_command(path: &Path, command: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let needs_newline = file.metadata()?.len() > 0 && !ends_with_newline(path)?;
    if needs_newline {
        file.write_all(b"\n")?;
    }
    writeln!(file, "{}", command.trim())
}

fn ends_with_newline(path: &Path) -> io::Result<bool> {
    use std::io::{Read, Seek, SeekFrom};
    let mut file = File::open(path)?;
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn collect(content: &[u8]) -> Vec<HistoryLine> {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history");
        std::fs::write(&path, content).unwrap();
        HistorySource::new(&path)
            .lines()
            .unwrap()
            .collect::<io::Result<Vec<_>>>()
            .unwrap()
    }

    fn texts(lines: &[HistoryLine]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn test_blank_and_consecutive_duplicates_dropped() {
        let lines = collect(b"ls\n\nls\ncd /tmp\n   \nls\n");
        assert_eq!(texts(&lines), vec!["ls", "cd /tmp", "ls"]);
        let ordinals: Vec<u64> = lines.iter().map(|l| l.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }

    #[test]
    fn test_appending_keeps_ordinals() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history");
        std::fs::write(&path, "echo a\necho b\n").unwrap();
        let source = HistorySource::new(&path);
        let before: Vec<_> = source.lines().unwrap().map(|l| l.unwrap()).collect();

        append_command(&path, "echo b").unwrap();
        append_command(&path, "echo c").unwrap();
        let after: Vec<_> = source.lines().unwrap().map(|l| l.unwrap()).collect();

        assert_eq!(&after[..before.len()], &before[..]);
        assert_eq!(after.len(), 3);
        assert_eq!(after[2].text, "echo c");
        assert_eq!(after[2].ordinal, 3);
    }

    #[test]
    fn test_zsh_extended_and_bash_timestamps() {
        let lines = collect(b": 1700000000:0;git status\n#1700000001\nmake test\r\n# a comment\n");
        assert_eq!(texts(&lines), vec!["git status", "make test", "# a comment"]);
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let lines = collect(b"echo \xff\xfe\necho ok\n");
        assert_eq!(lines.len(), 2);
        assert!(lines[0].text.starts_with("echo "));
    }

    #[test]
    fn test_missing_file_is_error() {
        let tmp = TempDir::new().unwrap();
        assert!(HistorySource::new(tmp.path().join("nope")).lines().is_err());
    }

    #[test]
    fn test_append_repairs_missing_trailing_newline() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("history");
        std::fs::write(&path, "echo a").unwrap();
        append_command(&path, "echo b").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "echo a\necho b\n");
    }

    #[test]
    fn test_normalize_line() {
        assert_eq!(normalize_line("  ls -la  "), Some("ls -la".to_string()));
        assert_eq!(normalize_line(": notzsh;x"), Some(": notzsh;x".to_string()));
        assert_eq!(normalize_line("#"), Some("#".to_string()));
        assert_eq!(normalize_line("#123"), None);
        assert_eq!(normalize_line(": 1:2;"), None);
    }
}
