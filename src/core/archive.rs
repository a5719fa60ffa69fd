//! Filepath: src/core/archive.rs
//! Sinks for (path, content) pairs: unpacked blobs and patched files.
//!
//! Failures are reported per file; one bad path never stops the batch.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::blob::sanitize_path;
use crate::infra::io::write_atomic;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to write {path}: {message}")]
pub struct WriteError {
    pub path: String,
    pub message: String,
}

/// Accepts files one at a time.
pub trait ArchiveWriter {
    fn add(&mut self, path: &str, content: &str) -> Result<(), WriteError>;

    /// Flush anything buffered. Directory writers have nothing to do.
    fn finish(&mut self) -> Result<(), WriteError> {
        Ok(())
    }
}

/// Writes each file atomically beneath a root directory.
#[derive(Debug)]
pub struct DirectoryWriter {
    root: PathBuf,
    dry_run: bool,
    written: Vec<PathBuf>,
}

impl DirectoryWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dry_run: false,
            written: Vec::new(),
        }
    }

    /// Record targets without touching the filesystem.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Targets written (or that would have been, in dry-run mode).
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl ArchiveWriter for DirectoryWriter {
    fn add(&mut self, path: &str, content: &str) -> Result<(), WriteError> {
        // Never escape the root, whatever the path says
        let rel = sanitize_path(path).ok_or_else(|| WriteError {
            path: path.to_string(),
            message: "empty path".to_string(),
        })?;
        let target = self.root.join(&rel);

        if !self.dry_run {
            write_atomic(&target, content.as_bytes()).map_err(|e| WriteError {
                path: rel.clone(),
                message: format!("{e:#}"),
            })?;
        }

        debug!(path = %target.display(), dry_run = self.dry_run, "file written");
        self.written.push(target);
        Ok(())
    }
}

/// Collects files in memory (tests, clipboard, previews).
#[derive(Debug, Default, Clone)]
pub struct MemoryArchive {
    pub files: IndexMap<String, String>,
}

impl ArchiveWriter for MemoryArchive {
    fn add(&mut self, path: &str, content: &str) -> Result<(), WriteError> {
        self.files.insert(path.to_string(), content.to_string());
        Ok(())
    }
}

/// Outcome of one file handed to a writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub path: String,
    pub result: Result<(), WriteError>,
}

impl WriteReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Feed every pair to `writer`, collecting per-file results.
pub fn write_all<'a, I>(writer: &mut dyn ArchiveWriter, files: I) -> Vec<WriteReport>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut reports: Vec<WriteReport> = files
        .into_iter()
        .map(|(path, content)| {
            let result = writer.add(path, content);
            if let Err(e) = &result {
                warn!(error = %e, "write failed");
            }
            WriteReport {
                path: path.to_string(),
                result,
            }
        })
        .collect();

    if let Err(e) = writer.finish() {
        warn!(error = %e, "archive finish failed");
        reports.push(WriteReport {
            path: e.path.clone(),
            result: Err(e),
        });
    }

    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directory_writer_stays_under_root() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let mut writer = DirectoryWriter::new(tmp.path());

        let reports = write_all(
            &mut writer,
            [("../../escape.txt", "x"), ("src/a.rs", "fn a() {}")],
        );

        assert!(reports.iter().all(WriteReport::is_ok));
        assert_eq!(std::fs::read_to_string(tmp.path().join("escape.txt"))?, "x");
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("src/a.rs"))?,
            "fn a() {}"
        );
        Ok(())
    }

    #[test]
    fn test_failures_do_not_abort_batch() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        // A file where a directory is needed makes the first write fail
        std::fs::write(tmp.path().join("blocker"), "")?;
        let mut writer = DirectoryWriter::new(tmp.path());

        let reports = write_all(&mut writer, [("blocker/a.txt", "a"), ("ok.txt", "b")]);

        assert!(!reports[0].is_ok());
        assert!(reports[1].is_ok());
        assert_eq!(std::fs::read_to_string(tmp.path().join("ok.txt"))?, "b");
        Ok(())
    }

    #[test]
    fn test_dry_run_writes_nothing() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let mut writer = DirectoryWriter::new(tmp.path()).dry_run(true);

        write_all(&mut writer, [("a.txt", "a")]);

        assert_eq!(writer.written().len(), 1);
        assert!(!tmp.path().join("a.txt").exists());
        Ok(())
    }

    #[test]
    fn test_memory_archive_keeps_order() {
        let mut archive = MemoryArchive::default();
        write_all(&mut archive, [("b", "2"), ("a", "1")]);
        assert_eq!(archive.files.keys().collect::<Vec<_>>(), vec!["b", "a"]);
    }
}
