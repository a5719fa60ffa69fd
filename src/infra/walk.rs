//! Filepath: src/infra/walk.rs
//! Filesystem enumeration feeding the tree builder.
//! - Raw listing: ripgrep's `ignore` walker with its own filters off, since
//!   ignore decisions belong to `core::ignore` and the tree's prune pass
//! - Optional early pruning of ignored directories (`.git`, `node_modules`,
//!   ...), so huge dependency trees are never read. Directories are judged
//!   against the same frames the tree uses: the defaults, then every ignore
//!   file from the walk root down, last match wins
//! - Deterministic ordering for stable tests/CI

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::{DirEntry, WalkBuilder};
use moka::sync::Cache;

use crate::core::ignore::{IgnoreResolver, ScopeFrame, ScopeStack};
use crate::core::tree::{ContentSource, FileEntry};

/// Directory filter evaluated while walking.
#[derive(Clone)]
struct DirPrune
{
    resolver: IgnoreResolver,
    defaults: ScopeStack,
    ignore_file: String,
    root: PathBuf,
    /// Relative dir → frame parsed from its ignore file
    frames: Cache<String, Option<Arc<ScopeFrame>>>,
}

impl DirPrune
{
    /// Frame from the ignore file directly inside `rel_dir`, if any.
    fn frame(
        &self,
        rel_dir: &str,
    ) -> Option<Arc<ScopeFrame>>
    {
        self.frames
            .get_with(rel_dir.to_string(), || {
                let path = self
                    .root
                    .join(rel_dir)
                    .join(&self.ignore_file);
                std::fs::read_to_string(path)
                    .ok()
                    .map(|text| Arc::new(ScopeFrame::parse(rel_dir, &text)))
            })
    }

    /// Whether the directory at `rel` (relative to the walk root) is ignored.
    fn is_pruned(
        &self,
        rel: &str,
    ) -> bool
    {
        let parents = rel
            .match_indices('/')
            .map(|(i, _)| &rel[..i]);

        let mut scopes = self.defaults.clone();
        for dir in std::iter::once("").chain(parents)
        {
            if let Some(frame) = self.frame(dir)
            {
                scopes = scopes.pushed((*frame).clone());
            }
        }
        self.resolver
            .is_ignored(rel, &scopes)
    }
}

#[derive(Default)]
pub struct FileWalker
{
    /// Resolver, default frame and ignore-file name for early pruning
    prune: Option<(IgnoreResolver, ScopeFrame, String)>,
}

impl FileWalker
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Skip directories that `defaults` plus any `ignore_file` found on the
    /// way down exclude.
    pub fn with_prune(
        mut self,
        resolver: IgnoreResolver,
        defaults: ScopeFrame,
        ignore_file: &str,
    ) -> Self
    {
        self.prune = Some((resolver, defaults, ignore_file.to_string()));
        self
    }

    fn build_walk(
        &self,
        root: &Path,
    ) -> WalkBuilder
    {
        let mut b = WalkBuilder::new(root);

        // Every file is listed; rules are applied by the tree
        b.standard_filters(false);
        b.hidden(false);

        if let Some((resolver, defaults, ignore_file)) = self.prune.clone()
        {
            let prune = DirPrune {
                resolver,
                defaults: ScopeStack::with_frame(defaults),
                ignore_file,
                root: root.to_path_buf(),
                frames: Cache::new(1_024),
            };
            b.filter_entry(move |ent: &DirEntry| {
                let is_dir = ent
                    .file_type()
                    .is_some_and(|ft| ft.is_dir());
                if !is_dir || ent.depth() == 0
                {
                    return true;
                }
                let rel = ent
                    .path()
                    .strip_prefix(&prune.root)
                    .unwrap_or(ent.path())
                    .to_string_lossy()
                    .replace('\\', "/");
                !prune.is_pruned(&rel)
            });
        }

        b
    }

    /// Regular files under `root`, sorted.
    pub fn walk_files<P: AsRef<Path>>(
        &self,
        root: P,
    ) -> Vec<PathBuf>
    {
        let root_path = root.as_ref();

        let mut out: Vec<PathBuf> = self
            .build_walk(root_path)
            .build()
            .filter_map(|res| match res
            {
                Ok(entry) => Some(entry),
                Err(e) =>
                {
                    tracing::warn!(error = %e, "walk error");
                    None
                }
            })
            .filter(|entry| {
                entry
                    .file_type()
                    .is_some_and(|ft| ft.is_file())
            })
            .map(|entry| entry.into_path())
            .collect();

        out.sort();
        out
    }

    /// Tree entries for every file under `root`, each path led by
    /// `project` and read lazily from disk.
    pub fn entries<P: AsRef<Path>>(
        &self,
        root: P,
        project: &str,
        max_file_bytes: u64,
    ) -> Vec<FileEntry>
    {
        let root_path = root.as_ref();

        self.walk_files(root_path)
            .into_iter()
            .filter_map(|abs| {
                let rel = abs
                    .strip_prefix(root_path)
                    .ok()?
                    .components()
                    .map(|c| {
                        c.as_os_str()
                            .to_string_lossy()
                            .into_owned()
                    })
                    .collect::<Vec<_>>()
                    .join("/");
                Some(FileEntry::new(
                    format!("{project}/{rel}"),
                    ContentSource::Disk {
                        path: abs,
                        max_bytes: max_file_bytes,
                    },
                ))
            })
            .collect()
    }
}

/// Directory name used as the project root for `dir`.
pub fn project_name(dir: &Path) -> String
{
    let resolved = dir
        .canonicalize()
        .unwrap_or_else(|_| dir.to_path_buf());
    resolved
        .file_name()
        .map(|n| {
            n.to_string_lossy()
                .into_owned()
        })
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| crate::core::tree::PLACEHOLDER_ROOT.to_string())
}

#[cfg(test)]
mod tests
{
    use std::fs;

    use anyhow::Result;
    use tempfile::TempDir;

    use super::*;

    /// Create a file with parent dirs as needed
    fn write_file(
        root: &Path,
        rel: &str,
        contents: &str,
    ) -> Result<()>
    {
        let path = root.join(rel);
        if let Some(parent) = path.parent()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    fn relative(
        root: &Path,
        files: Vec<PathBuf>,
    ) -> Vec<String>
    {
        files
            .iter()
            .map(|p| {
                p.strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn test_lists_everything_without_prune() -> Result<()>
    {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, ".gitignore", "*.log")?;
        write_file(root, "debug.log", "x")?;
        write_file(root, "src/main.rs", "fn main() {}")?;

        let files = relative(root, FileWalker::new().walk_files(root));
        assert_eq!(files, vec![".gitignore", "debug.log", "src/main.rs"]);
        Ok(())
    }

    #[test]
    fn test_default_prune_skips_dependency_dirs() -> Result<()>
    {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, "node_modules/pkg/index.js", "js")?;
        write_file(root, "src/lib.rs", "pub fn x() {}")?;

        let walker = FileWalker::new().with_prune(
            IgnoreResolver::new(),
            ScopeFrame::defaults(&[]),
            ".gitignore",
        );
        let files = relative(root, walker.walk_files(root));

        assert_eq!(files, vec!["src/lib.rs"]);
        Ok(())
    }

    #[test]
    fn test_prune_honors_nested_negation() -> Result<()>
    {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        write_file(root, ".gitignore", "!vendor")?;
        write_file(root, "vendor/keep.go", "package keep")?;
        write_file(root, "lib/.gitignore", "!build")?;
        write_file(root, "lib/build/gen.rs", "// generated")?;
        write_file(root, "build/out.o", "o")?;
        write_file(root, "node_modules/pkg/index.js", "js")?;

        let walker = FileWalker::new().with_prune(
            IgnoreResolver::new(),
            ScopeFrame::defaults(&[]),
            ".gitignore",
        );
        let files = relative(root, walker.walk_files(root));

        assert_eq!(
            files,
            vec![
                ".gitignore",
                "lib/.gitignore",
                "lib/build/gen.rs",
                "vendor/keep.go"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_entries_are_led_by_project_name() -> Result<()>
    {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        write_file(root, "src/lib.rs", "pub fn x() {}")?;

        let entries = FileWalker::new().entries(root, "demo", 1024);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "demo/src/lib.rs");
        assert_eq!(entries[0].content.load("lib.rs"), "pub fn x() {}");
        Ok(())
    }
}
