//! File reading with binary/size sentinels, and atomic writes.

use anyhow::{Context, Result};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

const MMAP_THRESHOLD: u64 = 1024 * 1024; // 1 MiB

/// Bytes sniffed for NUL before a file is treated as text.
const SNIFF_LEN: usize = 512;

/// Extensions omitted without opening the file.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "woff", "woff2", "ttf", "eot", "zip", "rar", "pdf",
    "exe", "dll", "bin",
];

pub enum FileContent {
    Mapped(Mmap),
    Buffered(String),
}

impl FileContent {
    /// Owned text; invalid UTF-8 is replaced rather than rejected.
    pub fn into_string(self) -> String {
        match self {
            FileContent::Mapped(mmap) => String::from_utf8_lossy(&mmap).into_owned(),
            FileContent::Buffered(s) => s,
        }
    }
}

pub fn read_file_smart<P: AsRef<Path>>(path: P) -> Result<FileContent> {
    let path = path.as_ref();
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to read metadata for {}", path.display()))?;

    if metadata.len() > MMAP_THRESHOLD {
        let file =
            File::open(path).with_context(|| format!("Failed to open file {}", path.display()))?;

        // Safety: read-only mapping, dropped before any write to the same path
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to memory-map {}", path.display()))?;

        Ok(FileContent::Mapped(mmap))
    } else {
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read file {}", path.display()))?;
        let text = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };
        Ok(FileContent::Buffered(text))
    }
}

pub fn is_binary_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            BINARY_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

fn head_has_nul(path: &Path) -> std::io::Result<bool> {
    let mut head = [0u8; SNIFF_LEN];
    let mut file = File::open(path)?;
    let n = file.read(&mut head)?;
    Ok(memchr::memchr(0, &head[..n]).is_some())
}

/// Content provider used by the tree: the file's text, or a one-line
/// sentinel that is treated as ordinary text downstream. Never fails.
pub fn load_text(path: &Path, name: &str, max_bytes: u64) -> String {
    if is_binary_extension(name) {
        return format!("[Binary File: {name} Omitted]");
    }

    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable file");
            return format!("[Error reading {name}]");
        }
    };

    if size > max_bytes {
        debug!(path = %path.display(), size, "file over size limit");
        return format!(
            "[File too large: {name} ({:.2} KB) Omitted for performance]",
            size as f64 / 1024.0
        );
    }

    match head_has_nul(path) {
        Ok(true) => return format!("[Binary Content Detected: {name} Omitted]"),
        Ok(false) => {}
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable file header");
            return format!("[Error reading header of {name}]");
        }
    }

    match read_file_smart(path) {
        Ok(content) => content.into_string(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable file");
            format!("[Error reading {name}]")
        }
    }
}

/// Replace `path` with `data` via a same-directory temp file.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

    // Keep the destination's permissions when it already exists
    let perms = fs::metadata(path).map(|m| m.permissions()).ok();

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("temp file in {}", dir.display()))?;

    use std::io::Write;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;

    if let Some(perms) = perms {
        fs::set_permissions(tmp.path(), perms).context("set temp permissions")?;
    }

    if let Err(e) = tmp.persist(path) {
        // Different filesystem? Try copy fallback
        fs::copy(e.file.path(), path).with_context(|| format!("write {}", path.display()))?;
    }

    Ok(())
}
