//! Fence language tags for serialized file blocks.

use std::path::Path;

/// Tag for the opening fence of `name`'s block.
///
/// Looks up the lowercased extension (or the whole file name when there is
/// no extension, which is how `Dockerfile` gets its tag). Anything not in
/// the table gets an empty tag.
pub fn fence_tag(name: &str) -> &'static str {
    let file_name = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name);

    let key = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or(file_name)
        .to_ascii_lowercase();

    match key.as_str() {
        "js" => "javascript",
        "jsx" => "jsx",
        "ts" => "typescript",
        "tsx" => "tsx",
        "html" => "html",
        "css" => "css",
        "scss" => "scss",
        "less" => "less",
        "json" => "json",
        "py" => "python",
        "java" => "java",
        "c" => "c",
        "cpp" | "h" => "cpp",
        "cs" => "csharp",
        "go" => "go",
        "rs" => "rust",
        "php" => "php",
        "rb" => "ruby",
        "sh" => "bash",
        "yaml" | "yml" => "yaml",
        "md" => "markdown",
        "sql" => "sql",
        "xml" => "xml",
        "vue" => "vue",
        "txt" => "text",
        "ini" => "ini",
        "toml" => "toml",
        "dockerfile" => "dockerfile",
        _ => "",
    }
}
