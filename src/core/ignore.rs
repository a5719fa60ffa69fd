//! Filepath: src/core/ignore.rs
//! Gitignore-compatible rule evaluation with scope inheritance.
//!
//! - Rules live in [`ScopeFrame`]s, one per directory that ships its own
//!   ignore file, plus an outermost default frame.
//! - Frames are evaluated root-to-leaf and rules top-to-bottom; the last
//!   matching rule decides (`!pattern` re-includes).
//! - Compiled matchers are cached per resolver, keyed by pattern text.
//!
//! Malformed lines never surface as errors: they are dropped at parse time,
//! or at compile time when the translated regex is rejected.

use std::sync::Arc;

use moka::sync::Cache;
use regex::Regex;
use tracing::trace;

/// Built-in exclusions that apply to every tree regardless of ignore files.
pub const DEFAULT_IGNORE_RULES: &str = r#"
# --- Version Control & IDEs ---
.git
.svn
.hg
.idea
.vscode
.vs
.history
*.swp

# --- Operating System Files ---
.DS_Store
Thumbs.db
desktop.ini
$RECYCLE.BIN
*.lnk

# --- Dependencies & Packages ---
node_modules
bower_components
jspm_packages
web_modules
venv
.venv
__pycache__
.mvn
vendor
.bundle

# --- Build Outputs & Dist ---
dist
build
out
target
coverage
.nuxt
.next
.astro
.svelte-kit
.vercel
.output
.cache
.parcel-cache
.turbo
.wrangler
public/build
storybook-static
.docusaurus

# --- Package Manager Cache ---
.npm
.yarn
.pnpm-store
.bun

# --- Testing & Coverage ---
.nyc_output
.pytest_cache
test-results
playwright-report
blob-report
.gradle
.terraform
.serverless

# --- Logs & Debug ---
*.log
npm-debug.log*
yarn-error.log*
yarn-debug.log*
pnpm-debug.log*
lerna-debug.log*
hs_err_pid*

# --- Environment & Secrets ---
.env
.env.local
.env.*.local
*.pem
*.key
*.cert
*.pfx
id_rsa
id_rsa.pub
secrets.yaml

# --- Binary / Media Assets ---
*.png
*.jpg
*.jpeg
*.gif
*.webp
*.ico
*.svg
*.bmp
*.tiff
*.raw
*.psd
*.ai
*.mp4
*.m4v
*.mov
*.avi
*.mkv
*.webm
*.mp3
*.wav
*.flac
*.aac
*.ogg

# --- Documents, Archives & Fonts ---
*.pdf
*.doc
*.docx
*.xls
*.xlsx
*.ppt
*.pptx
*.zip
*.tar
*.tar.gz
*.rar
*.7z
*.gz
*.iso
*.exe
*.dll
*.so
*.dylib
*.bin
*.dmg
*.woff
*.woff2
*.ttf
*.eot
*.otf
*.wasm

# --- Lock Files ---
package-lock.json
yarn.lock
pnpm-lock.yaml
bun.lockb
poetry.lock
Gemfile.lock
composer.lock
uv.lock
Cargo.lock

# --- Minified & Source Maps ---
*.min.js
*.min.css
*.map
"#;

/// One line of an ignore file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreRule {
    /// Pattern text without the `!` prefix
    pub pattern: String,
    /// `true` for `!pattern` (re-include)
    pub negated: bool,
}

impl IgnoreRule {
    /// Parse a single ignore-file line.
    ///
    /// Returns `None` for blank lines, comments, and lines that carry no
    /// usable pattern (`!`, `/`). A leading `\#` or `\!` escapes the literal
    /// character.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }

        let (negated, body) = match trimmed.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let body = match body.strip_prefix('\\') {
            Some(rest) if rest.starts_with('#') || rest.starts_with('!') => rest,
            _ => body,
        };

        let body = body.trim();
        if body.trim_matches('/').is_empty() {
            return None;
        }

        Some(Self {
            pattern: body.to_string(),
            negated,
        })
    }
}

/// Rules contributed by one directory level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFrame {
    /// Directory the rules are anchored to ("" = whatever path is tested)
    pub base_path: String,
    /// Rules in declaration order
    pub rules: Vec<IgnoreRule>,
}

impl ScopeFrame {
    pub fn new(base_path: impl Into<String>, rules: Vec<IgnoreRule>) -> Self {
        let base: String = base_path.into();
        Self {
            base_path: base.replace('\\', "/").trim_matches('/').to_string(),
            rules,
        }
    }

    /// Parse ignore-file text into a frame anchored at `base_path`.
    pub fn parse(base_path: impl Into<String>, text: &str) -> Self {
        Self::new(base_path, text.lines().filter_map(IgnoreRule::parse).collect())
    }

    /// The outermost frame: built-in rules followed by `extra` lines from
    /// configuration (so configured lines can re-include built-ins).
    pub fn defaults(extra: &[String]) -> Self {
        let mut frame = Self::parse("", DEFAULT_IGNORE_RULES);
        frame
            .rules
            .extend(extra.iter().filter_map(|line| IgnoreRule::parse(line)));
        frame
    }

    /// Same rules, re-anchored under `base_path`.
    pub fn anchored_at(self, base_path: impl Into<String>) -> Self {
        Self::new(base_path, self.rules)
    }

    /// Path relative to this frame, or `None` when the frame does not
    /// contain `path`.
    fn relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.base_path.is_empty() {
            return (!path.is_empty()).then_some(path);
        }
        let rest = path
            .strip_prefix(self.base_path.as_str())?
            .strip_prefix('/')?;
        (!rest.is_empty()).then_some(rest)
    }
}

/// Root-to-leaf list of frames. Pushing never mutates an existing stack,
/// so sibling subtrees can hold their own copies.
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    frames: Vec<Arc<ScopeFrame>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stack holding a single frame.
    pub fn with_frame(frame: ScopeFrame) -> Self {
        Self::new().pushed(frame)
    }

    /// New stack with `frame` appended as the deepest scope.
    pub fn pushed(&self, frame: ScopeFrame) -> Self {
        let mut frames = self.frames.clone();
        frames.push(Arc::new(frame));
        Self { frames }
    }

    pub fn frames(&self) -> impl Iterator<Item = &ScopeFrame> {
        self.frames.iter().map(|f| f.as_ref())
    }
}

/// Compiled form of a single pattern.
#[derive(Debug)]
pub enum Matcher {
    /// Pattern with a `/`: anchored at the frame base, matches the path or
    /// anything beneath it.
    Rooted(Regex),
    /// Bare pattern: compared against every path segment.
    Name {
        literal: String,
        glob: Option<Regex>,
    },
}

impl Matcher {
    /// Translate a gitignore-style pattern. `None` when the pattern is empty
    /// after cleanup or the translated regex does not compile.
    pub fn compile(pattern: &str) -> Option<Self> {
        let clean = pattern.trim_end_matches('/');
        if clean.is_empty() {
            return None;
        }

        if clean.starts_with('/') || clean.contains('/') {
            let body = clean.strip_prefix('/').unwrap_or(clean);
            if body.is_empty() {
                return None;
            }
            let re = Regex::new(&format!("^{}(?:/.*)?$", glob_to_regex(body))).ok()?;
            return Some(Matcher::Rooted(re));
        }

        let glob = if clean.contains(['*', '?', '[']) {
            Some(Regex::new(&format!("^{}$", glob_to_regex(clean))).ok()?)
        } else {
            None
        };

        Some(Matcher::Name {
            literal: clean.to_string(),
            glob,
        })
    }

    /// Test a path that is already relative to the owning frame.
    pub fn is_match(&self, rel: &str) -> bool {
        match self {
            Matcher::Rooted(re) => re.is_match(rel),
            Matcher::Name { literal, glob } => rel.split('/').any(|segment| {
                segment == literal || glob.as_ref().is_some_and(|g| g.is_match(segment))
            }),
        }
    }
}

/// Glob → regex body (no anchors).
fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                // "**/" may also match zero directories
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '[' => match chars[i + 1..].iter().position(|&c| c == ']') {
                Some(len) if len > 0 => {
                    let class: String = chars[i + 1..i + 1 + len].iter().collect();
                    let class = match class.strip_prefix('!') {
                        Some(rest) => format!("^{rest}"),
                        None => class,
                    };
                    out.push('[');
                    out.push_str(&class.replace('\\', "\\\\"));
                    out.push(']');
                    i += len + 2;
                }
                _ => {
                    out.push_str("\\[");
                    i += 1;
                }
            },
            c => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
                i += 1;
            }
        }
    }

    out
}

/// Evaluates ignore decisions against a [`ScopeStack`].
#[derive(Clone)]
pub struct IgnoreResolver {
    /// Pattern text → compiled matcher (`None` = dropped rule)
    cache: Cache<String, Option<Arc<Matcher>>>,
}

impl Default for IgnoreResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IgnoreResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IgnoreResolver")
            .field("cached", &self.cache.entry_count())
            .finish()
    }
}

impl IgnoreResolver {
    pub fn new() -> Self {
        Self {
            cache: Cache::new(4_096),
        }
    }

    /// Compile (or fetch) the matcher for `pattern`.
    pub fn compile(&self, pattern: &str) -> Option<Arc<Matcher>> {
        if let Some(hit) = self.cache.get(pattern) {
            return hit;
        }

        let compiled = Matcher::compile(pattern).map(Arc::new);
        if compiled.is_none() {
            trace!(pattern, "dropping ignore rule that does not compile");
        }

        self.cache.insert(pattern.to_string(), compiled.clone());
        compiled
    }

    /// Last-match-wins evaluation across every frame that contains `path`.
    pub fn is_ignored(&self, path: &str, scopes: &ScopeStack) -> bool {
        let normalized = path.replace('\\', "/");
        let normalized = normalized.trim_matches('/');
        let mut ignored = false;

        for frame in scopes.frames() {
            let Some(rel) = frame.relative(normalized) else {
                continue;
            };

            for rule in &frame.rules {
                let Some(matcher) = self.compile(&rule.pattern) else {
                    continue;
                };
                if matcher.is_match(rel) {
                    ignored = !rule.negated;
                }
            }
        }

        ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(lines: &[&str]) -> ScopeStack {
        ScopeStack::with_frame(ScopeFrame::parse("", &lines.join("\n")))
    }

    #[test]
    fn test_last_match_wins_within_scope() {
        let resolver = IgnoreResolver::new();
        let scopes = stack(&["build", "!build/keep.txt"]);

        assert!(!resolver.is_ignored("build/keep.txt", &scopes));
        assert!(resolver.is_ignored("build/tmp.o", &scopes));
    }

    #[test]
    fn test_rooted_vs_bare_patterns() {
        let resolver = IgnoreResolver::new();

        let rooted = stack(&["/dist"]);
        assert!(resolver.is_ignored("dist", &rooted));
        assert!(resolver.is_ignored("dist/app.js", &rooted));
        assert!(!resolver.is_ignored("src/dist/app.js", &rooted));

        let bare = stack(&["dist"]);
        assert!(resolver.is_ignored("dist/app.js", &bare));
        assert!(resolver.is_ignored("src/dist/app.js", &bare));
    }

    #[test]
    fn test_star_log_matches_at_any_depth() {
        let resolver = IgnoreResolver::new();
        let scopes = stack(&["*.log"]);

        let got: Vec<bool> = ["debug.log", "src/app.log", "src/app.txt"]
            .iter()
            .map(|p| resolver.is_ignored(p, &scopes))
            .collect();
        assert_eq!(got, vec![true, true, false]);
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        let resolver = IgnoreResolver::new();
        let scopes = stack(&["docs/*.md"]);

        assert!(resolver.is_ignored("docs/intro.md", &scopes));
        assert!(!resolver.is_ignored("docs/deep/intro.md", &scopes));

        let scopes = stack(&["docs/**/*.md"]);
        assert!(resolver.is_ignored("docs/deep/intro.md", &scopes));
        assert!(resolver.is_ignored("docs/intro.md", &scopes));
    }

    #[test]
    fn test_deeper_frame_overrides_parent() {
        let resolver = IgnoreResolver::new();
        let scopes = ScopeStack::with_frame(ScopeFrame::parse("proj", "*.gen.rs"))
            .pushed(ScopeFrame::parse("proj/keep", "!*.gen.rs"));

        assert!(resolver.is_ignored("proj/src/a.gen.rs", &scopes));
        assert!(!resolver.is_ignored("proj/keep/a.gen.rs", &scopes));
    }

    #[test]
    fn test_frame_rooted_rules_are_relative_to_base() {
        let resolver = IgnoreResolver::new();
        let scopes = ScopeStack::with_frame(ScopeFrame::parse("proj/web", "/out"));

        assert!(resolver.is_ignored("proj/web/out/index.html", &scopes));
        assert!(!resolver.is_ignored("proj/out/index.html", &scopes));
        assert!(!resolver.is_ignored("proj/web/src/out/index.html", &scopes));
    }

    #[test]
    fn test_trailing_slash_covers_directory_contents() {
        let resolver = IgnoreResolver::new();
        let scopes = stack(&["generated/"]);

        assert!(resolver.is_ignored("generated", &scopes));
        assert!(resolver.is_ignored("a/generated/x.rs", &scopes));
    }

    #[test]
    fn test_malformed_lines_are_dropped() {
        let frame = ScopeFrame::parse("", "\n# comment\n!\n/\n   \nsrc/[\n*.tmp\n");
        let patterns: Vec<&str> = frame.rules.iter().map(|r| r.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["src/[", "*.tmp"]);

        let resolver = IgnoreResolver::new();
        let scopes = ScopeStack::with_frame(frame);
        assert!(resolver.is_ignored("a.tmp", &scopes));
        assert!(!resolver.is_ignored("src/main.rs", &scopes));
    }

    #[test]
    fn test_escaped_hash_is_literal() {
        let rule = IgnoreRule::parse("\\#notes").unwrap();
        assert_eq!(rule.pattern, "#notes");
        assert!(!rule.negated);
    }

    #[test]
    fn test_default_frame_covers_vcs_and_lockfiles() {
        let resolver = IgnoreResolver::new();
        let scopes = ScopeStack::with_frame(ScopeFrame::defaults(&[]));

        assert!(resolver.is_ignored(".git/config", &scopes));
        assert!(resolver.is_ignored("web/node_modules/x/index.js", &scopes));
        assert!(resolver.is_ignored("package-lock.json", &scopes));
        assert!(!resolver.is_ignored("src/main.rs", &scopes));
    }

    #[test]
    fn test_configured_lines_can_reinclude_defaults() {
        let resolver = IgnoreResolver::new();
        let scopes = ScopeStack::with_frame(ScopeFrame::defaults(&["!Cargo.lock".to_string()]));

        assert!(!resolver.is_ignored("Cargo.lock", &scopes));
    }

    #[test]
    fn test_push_leaves_original_stack_untouched() {
        let base = ScopeStack::with_frame(ScopeFrame::parse("", "a"));
        let deeper = base.pushed(ScopeFrame::parse("x", "b"));

        assert_eq!(base.frames().count(), 1);
        assert_eq!(deeper.frames().count(), 2);
    }

    #[test]
    fn test_compile_is_cached() {
        let resolver = IgnoreResolver::new();
        let first = resolver.compile("*.rs").unwrap();
        let second = resolver.compile("*.rs").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(resolver.compile("///").is_none());
    }
}
