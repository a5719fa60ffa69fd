//! **smelt** - pack a project into one LLM context document and apply
//! SEARCH/REPLACE proposals back onto it
//!
//! Gitignore-faithful pruning, a bit-exact document format that survives its
//! own header token in file content, and a conservative patch engine that
//! only ever applies uniquely located edits.

/// Command-line interface with clap integration
pub mod cli;

/// Shell completion generation
pub mod completion;

/// Core pipeline - ignore rules, tree, document format, patch engine
pub mod core {
    /// Gitignore-style rules evaluated last-match-wins over a scope stack
    pub mod ignore;
    pub use ignore::{IgnoreResolver, IgnoreRule, ScopeFrame, ScopeStack};

    /// Arena tree keyed by full path, with pruning, flattening and selection
    pub mod tree;
    pub use tree::{ContentSource, FileEntry, FileNode, FileTree, FlatEntry};

    /// Extension → code fence tag table
    pub mod lang;

    /// Context document serializer/deserializer and block index
    pub mod blob;
    pub use blob::{BlobFile, DocumentIndex, deserialize, serialize};

    /// SEARCH/REPLACE proposal parser (long and compact markers)
    pub mod patch;
    pub use patch::{MarkerSyntax, PatchRecord, SyntaxChoice};

    /// Exact-then-fuzzy search location with ambiguity reporting
    pub mod locate;
    pub use locate::{MatchLocator, MatchResult, MatchStatus};

    /// Span splicing, overlap detection and diff previews
    pub mod apply;
    pub use apply::{ApplyOutcome, Hunk, apply_grouped, apply_to_blob};

    /// (path, content) sinks: directory and in-memory writers
    pub mod archive;
    pub use archive::{ArchiveWriter, DirectoryWriter, MemoryArchive};

    /// One-shot worker tasks over immutable snapshots
    pub mod worker;

    /// Explicit session state plus a typed event bus
    pub mod session;
    pub use session::{Session, SessionEvent};

    /// tiktoken estimates with a content-hash cache
    pub mod tokens;

    /// `smelt tree`
    pub mod tree_cmd;
    pub use tree_cmd::run as tree_run;

    /// `smelt pack`
    pub mod pack;
    pub use pack::run as pack_run;

    /// `smelt unpack`
    pub mod unpack;
    pub use unpack::run as unpack_run;

    /// `smelt patch`
    pub mod patch_cmd;
    pub use patch_cmd::run as patch_run;
}

/// Infrastructure - configuration, I/O, walking, terminal helpers
pub mod infra {
    /// Layered configuration (file + `SMELT_*` environment)
    pub mod config;
    pub use config::{Config, init as config_init, load_config};

    /// Sentinel-aware file reading and atomic writes
    pub mod io;
    pub use io::{FileContent, read_file_smart, write_atomic};

    /// Byte offsets of line starts
    pub mod line_index;
    pub use line_index::LineIndex;

    /// Filesystem enumeration feeding the tree builder
    pub mod walk;
    pub use walk::FileWalker;

    /// Spinners, clipboard and colored marks
    pub mod term;
}

// Strategic re-exports for clean CLI interface
pub use crate::cli::{AppContext, Cli, Commands};
pub use crate::core::{pack_run, patch_run, tree_run, unpack_run};
pub use crate::infra::{Config, FileWalker, load_config};
