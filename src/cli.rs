use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::core::patch::SyntaxChoice;

/// Shared application context for global flags
#[derive(Clone, Debug, Default)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
    pub dry_run: bool,  // global --dry-run
    pub verbose: bool,  // global --verbose
}

/// Bad input that clap cannot catch on its own.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct InvalidInput(pub String);

#[derive(Parser)]
#[command(name = "smelt")]
#[command(
    about = "Pack a project into one LLM context document and apply SEARCH/REPLACE proposals back"
)]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress progress spinners and non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Show what would be written without writing it
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Debug-level logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    pub fn context(&self) -> AppContext {
        AppContext {
            quiet: self.quiet,
            no_color: self.no_color,
            dry_run: self.dry_run,
            verbose: self.verbose,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display the project tree after ignore rules
    Tree(TreeArgs),

    /// Serialize selected files into a context document
    Pack(PackArgs),

    /// Restore files from a context document
    Unpack(UnpackArgs),

    /// Match a SEARCH/REPLACE proposal and optionally apply it
    Patch(PatchArgs),

    /// Initialize a smelt.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Parser)]
pub struct TreeArgs {
    /// Root directory to scan
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Additional ignore patterns (gitignore syntax)
    #[arg(short, long)]
    pub ignore: Vec<String>,

    /// Maximum depth to display
    #[arg(short, long)]
    pub depth: Option<usize>,
}

#[derive(Parser)]
pub struct PackArgs {
    /// Root directory to pack
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Output file path (defaults to pack.output_file)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Additional ignore patterns (gitignore syntax)
    #[arg(short, long)]
    pub ignore: Vec<String>,

    /// Deselect a file or directory (relative to PATH)
    #[arg(short = 'x', long = "exclude")]
    pub exclude: Vec<String>,

    /// Write the document to stdout instead of a file
    #[arg(long)]
    pub stdout: bool,

    /// Copy the document to the clipboard
    #[arg(long)]
    pub clipboard: bool,

    /// Model or encoding for the token estimate (defaults to pack.model)
    #[arg(long)]
    pub model: Option<String>,

    /// Output a summary in JSON format (single line)
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct UnpackArgs {
    /// Context document to restore from
    pub blob: PathBuf,

    /// Output directory (defaults to unpack.output_dir)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Keep the project directory in restored paths
    #[arg(long)]
    pub keep_root: bool,

    /// Output results in JSON format (single line)
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct PatchArgs {
    /// Proposal file containing SEARCH/REPLACE blocks
    pub proposal: Option<PathBuf>,

    /// Read the proposal from the clipboard
    #[arg(long, conflicts_with = "proposal")]
    pub from_clipboard: bool,

    /// Context document the proposal targets
    #[arg(long, conflicts_with = "dir", required_unless_present = "dir")]
    pub blob: Option<PathBuf>,

    /// Project directory the proposal targets
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Write the result (otherwise only a preview is shown)
    #[arg(long)]
    pub apply: bool,

    /// Deactivate hunk N (0-based proposal order); repeatable
    #[arg(long, value_name = "N")]
    pub skip: Vec<usize>,

    /// Marker syntax (defaults to patch.syntax)
    #[arg(long, value_enum)]
    pub syntax: Option<SyntaxArg>,

    /// Output results in JSON format (single line)
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SyntaxArg {
    /// Detect from the proposal text
    Auto,
    /// `<<<<<<< SEARCH` / `=======` / `>>>>>>> REPLACE`
    Long,
    /// `<<<< SEARCH` / `==== REPLACE` / `>>>>`
    Compact,
}

impl From<SyntaxArg> for SyntaxChoice {
    fn from(arg: SyntaxArg) -> Self {
        match arg {
            SyntaxArg::Auto => SyntaxChoice::Auto,
            SyntaxArg::Long => SyntaxChoice::Long,
            SyntaxArg::Compact => SyntaxChoice::Compact,
        }
    }
}

#[derive(Parser)]
pub struct InitArgs {
    /// Directory to initialize config in
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Parser)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,

    /// Output directory; if omitted and --stdout not set, prints error
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Print completion script to stdout instead of a file
    #[arg(long)]
    pub stdout: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_patch_requires_a_target() {
        assert!(Cli::try_parse_from(["smelt", "patch", "p.txt"]).is_err());
        assert!(Cli::try_parse_from(["smelt", "patch", "p.txt", "--blob", "b.md"]).is_ok());
        assert!(
            Cli::try_parse_from(["smelt", "patch", "p.txt", "--blob", "b.md", "--dir", "."])
                .is_err()
        );
    }

    #[test]
    fn test_global_flags_reach_context() {
        let cli = Cli::try_parse_from(["smelt", "tree", "--quiet", "-v"]).unwrap();
        let ctx = cli.context();
        assert!(ctx.quiet && ctx.verbose);
        assert!(!ctx.dry_run);
    }
}
