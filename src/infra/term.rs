//! Terminal plumbing shared by the command runners: spinners, clipboard,
//! colored status marks. Colors go through `if_supports_color`, so piped
//! output and `--no-color` stay plain.

use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::{OwoColorize, Stream};

use crate::cli::AppContext;

/// Stderr spinner, hidden in quiet mode.
pub fn spinner(ctx: &AppContext, msg: &'static str) -> ProgressBar {
    if ctx.quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg);
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn copy_to_clipboard(content: &str) -> Result<()> {
    use arboard::Clipboard;

    let mut clipboard = Clipboard::new().context("Failed to access clipboard")?;
    clipboard
        .set_text(content)
        .context("Failed to copy to clipboard")?;
    Ok(())
}

pub fn read_clipboard() -> Result<String> {
    use arboard::Clipboard;

    let mut clipboard = Clipboard::new().context("Failed to access clipboard")?;
    clipboard
        .get_text()
        .context("Failed to read text from clipboard")
}

pub fn ok_mark() -> String {
    "✓".if_supports_color(Stream::Stdout, |t| t.green())
        .to_string()
}

pub fn fail_mark() -> String {
    "✗".if_supports_color(Stream::Stdout, |t| t.red())
        .to_string()
}

pub fn warn_text(s: &str) -> String {
    s.if_supports_color(Stream::Stdout, |t| t.yellow())
        .to_string()
}

pub fn dir_text(s: &str) -> String {
    s.if_supports_color(Stream::Stdout, |t| t.blue())
        .to_string()
}

pub fn bold_text(s: &str) -> String {
    s.if_supports_color(Stream::Stdout, |t| t.bold())
        .to_string()
}
