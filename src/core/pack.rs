//! Filepath: src/core/pack.rs
//! `smelt pack`: walk, prune, deselect, serialize, count tokens.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use itertools::Itertools;
use serde_json::json;
use tracing::warn;

use crate::cli::{AppContext, PackArgs};
use crate::core::session::Session;
use crate::core::tokens::TokenCounter;
use crate::infra::config::load_config;
use crate::infra::io::write_atomic;
use crate::infra::term;

pub fn run(args: PackArgs, ctx: &AppContext) -> Result<()> {
    let mut config = load_config()?;
    config.ignore_patterns.extend(args.ignore.iter().cloned());
    let model = args.model.clone().unwrap_or_else(|| config.pack.model.clone());
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.pack.output_file));

    let progress = term::spinner(ctx, "Packing");
    let mut session = Session::new(config);
    let root = session
        .load_dir(&args.path)
        .with_context(|| format!("Failed to load {}", args.path.display()))?
        .root_name()
        .to_string();

    for rel in &args.exclude {
        let id = node_id(&root, rel);
        if !session.set_selected(&id, false) {
            warn!(path = %rel, "exclude target is not in the tree");
        }
    }

    let document = session.serialize()?.to_string();
    let files = session
        .tree()
        .map_or(0, |t| t.selected_files().len());
    let tokens = TokenCounter::new(&model)?.count(&document);
    progress.finish_and_clear();

    if args.stdout {
        print!("{document}");
    } else if !ctx.dry_run {
        write_atomic(&output, document.as_bytes())
            .with_context(|| format!("Failed to write to {}", output.display()))?;
    }

    if args.clipboard && !ctx.dry_run {
        term::copy_to_clipboard(&document)?;
    }

    if args.json {
        let summary = json!({
            "root": root,
            "files": files,
            "bytes": document.len(),
            "tokens": tokens,
            "model": model,
            "output": (!args.stdout).then(|| output.display().to_string()),
            "dry_run": ctx.dry_run,
        });
        // Keep stdout a clean document when it already carries one
        if args.stdout {
            eprintln!("{summary}");
        } else {
            println!("{summary}");
        }
        return Ok(());
    }

    if ctx.quiet {
        return Ok(());
    }
    let message = summary_line(files, tokens, &output, args.stdout, ctx.dry_run);
    if args.stdout {
        eprintln!("{message}");
    } else {
        println!("{message}");
    }
    if args.clipboard && !ctx.dry_run {
        eprintln!("{} Copied to clipboard", term::ok_mark());
    }
    Ok(())
}

/// Tree id for a path given relative to the packed directory.
fn node_id(root: &str, rel: &str) -> String {
    let cleaned = rel
        .replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .join("/");
    if cleaned.is_empty() {
        root.to_string()
    } else {
        format!("{root}/{cleaned}")
    }
}

fn summary_line(files: usize, tokens: usize, output: &Path, stdout: bool, dry_run: bool) -> String {
    let target = if stdout {
        "stdout".to_string()
    } else {
        output.display().to_string()
    };
    if dry_run && !stdout {
        term::warn_text(&format!(
            "DRY RUN: would pack {files} files (~{tokens} tokens) into {target}"
        ))
    } else {
        format!(
            "{} Packed {files} files (~{tokens} tokens) into {target}",
            term::ok_mark()
        )
    }
}
