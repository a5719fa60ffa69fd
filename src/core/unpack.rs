//! Filepath: src/core/unpack.rs
//! `smelt unpack`: deserialize a context document on a worker and restore
//! its files beneath an output directory.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;

use crate::cli::{AppContext, UnpackArgs};
use crate::core::archive::{DirectoryWriter, WriteReport, write_all};
use crate::core::worker::{UnpackRequest, spawn_unpack};
use crate::infra::config::load_config;
use crate::infra::io::read_file_smart;
use crate::infra::term;

pub fn run(args: UnpackArgs, ctx: &AppContext) -> Result<()> {
    let config = load_config()?;
    let out_dir = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.unpack.output_dir));

    let text = read_file_smart(&args.blob)
        .with_context(|| format!("Failed to read {}", args.blob.display()))?
        .into_string();

    let progress = term::spinner(ctx, "Unpacking");
    let response = spawn_unpack(UnpackRequest {
        generation: 0,
        text: Arc::from(text),
        strip_root: config.unpack.strip_root && !args.keep_root,
    })
    .wait()?;
    let files = response
        .result
        .with_context(|| format!("Nothing to restore from {}", args.blob.display()))?;

    let mut writer = DirectoryWriter::new(&out_dir).dry_run(ctx.dry_run);
    let reports = write_all(
        &mut writer,
        files
            .iter()
            .map(|f| (f.path.as_str(), f.content.as_str())),
    );
    progress.finish_and_clear();

    let failed: Vec<&WriteReport> = reports.iter().filter(|r| !r.is_ok()).collect();

    if args.json {
        let written: Vec<&str> = reports
            .iter()
            .filter(|r| r.is_ok())
            .map(|r| r.path.as_str())
            .collect();
        let errors: Vec<_> = failed
            .iter()
            .filter_map(|r| r.result.as_ref().err())
            .map(|e| json!({ "path": e.path, "error": e.message }))
            .collect();
        println!(
            "{}",
            json!({
                "project": response.project,
                "output_dir": writer.root().display().to_string(),
                "written": written,
                "failed": errors,
                "dry_run": ctx.dry_run,
            })
        );
    } else if !ctx.quiet {
        for r in &reports {
            match &r.result {
                Ok(()) => println!("  {} {}", term::ok_mark(), r.path),
                Err(e) => println!("  {} {}", term::fail_mark(), e),
            }
        }
        let verb = if ctx.dry_run { "Would restore" } else { "Restored" };
        println!(
            "{verb} {} of {} files into {}",
            reports.len() - failed.len(),
            reports.len(),
            writer.root().display()
        );
    }

    match failed.first().and_then(|r| r.result.clone().err()) {
        Some(first) => Err(anyhow::Error::new(first).context(format!(
            "{} of {} files could not be written",
            failed.len(),
            reports.len()
        ))),
        None => Ok(()),
    }
}
