//! Filepath: src/core/patch_cmd.rs
//! `smelt patch`: locate a SEARCH/REPLACE proposal against a context
//! document or a project directory, preview it, and optionally apply it.
//!
//! Preview is the default. `--apply` rewrites the document atomically, or
//! writes each changed file through the directory writer.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::warn;

use crate::cli::{AppContext, InvalidInput, PatchArgs};
use crate::core::apply::{ApplyOutcome, Hunk};
use crate::core::archive::{DirectoryWriter, WriteReport};
use crate::core::locate::{MatchStatus, MatchVia};
use crate::core::session::Session;
use crate::infra::config::load_config;
use crate::infra::io::{read_file_smart, write_atomic};
use crate::infra::term;

pub fn run(args: PatchArgs, ctx: &AppContext) -> Result<()> {
    let mut config = load_config()?;
    if let Some(syntax) = args.syntax {
        config.patch.syntax = syntax.into();
    }

    let target = match (args.blob.as_deref(), args.dir.as_deref()) {
        (Some(blob), _) => Target::Blob(blob),
        (None, Some(dir)) => Target::Dir(dir),
        (None, None) => {
            return Err(InvalidInput("either --blob or --dir is required".into()).into());
        }
    };
    let proposal = read_proposal(&args)?;
    let mut session = Session::new(config);

    let snapshot = match target {
        Target::Blob(blob) => {
            let text = read_file_smart(blob)
                .with_context(|| format!("Failed to read {}", blob.display()))?
                .into_string();
            session.set_document(text);
            session.document_snapshot()?
        }
        Target::Dir(dir) => {
            session
                .load_dir(dir)
                .with_context(|| format!("Failed to load {}", dir.display()))?;
            session.tree_snapshot()?
        }
    };

    let progress = term::spinner(ctx, "Locating");
    session.submit_proposal(&proposal, snapshot)?;
    progress.finish_and_clear();

    if session.hunks().is_empty() {
        if args.json {
            println!("{}", json!({ "hunks": [], "changed": [], "applied": false }));
        } else if !ctx.quiet {
            println!("{}", term::warn_text("No SEARCH/REPLACE blocks found"));
        }
        return Ok(());
    }

    for &order in &args.skip {
        if !session.set_hunk_active(order, false) {
            warn!(order, "--skip names no hunk");
        }
    }

    let preview = session.preview()?;
    if args.json {
        if !args.apply {
            println!("{}", json_summary(session.hunks(), &preview, false, ctx));
            return Ok(());
        }
    } else if !ctx.quiet {
        print_hunks(session.hunks());
        for change in &preview.changes {
            print!("{}", change.unified_diff());
        }
    }

    if !args.apply {
        if !args.json && !ctx.quiet {
            println!(
                "{} hunk(s) ready. Re-run with --apply to write.",
                preview.applied_count()
            );
        }
        return Ok(());
    }

    let hunks: Vec<Hunk> = session.hunks().to_vec();
    let (outcome, reports) = match target {
        Target::Blob(blob) => {
            let outcome = session.apply_to_document()?;
            if !ctx.dry_run {
                let doc = session.document().unwrap_or_default();
                write_atomic(blob, doc.as_bytes())
                    .with_context(|| format!("Failed to write {}", blob.display()))?;
            }
            let report = WriteReport {
                path: blob.display().to_string(),
                result: Ok(()),
            };
            (outcome, vec![report])
        }
        Target::Dir(dir) => {
            let mut writer = DirectoryWriter::new(dir).dry_run(ctx.dry_run);
            session.apply_to_files(&mut writer)?
        }
    };

    if args.json {
        println!("{}", json_summary(&hunks, &outcome, true, ctx));
    } else if !ctx.quiet {
        print_written(&reports, &outcome, ctx.dry_run);
    }

    let failed: Vec<&WriteReport> = reports.iter().filter(|r| !r.is_ok()).collect();
    match failed.first().and_then(|r| r.result.clone().err()) {
        Some(first) => Err(anyhow::Error::new(first).context(format!(
            "{} of {} files could not be written",
            failed.len(),
            reports.len()
        ))),
        None => Ok(()),
    }
}

/// What the proposal is matched against.
#[derive(Clone, Copy)]
enum Target<'a> {
    Blob(&'a Path),
    Dir(&'a Path),
}

fn read_proposal(args: &PatchArgs) -> Result<String> {
    if args.from_clipboard {
        return term::read_clipboard();
    }
    let path: &Path = args.proposal.as_deref().ok_or_else(|| {
        InvalidInput("a proposal file or --from-clipboard is required".into())
    })?;
    Ok(read_file_smart(path)
        .with_context(|| format!("Failed to read {}", path.display()))?
        .into_string())
}

/// Reviewer-facing status for one hunk.
fn status_label(hunk: &Hunk) -> String {
    if hunk.result.is_unique() && !hunk.active {
        "Skipped".to_string()
    } else {
        hunk.result.label()
    }
}

fn print_hunks(hunks: &[Hunk]) {
    for hunk in hunks {
        let label = status_label(hunk);
        let styled = match (hunk.result.status, hunk.active) {
            (MatchStatus::Unique, true) => format!("{} {label}", term::ok_mark()),
            (MatchStatus::NotFound, _) => format!("{} {label}", term::fail_mark()),
            _ => term::warn_text(&label),
        };
        let target = hunk
            .result
            .resolved_path
            .as_deref()
            .unwrap_or(&hunk.result.record.target_file);
        println!(
            "#{} {} [{}] {styled}",
            hunk.order(),
            term::bold_text(target),
            &hunk.id()[..8]
        );
    }
}

fn print_written(reports: &[WriteReport], outcome: &ApplyOutcome, dry_run: bool) {
    for r in reports {
        match &r.result {
            Ok(()) => println!("  {} {}", term::ok_mark(), r.path),
            Err(e) => println!("  {} {}", term::fail_mark(), e),
        }
    }
    let verb = if dry_run { "Would apply" } else { "Applied" };
    println!(
        "{verb} {} hunk(s) across {} file(s)",
        outcome.applied_count(),
        outcome.changes.len()
    );
}

fn json_summary(hunks: &[Hunk], outcome: &ApplyOutcome, applied: bool, ctx: &AppContext) -> Value {
    let hunks: Vec<Value> = hunks
        .iter()
        .map(|h| {
            json!({
                "order": h.order(),
                "id": h.id(),
                "target_file": h.result.record.target_file,
                "resolved_path": h.result.resolved_path,
                "status": status_label(h),
                "active": h.active,
                "fuzzy": h.result.matched_via == Some(MatchVia::Fuzzy),
            })
        })
        .collect();
    let changed: Vec<Value> = outcome
        .changes
        .iter()
        .map(|c| json!({ "path": c.path, "diff": c.unified_diff() }))
        .collect();
    json!({
        "hunks": hunks,
        "changed": changed,
        "applied": applied && !ctx.dry_run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::locate::MatchLocator;
    use crate::core::patch::PatchRecord;

    fn hunk(content: &str, search: &str) -> Hunk {
        let record = PatchRecord {
            target_file: "a.js".into(),
            search: search.into(),
            replace: "bar();".into(),
            order: 0,
        };
        Hunk::new(MatchLocator::default().locate_record("p/a.js", content, &record))
    }

    #[test]
    fn test_status_labels() {
        let mut ready = hunk("x();\nfoo();\n", "foo();");
        assert_eq!(status_label(&ready), "Ready");
        ready.active = false;
        assert_eq!(status_label(&ready), "Skipped");

        let ambiguous = hunk("foo();\nfoo();\n", "foo();");
        assert_eq!(status_label(&ambiguous), "Ambiguous Match (2 occurrences)");
    }

    #[test]
    fn test_json_summary_shape() {
        let h = hunk("x();\nfoo();\n", "foo();");
        let summary = json_summary(&[h], &ApplyOutcome::default(), true, &AppContext::default());

        assert_eq!(summary["hunks"][0]["status"], "Ready");
        assert_eq!(summary["hunks"][0]["resolved_path"], "p/a.js");
        assert_eq!(summary["applied"], true);
    }
}
