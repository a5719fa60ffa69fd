//! Filepath: src/core/tree_cmd.rs
//! `smelt tree`: the project tree exactly as `pack` would see it.

use anyhow::{Context, Result};

use crate::cli::{AppContext, TreeArgs};
use crate::core::session::Session;
use crate::core::tree::{FileTree, FlatEntry, NodeKind};
use crate::infra::config::load_config;
use crate::infra::term;

pub fn run(args: TreeArgs, ctx: &AppContext) -> Result<()> {
    let mut config = load_config()?;
    config.ignore_patterns.extend(args.ignore);

    let mut session = Session::new(config);
    let tree = session
        .load_dir(&args.path)
        .with_context(|| format!("Failed to load {}", args.path.display()))?;

    if !ctx.quiet {
        println!("{}", term::dir_text(&format!("{}/", tree.root_name())));
        for e in rows(tree, args.depth) {
            match e.kind {
                NodeKind::Dir => println!(
                    "{}{}{}",
                    e.prefix,
                    e.connector,
                    term::dir_text(&format!("{}/", e.name))
                ),
                NodeKind::File => println!("{}", e.line()),
            }
        }
    }
    Ok(())
}

/// Flattened rows shallower than `depth`.
fn rows(tree: &FileTree, depth: Option<usize>) -> Vec<FlatEntry> {
    tree.flatten()
        .into_iter()
        .filter(|e| depth.is_none_or(|d| e.depth < d))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tree::FileEntry;

    #[test]
    fn test_depth_limits_rows() {
        let tree = FileTree::build(vec![
            FileEntry::inline("p/a.rs", ""),
            FileEntry::inline("p/src/b.rs", ""),
        ])
        .unwrap();

        let lines: Vec<String> = rows(&tree, Some(1)).iter().map(|e| e.line()).collect();
        assert_eq!(lines, vec!["├── src/", "└── a.rs"]);
        assert_eq!(rows(&tree, None).len(), 3);
    }
}
