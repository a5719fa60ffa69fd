//! Filepath: src/core/session.rs
//! Explicit state for one pack/patch round trip.
//!
//! A `Session` owns the loaded tree, the current context document and any
//! pending hunks. Observers subscribe to typed [`SessionEvent`]s instead of
//! polling shared state.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::core::apply::{self, ApplyError, ApplyOutcome, Hunk};
use crate::core::archive::{ArchiveWriter, WriteReport, write_all};
use crate::core::blob;
use crate::core::ignore::{IgnoreResolver, ScopeFrame};
use crate::core::patch;
use crate::core::tree::{FileEntry, FileTree, TreeError};
use crate::core::worker::{
    FileSnapshot, LocateRequest, LocateResponse, Pending, WorkerError, spawn_locate,
};
use crate::infra::config::Config;
use crate::infra::walk::{self, FileWalker};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no project tree is loaded")]
    NoTree,
    #[error("no context document is loaded")]
    NoDocument,
    #[error("no patches are pending")]
    NothingPending,
    #[error("pending patches were not located against the current document")]
    DocumentMismatch,
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    TreeLoaded { root: String, files: usize },
    SelectionChanged { id: String, selected: bool },
    DocumentUpdated { bytes: usize },
    PatchesPending { total: usize, ready: usize },
    PatchesApplied { applied: usize, files: usize },
    PatchesDiscarded { count: usize },
}

type Subscriber = Box<dyn Fn(&SessionEvent) + Send>;

/// Synchronous publish/subscribe in subscription order.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    pub fn subscribe(&mut self, f: impl Fn(&SessionEvent) + Send + 'static) {
        self.subscribers.push(Box::new(f));
    }

    pub fn publish(&self, event: &SessionEvent) {
        for s in &self.subscribers {
            s(event);
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Hunks located against one snapshot.
#[derive(Debug, Clone)]
struct PendingPatch {
    snapshot: Arc<FileSnapshot>,
    hunks: Vec<Hunk>,
}

#[derive(Debug)]
pub struct Session {
    config: Config,
    resolver: IgnoreResolver,
    tree: Option<FileTree>,
    document: Option<String>,
    pending: Option<PendingPatch>,
    /// Bumped by every proposal submission
    generation: u64,
    /// Snapshot the in-flight generation was located against
    in_flight: Option<Arc<FileSnapshot>>,
    bus: EventBus,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            resolver: IgnoreResolver::new(),
            tree: None,
            document: None,
            pending: None,
            generation: 0,
            in_flight: None,
            bus: EventBus::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn subscribe(&mut self, f: impl Fn(&SessionEvent) + Send + 'static) {
        self.bus.subscribe(f);
    }

    /// Build the tree and drop everything the ignore rules exclude. The
    /// built-in defaults plus `ignore_patterns` form the outermost frame.
    pub fn load_tree(&mut self, entries: Vec<FileEntry>) -> Result<&FileTree, SessionError> {
        let mut tree = FileTree::build(entries)?;
        let scopes = tree.root_scopes(ScopeFrame::defaults(&self.config.ignore_patterns));
        tree.prune(&self.resolver, &scopes, &self.config.ignore_file);

        info!(root = tree.root_name(), files = tree.file_count(), "tree loaded");
        self.bus.publish(&SessionEvent::TreeLoaded {
            root: tree.root_name().to_string(),
            files: tree.file_count(),
        });
        let tree: &FileTree = self.tree.insert(tree);
        Ok(tree)
    }

    /// Walk `dir` and load it as the tree. Directories the ignore rules
    /// exclude are never descended into.
    pub fn load_dir(&mut self, dir: &Path) -> Result<&FileTree, SessionError> {
        let walker = FileWalker::new().with_prune(
            self.resolver.clone(),
            ScopeFrame::defaults(&self.config.ignore_patterns),
            &self.config.ignore_file,
        );
        let project = walk::project_name(dir);
        let entries = walker.entries(dir, &project, self.config.pack.max_file_bytes);
        self.load_tree(entries)
    }

    pub fn tree(&self) -> Option<&FileTree> {
        self.tree.as_ref()
    }

    /// Flip a node's selection. `None` when no tree is loaded or `id` is
    /// unknown.
    pub fn toggle(&mut self, id: &str) -> Option<bool> {
        let selected = self.tree.as_mut()?.toggle(id)?;
        self.bus.publish(&SessionEvent::SelectionChanged {
            id: id.to_string(),
            selected,
        });
        Some(selected)
    }

    pub fn set_selected(&mut self, id: &str, selected: bool) -> bool {
        let changed = self
            .tree
            .as_mut()
            .is_some_and(|t| t.set_selected(id, selected));
        if changed {
            self.bus.publish(&SessionEvent::SelectionChanged {
                id: id.to_string(),
                selected,
            });
        }
        changed
    }

    /// Serialize the selected part of the tree into the current document.
    pub fn serialize(&mut self) -> Result<&str, SessionError> {
        let tree = self.tree.as_ref().ok_or(SessionError::NoTree)?;
        let text = blob::serialize(tree);
        Ok(self.replace_document(text))
    }

    /// Adopt an externally produced document (a blob read from disk).
    pub fn set_document(&mut self, text: String) -> &str {
        self.replace_document(text)
    }

    pub fn document(&self) -> Option<&str> {
        self.document.as_deref()
    }

    fn replace_document(&mut self, text: String) -> &str {
        self.bus.publish(&SessionEvent::DocumentUpdated { bytes: text.len() });
        self.document.insert(text)
    }

    /// Snapshot of the current document's file bodies.
    pub fn document_snapshot(&self) -> Result<Arc<FileSnapshot>, SessionError> {
        let doc = self.document.as_deref().ok_or(SessionError::NoDocument)?;
        Ok(Arc::new(FileSnapshot::from_blob(doc)))
    }

    /// Snapshot of every file in the loaded tree.
    pub fn tree_snapshot(&self) -> Result<Arc<FileSnapshot>, SessionError> {
        let tree = self.tree.as_ref().ok_or(SessionError::NoTree)?;
        Ok(Arc::new(FileSnapshot::from_tree(tree)))
    }

    /// Parse `proposal` and hand the records to a locate worker. Any
    /// earlier in-flight generation becomes stale.
    pub fn begin_proposal(
        &mut self,
        proposal: &str,
        snapshot: Arc<FileSnapshot>,
    ) -> Pending<LocateResponse> {
        self.generation += 1;
        let records = patch::parse_with(proposal, self.config.patch.syntax);
        debug!(generation = self.generation, records = records.len(), "proposal submitted");

        self.in_flight = Some(Arc::clone(&snapshot));
        spawn_locate(LocateRequest {
            generation: self.generation,
            snapshot,
            records,
            fuzzy_max_bytes: self.config.patch.fuzzy_max_bytes,
        })
    }

    /// Store a locate response as the pending hunk set. Returns `false`
    /// and changes nothing when the response is stale.
    pub fn accept_located(&mut self, response: LocateResponse) -> bool {
        if response.generation != self.generation {
            debug!(
                got = response.generation,
                current = self.generation,
                "stale locate response discarded"
            );
            return false;
        }
        let Some(snapshot) = self.in_flight.take() else {
            return false;
        };

        let hunks: Vec<Hunk> = response.results.into_iter().map(Hunk::new).collect();
        let ready = hunks.iter().filter(|h| h.active).count();
        self.bus.publish(&SessionEvent::PatchesPending {
            total: hunks.len(),
            ready,
        });
        self.pending = Some(PendingPatch { snapshot, hunks });
        true
    }

    /// Parse, locate and store in one blocking call.
    pub fn submit_proposal(
        &mut self,
        proposal: &str,
        snapshot: Arc<FileSnapshot>,
    ) -> Result<&[Hunk], SessionError> {
        let response = self.begin_proposal(proposal, snapshot).wait()?;
        self.accept_located(response);
        Ok(self.hunks())
    }

    pub fn hunks(&self) -> &[Hunk] {
        self.pending.as_ref().map_or(&[], |p| p.hunks.as_slice())
    }

    /// Turn a hunk on or off by proposal order. Only uniquely matched hunks
    /// can be activated.
    pub fn set_hunk_active(&mut self, order: usize, active: bool) -> bool {
        let Some(hunk) = self
            .pending
            .as_mut()
            .and_then(|p| p.hunks.iter_mut().find(|h| h.order() == order))
        else {
            return false;
        };
        if active && !hunk.result.is_unique() {
            return false;
        }
        hunk.active = active;
        true
    }

    /// Dry run of the pending hunks against their snapshot.
    pub fn preview(&self) -> Result<ApplyOutcome, SessionError> {
        let pending = self.pending.as_ref().ok_or(SessionError::NothingPending)?;
        let snapshot = &pending.snapshot;
        Ok(apply::apply_grouped(&pending.hunks, |path| {
            snapshot.get(path).map(str::to_string)
        })?)
    }

    /// Apply the pending hunks to the current document and replace it. The
    /// hunks must have been located against this exact document.
    pub fn apply_to_document(&mut self) -> Result<ApplyOutcome, SessionError> {
        let doc = self.document.as_deref().ok_or(SessionError::NoDocument)?;
        let pending = self.pending.as_ref().ok_or(SessionError::NothingPending)?;
        if !pending.snapshot.is_from(doc) {
            return Err(SessionError::DocumentMismatch);
        }

        let (updated, outcome) = apply::apply_to_blob(doc, &pending.hunks)?;
        self.pending = None;
        self.replace_document(updated);
        self.publish_applied(&outcome);
        Ok(outcome)
    }

    /// Apply the pending hunks to their snapshot and hand each changed file
    /// to `writer`, with the project root stripped from its path. Write
    /// failures are reported per file.
    pub fn apply_to_files(
        &mut self,
        writer: &mut dyn ArchiveWriter,
    ) -> Result<(ApplyOutcome, Vec<WriteReport>), SessionError> {
        let outcome = self.preview()?;
        let root = self
            .pending
            .as_ref()
            .and_then(|p| p.snapshot.root.as_deref())
            .map(|r| format!("{r}/"));

        let files: Vec<(&str, &str)> = outcome
            .changes
            .iter()
            .map(|c| {
                let path = root
                    .as_deref()
                    .and_then(|r| c.path.strip_prefix(r))
                    .unwrap_or(&c.path);
                (path, c.after.as_str())
            })
            .collect();
        let reports = write_all(writer, files);

        self.pending = None;
        self.publish_applied(&outcome);
        Ok((outcome, reports))
    }

    /// Drop the pending hunks. Returns how many there were.
    pub fn discard_patches(&mut self) -> usize {
        let count = self.pending.take().map_or(0, |p| p.hunks.len());
        if count > 0 {
            self.bus.publish(&SessionEvent::PatchesDiscarded { count });
        }
        count
    }

    fn publish_applied(&self, outcome: &ApplyOutcome) {
        self.bus.publish(&SessionEvent::PatchesApplied {
            applied: outcome.applied_count(),
            files: outcome.changes.len(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::core::archive::MemoryArchive;
    use crate::core::locate::MatchStatus;

    fn session_with_events() -> (Session, Arc<Mutex<Vec<SessionEvent>>>) {
        let mut session = Session::new(Config::default());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        session.subscribe(move |e| sink.lock().unwrap().push(e.clone()));
        (session, events)
    }

    fn entries() -> Vec<FileEntry> {
        vec![
            FileEntry::inline("p/a.js", "x();\nfoo();\n"),
            FileEntry::inline("p/b.js", "foo();\nfoo();\n"),
            FileEntry::inline("p/node_modules/m.js", "skip"),
        ]
    }

    const PROPOSAL: &str = "File: a.js\n<<<<<<< SEARCH\nfoo();\n=======\nbar();\n>>>>>>> REPLACE\n\nFile: b.js\n<<<<<<< SEARCH\nfoo();\n=======\nbaz();\n>>>>>>> REPLACE\n";

    #[test]
    fn test_load_tree_applies_default_rules() {
        let (mut session, events) = session_with_events();
        let tree = session.load_tree(entries()).unwrap();

        assert_eq!(tree.file_count(), 2);
        assert_eq!(
            events.lock().unwrap()[0],
            SessionEvent::TreeLoaded {
                root: "p".into(),
                files: 2
            }
        );
    }

    #[test]
    fn test_selection_feeds_serialization() {
        let (mut session, events) = session_with_events();
        session.load_tree(entries()).unwrap();

        assert_eq!(session.toggle("p/b.js"), Some(false));
        let doc = session.serialize().unwrap();
        assert!(doc.contains("=== File: p/a.js ==="));
        assert!(!doc.contains("=== File: p/b.js ==="));

        let events = events.lock().unwrap();
        assert!(events.contains(&SessionEvent::SelectionChanged {
            id: "p/b.js".into(),
            selected: false
        }));
        assert!(matches!(events.last(), Some(SessionEvent::DocumentUpdated { .. })));
    }

    #[test]
    fn test_round_trip_on_document() {
        let mut session = Session::new(Config::default());
        session.load_tree(entries()).unwrap();
        session.serialize().unwrap();

        let snapshot = session.document_snapshot().unwrap();
        let hunks = session.submit_proposal(PROPOSAL, snapshot).unwrap();
        assert_eq!(hunks.len(), 2);
        assert!(hunks[0].active);
        assert_eq!(hunks[1].result.status, MatchStatus::Ambiguous(2));
        assert!(!hunks[1].active);

        let outcome = session.apply_to_document().unwrap();
        assert_eq!(outcome.applied_count(), 1);

        let files = blob::deserialize(session.document().unwrap()).unwrap();
        assert_eq!(files[0].content, "x();\nbar();\n");
        assert_eq!(files[1].content, "foo();\nfoo();\n");
        assert!(session.hunks().is_empty());
    }

    #[test]
    fn test_stale_response_is_discarded() {
        let mut session = Session::new(Config::default());
        session.load_tree(entries()).unwrap();
        let snapshot = session.tree_snapshot().unwrap();

        let first = session.begin_proposal(PROPOSAL, Arc::clone(&snapshot));
        let second = session.begin_proposal(PROPOSAL, snapshot);

        assert!(!session.accept_located(first.wait().unwrap()));
        assert!(session.hunks().is_empty());
        assert!(session.accept_located(second.wait().unwrap()));
        assert_eq!(session.hunks().len(), 2);
    }

    #[test]
    fn test_ambiguous_hunk_cannot_be_activated() {
        let mut session = Session::new(Config::default());
        session.load_tree(entries()).unwrap();
        let snapshot = session.tree_snapshot().unwrap();
        session.submit_proposal(PROPOSAL, snapshot).unwrap();

        assert!(!session.set_hunk_active(1, true));
        assert!(session.set_hunk_active(0, false));
        assert_eq!(session.preview().unwrap().applied_count(), 0);
    }

    #[test]
    fn test_apply_to_files_strips_root() {
        let mut session = Session::new(Config::default());
        session.load_tree(entries()).unwrap();
        let snapshot = session.tree_snapshot().unwrap();
        session.submit_proposal(PROPOSAL, snapshot).unwrap();

        let mut archive = MemoryArchive::default();
        let (outcome, reports) = session.apply_to_files(&mut archive).unwrap();

        assert_eq!(outcome.changes.len(), 1);
        assert!(reports.iter().all(WriteReport::is_ok));
        assert_eq!(archive.files.get("a.js").map(String::as_str), Some("x();\nbar();\n"));
    }

    #[test]
    fn test_discard_reports_count() {
        let (mut session, events) = session_with_events();
        session.load_tree(entries()).unwrap();
        let snapshot = session.tree_snapshot().unwrap();
        session.submit_proposal(PROPOSAL, snapshot).unwrap();

        assert_eq!(session.discard_patches(), 2);
        assert_eq!(session.discard_patches(), 0);
        assert_eq!(
            events.lock().unwrap().last(),
            Some(&SessionEvent::PatchesDiscarded { count: 2 })
        );
    }

    #[test]
    fn test_document_apply_refuses_foreign_snapshot() {
        let mut session = Session::new(Config::default());
        session.load_tree(entries()).unwrap();
        session.serialize().unwrap();

        let snapshot = session.tree_snapshot().unwrap();
        session.submit_proposal(PROPOSAL, snapshot).unwrap();
        assert!(matches!(
            session.apply_to_document(),
            Err(SessionError::DocumentMismatch)
        ));

        // Located against the document, which then changes underneath
        let snapshot = session.document_snapshot().unwrap();
        session.submit_proposal(PROPOSAL, snapshot).unwrap();
        session.toggle("p/b.js");
        session.serialize().unwrap();
        assert!(matches!(
            session.apply_to_document(),
            Err(SessionError::DocumentMismatch)
        ));
        assert_eq!(session.hunks().len(), 2);
    }

    #[test]
    fn test_repeated_header_document_is_left_intact() {
        let mut session = Session::new(Config::default());
        let doc = format!(
            "{}\n\n{}",
            blob::render_block("p/a.js", "AAAAAAAAAA\nfoo();\n"),
            blob::render_block("p/a.js", "foo();\n")
        );
        session.set_document(doc.clone());

        let snapshot = session.document_snapshot().unwrap();
        let proposal = "File: p/a.js\n<<<<<<< SEARCH\nfoo();\n=======\nbar();\n>>>>>>> REPLACE\n";
        let hunks = session.submit_proposal(proposal, snapshot).unwrap();
        assert_eq!(hunks[0].result.status, MatchStatus::NotFound);
        assert!(!hunks[0].active);

        let outcome = session.apply_to_document().unwrap();
        assert_eq!(outcome.applied_count(), 0);
        assert_eq!(session.document(), Some(doc.as_str()));
    }

    #[test]
    fn test_negated_default_directory_is_walked() {
        let tmp = tempfile::tempdir().unwrap();
        let proj = tmp.path().join("proj");
        std::fs::create_dir_all(proj.join("vendor")).unwrap();
        std::fs::write(proj.join(".gitignore"), "!vendor\n").unwrap();
        std::fs::write(proj.join("vendor/keep.go"), "package keep\n").unwrap();
        std::fs::write(proj.join("main.go"), "package main\n").unwrap();
        std::fs::create_dir_all(proj.join("node_modules/m")).unwrap();
        std::fs::write(proj.join("node_modules/m/index.js"), "x").unwrap();

        let mut session = Session::new(Config::default());
        let tree = session.load_dir(&proj).unwrap();
        let files = tree.selected_files();
        let ids: Vec<&str> = files.iter().map(|n| n.id.as_str()).collect();

        assert!(ids.contains(&"proj/vendor/keep.go"));
        assert!(ids.contains(&"proj/main.go"));
        assert!(!ids.iter().any(|id| id.contains("node_modules")));
    }

    #[test]
    fn test_serialize_without_tree_fails() {
        let mut session = Session::new(Config::default());
        assert!(matches!(session.serialize(), Err(SessionError::NoTree)));
    }
}
