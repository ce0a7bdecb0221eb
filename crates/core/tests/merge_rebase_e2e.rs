//! End-to-end tests for node diff, branch merge and rebase.
//!
//! These tests exercise the public API against real bare git repositories
//! created in temporary directories. The node schema, merge policy and
//! serializer all come from a TOML config file, loaded the same way the CLI
//! loads it.

use git2::{BranchType, Oid, Signature, Time};
use serde_json::{json, Value};
use tempfile::TempDir;

use nodetree_core::config::AppConfig;
use nodetree_core::diff::ChangeStatus;
use nodetree_core::errors::MergeError;
use nodetree_core::merge::{
    MergeChangeStatus, MergeStatus, NodeMerge, NodeRebase, RebaseStatus, Resolution,
    TreeResolution,
};
use nodetree_core::node::{Node, NodePath, UniqueId};
use nodetree_core::store::{NodeStore, TreeEdits, TreeEntryEdit};

// ===========================================================================
// Helpers
// ===========================================================================

const CONFIG: &str = r#"
[repository]
path = "nodes.git"

[comparison]
ignored_properties = ["touched_at"]

[[node_types]]
name = "Application"
folder = "Applications"
properties = [{ name = "title" }, { name = "description" }, { name = "touched_at" }]

[[node_types]]
name = "Table"
folder = "Tables"
properties = [{ name = "name", comparer = "case_insensitive" }]

[[node_types]]
name = "Field"
folder = "Fields"
properties = [{ name = "name" }, { name = "data_type" }]
"#;

/// A repository plus the config it was opened with.
struct Fixture {
    _dir: TempDir,
    config: AppConfig,
    store: NodeStore,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("nodetree.toml");
        std::fs::write(&config_path, CONFIG).unwrap();

        let mut config = AppConfig::load_and_resolve(&config_path).unwrap();
        config.repository.path = dir.path().join("nodes.git");
        let store = NodeStore::init_bare(&config.repository.path, config.serializer().unwrap())
            .unwrap();
        Self {
            _dir: dir,
            config,
            store,
        }
    }

    fn node(&self, type_name: &str, folder_path: &str) -> Node {
        let path = NodePath::parse(folder_path).unwrap();
        let id = UniqueId::parse(path.id()).unwrap();
        let node_type = self.config.schema().unwrap().get(type_name).unwrap();
        Node::new(node_type, id).with_path(path).unwrap()
    }

    fn app(&self, id: &str, title: &str) -> Node {
        self.node("Application", &format!("Applications/{}", id))
            .with("title", json!(title))
            .unwrap()
    }

    fn table(&self, app: &str, id: &str, name: &str) -> Node {
        self.node("Table", &format!("Applications/{}/Tables/{}", app, id))
            .with("name", json!(name))
            .unwrap()
    }

    fn field(&self, app: &str, table: &str, id: &str, name: &str) -> Node {
        self.node(
            "Field",
            &format!("Applications/{}/Tables/{}/Fields/{}", app, table, id),
        )
        .with("name", json!(name))
        .unwrap()
    }

    fn commit(&self, branch: &str, nodes: Vec<Node>, deletes: &[&str], message: &str) -> Oid {
        let mut edits = TreeEdits::new();
        for node in nodes {
            edits.upsert(node).unwrap();
        }
        for path in deletes {
            edits.delete(NodePath::parse(path).unwrap());
        }
        self.store
            .commit(branch, &edits, &signature(), &signature(), message)
            .unwrap()
    }

    fn branch_from(&self, branch: &str, commit: Oid) {
        self.store
            .git()
            .update_ref(&format!("refs/heads/{}", branch), commit, "create branch")
            .unwrap();
    }

    fn tip(&self, branch: &str) -> Oid {
        self.store.git().branch_tip(branch).unwrap()
    }

    fn value(&self, commit: Oid, folder_path: &str, property: &str) -> Option<Value> {
        let snapshot = self.store.commit_snapshot(commit).unwrap();
        snapshot
            .get(&NodePath::parse(folder_path).unwrap())
            .unwrap()
            .map(|node| node.get(property).cloned().unwrap_or(Value::Null))
    }

    fn parent_count(&self, commit: Oid) -> usize {
        self.store
            .git()
            .repo()
            .find_commit(commit)
            .unwrap()
            .parent_count()
    }
}

fn signature() -> Signature<'static> {
    Signature::new("Test", "test@example.com", &Time::new(1_700_000_000, 0)).unwrap()
}

fn file_exists(fixture: &Fixture, commit: Oid, data_path: &str) -> bool {
    let tree = fixture.store.git().commit_tree(commit).unwrap();
    fixture
        .store
        .git()
        .entry_id(tree, data_path)
        .unwrap()
        .is_some()
}

fn set_upstream(fixture: &Fixture, branch: &str, upstream: &str) {
    let repo = fixture.store.git().repo();
    let mut local = repo.find_branch(branch, BranchType::Local).unwrap();
    local.set_upstream(Some(upstream)).unwrap();
}

// ===========================================================================
// Diff
// ===========================================================================

/// Node-level diff between two commits classifies each data file, and
/// edits limited to ignored properties do not show up as differences.
#[test]
fn test_diff_between_commits() {
    let fx = Fixture::new();
    let base = fx.commit(
        "main",
        vec![fx.app("a", "A"), fx.app("b", "B"), fx.table("a", "t", "orders")],
        &[],
        "base",
    );
    let touched = fx
        .app("b", "B")
        .with("touched_at", json!("2026-01-01"))
        .unwrap();
    let next = fx.commit(
        "main",
        vec![fx.app("a", "A2"), fx.app("c", "C"), touched],
        &["Applications/a/Tables/t"],
        "second",
    );

    let policy = fx.config.comparison_policy();
    let changes = fx.store.diff_commits(base, next, &policy).unwrap();
    assert_eq!(changes.len(), 4);
    assert_eq!(changes.added().count(), 1);
    assert_eq!(changes.deleted().count(), 1);

    let edited = changes
        .get(&NodePath::parse("Applications/a").unwrap())
        .unwrap();
    assert_eq!(edited.status(), ChangeStatus::Edit);
    assert_eq!(edited.differences().len(), 1);
    assert_eq!(edited.differences()[0].property, "title");

    let ignored = changes
        .get(&NodePath::parse("Applications/b").unwrap())
        .unwrap();
    assert!(ignored.is_noop());
}

// ===========================================================================
// Merge
// ===========================================================================

/// The branch has no commits of its own: the upstream's added node shows
/// up as an Add and committing fast-forwards the branch without a merge
/// commit.
#[test]
fn test_merge_fast_forward() {
    let fx = Fixture::new();
    let base = fx.commit("main", vec![fx.app("a", "A")], &[], "base");
    fx.branch_from("feature", base);
    let upstream = fx.commit("main", vec![fx.app("x", "X")], &[], "add x");

    let mut merge = NodeMerge::new(
        &fx.store,
        "feature",
        Some("main"),
        fx.config.merge_policy(),
    )
    .unwrap();
    assert!(!merge.requires_merge_commit());
    assert_eq!(merge.start().unwrap(), MergeStatus::FastForward);
    assert_eq!(merge.changes().len(), 1);
    assert_eq!(merge.changes()[0].status(), MergeChangeStatus::Add);
    assert_eq!(merge.changes()[0].merged().get("title"), Some(&json!("X")));

    let tip = merge.commit(&signature(), &signature()).unwrap();
    assert_eq!(tip, upstream);
    assert_eq!(fx.tip("feature"), upstream);
}

/// Both sides edit different properties of the same node; the merge is
/// clean and produces a two-parent merge commit.
#[test]
fn test_merge_non_fast_forward_writes_merge_commit() {
    let fx = Fixture::new();
    let base = fx.commit("main", vec![fx.app("a", "A")], &[], "base");
    fx.branch_from("feature", base);

    let ours = fx.app("a", "A").with("description", json!("ours")).unwrap();
    let branch_tip = fx.commit("feature", vec![ours], &[], "describe a");
    let upstream = fx.commit("main", vec![fx.app("a", "Renamed")], &[], "rename a");

    let mut merge = NodeMerge::new(
        &fx.store,
        "feature",
        Some("main"),
        fx.config.merge_policy(),
    )
    .unwrap();
    assert!(merge.requires_merge_commit());
    assert_eq!(merge.start().unwrap(), MergeStatus::NonFastForward);

    let tip = merge.commit(&signature(), &signature()).unwrap();
    assert_eq!(fx.tip("feature"), tip);
    assert_eq!(fx.parent_count(tip), 2);
    let info = fx.store.git().commit_info(tip).unwrap();
    assert_eq!(info.summary(), "Merge main into feature");

    let repo = fx.store.git().repo();
    let commit = repo.find_commit(tip).unwrap();
    assert_eq!(commit.parent_id(0).unwrap(), branch_tip);
    assert_eq!(commit.parent_id(1).unwrap(), upstream);

    assert_eq!(fx.value(tip, "Applications/a", "title"), Some(json!("Renamed")));
    assert_eq!(fx.value(tip, "Applications/a", "description"), Some(json!("ours")));

    assert!(matches!(
        merge.commit(&signature(), &signature()),
        Err(MergeError::AlreadyCommitted(_))
    ));
}

/// Conflicting edits block the commit until resolved; a custom value then
/// lands in the merge commit.
#[test]
fn test_merge_conflict_blocks_commit_until_resolved() {
    let fx = Fixture::new();
    let base = fx.commit("main", vec![fx.app("a", "a")], &[], "base");
    fx.branch_from("feature", base);
    fx.commit("feature", vec![fx.app("a", "b")], &[], "ours");
    fx.commit("main", vec![fx.app("a", "c")], &[], "theirs");
    let before = fx.tip("feature");

    let mut merge = NodeMerge::new(
        &fx.store,
        "feature",
        Some("main"),
        fx.config.merge_policy(),
    )
    .unwrap();
    assert_eq!(merge.start().unwrap(), MergeStatus::Conflicts);

    let change = &merge.changes()[0];
    assert_eq!(change.status(), MergeChangeStatus::EditConflict);
    let conflict = &change.conflicts()[0];
    assert_eq!(conflict.property(), "title");
    assert_eq!(conflict.ancestor(), Some(&json!("a")));
    assert_eq!(conflict.ours(), &json!("b"));
    assert_eq!(conflict.theirs(), &json!("c"));

    assert!(matches!(
        merge.commit(&signature(), &signature()),
        Err(MergeError::UnresolvedConflicts(_))
    ));
    assert_eq!(fx.tip("feature"), before);

    let change = &mut merge.changes_mut()[0];
    change
        .resolve("title", Resolution::AcceptValue(json!("d")))
        .unwrap();
    assert_eq!(change.status(), MergeChangeStatus::Edit);
    assert_eq!(change.merged().get("title"), Some(&json!("d")));

    let tip = merge.commit(&signature(), &signature()).unwrap();
    assert_eq!(fx.value(tip, "Applications/a", "title"), Some(json!("d")));
}

/// The branch deleted a table while the upstream edited a field inside it:
/// a tree conflict rooted at the deleted table.
#[test]
fn test_merge_tree_conflict_under_deleted_folder() {
    let fx = Fixture::new();
    let base = fx.commit(
        "main",
        vec![
            fx.app("a", "A"),
            fx.table("a", "b", "orders"),
            fx.field("a", "b", "c", "amount"),
        ],
        &[],
        "base",
    );
    fx.branch_from("feature", base);
    fx.commit(
        "feature",
        vec![],
        &["Applications/a/Tables/b", "Applications/a/Tables/b/Fields/c"],
        "drop orders",
    );
    fx.commit(
        "main",
        vec![fx.field("a", "b", "c", "total")],
        &[],
        "rename amount",
    );

    let mut merge = NodeMerge::new(
        &fx.store,
        "feature",
        Some("main"),
        fx.config.merge_policy(),
    )
    .unwrap();
    assert_eq!(merge.start().unwrap(), MergeStatus::Conflicts);

    let change = &mut merge.changes_mut()[0];
    assert_eq!(change.status(), MergeChangeStatus::TreeConflict);
    assert_eq!(
        change.our_root_deleted_parent(),
        Some(&NodePath::parse("Applications/a/Tables/b").unwrap())
    );

    change
        .resolve_tree_conflict(TreeResolution::AcceptDeletion)
        .unwrap();
    assert_eq!(change.status(), MergeChangeStatus::Delete);

    let tip = merge.commit(&signature(), &signature()).unwrap();
    assert!(!file_exists(&fx, tip, "Applications/a/Tables/b/Fields/c/c.json"));
    assert!(file_exists(&fx, tip, "Applications/a/a.json"));
}

/// Merging an upstream the branch already contains changes nothing.
#[test]
fn test_merge_up_to_date() {
    let fx = Fixture::new();
    let base = fx.commit("main", vec![fx.app("a", "A")], &[], "base");
    fx.branch_from("feature", base);
    let tip = fx.commit("feature", vec![fx.app("b", "B")], &[], "add b");

    let mut merge = NodeMerge::new(
        &fx.store,
        "feature",
        Some("main"),
        fx.config.merge_policy(),
    )
    .unwrap();
    assert_eq!(merge.merge_base(), base);
    assert_eq!(merge.start().unwrap(), MergeStatus::UpToDate);
    assert_eq!(merge.commit(&signature(), &signature()).unwrap(), tip);
    assert_eq!(fx.tip("feature"), tip);
}

/// Upstream commits that touch no node still get merged into the branch
/// history.
#[test]
fn test_merge_records_upstream_without_node_changes() {
    let fx = Fixture::new();
    let base = fx.commit("main", vec![fx.app("a", "A")], &[], "base");
    fx.branch_from("feature", base);
    let tip = fx.commit("feature", vec![fx.app("b", "B")], &[], "add b");

    let git = fx.store.git();
    let readme = git.create_blob(b"notes").unwrap();
    let tree = git
        .create_tree(
            Some(git.commit_tree(base).unwrap()),
            &[("README.md".to_string(), TreeEntryEdit::Upsert(readme))],
        )
        .unwrap();
    let upstream = git
        .create_commit(
            &signature(),
            &signature(),
            "docs",
            tree,
            &[base],
            Some("refs/heads/main"),
        )
        .unwrap();

    let mut merge = NodeMerge::new(
        &fx.store,
        "feature",
        Some("main"),
        fx.config.merge_policy(),
    )
    .unwrap();
    assert_eq!(merge.start().unwrap(), MergeStatus::NonFastForward);
    assert!(merge.changes().is_empty());

    let merged = merge.commit(&signature(), &signature()).unwrap();
    assert_eq!(fx.tip("feature"), merged);
    let commit = fx.store.git().repo().find_commit(merged).unwrap();
    assert_eq!(commit.parent_ids().collect::<Vec<_>>(), vec![tip, upstream]);
    assert!(file_exists(&fx, merged, "Applications/b/b.json"));
}

/// Without an explicit upstream the branch's configured upstream is used.
#[test]
fn test_merge_uses_configured_upstream() {
    let fx = Fixture::new();
    let base = fx.commit("main", vec![fx.app("a", "A")], &[], "base");
    fx.branch_from("feature", base);

    assert!(matches!(
        NodeMerge::new(&fx.store, "feature", None, fx.config.merge_policy()),
        Err(MergeError::NoUpstream(_))
    ));

    set_upstream(&fx, "feature", "main");
    let merge = NodeMerge::new(&fx.store, "feature", None, fx.config.merge_policy()).unwrap();
    assert_eq!(merge.upstream(), fx.tip("main"));
    assert_eq!(merge.upstream_name(), "refs/heads/main");
}

// ===========================================================================
// Rebase
// ===========================================================================

/// The first replayed commit makes a change the upstream already has, so it
/// is skipped; the second is rewritten onto the upstream.
#[test]
fn test_rebase_skips_commit_already_upstream() {
    let fx = Fixture::new();
    let base = fx.commit("main", vec![fx.app("a", "A"), fx.app("b", "B")], &[], "base");
    fx.branch_from("feature", base);
    let first = fx.commit("feature", vec![fx.app("a", "Shared")], &[], "same as upstream");
    let second = fx.commit("feature", vec![fx.app("b", "B2")], &[], "edit b");
    let upstream = fx.commit("main", vec![fx.app("a", "Shared")], &[], "upstream edit");

    let mut rebase = NodeRebase::new(
        &fx.store,
        "feature",
        Some("main"),
        fx.config.merge_policy(),
    )
    .unwrap();
    assert_eq!(rebase.replayed(), &[first, second]);
    assert_eq!(rebase.start().unwrap(), RebaseStatus::Complete);

    let completed = rebase.completed();
    assert_eq!(completed.len(), 2);
    assert_eq!(completed[0].original, first);
    assert!(completed[0].rewritten.is_none());
    assert_eq!(completed[1].original, second);

    let tip = fx.tip("feature");
    assert_eq!(completed[1].rewritten, Some(tip));
    assert_eq!(fx.parent_count(tip), 1);
    assert_eq!(
        fx.store.git().repo().find_commit(tip).unwrap().parent_id(0).unwrap(),
        upstream
    );
    assert_eq!(fx.value(tip, "Applications/a", "title"), Some(json!("Shared")));
    assert_eq!(fx.value(tip, "Applications/b", "title"), Some(json!("B2")));
}

/// Replayed edits to ignored properties survive the rebase.
#[test]
fn test_rebase_keeps_ignored_property_edits() {
    let fx = Fixture::new();
    let stamped = |title: &str, touched_at: &str| {
        fx.app("a", title)
            .with("touched_at", json!(touched_at))
            .unwrap()
    };
    let base = fx.commit(
        "main",
        vec![stamped("A", "d0"), fx.app("b", "B")],
        &[],
        "base",
    );
    fx.branch_from("feature", base);
    fx.commit("feature", vec![stamped("A2", "d1")], &[], "edit a");
    fx.commit("main", vec![fx.app("b", "B2")], &[], "edit b");

    let mut rebase =
        NodeRebase::new(&fx.store, "feature", Some("main"), fx.config.merge_policy()).unwrap();
    assert_eq!(rebase.start().unwrap(), RebaseStatus::Complete);

    let tip = fx.tip("feature");
    assert_eq!(fx.value(tip, "Applications/a", "title"), Some(json!("A2")));
    assert_eq!(fx.value(tip, "Applications/a", "touched_at"), Some(json!("d1")));
    assert_eq!(fx.value(tip, "Applications/b", "title"), Some(json!("B2")));
}

/// A conflicting step halts the rebase with the branch untouched; after
/// resolving, the rebase resumes and completes.
#[test]
fn test_rebase_halts_on_conflict_and_resumes() {
    let fx = Fixture::new();
    let base = fx.commit("main", vec![fx.app("a", "A")], &[], "base");
    fx.branch_from("feature", base);
    fx.commit("feature", vec![fx.app("a", "mine")], &[], "edit a");
    fx.commit("feature", vec![fx.app("c", "C")], &[], "add c");
    fx.commit("main", vec![fx.app("a", "upstream")], &[], "upstream edit");
    set_upstream(&fx, "feature", "main");
    let original_tip = fx.tip("feature");

    let mut rebase =
        NodeRebase::new(&fx.store, "feature", None, fx.config.merge_policy()).unwrap();
    assert_eq!(rebase.start().unwrap(), RebaseStatus::Conflicts);
    assert_eq!(rebase.completed().len(), 0);
    assert_eq!(fx.tip("feature"), original_tip);

    assert!(matches!(rebase.start(), Err(MergeError::InvalidState { .. })));
    assert!(matches!(
        rebase.continue_rebase(),
        Err(MergeError::UnresolvedConflicts(_))
    ));

    let change = &mut rebase.current_changes_mut()[0];
    assert_eq!(change.status(), MergeChangeStatus::EditConflict);
    change.resolve_all(Resolution::AcceptTheirs).unwrap();

    assert_eq!(rebase.continue_rebase().unwrap(), RebaseStatus::Complete);
    assert_eq!(rebase.completed().len(), 2);

    let tip = fx.tip("feature");
    assert_eq!(tip, rebase.head());
    assert_eq!(fx.value(tip, "Applications/a", "title"), Some(json!("mine")));
    assert_eq!(fx.value(tip, "Applications/c", "title"), Some(json!("C")));
    assert_eq!(fx.store.git().commit_info(tip).unwrap().summary(), "add c");
}
