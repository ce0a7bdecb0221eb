//! Content-store operations over a local git repository via `git2`.
//!
//! Everything above this layer addresses objects by [`Oid`]; no `git2`
//! handle with a borrowed lifetime escapes this module.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use git2::{BranchType, Delta, DiffOptions, FileMode, Oid, Repository, Signature, Sort, Time};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::errors::StoreError;

/// Thin wrapper over a `git2::Repository` exposing the object and ref
/// operations the node engine consumes.
pub struct GitStore {
    repo: Repository,
    repo_path: PathBuf,
}

/// Metadata of a single commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitCommitInfo {
    pub sha: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub author_time: i64,
    pub author_offset_minutes: i32,
    pub committer_name: String,
    pub committer_email: String,
    pub committer_time: i64,
    pub committer_offset_minutes: i32,
}

impl GitCommitInfo {
    pub fn author_signature(&self) -> Result<Signature<'static>, StoreError> {
        let time = Time::new(self.author_time, self.author_offset_minutes);
        Ok(Signature::new(&self.author_name, &self.author_email, &time)?)
    }

    pub fn committer_signature(&self) -> Result<Signature<'static>, StoreError> {
        let time = Time::new(self.committer_time, self.committer_offset_minutes);
        Ok(Signature::new(&self.committer_name, &self.committer_email, &time)?)
    }

    pub fn authored_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.author_time, 0)
            .single()
            .unwrap_or_default()
    }

    /// First line of the message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

/// One path-level difference between two trees.
#[derive(Debug, Clone)]
pub struct TreeDelta {
    pub path: String,
    pub status: Delta,
    pub old_blob: Option<Oid>,
    pub new_blob: Option<Oid>,
}

/// Pending change to a single tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeEntryEdit {
    Upsert(Oid),
    Remove,
}

/// Normalise `main` / `refs/heads/main` to the full ref name.
pub fn branch_ref_name(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{}", branch)
    }
}

fn short_branch_name(branch: &str) -> &str {
    branch.strip_prefix("refs/heads/").unwrap_or(branch)
}

impl GitStore {
    /// Open an existing git repository at `repo_path`.
    pub fn open<P: AsRef<Path>>(repo_path: P) -> Result<Self, StoreError> {
        let path = repo_path.as_ref();
        info!(path = %path.display(), "opening node repository");
        let repo = Repository::open(path)
            .map_err(|_| StoreError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
        })
    }

    /// Create a new bare repository at `repo_path`.
    pub fn init_bare<P: AsRef<Path>>(repo_path: P) -> Result<Self, StoreError> {
        let path = repo_path.as_ref();
        info!(path = %path.display(), "initializing node repository");
        let repo = Repository::init_bare(path)?;
        Ok(Self {
            repo,
            repo_path: path.to_path_buf(),
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    /// Tree of a commit.
    pub fn commit_tree(&self, commit: Oid) -> Result<Oid, StoreError> {
        Ok(self.repo.find_commit(commit)?.tree_id())
    }

    /// Tree of the first parent of `commit`, `None` for root commits.
    pub fn first_parent_tree(&self, commit: Oid) -> Result<Option<Oid>, StoreError> {
        let commit = self.repo.find_commit(commit)?;
        if commit.parent_count() == 0 {
            return Ok(None);
        }
        Ok(Some(commit.parent(0)?.tree_id()))
    }

    /// Id of the empty tree (written on demand).
    pub fn empty_tree(&self) -> Result<Oid, StoreError> {
        Ok(self.repo.treebuilder(None)?.write()?)
    }

    pub fn blob(&self, id: Oid) -> Result<Vec<u8>, StoreError> {
        Ok(self.repo.find_blob(id)?.content().to_vec())
    }

    pub fn create_blob(&self, bytes: &[u8]) -> Result<Oid, StoreError> {
        Ok(self.repo.blob(bytes)?)
    }

    /// Blob id at `path` inside `tree`, if the entry exists.
    pub fn entry_id(&self, tree: Oid, path: &str) -> Result<Option<Oid>, StoreError> {
        let tree = self.repo.find_tree(tree)?;
        match tree.get_path(Path::new(path)) {
            Ok(entry) => Ok(Some(entry.id())),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every blob path in `tree`, depth-first.
    pub fn list_files(&self, tree: Oid) -> Result<Vec<String>, StoreError> {
        let tree = self.repo.find_tree(tree)?;
        let mut files = Vec::new();
        tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(git2::ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    files.push(format!("{}{}", root, name));
                }
            }
            git2::TreeWalkResult::Ok
        })?;
        Ok(files)
    }

    /// Apply `edits` on top of `base_tree` (or the empty tree) and write the
    /// resulting tree. Removing an absent entry is a no-op.
    #[instrument(skip(self, edits), fields(edits = edits.len()))]
    pub fn create_tree(
        &self,
        base_tree: Option<Oid>,
        edits: &[(String, TreeEntryEdit)],
    ) -> Result<Oid, StoreError> {
        let base_id = match base_tree {
            Some(id) => id,
            None => self.empty_tree()?,
        };
        let base = self.repo.find_tree(base_id)?;
        let mut builder = git2::build::TreeUpdateBuilder::new();
        for (path, edit) in edits {
            match edit {
                TreeEntryEdit::Upsert(blob) => {
                    builder.upsert(path.as_str(), *blob, FileMode::Blob);
                }
                TreeEntryEdit::Remove => {
                    if base.get_path(Path::new(path)).is_ok() {
                        builder.remove(path.as_str());
                    } else {
                        debug!(path = %path, "skipping removal of absent entry");
                    }
                }
            }
        }
        let tree = builder.create_updated(&self.repo, &base)?;
        debug!(tree = %tree, "wrote tree");
        Ok(tree)
    }

    /// Write a commit object, optionally moving `update_ref` to it.
    #[instrument(skip(self, author, committer, message))]
    pub fn create_commit(
        &self,
        author: &Signature<'_>,
        committer: &Signature<'_>,
        message: &str,
        tree: Oid,
        parents: &[Oid],
        update_ref: Option<&str>,
    ) -> Result<Oid, StoreError> {
        let tree = self.repo.find_tree(tree)?;
        let parents = parents
            .iter()
            .map(|id| self.repo.find_commit(*id))
            .collect::<Result<Vec<_>, _>>()?;
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        let oid = self
            .repo
            .commit(update_ref, author, committer, message, &tree, &parent_refs)?;
        info!(sha = %oid, "created commit");
        Ok(oid)
    }

    pub fn commit_info(&self, commit: Oid) -> Result<GitCommitInfo, StoreError> {
        let commit = self.repo.find_commit(commit)?;
        let author = commit.author();
        let committer = commit.committer();
        Ok(GitCommitInfo {
            sha: commit.id().to_string(),
            message: commit.message().unwrap_or("").to_string(),
            author_name: author.name().unwrap_or("").to_string(),
            author_email: author.email().unwrap_or("").to_string(),
            author_time: author.when().seconds(),
            author_offset_minutes: author.when().offset_minutes(),
            committer_name: committer.name().unwrap_or("").to_string(),
            committer_email: committer.email().unwrap_or("").to_string(),
            committer_time: committer.when().seconds(),
            committer_offset_minutes: committer.when().offset_minutes(),
        })
    }

    // -----------------------------------------------------------------------
    // Diff and history
    // -----------------------------------------------------------------------

    /// Path-level differences between two trees; `None` is the empty tree.
    pub fn diff(
        &self,
        old_tree: Option<Oid>,
        new_tree: Option<Oid>,
    ) -> Result<Vec<TreeDelta>, StoreError> {
        let old = old_tree.map(|id| self.repo.find_tree(id)).transpose()?;
        let new = new_tree.map(|id| self.repo.find_tree(id)).transpose()?;
        let mut opts = DiffOptions::new();
        let diff = self
            .repo
            .diff_tree_to_tree(old.as_ref(), new.as_ref(), Some(&mut opts))?;

        let deltas: Vec<TreeDelta> = diff
            .deltas()
            .map(|delta| {
                let file = if delta.status() == Delta::Deleted {
                    delta.old_file()
                } else {
                    delta.new_file()
                };
                let path = file
                    .path()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                let blob = |id: Oid| if id.is_zero() { None } else { Some(id) };
                TreeDelta {
                    path,
                    status: delta.status(),
                    old_blob: blob(delta.old_file().id()),
                    new_blob: blob(delta.new_file().id()),
                }
            })
            .collect();
        debug!(count = deltas.len(), "tree diff computed");
        Ok(deltas)
    }

    pub fn merge_base(&self, a: Oid, b: Oid) -> Result<Oid, StoreError> {
        Ok(self.repo.merge_base(a, b)?)
    }

    /// Commits reachable from `tip` but not from `base`, oldest first.
    pub fn commits_between(&self, base: Oid, tip: Oid) -> Result<Vec<Oid>, StoreError> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.push(tip)?;
        revwalk.hide(base)?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
        let commits = revwalk.collect::<Result<Vec<_>, _>>()?;
        debug!(count = commits.len(), "collected commits to replay");
        Ok(commits)
    }

    // -----------------------------------------------------------------------
    // Refs
    // -----------------------------------------------------------------------

    /// Resolve any commit-ish (`main`, a SHA, `HEAD~1`, ...).
    pub fn resolve_commit(&self, spec: &str) -> Result<Oid, StoreError> {
        let object = self
            .repo
            .revparse_single(spec)
            .map_err(|_| StoreError::RefNotFound(spec.to_string()))?;
        Ok(object.peel_to_commit()?.id())
    }

    /// Tip commit of a local branch.
    pub fn branch_tip(&self, branch: &str) -> Result<Oid, StoreError> {
        let name = branch_ref_name(branch);
        let reference = self
            .repo
            .find_reference(&name)
            .map_err(|_| StoreError::RefNotFound(name.clone()))?;
        Ok(reference.peel_to_commit()?.id())
    }

    /// Tip commit of a branch, `None` if the branch does not exist yet.
    pub fn try_branch_tip(&self, branch: &str) -> Result<Option<Oid>, StoreError> {
        match self.branch_tip(branch) {
            Ok(oid) => Ok(Some(oid)),
            Err(StoreError::RefNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Name and tip of the branch's configured upstream.
    pub fn branch_upstream(&self, branch: &str) -> Result<(String, Oid), StoreError> {
        let short = short_branch_name(branch);
        let local = self
            .repo
            .find_branch(short, BranchType::Local)
            .map_err(|_| StoreError::RefNotFound(branch_ref_name(branch)))?;
        let upstream = local
            .upstream()
            .map_err(|_| StoreError::NoUpstream(short.to_string()))?;
        let name = upstream
            .get()
            .name()
            .unwrap_or(short)
            .to_string();
        let oid = upstream.get().peel_to_commit()?.id();
        Ok((name, oid))
    }

    /// Point `name` at `target`, creating the ref if needed.
    #[instrument(skip(self))]
    pub fn update_ref(&self, name: &str, target: Oid, log_message: &str) -> Result<(), StoreError> {
        self.repo.reference(name, target, true, log_message)?;
        info!(name, target = %target, "updated ref");
        Ok(())
    }
}
