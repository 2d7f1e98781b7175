// Copyright 2020 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The working-copy metadata database of a distributed-version-control
//! client: a three-layer (BASE/WORKING/ACTUAL) node model, a
//! content-addressed pristine object store, a path resolver with a
//! per-process handle cache, upward-scanning ancestry queries, transactional
//! commit/relocate, a crash-safe work queue, and a per-subtree advisory
//! lock.
//!
//! [`WorkingCopy`] is the single entry point collaborators use: it resolves
//! an absolute filesystem path to a cached [`Handle`] and dispatches to
//! the per-WCROOT [`NodeStore`], [`Pristine`], [`Scanner`],
//! [`WorkQueue`], or [`WcLock`] built on top of that handle's open
//! [`Store`].

pub mod error;
pub mod node;
pub mod path;
pub mod pristine;
pub mod protos;
pub mod relpath;
pub mod scan;
pub mod store;
pub mod wclock;
pub mod work_queue;

use std::path::Path;
use std::rc::Rc;

use tracing::instrument;

use error::{WcError, WcResult};
use node::{Depth, NodeInfo, NodeStore};
use path::{Handle, OpenMode, Resolver, ADMIN_DIR_NAME};
use pristine::Pristine;
use protos::work_queue::WorkItem;
use relpath::RelPath;
use scan::{AdditionScan, BaseRepos, DeletionScan, Scanner};
use store::{PropertyMap, Store};
use wclock::WcLock;
use work_queue::WorkQueue;

/// The caller-facing entry point. One instance per process; its [`Resolver`]
/// cache is shared across every call, so opening the same path twice is the
/// cheap path once it's warm.
#[derive(Default)]
pub struct WorkingCopy {
    resolver: Resolver,
}

impl WorkingCopy {
    pub fn new() -> Self {
        WorkingCopy::default()
    }

    /// Resolves `abspath` to its WCROOT handle, ascending and caching along
    /// the way.
    #[instrument(skip(self))]
    pub fn open(&self, abspath: &Path, mode: OpenMode) -> WcResult<Rc<Handle>> {
        self.resolver.resolve(abspath, mode)
    }

    /// Evicts `abspath` and every cached descendant from the resolver
    /// cache, required after a structural change (delete, upgrade) makes
    /// previously-cached handles unsafe to keep serving.
    pub fn close(&self, abspath: &Path) {
        self.resolver.forget(abspath);
    }

    /// Returns `handle`'s parent, constructing and caching it if this is the
    /// first time it's been asked for.
    pub fn parent(&self, handle: &Rc<Handle>) -> WcResult<Rc<Handle>> {
        self.resolver.parent(handle)
    }

    /// Creates a brand-new WCROOT at `path`: the administrative directory,
    /// an empty store at the current schema version, and a BASE row for the
    /// root directory itself at `initial_rev` under `(root_url, uuid,
    /// repos_relpath)`.
    #[instrument(skip(self))]
    pub fn init(
        &self,
        path: &Path,
        repos_relpath: &str,
        root_url: &str,
        uuid: &str,
        initial_rev: i64,
        depth: Depth,
    ) -> WcResult<Rc<Handle>> {
        let admin_dir = path.join(ADMIN_DIR_NAME);
        std::fs::create_dir_all(&admin_dir)?;
        let store = Store::create(&admin_dir.join("wc.db"))?;
        store.conn().execute(
            "INSERT INTO wcroot (id, local_abspath) VALUES (1, ?1)",
            [path.to_string_lossy()],
        )?;
        let nodes = NodeStore::new(&store, 1);
        nodes.base_add_directory(
            &RelPath::root(),
            Some((root_url, uuid, repos_relpath)),
            initial_rev,
            (initial_rev, 0, ""),
            depth,
            &PropertyMap::new(),
            &[],
        )?;
        store.close();
        self.resolver.forget(path);
        self.resolver.resolve(path, OpenMode::ReadWrite)
    }

    fn node_store<'h>(&self, handle: &'h Handle) -> WcResult<NodeStore<'h>> {
        Ok(NodeStore::new(handle.store()?, handle.wcroot_id()))
    }

    fn pristine<'h>(&self, handle: &'h Handle) -> WcResult<Pristine<'h>> {
        Ok(Pristine::new(handle.store()?, handle.admin_dir().to_owned()))
    }

    fn scanner<'h>(&self, handle: &'h Handle) -> WcResult<Scanner<'h>> {
        Ok(Scanner::new(handle.store()?, handle.wcroot_id()))
    }

    fn work_queue<'h>(&self, handle: &'h Handle) -> WcResult<WorkQueue<'h>> {
        Ok(WorkQueue::new(handle.store()?))
    }

    fn wclock<'h>(&self, handle: &'h Handle) -> WcResult<WcLock<'h>> {
        Ok(WcLock::new(handle.store()?, handle.wcroot_id()))
    }

    /// The unified read: BASE, WORKING, and ACTUAL joined into one record,
    /// with the composite status.
    pub fn read_info(&self, handle: &Handle) -> WcResult<NodeInfo> {
        self.node_store(handle)?.read_info(handle.relpath())
    }

    /// ACTUAL properties if present, else BASE's.
    pub fn read_props(&self, handle: &Handle) -> WcResult<PropertyMap> {
        self.node_store(handle)?.read_props(handle.relpath())
    }

    /// WORKING properties if present, else BASE's.
    pub fn read_pristine_props(&self, handle: &Handle) -> WcResult<PropertyMap> {
        self.node_store(handle)?.read_pristine_props(handle.relpath())
    }

    /// The union of BASE and WORKING children.
    pub fn read_children(&self, handle: &Handle) -> WcResult<Vec<String>> {
        self.node_store(handle)?.read_children(handle.relpath())
    }

    /// BASE-only children.
    pub fn base_get_children(&self, handle: &Handle) -> WcResult<Vec<String>> {
        self.node_store(handle)?.base_get_children(handle.relpath())
    }

    pub fn read_conflicts(&self, handle: &Handle) -> WcResult<Vec<node::Conflict>> {
        self.node_store(handle)?.read_conflicts(handle.relpath())
    }

    pub fn read_conflict_victims(&self, handle: &Handle) -> WcResult<Vec<String>> {
        self.node_store(handle)?.read_conflict_victims(handle.relpath())
    }

    /// Folds WORKING (and ACTUAL) into a new BASE row at `new_revision`
    /// in one transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn global_commit(
        &self,
        handle: &Handle,
        repos: (&str, &str, &str),
        new_revision: i64,
        changed: (i64, i64, &str),
        content: node::CommitContent,
        dav_cache: Option<&[u8]>,
        keep_changelist: bool,
    ) -> WcResult<()> {
        self.node_store(handle)?.commit(
            handle.relpath(),
            repos,
            new_revision,
            changed,
            content,
            dav_cache,
            keep_changelist,
        )
    }

    /// Re-homes every BASE/WORKING-copyfrom row under `handle` onto
    /// `new_root_url`, preserving UUID.
    pub fn global_relocate(&self, handle: &Handle, new_root_url: &str) -> WcResult<()> {
        self.node_store(handle)?.relocate(handle.relpath(), new_root_url)
    }

    /// Ascends until a BASE row carries non-sparse repository coordinates.
    pub fn scan_base_repos(&self, handle: &Handle) -> WcResult<BaseRepos> {
        self.scanner(handle)?.scan_base_repos(handle.relpath())
    }

    /// Ascends WORKING rows to find the operation root and copy/move
    /// provenance of an addition.
    pub fn scan_addition(&self, handle: &Handle) -> WcResult<AdditionScan> {
        self.scanner(handle)?.scan_addition(handle.relpath())
    }

    /// Ascends to find the deletion subtree root and any move-to
    /// destination.
    pub fn scan_deletion(&self, handle: &Handle) -> WcResult<DeletionScan> {
        self.scanner(handle)?.scan_deletion(handle.relpath())
    }

    /// Appends `item` to this WCROOT's cleanup queue.
    pub fn wq_add(&self, handle: &Handle, item: &WorkItem) -> WcResult<i64> {
        self.work_queue(handle)?.add(item)
    }

    /// Returns, without removing, the oldest pending cleanup item.
    pub fn wq_fetch(&self, handle: &Handle) -> WcResult<Option<(i64, WorkItem)>> {
        self.work_queue(handle)?.fetch()
    }

    /// Removes the cleanup item at `id` once it has been applied.
    pub fn wq_completed(&self, handle: &Handle, id: i64) -> WcResult<()> {
        self.work_queue(handle)?.completed(id)
    }

    /// Takes the advisory lock at `handle`'s path, marking the handle as
    /// owning it on success.
    pub fn wclock_set(&self, handle: &Handle) -> WcResult<()> {
        self.wclock(handle)?.set(handle.relpath())?;
        handle.mark_locked(true);
        Ok(())
    }

    /// Whether `handle`'s path currently carries a lock row, regardless of
    /// which process took it.
    pub fn wclock_check(&self, handle: &Handle) -> WcResult<bool> {
        self.wclock(handle)?.check(handle.relpath())
    }

    /// Releases the advisory lock at `handle`'s path and clears the
    /// in-memory "we own this" bit.
    pub fn wclock_remove(&self, handle: &Handle) -> WcResult<()> {
        self.wclock(handle)?.remove(handle.relpath())?;
        handle.mark_locked(false);
        Ok(())
    }

    /// Sets or clears the in-memory "we own this lock" bit without touching
    /// the store, used to reconcile with a lock taken outside this process.
    pub fn mark_locked(&self, handle: &Handle, locked: bool) {
        handle.mark_locked(locked);
    }

    pub fn own_lock(&self, handle: &Handle) -> bool {
        handle.own_lock()
    }

    /// The one-shot temp directory a caller stages a pristine write through
    /// before calling [`WorkingCopy::pristine_install`].
    pub fn pristine_tempdir(&self, handle: &Handle) -> WcResult<std::path::PathBuf> {
        self.pristine(handle)?.tempdir()
    }

    pub fn pristine_read(&self, handle: &Handle, digest: &store::Checksum) -> WcResult<std::fs::File> {
        self.pristine(handle)?.read(digest)
    }

    pub fn pristine_install(&self, handle: &Handle, temp_path: &Path, digest: &store::Checksum) -> WcResult<()> {
        self.pristine(handle)?.install(temp_path, digest)
    }

    pub fn pristine_check(
        &self,
        handle: &Handle,
        digest: &store::Checksum,
        mode: pristine::CheckMode,
    ) -> WcResult<pristine::Presence> {
        self.pristine(handle)?.check(digest, mode)
    }

    /// Every mutating node-model verb is exposed directly on [`NodeStore`]; reach it
    /// through [`WorkingCopy::node_store`]'s callers above for the common
    /// read path, or resolve a handle and construct one directly for the
    /// full write surface (`base_add_*`, `set_props`, `set_tree_conflict`,
    /// `lock_add`/`lock_remove`, and so on) since most callers need several
    /// of those verbs back-to-back against the same handle.
    pub fn nodes<'h>(&self, handle: &'h Handle) -> WcResult<NodeStore<'h>> {
        self.node_store(handle)
    }

    /// Schedules `handle` as a local copy of `from`, rooted at `from`'s
    /// current revision. Their signatures are part of the caller-facing
    /// contract; no behavior is implemented yet.
    pub fn copy(&self, _from: &Handle, _to: &Handle) -> WcResult<()> {
        unimplemented!("copy is not yet implemented")
    }

    /// Schedules `handle` as a local move of `from`.
    pub fn r#move(&self, _from: &Handle, _to: &Handle) -> WcResult<()> {
        unimplemented!("move is not yet implemented")
    }

    /// Schedules a plain local add of whatever is presently on disk at
    /// `handle`'s path.
    pub fn add_from_disk(&self, _handle: &Handle) -> WcResult<()> {
        unimplemented!("add_from_disk is not yet implemented")
    }

    /// Schedules a local deletion of `handle`'s path.
    pub fn delete(&self, _handle: &Handle) -> WcResult<()> {
        unimplemented!("delete is not yet implemented")
    }

    /// Discards the WORKING-layer overlay at `handle`'s path, restoring it
    /// to BASE.
    pub fn revert(&self, _handle: &Handle) -> WcResult<()> {
        unimplemented!("revert is not yet implemented")
    }

    /// Records a conflict marker produced by an external merge at `handle`'s
    /// path.
    pub fn mark_conflict(&self, _handle: &Handle) -> WcResult<()> {
        unimplemented!("mark_conflict is not yet implemented")
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn init_then_read_info_reports_root_directory() {
        let wc = tempdir().unwrap();
        let working_copy = WorkingCopy::new();
        let handle = working_copy
            .init(wc.path(), "proj/trunk", "http://r/", "U", 0, Depth::Infinity)
            .unwrap();

        let info = working_copy.read_info(&handle).unwrap();
        assert_eq!(info.revision, Some(0));
        assert_eq!(info.repos_relpath.as_deref(), Some("proj/trunk"));
        assert_eq!(info.repos_root.as_deref(), Some("http://r/"));
        assert_eq!(info.repos_uuid.as_deref(), Some("U"));
        assert_eq!(info.depth, Some(Depth::Infinity));
    }

    #[test]
    fn wclock_round_trips_through_the_facade() {
        let wc = tempdir().unwrap();
        let working_copy = WorkingCopy::new();
        let handle = working_copy
            .init(wc.path(), "proj/trunk", "http://r/", "U", 0, Depth::Infinity)
            .unwrap();

        assert!(!working_copy.own_lock(&handle));
        working_copy.wclock_set(&handle).unwrap();
        assert!(working_copy.own_lock(&handle));
        assert!(working_copy.wclock_check(&handle).unwrap());
        assert_matches!(working_copy.wclock_set(&handle), Err(WcError::Locked));

        working_copy.wclock_remove(&handle).unwrap();
        assert!(!working_copy.own_lock(&handle));
        assert!(!working_copy.wclock_check(&handle).unwrap());
    }

    #[test]
    fn reopening_the_same_path_reuses_the_cached_handle() {
        let wc = tempdir().unwrap();
        let working_copy = WorkingCopy::new();
        let first = working_copy
            .init(wc.path(), "proj/trunk", "http://r/", "U", 0, Depth::Infinity)
            .unwrap();
        let second = working_copy.open(wc.path(), OpenMode::ReadWrite).unwrap();
        assert_eq!(first.wcroot_id(), second.wcroot_id());
    }
}
