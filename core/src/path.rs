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

//! Maps an absolute filesystem path to a (root-handle, relative-path)
//! pair, caching per-directory handles so that resolving a path deep under
//! a large WCROOT is O(1) amortized after the first visit. Ascends from the
//! input path looking for the administrative directory, adding handle
//! caching, legacy-format detection, and obstruction detection along the
//! way.

use std::cell::Cell;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::instrument;

use crate::error::{WcError, WcResult};
use crate::node::Kind;
use crate::relpath::RelPath;
use crate::store::{OpenMode, Store};

/// Name of the administrative subdirectory probed for at every ancestor.
pub const ADMIN_DIR_NAME: &str = ".svn";
const STORE_FILE_NAME: &str = "wc.db";
const LEGACY_FORMAT_FILE_NAME: &str = "format";

struct RootData {
    id: i64,
    abspath: PathBuf,
    admin_dir: PathBuf,
    format: u32,
    /// `None` for a handle built from a legacy-format marker: no modern
    /// store to open, so every node-model operation on it must fail the caller
    /// over to an upgrade path instead.
    store: Option<Store>,
}

/// A cached (root, relative-path) pair. Every field except the three
/// single-owner flags (`obstructed`, `adm_access`, `locked`) is fixed at
/// construction time; cheap to clone via `Rc`, and safe to hand out to
/// callers that outlive a single `resolve` call.
pub struct Handle {
    root: Rc<RootData>,
    relpath: RelPath,
    obstructed: Cell<bool>,
    locked: Cell<bool>,
    adm_access: Cell<bool>,
}

impl Handle {
    pub fn relpath(&self) -> &RelPath {
        &self.relpath
    }

    pub fn is_root(&self) -> bool {
        self.relpath.is_root()
    }

    pub fn obstructed(&self) -> bool {
        self.obstructed.get()
    }

    pub fn wcroot_id(&self) -> i64 {
        self.root.id
    }

    pub fn wcroot_abspath(&self) -> &Path {
        &self.root.abspath
    }

    pub fn admin_dir(&self) -> &Path {
        &self.root.admin_dir
    }

    /// The schema version this handle was opened at; the step-5 upgrade
    /// trigger for a legacy handle.
    pub fn format(&self) -> u32 {
        self.root.format
    }

    pub fn is_legacy(&self) -> bool {
        self.root.store.is_none()
    }

    pub fn store(&self) -> WcResult<&Store> {
        self.root
            .store
            .as_ref()
            .ok_or(WcError::UpgradeRequired {
                found: self.root.format,
                current: crate::store::schema::CURRENT_SCHEMA_VERSION,
            })
    }

    pub fn abspath(&self) -> PathBuf {
        if self.relpath.is_root() {
            self.root.abspath.clone()
        } else {
            let mut path = self.root.abspath.clone();
            for component in self.relpath.components() {
                path.push(component);
            }
            path
        }
    }

    pub fn mark_locked(&self, locked: bool) {
        self.locked.set(locked);
    }

    pub fn own_lock(&self) -> bool {
        self.locked.get()
    }

    fn with_relpath(self: &Rc<Self>, relpath: RelPath, obstructed: bool) -> Rc<Handle> {
        Rc::new(Handle {
            root: self.root.clone(),
            relpath,
            obstructed: Cell::new(obstructed),
            locked: Cell::new(false),
            adm_access: Cell::new(false),
        })
    }
}

/// The per-process path-resolution cache. The scheduling model is
/// single-threaded and cooperative, so this is deliberately `!Sync` via its
/// interior `RefCell`/`Rc` rather than paying for a mutex no caller needs.
#[derive(Default)]
pub struct Resolver {
    cache: std::cell::RefCell<HashMap<PathBuf, Rc<Handle>>>,
}

impl Resolver {
    pub fn new() -> Self {
        Resolver::default()
    }

    /// Evicts the cached handle for `abspath` and every cached descendant.
    /// Called after structural operations (delete, upgrade) that make a
    /// stale handle unsafe to keep serving.
    pub fn forget(&self, abspath: &Path) {
        self.cache
            .borrow_mut()
            .retain(|cached, _| !(cached == abspath || cached.starts_with(abspath)));
    }

    pub fn parent(&self, handle: &Rc<Handle>) -> WcResult<Rc<Handle>> {
        if handle.relpath.is_root() {
            let parent_abspath = handle
                .root
                .abspath
                .parent()
                .ok_or(WcError::NotAWorkingCopy)?
                .to_owned();
            return self.resolve(&parent_abspath, OpenMode::ReadWrite);
        }
        let parent_relpath = handle.relpath.parent().expect("non-root has a parent");
        let parent_abspath = {
            let mut path = handle.root.abspath.clone();
            for component in parent_relpath.components() {
                path.push(component);
            }
            path
        };
        if let Some(cached) = self.cache.borrow().get(&parent_abspath) {
            return Ok(cached.clone());
        }
        let parent_handle = handle.with_relpath(parent_relpath, false);
        self.cache
            .borrow_mut()
            .insert(parent_abspath, parent_handle.clone());
        Ok(parent_handle)
    }

    /// Cache lookup, peel trailing non-directory components, ascend
    /// probing for a store or a legacy marker, then walk back down caching
    /// every intermediate handle.
    #[instrument(skip(self), fields(path = %abspath.display()))]
    pub fn resolve(&self, abspath: &Path, mode: OpenMode) -> WcResult<Rc<Handle>> {
        assert!(abspath.is_absolute(), "resolve requires an absolute path");

        if let Some(handle) = self.cache.borrow().get(abspath) {
            return Ok(handle.clone());
        }

        // Step 2: peel off trailing components that aren't (yet, or ever) a
        // directory, remembering them to re-attach once we know the root.
        let mut suffix: Vec<OsString> = Vec::new();
        let mut dir = abspath.to_path_buf();
        loop {
            match std::fs::symlink_metadata(&dir) {
                Ok(meta) if meta.is_dir() => break,
                _ => {
                    let name = dir
                        .file_name()
                        .ok_or(WcError::NotAWorkingCopy)?
                        .to_owned();
                    suffix.push(name);
                    dir = dir
                        .parent()
                        .ok_or(WcError::NotAWorkingCopy)?
                        .to_path_buf();
                    if let Some(handle) = self.cache.borrow().get(&dir) {
                        return Ok(self.extend_and_cache(abspath, handle, &suffix));
                    }
                }
            }
        }

        // Steps 3-4: ascend from the nearest enclosing directory, probing
        // for a store (or a legacy marker) at each level.
        let mut missing: Vec<PathBuf> = Vec::new();
        let mut cursor = dir;
        let root_handle = loop {
            if let Some(handle) = self.cache.borrow().get(&cursor) {
                break handle.clone();
            }
            if let Some(handle) = self.try_open_root(&cursor, mode)? {
                self.cache.borrow_mut().insert(cursor.clone(), handle.clone());
                break handle;
            }
            missing.push(cursor.clone());
            match cursor.parent() {
                Some(parent) => cursor = parent.to_path_buf(),
                None => return Err(WcError::NotAWorkingCopy),
            }
        };

        // Step 6: walk back down, nearest-root first, caching every
        // intermediate handle and detecting obstruction on the way.
        let mut current = root_handle;
        for child_dir in missing.into_iter().rev() {
            let basename = child_dir
                .file_name()
                .expect("ascended directories always have a basename")
                .to_string_lossy()
                .into_owned();
            let relpath = current.relpath.join(&basename);
            let obstructed = self.is_obstructed(&current, &relpath)?;
            let handle = current.with_relpath(relpath, obstructed);
            self.cache.borrow_mut().insert(child_dir, handle.clone());
            current = handle;
        }

        if suffix.is_empty() {
            Ok(current)
        } else {
            Ok(self.extend_and_cache(abspath, &current, &suffix))
        }
    }

    /// Joins `suffix` (collected nearest-first) onto `base`'s relpath and
    /// caches the result at the original `abspath`. No obstruction check:
    /// that only applies to paths that resolved to a directory (step 2
    /// only peels non-directories).
    fn extend_and_cache(&self, abspath: &Path, base: &Rc<Handle>, suffix: &[OsString]) -> Rc<Handle> {
        let mut relpath = base.relpath.clone();
        for component in suffix.iter().rev() {
            relpath = relpath.join(&component.to_string_lossy());
        }
        let handle = base.with_relpath(relpath, false);
        self.cache
            .borrow_mut()
            .insert(abspath.to_owned(), handle.clone());
        handle
    }

    /// Probes `dir` for a modern store file, then for a legacy-format
    /// marker. Returns `None` if neither is present, signaling the caller
    /// to keep ascending.
    fn try_open_root(&self, dir: &Path, mode: OpenMode) -> WcResult<Option<Rc<Handle>>> {
        let admin_dir = dir.join(ADMIN_DIR_NAME);
        let store_path = admin_dir.join(STORE_FILE_NAME);
        if store_path.is_file() {
            let store = Store::open(&store_path, mode, true, false)?;
            let (id, stored_abspath): (i64, String) = store.conn().query_row(
                "SELECT id, local_abspath FROM wcroot",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            ).map_err(|_| WcError::CorruptStore("wcroot table has no row".to_owned()))?;
            let _ = stored_abspath; // recorded for diagnostics only; dir is authoritative
            let format = store.conn().query_row(
                "SELECT version FROM schema_info",
                [],
                |row| row.get::<_, i64>(0),
            )? as u32;
            let root = Rc::new(RootData {
                id,
                abspath: dir.to_owned(),
                admin_dir,
                format,
                store: Some(store),
            });
            return Ok(Some(Rc::new(Handle {
                root,
                relpath: RelPath::root(),
                obstructed: Cell::new(false),
                locked: Cell::new(false),
                adm_access: Cell::new(false),
            })));
        }

        // Step 5: legacy-format marker, found before any modern store.
        let format_path = admin_dir.join(LEGACY_FORMAT_FILE_NAME);
        if format_path.is_file() {
            let text = std::fs::read_to_string(&format_path)?;
            let format: u32 = text
                .trim()
                .parse()
                .map_err(|_| WcError::CorruptStore(format!("unparsable format file at {}", format_path.display())))?;
            let root = Rc::new(RootData {
                id: -1,
                abspath: dir.to_owned(),
                admin_dir,
                format,
                store: None,
            });
            return Ok(Some(Rc::new(Handle {
                root,
                relpath: RelPath::root(),
                obstructed: Cell::new(false),
                locked: Cell::new(false),
                adm_access: Cell::new(false),
            })));
        }

        Ok(None)
    }

    /// The obstruction check: `parent`'s store says a *file* lives at
    /// `relpath`, yet the caller already established (by having reached
    /// this point through the directory-ascent path) that a directory is
    /// actually there.
    fn is_obstructed(&self, parent: &Rc<Handle>, relpath: &RelPath) -> WcResult<bool> {
        let Some(store) = parent.root.store.as_ref() else {
            return Ok(false);
        };
        let kind: Option<String> = store
            .conn()
            .query_row(
                "SELECT kind FROM base_node WHERE wc_id = ?1 AND local_relpath = ?2",
                rusqlite::params![parent.root.id, relpath.as_str()],
                |row| row.get(0),
            )
            .ok();
        Ok(kind.as_deref() == Some(Kind::File.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    use super::*;

    fn init_store(admin: &Path) {
        std::fs::create_dir_all(admin).unwrap();
        let store = Store::create(&admin.join(STORE_FILE_NAME)).unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO wcroot (id, local_abspath) VALUES (1, ?1)",
                [admin.parent().unwrap().to_string_lossy()],
            )
            .unwrap();
        store.close();
    }

    #[test]
    fn resolve_root_itself_has_empty_relpath() {
        let wc = tempdir().unwrap();
        init_store(&wc.path().join(ADMIN_DIR_NAME));

        let resolver = Resolver::new();
        let handle = resolver.resolve(wc.path(), OpenMode::ReadWrite).unwrap();
        assert!(handle.is_root());
        assert_eq!(handle.relpath().as_str(), "");
    }

    #[test]
    fn resolve_nested_path_finds_same_root_as_root_itself() {
        let wc = tempdir().unwrap();
        init_store(&wc.path().join(ADMIN_DIR_NAME));
        std::fs::create_dir_all(wc.path().join("a/b")).unwrap();

        let resolver = Resolver::new();
        let root_handle = resolver.resolve(wc.path(), OpenMode::ReadWrite).unwrap();
        let nested_handle = resolver
            .resolve(&wc.path().join("a/b"), OpenMode::ReadWrite)
            .unwrap();
        assert_eq!(nested_handle.wcroot_id(), root_handle.wcroot_id());
        assert_eq!(nested_handle.relpath().as_str(), "a/b");
    }

    #[test]
    fn resolve_file_path_inherits_enclosing_root() {
        let wc = tempdir().unwrap();
        init_store(&wc.path().join(ADMIN_DIR_NAME));
        std::fs::create_dir_all(wc.path().join("dir")).unwrap();
        std::fs::write(wc.path().join("dir/file.txt"), b"x").unwrap();

        let resolver = Resolver::new();
        let handle = resolver
            .resolve(&wc.path().join("dir/file.txt"), OpenMode::ReadWrite)
            .unwrap();
        assert_eq!(handle.relpath().as_str(), "dir/file.txt");
        assert!(!handle.obstructed());
    }

    #[test]
    fn resolve_missing_path_still_ascends_to_root() {
        let wc = tempdir().unwrap();
        init_store(&wc.path().join(ADMIN_DIR_NAME));

        let resolver = Resolver::new();
        let handle = resolver
            .resolve(&wc.path().join("never/existed.txt"), OpenMode::ReadWrite)
            .unwrap();
        assert_eq!(handle.relpath().as_str(), "never/existed.txt");
    }

    #[test]
    fn resolve_outside_any_working_copy_fails() {
        let dir = tempdir().unwrap();
        let resolver = Resolver::new();
        let err = resolver.resolve(dir.path(), OpenMode::ReadWrite).unwrap_err();
        assert_matches!(err, WcError::NotAWorkingCopy);
    }

    #[test]
    fn forget_evicts_path_and_descendants() {
        let wc = tempdir().unwrap();
        init_store(&wc.path().join(ADMIN_DIR_NAME));
        std::fs::create_dir_all(wc.path().join("dir/sub")).unwrap();

        let resolver = Resolver::new();
        resolver.resolve(&wc.path().join("dir/sub"), OpenMode::ReadWrite).unwrap();
        assert_eq!(resolver.cache.borrow().len(), 3); // root, dir, dir/sub

        resolver.forget(&wc.path().join("dir"));
        assert_eq!(resolver.cache.borrow().len(), 1); // only root remains
    }

    #[test]
    fn legacy_format_marker_builds_storeless_handle() {
        let wc = tempdir().unwrap();
        let admin = wc.path().join(ADMIN_DIR_NAME);
        std::fs::create_dir_all(&admin).unwrap();
        std::fs::write(admin.join(LEGACY_FORMAT_FILE_NAME), "10").unwrap();

        let resolver = Resolver::new();
        let handle = resolver.resolve(wc.path(), OpenMode::ReadWrite).unwrap();
        assert!(handle.is_legacy());
        assert_eq!(handle.format(), 10);
    }
}
