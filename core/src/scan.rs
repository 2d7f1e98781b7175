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

//! The three upward ancestor walks. Each climbs parents of a node within a
//! single WCROOT to derive information the node's own row doesn't carry
//! directly: inherited repository coordinates (sparse by design), addition
//! provenance (plain add vs. copy/move, and the operation root), and
//! deletion provenance (the root of a deleted subtree, and whether it was a
//! replace or a move-away).

use tracing::instrument;

use crate::error::{WcError, WcResult};
use crate::node::{BasePresence, NodeStore, WorkingPresence};
use crate::relpath::RelPath;
use crate::store::Store;

/// A node's repository coordinates, resolved by walking ancestors until one
/// carries non-sparse `repos_id`/`repos_relpath`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaseRepos {
    pub repos_relpath: String,
    pub repos_root: String,
    pub repos_uuid: String,
}

/// The copyfrom coordinates found while ascending a WORKING-add subtree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyFromCoords {
    pub repos_relpath: String,
    pub revision: i64,
}

/// Result of [`Scanner::scan_addition`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdditionScan {
    pub is_copy: bool,
    pub moved_here: bool,
    /// The highest ancestor still carrying a WORKING row of
    /// presence=normal: the root of this add/copy/move operation.
    pub op_root_path: RelPath,
    /// Repository coordinates the addition implies at the scanned path,
    /// derived by resolving `op_root_path`'s inherited coordinates and
    /// composing the suffix back down to the original path.
    pub implied: BaseRepos,
    /// Present iff some ancestor on the way up (nearest wins) carried a
    /// non-null copyfrom triple.
    pub copyfrom: Option<CopyFromCoords>,
}

/// Result of [`Scanner::scan_deletion`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeletionScan {
    /// The highest ancestor still part of this deletion's WORKING subtree.
    pub base_del_root: Option<RelPath>,
    /// `true` if a BASE-normal/WORKING-normal pair (a replace) was seen
    /// anywhere on the way up.
    pub base_was_replaced: bool,
    /// The move destination, if a `moved_to` column was found on the way up.
    pub moved_to_path: Option<String>,
    /// The root of a WORKING-subtree deletion: the child of a
    /// WORKING-normal parent whose own WORKING presence is not-present.
    pub work_del_root: Option<RelPath>,
}

/// Every method here takes an already-resolved `(wc_id, relpath)`
/// pair, same contract as [`NodeStore`], and climbs ancestors of that node
/// within the same store.
pub struct Scanner<'a> {
    nodes: NodeStore<'a>,
}

impl<'a> Scanner<'a> {
    pub fn new(store: &'a Store, wc_id: i64) -> Self {
        Scanner {
            nodes: NodeStore::new(store, wc_id),
        }
    }

    /// Ascends until a BASE row is found whose `repos_id` is non-null,
    /// composing the found `repos_relpath` with the suffix accumulated
    /// while ascending. Fails with [`WcError::CorruptStore`] if the root
    /// BASE row also lacks repository coordinates.
    #[instrument(skip(self), fields(relpath = %relpath))]
    pub fn scan_base_repos(&self, relpath: &RelPath) -> WcResult<BaseRepos> {
        for ancestor in relpath.ancestors() {
            let Some((repos_id, repos_relpath)) = self.nodes.base_repos_at(&ancestor)? else {
                continue;
            };
            let (repos_root, repos_uuid) = self.nodes.read_repository(repos_id)?;
            let suffix: Vec<&str> = relpath
                .components()
                .skip(ancestor.components().count())
                .collect();
            let mut full = repos_relpath;
            for component in suffix {
                full = if full.is_empty() {
                    component.to_owned()
                } else {
                    format!("{full}/{component}")
                };
            }
            return Ok(BaseRepos {
                repos_relpath: full,
                repos_root,
                repos_uuid,
            });
        }
        Err(WcError::CorruptStore(
            "no ancestor up to the WCROOT carries repository coordinates".to_owned(),
        ))
    }

    /// Ascends the WORKING subtree containing `relpath`, which must itself
    /// have WORKING.presence=normal. Returns the operation root, whether
    /// the addition is a plain add/copy/move, and the implied repository
    /// coordinates at `relpath`.
    #[instrument(skip(self), fields(relpath = %relpath))]
    pub fn scan_addition(&self, relpath: &RelPath) -> WcResult<AdditionScan> {
        if self.nodes.working_presence_at(relpath)? != Some(WorkingPresence::Normal) {
            return Err(WcError::UnexpectedStatus(
                "scan_addition start node is not in added state".to_owned(),
            ));
        }

        let mut copyfrom: Option<CopyFromCoords> = None;
        let mut moved_here = false;
        let mut op_root = relpath.clone();
        let mut cursor = relpath.clone();
        loop {
            if copyfrom.is_none() {
                if let Some((repos_relpath, revision, is_move)) =
                    self.nodes.working_copyfrom_at(&cursor)?
                {
                    copyfrom = Some(CopyFromCoords {
                        repos_relpath,
                        revision,
                    });
                    moved_here = is_move;
                }
            }
            op_root = cursor.clone();
            let Some(parent) = cursor.parent() else {
                break;
            };
            if self.nodes.working_presence_at(&parent)? != Some(WorkingPresence::Normal) {
                break;
            }
            cursor = parent;
        }

        let op_root_repos = self.scan_base_repos(&op_root)?;
        let suffix: Vec<&str> = relpath
            .components()
            .skip(op_root.components().count())
            .collect();
        let mut implied_relpath = op_root_repos.repos_relpath;
        for component in suffix {
            implied_relpath = if implied_relpath.is_empty() {
                component.to_owned()
            } else {
                format!("{implied_relpath}/{component}")
            };
        }

        Ok(AdditionScan {
            is_copy: copyfrom.is_some(),
            moved_here,
            op_root_path: op_root,
            implied: BaseRepos {
                repos_relpath: implied_relpath,
                repos_root: op_root_repos.repos_root,
                repos_uuid: op_root_repos.repos_uuid,
            },
            copyfrom,
        })
    }

    /// Ascends rows that carry a deletion signal, starting at `relpath`,
    /// whose WORKING.presence must be not-present or base-deleted.
    #[instrument(skip(self), fields(relpath = %relpath))]
    pub fn scan_deletion(&self, relpath: &RelPath) -> WcResult<DeletionScan> {
        let start = self.nodes.working_presence_at(relpath)?;
        if !matches!(
            start,
            Some(WorkingPresence::NotPresent) | Some(WorkingPresence::BaseDeleted)
        ) {
            return Err(WcError::UnexpectedStatus(
                "scan_deletion start node is not in deleted state".to_owned(),
            ));
        }

        let mut result = DeletionScan::default();
        let mut cursor = relpath.clone();
        loop {
            let base_presence = self.nodes.base_presence_at(&cursor)?;
            let work_presence = self.nodes.working_presence_at(&cursor)?;
            if base_presence == Some(BasePresence::Normal) && work_presence == Some(WorkingPresence::Normal)
            {
                result.base_was_replaced = true;
            }
            if result.moved_to_path.is_none() {
                if let Some(dest) = self.nodes.working_moved_to_at(&cursor)? {
                    result.moved_to_path = Some(dest);
                    result.base_del_root = Some(cursor.clone());
                }
            }
            result.base_del_root.get_or_insert_with(|| cursor.clone());

            let Some(parent) = cursor.parent() else {
                break;
            };
            let parent_work = self.nodes.working_presence_at(&parent)?;
            let Some(parent_work) = parent_work else {
                break;
            };
            if parent_work == WorkingPresence::Normal && work_presence == Some(WorkingPresence::NotPresent) {
                result.work_del_root = Some(cursor.clone());
            }
            cursor = parent;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    use super::*;
    use crate::node::{Depth, Kind, NodeStore};
    use crate::store::{Checksum, PropertyMap, Store};

    fn new_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::create(&dir.path().join("wc.db")).unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO wcroot (id, local_abspath) VALUES (1, ?1)",
                [dir.path().to_string_lossy()],
            )
            .unwrap();
        (dir, store)
    }

    fn set_working_added(store: &Store, wc_id: i64, relpath: &str, parent: Option<&str>) {
        store
            .conn()
            .execute(
                "INSERT INTO working_node (wc_id, local_relpath, parent_relpath, presence, kind)
                 VALUES (?1, ?2, ?3, 'normal', 'file')",
                rusqlite::params![wc_id, relpath, parent],
            )
            .unwrap();
    }

    #[test]
    fn scan_base_repos_composes_suffix_from_nearest_ancestor() {
        let (_dir, store) = new_store();
        let nodes = NodeStore::new(&store, 1);
        nodes
            .base_add_directory(
                &RelPath::root(),
                Some(("http://r/", "U", "proj/trunk")),
                0,
                (0, 0, "a"),
                Depth::Infinity,
                &PropertyMap::new(),
                &[],
            )
            .unwrap();
        let dir = RelPath::from("dir");
        nodes
            .base_add_directory(&dir, None, 0, (0, 0, "a"), Depth::Infinity, &PropertyMap::new(), &[])
            .unwrap();
        let child = dir.join("c");
        let digest = Checksum::sha1("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        nodes
            .base_add_file(&child, None, 1, (1, 0, "a"), &digest, 0, &PropertyMap::new())
            .unwrap();

        let scanner = Scanner::new(&store, 1);
        let repos = scanner.scan_base_repos(&child).unwrap();
        assert_eq!(repos.repos_relpath, "proj/trunk/dir/c");
        assert_eq!(repos.repos_root, "http://r/");
        assert_eq!(repos.repos_uuid, "U");
    }

    #[test]
    fn scan_addition_finds_copy_root_and_implied_coords() {
        let (_dir, store) = new_store();
        let nodes = NodeStore::new(&store, 1);
        nodes
            .base_add_directory(
                &RelPath::root(),
                Some(("http://r/", "U", "proj/trunk")),
                5,
                (5, 0, "a"),
                Depth::Infinity,
                &PropertyMap::new(),
                &[],
            )
            .unwrap();

        store
            .conn()
            .execute(
                "INSERT INTO working_node
                    (wc_id, local_relpath, parent_relpath, presence, kind,
                     copyfrom_repos_id, copyfrom_relpath, copyfrom_rev, moved_here)
                 VALUES (1, 'copied', '', 'normal', 'dir', 1, 'proj/trunk/orig', 5, 0)",
                [],
            )
            .unwrap();
        set_working_added(&store, 1, "copied/child", Some("copied"));

        let scanner = Scanner::new(&store, 1);
        let scan = scanner.scan_addition(&RelPath::from("copied/child")).unwrap();
        assert!(scan.is_copy);
        assert!(!scan.moved_here);
        assert_eq!(scan.op_root_path.as_str(), "copied");
        assert_eq!(scan.copyfrom.unwrap().repos_relpath, "proj/trunk/orig");
        assert_eq!(scan.implied.repos_relpath, "proj/trunk/copied/child");
    }

    #[test]
    fn scan_addition_rejects_start_node_not_added() {
        let (_dir, store) = new_store();
        let scanner = Scanner::new(&store, 1);
        let err = scanner.scan_addition(&RelPath::from("nope")).unwrap_err();
        assert_matches!(err, WcError::UnexpectedStatus(_));
    }

    #[test]
    fn scan_deletion_detects_replace_and_subtree_root() {
        let (_dir, store) = new_store();
        let nodes = NodeStore::new(&store, 1);
        let digest = Checksum::sha1("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        nodes
            .base_add_directory(&RelPath::root(), None, 0, (0, 0, "a"), Depth::Infinity, &PropertyMap::new(), &[])
            .unwrap();
        let dir = RelPath::from("dir");
        nodes
            .base_add_directory(&dir, None, 0, (0, 0, "a"), Depth::Infinity, &PropertyMap::new(), &["c".to_owned()])
            .unwrap();
        let child = dir.join("c");
        nodes
            .base_add_file(&child, None, 1, (1, 0, "a"), &digest, 0, &PropertyMap::new())
            .unwrap();
        nodes
            .base_add_file(&child, None, 1, (1, 0, "a"), &digest, 0, &PropertyMap::new())
            .unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO working_node (wc_id, local_relpath, parent_relpath, presence, kind)
                 VALUES (1, 'dir/c', 'dir', 'not-present', 'file')",
                [],
            )
            .unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO working_node (wc_id, local_relpath, parent_relpath, presence, kind)
                 VALUES (1, 'dir', '', 'normal', 'dir')",
                [],
            )
            .unwrap();
        let _ = Kind::Dir;

        let scanner = Scanner::new(&store, 1);
        let scan = scanner.scan_deletion(&child).unwrap();
        assert_eq!(scan.work_del_root.as_ref().map(RelPath::as_str), Some("dir/c"));
    }

    #[test]
    fn scan_deletion_picks_nearest_moved_to_ancestor() {
        // copied_dir/sub/moved_file: a copy-then-move chain two WORKING-row
        // levels deep. `moved_to` is set on `moved_file` itself, the nearest
        // ancestor to the start node; `base_del_root` must land there, not on
        // `sub` or `copied_dir`.
        let (_dir, store) = new_store();
        let nodes = NodeStore::new(&store, 1);
        nodes
            .base_add_directory(&RelPath::root(), None, 0, (0, 0, "a"), Depth::Infinity, &PropertyMap::new(), &[])
            .unwrap();

        set_working_added(&store, 1, "copied_dir", None);
        set_working_added(&store, 1, "copied_dir/sub", Some("copied_dir"));
        store
            .conn()
            .execute(
                "INSERT INTO working_node
                    (wc_id, local_relpath, parent_relpath, presence, kind, moved_to)
                 VALUES (1, 'copied_dir/sub/moved_file', 'copied_dir/sub', 'not-present', 'file', 'dest/moved_file')",
                [],
            )
            .unwrap();

        let scanner = Scanner::new(&store, 1);
        let scan = scanner.scan_deletion(&RelPath::from("copied_dir/sub/moved_file")).unwrap();
        assert_eq!(scan.moved_to_path.as_deref(), Some("dest/moved_file"));
        assert_eq!(
            scan.base_del_root.as_ref().map(RelPath::as_str),
            Some("copied_dir/sub/moved_file")
        );
    }
}
