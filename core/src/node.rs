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

//! The three-layer node model. Every node (wcroot, relpath) has an
//! independently-present BASE row (last-seen server state), WORKING row
//! (local overlay: add/copy/move/delete), and ACTUAL row (observed reality:
//! conflicts, changelist, local properties). [`NodeStore::read_info`]
//! joins the three into one composite view; the `base_*`/`set_*`/`lock_*`
//! verbs mutate one layer at a time, each inside a single store transaction.

use itertools::Itertools;
use rusqlite::{OptionalExtension, Transaction};
use tracing::instrument;

use crate::error::{WcError, WcResult};
use crate::relpath::RelPath;
use crate::store::{Checksum, PropertyMap, Store};

/// Last-seen server-side presence of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BasePresence {
    Normal,
    Absent,
    Excluded,
    NotPresent,
    Incomplete,
}

impl BasePresence {
    fn as_str(self) -> &'static str {
        match self {
            BasePresence::Normal => "normal",
            BasePresence::Absent => "absent",
            BasePresence::Excluded => "excluded",
            BasePresence::NotPresent => "not-present",
            BasePresence::Incomplete => "incomplete",
        }
    }

    pub(crate) fn parse(text: &str) -> WcResult<Self> {
        Ok(match text {
            "normal" => BasePresence::Normal,
            "absent" => BasePresence::Absent,
            "excluded" => BasePresence::Excluded,
            "not-present" => BasePresence::NotPresent,
            "incomplete" => BasePresence::Incomplete,
            other => return Err(WcError::CorruptStore(format!("bad base presence {other:?}"))),
        })
    }
}

/// The user-local overlay's presence for a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkingPresence {
    Normal,
    NotPresent,
    BaseDeleted,
    Incomplete,
}

impl WorkingPresence {
    fn as_str(self) -> &'static str {
        match self {
            WorkingPresence::Normal => "normal",
            WorkingPresence::NotPresent => "not-present",
            WorkingPresence::BaseDeleted => "base-deleted",
            WorkingPresence::Incomplete => "incomplete",
        }
    }

    pub(crate) fn parse(text: &str) -> WcResult<Self> {
        Ok(match text {
            "normal" => WorkingPresence::Normal,
            "not-present" => WorkingPresence::NotPresent,
            "base-deleted" => WorkingPresence::BaseDeleted,
            "incomplete" => WorkingPresence::Incomplete,
            other => return Err(WcError::CorruptStore(format!("bad working presence {other:?}"))),
        })
    }
}

/// A node's kind. `Subdir` is the legacy per-directory-store stub; every
/// reader above this layer collapses it to `Dir`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    File,
    Dir,
    Symlink,
    Subdir,
}

impl Kind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Kind::File => "file",
            Kind::Dir => "dir",
            Kind::Symlink => "symlink",
            Kind::Subdir => "subdir",
        }
    }

    fn parse(text: &str) -> WcResult<Self> {
        Ok(match text {
            "file" => Kind::File,
            "dir" => Kind::Dir,
            "symlink" => Kind::Symlink,
            "subdir" => Kind::Subdir,
            other => return Err(WcError::CorruptStore(format!("bad kind {other:?}"))),
        })
    }

    /// The kind a caller above this layer should see: `subdir` is never
    /// visible outside the node model.
    fn normalize(self) -> Kind {
        match self {
            Kind::Subdir => Kind::Dir,
            other => other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Depth {
    Empty,
    Files,
    Immediates,
    Infinity,
}

impl Depth {
    fn as_str(self) -> &'static str {
        match self {
            Depth::Empty => "empty",
            Depth::Files => "files",
            Depth::Immediates => "immediates",
            Depth::Infinity => "infinity",
        }
    }

    fn parse(text: &str) -> WcResult<Self> {
        Ok(match text {
            "empty" => Depth::Empty,
            "files" => Depth::Files,
            "immediates" => Depth::Immediates,
            "infinity" => Depth::Infinity,
            other => return Err(WcError::CorruptStore(format!("bad depth {other:?}"))),
        })
    }
}

/// The composite status derived from (BASE presence, WORKING presence,
/// WORKING copyfrom, BASE/WORKING kind): a pure function of the three-layer
/// state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeStatus {
    Normal,
    Absent,
    Excluded,
    NotPresent,
    Incomplete,
    Added,
    Copied,
    MovedHere,
    Deleted,
    ObstructedAdd,
    ObstructedDelete,
    Obstructed,
}

/// WORKING's copyfrom triple, present when a node was copied or moved here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyFrom {
    pub repos_relpath: String,
    pub revision: i64,
    pub moved_here: bool,
}

/// BASE's (and, by extension, composite) lock annotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockInfo {
    pub token: String,
    pub owner: Option<String>,
    pub comment: Option<String>,
    pub date: Option<i64>,
}

/// A single recorded conflict, as surfaced by [`NodeStore::read_conflicts`].
/// The grammar of the payload is out of scope here: every variant carries
/// opaque bytes that must round-trip byte-for-byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Conflict {
    Text {
        old: Option<Vec<u8>>,
        new: Option<Vec<u8>>,
        working: Option<Vec<u8>>,
    },
    Props(Vec<u8>),
    Tree(Vec<u8>),
}

/// The unified read: BASE, WORKING, and ACTUAL joined for one node.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeInfo {
    pub status: CompositeStatus,
    pub kind: Kind,
    pub revision: Option<i64>,
    pub repos_relpath: Option<String>,
    pub repos_root: Option<String>,
    pub repos_uuid: Option<String>,
    pub changed_rev: Option<i64>,
    pub changed_date: Option<i64>,
    pub changed_author: Option<String>,
    pub depth: Option<Depth>,
    pub checksum: Option<Checksum>,
    pub translated_size: Option<i64>,
    pub symlink_target: Option<String>,
    pub copyfrom: Option<CopyFrom>,
    pub changelist: Option<String>,
    pub lock: Option<LockInfo>,
    pub base_shadowed: bool,
    pub conflicted: bool,
}

struct BaseRow {
    presence: BasePresence,
    kind: Kind,
    repos_id: Option<i64>,
    repos_relpath: Option<String>,
    revision: Option<i64>,
    changed_rev: Option<i64>,
    changed_date: Option<i64>,
    changed_author: Option<String>,
    depth: Option<Depth>,
    checksum: Option<Checksum>,
    translated_size: Option<i64>,
    symlink_target: Option<String>,
    properties: Option<PropertyMap>,
    lock_token: Option<String>,
    lock_owner: Option<String>,
    lock_comment: Option<String>,
    lock_date: Option<i64>,
}

struct WorkingRow {
    presence: WorkingPresence,
    kind: Kind,
    changed_rev: Option<i64>,
    changed_date: Option<i64>,
    changed_author: Option<String>,
    depth: Option<Depth>,
    checksum: Option<Checksum>,
    translated_size: Option<i64>,
    symlink_target: Option<String>,
    properties: Option<PropertyMap>,
    copyfrom_repos_relpath: Option<String>,
    copyfrom_rev: Option<i64>,
    moved_here: bool,
}

struct ActualRow {
    properties: Option<PropertyMap>,
    conflict_old: Option<Vec<u8>>,
    conflict_new: Option<Vec<u8>>,
    conflict_working: Option<Vec<u8>>,
    prop_reject: Option<Vec<u8>>,
    tree_conflict_data: Option<PropertyMap>,
    changelist: Option<String>,
}

impl ActualRow {
    fn is_empty(&self) -> bool {
        self.properties.as_ref().map_or(true, PropertyMap::is_empty)
            && self.conflict_old.is_none()
            && self.conflict_new.is_none()
            && self.conflict_working.is_none()
            && self.prop_reject.is_none()
            && self
                .tree_conflict_data
                .as_ref()
                .map_or(true, PropertyMap::is_empty)
            && self.changelist.is_none()
    }
}

/// Which underlying layer a pristine-properties write targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layer {
    Base,
    Working,
}

/// The kind-specific payload `commit` writes into the new BASE row. Having
/// one variant per kind makes the "checksum xor children xor symlink
/// target, never more than one" invariant a property of the type rather
/// than a runtime check.
#[derive(Clone, Copy, Debug)]
pub enum CommitContent<'a> {
    File {
        checksum: &'a Checksum,
        translated_size: i64,
    },
    Directory {
        children: &'a [String],
    },
    Symlink {
        target: &'a str,
    },
}

/// Every method here takes an already-resolved `(wc_id, relpath)` pair
/// (path resolution is the caller's job) and talks to one WCROOT's store.
pub struct NodeStore<'a> {
    store: &'a Store,
    wc_id: i64,
}

impl<'a> NodeStore<'a> {
    pub fn new(store: &'a Store, wc_id: i64) -> Self {
        NodeStore { store, wc_id }
    }

    #[allow(clippy::type_complexity)]
    fn read_base(&self, relpath: &RelPath) -> WcResult<Option<BaseRow>> {
        let raw: Option<(
            String,
            String,
            Option<i64>,
            Option<String>,
            Option<i64>,
            Option<i64>,
            Option<i64>,
            Option<String>,
            Option<String>,
            Option<Checksum>,
            Option<i64>,
            Option<String>,
            Option<PropertyMap>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<i64>,
        )> = self
            .store
            .conn()
            .query_row(
                "SELECT presence, kind, repos_id, repos_relpath, revision, changed_rev,
                        changed_date, changed_author, depth, checksum, translated_size,
                        symlink_target, properties, lock_token, lock_owner, lock_comment,
                        lock_date
                 FROM base_node WHERE wc_id = ?1 AND local_relpath = ?2",
                rusqlite::params![self.wc_id, relpath.as_str()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                        row.get(10)?,
                        row.get(11)?,
                        row.get(12)?,
                        row.get(13)?,
                        row.get(14)?,
                        row.get(15)?,
                        row.get(16)?,
                    ))
                },
            )
            .optional()?;
        let Some((
            presence,
            kind,
            repos_id,
            repos_relpath,
            revision,
            changed_rev,
            changed_date,
            changed_author,
            depth,
            checksum,
            translated_size,
            symlink_target,
            properties,
            lock_token,
            lock_owner,
            lock_comment,
            lock_date,
        )) = raw
        else {
            return Ok(None);
        };
        Ok(Some(BaseRow {
            presence: BasePresence::parse(&presence)?,
            kind: Kind::parse(&kind)?,
            repos_id,
            repos_relpath,
            revision,
            changed_rev,
            changed_date,
            changed_author,
            depth: depth.as_deref().map(Depth::parse).transpose()?,
            checksum,
            translated_size,
            symlink_target,
            properties,
            lock_token,
            lock_owner,
            lock_comment,
            lock_date,
        }))
    }

    #[allow(clippy::type_complexity)]
    fn read_working(&self, relpath: &RelPath) -> WcResult<Option<WorkingRow>> {
        let raw: Option<(
            String,
            String,
            Option<i64>,
            Option<i64>,
            Option<String>,
            Option<String>,
            Option<Checksum>,
            Option<i64>,
            Option<String>,
            Option<PropertyMap>,
            Option<String>,
            Option<i64>,
            i64,
        )> = self
            .store
            .conn()
            .query_row(
                "SELECT presence, kind, changed_rev, changed_date, changed_author, depth,
                        checksum, translated_size, symlink_target, properties,
                        copyfrom_relpath, copyfrom_rev, moved_here
                 FROM working_node WHERE wc_id = ?1 AND local_relpath = ?2",
                rusqlite::params![self.wc_id, relpath.as_str()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                        row.get(10)?,
                        row.get(11)?,
                        row.get(12)?,
                    ))
                },
            )
            .optional()?;
        let Some((
            presence,
            kind,
            changed_rev,
            changed_date,
            changed_author,
            depth,
            checksum,
            translated_size,
            symlink_target,
            properties,
            copyfrom_repos_relpath,
            copyfrom_rev,
            moved_here,
        )) = raw
        else {
            return Ok(None);
        };
        Ok(Some(WorkingRow {
            presence: WorkingPresence::parse(&presence)?,
            kind: Kind::parse(&kind)?,
            changed_rev,
            changed_date,
            changed_author,
            depth: depth.as_deref().map(Depth::parse).transpose()?,
            checksum,
            translated_size,
            symlink_target,
            properties,
            copyfrom_repos_relpath,
            copyfrom_rev,
            moved_here: moved_here != 0,
        }))
    }

    fn read_actual(&self, relpath: &RelPath) -> WcResult<Option<ActualRow>> {
        self.store
            .conn()
            .query_row(
                "SELECT properties, conflict_old, conflict_new, conflict_working, prop_reject,
                        tree_conflict_data, changelist
                 FROM actual_node WHERE wc_id = ?1 AND local_relpath = ?2",
                rusqlite::params![self.wc_id, relpath.as_str()],
                |row| {
                    Ok(ActualRow {
                        properties: row.get(0)?,
                        conflict_old: row.get(1)?,
                        conflict_new: row.get(2)?,
                        conflict_working: row.get(3)?,
                        prop_reject: row.get(4)?,
                        tree_conflict_data: row.get(5)?,
                        changelist: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// BASE presence at `relpath`, or `None` if no BASE row exists. Exposed
    /// for the ancestor scanners, which walk ancestors without needing the rest of
    /// a [`BaseRow`].
    pub(crate) fn base_presence_at(&self, relpath: &RelPath) -> WcResult<Option<BasePresence>> {
        Ok(self.read_base(relpath)?.map(|b| b.presence))
    }

    /// `(repos_id, repos_relpath)` at `relpath` if the BASE row exists and
    /// carries non-sparse repository coordinates.
    pub(crate) fn base_repos_at(&self, relpath: &RelPath) -> WcResult<Option<(i64, String)>> {
        Ok(self
            .read_base(relpath)?
            .and_then(|b| b.repos_id.zip(b.repos_relpath)))
    }

    /// WORKING presence at `relpath`, or `None` if no WORKING row exists.
    pub(crate) fn working_presence_at(&self, relpath: &RelPath) -> WcResult<Option<WorkingPresence>> {
        Ok(self.read_working(relpath)?.map(|w| w.presence))
    }

    /// WORKING's copyfrom triple at `relpath`, if any.
    pub(crate) fn working_copyfrom_at(&self, relpath: &RelPath) -> WcResult<Option<(String, i64, bool)>> {
        Ok(self.read_working(relpath)?.and_then(|w| {
            w.copyfrom_repos_relpath
                .map(|rp| (rp, w.copyfrom_rev.unwrap_or_default(), w.moved_here))
        }))
    }

    /// WORKING's `moved_to` destination at `relpath`, if this node is the
    /// source side of a move, as consumed by the deletion scanner.
    pub(crate) fn working_moved_to_at(&self, relpath: &RelPath) -> WcResult<Option<String>> {
        self.store
            .conn()
            .query_row(
                "SELECT moved_to FROM working_node WHERE wc_id = ?1 AND local_relpath = ?2",
                rusqlite::params![self.wc_id, relpath.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// The parent's ACTUAL row carries tree-conflict victims keyed by
    /// child basename.
    fn read_tree_conflicts_on(&self, dir_relpath: &RelPath) -> WcResult<PropertyMap> {
        Ok(self
            .read_actual(dir_relpath)?
            .and_then(|row| row.tree_conflict_data)
            .unwrap_or_default())
    }

    #[instrument(skip(self), fields(relpath = %relpath))]
    pub fn read_info(&self, relpath: &RelPath) -> WcResult<NodeInfo> {
        let base = self.read_base(relpath)?;
        let working = self.read_working(relpath)?;
        let actual = self.read_actual(relpath)?;

        if base.is_none() && working.is_none() {
            return Err(WcError::PathNotFound);
        }

        let status = composite_status(base.as_ref(), working.as_ref())?;
        let kind = working
            .as_ref()
            .map(|w| w.kind)
            .or_else(|| base.as_ref().map(|b| b.kind))
            .expect("one layer is present")
            .normalize();

        let (repos_id, repos_relpath_raw) = base
            .as_ref()
            .and_then(|b| b.repos_id.zip(b.repos_relpath.clone()))
            .map(|(id, rp)| (Some(id), Some(rp)))
            .unwrap_or((None, None));
        let (repos_root, repos_uuid, repos_relpath) = if let (Some(id), Some(rp)) =
            (repos_id, repos_relpath_raw)
        {
            let (root, uuid) = self.read_repository(id)?;
            (Some(root), Some(uuid), Some(rp))
        } else {
            (None, None, None)
        };

        let copyfrom = working.as_ref().and_then(|w| {
            w.copyfrom_repos_relpath.clone().map(|relpath| CopyFrom {
                repos_relpath: relpath,
                revision: w.copyfrom_rev.unwrap_or_default(),
                moved_here: w.moved_here,
            })
        });

        let parent_tree_conflicts = relpath
            .parent()
            .map(|parent| self.read_tree_conflicts_on(&parent))
            .transpose()?
            .unwrap_or_default();
        let has_tree_conflict = relpath
            .basename()
            .is_some_and(|basename| parent_tree_conflicts.get(basename).is_some());
        let conflicted = has_tree_conflict
            || actual.as_ref().is_some_and(|a| {
                a.conflict_old.is_some()
                    || a.conflict_new.is_some()
                    || a.conflict_working.is_some()
                    || a.prop_reject.is_some()
            });

        let lock = base.as_ref().and_then(|b| {
            b.lock_token.clone().map(|token| LockInfo {
                token,
                owner: b.lock_owner.clone(),
                comment: b.lock_comment.clone(),
                date: b.lock_date,
            })
        });

        Ok(NodeInfo {
            status,
            kind,
            revision: base.as_ref().and_then(|b| b.revision),
            repos_relpath,
            repos_root,
            repos_uuid,
            changed_rev: working
                .as_ref()
                .and_then(|w| w.changed_rev)
                .or_else(|| base.as_ref().and_then(|b| b.changed_rev)),
            changed_date: working
                .as_ref()
                .and_then(|w| w.changed_date)
                .or_else(|| base.as_ref().and_then(|b| b.changed_date)),
            changed_author: working
                .as_ref()
                .and_then(|w| w.changed_author.clone())
                .or_else(|| base.as_ref().and_then(|b| b.changed_author.clone())),
            depth: working
                .as_ref()
                .and_then(|w| w.depth)
                .or_else(|| base.as_ref().and_then(|b| b.depth)),
            checksum: working
                .as_ref()
                .and_then(|w| w.checksum.clone())
                .or_else(|| base.as_ref().and_then(|b| b.checksum.clone())),
            translated_size: working
                .as_ref()
                .and_then(|w| w.translated_size)
                .or_else(|| base.as_ref().and_then(|b| b.translated_size)),
            symlink_target: working
                .as_ref()
                .and_then(|w| w.symlink_target.clone())
                .or_else(|| base.as_ref().and_then(|b| b.symlink_target.clone())),
            copyfrom,
            changelist: actual.as_ref().and_then(|a| a.changelist.clone()),
            lock,
            base_shadowed: base.is_some() && working.is_some(),
            conflicted,
        })
    }

    /// ACTUAL if present, else BASE; `None` if neither has a properties
    /// blob (never distinguishes absent-row from empty-blob: that's
    /// [`PropertyMap`]'s job).
    pub fn read_props(&self, relpath: &RelPath) -> WcResult<PropertyMap> {
        if let Some(actual) = self.read_actual(relpath)? {
            if let Some(props) = actual.properties {
                return Ok(props);
            }
        }
        Ok(self
            .read_base(relpath)?
            .and_then(|b| b.properties)
            .unwrap_or_default())
    }

    /// WORKING if present, else BASE.
    pub fn read_pristine_props(&self, relpath: &RelPath) -> WcResult<PropertyMap> {
        if let Some(working) = self.read_working(relpath)? {
            if let Some(props) = working.properties {
                return Ok(props);
            }
        }
        Ok(self
            .read_base(relpath)?
            .and_then(|b| b.properties)
            .unwrap_or_default())
    }

    /// Union of BASE's and WORKING's children, by basename.
    #[instrument(skip(self), fields(relpath = %relpath))]
    pub fn read_children(&self, relpath: &RelPath) -> WcResult<Vec<String>> {
        let base_names = self.base_get_children(relpath)?;
        let mut stmt = self.store.conn().prepare_cached(
            "SELECT local_relpath FROM working_node
             WHERE wc_id = ?1 AND parent_relpath = ?2 AND presence != 'not-present'",
        )?;
        let working_rows: Vec<String> = stmt
            .query_map(rusqlite::params![self.wc_id, relpath.as_str()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<_, _>>()?;
        let working_names = working_rows
            .into_iter()
            .filter_map(|full| RelPath::from(full).basename().map(str::to_owned));
        Ok(base_names.into_iter().chain(working_names).unique().sorted().collect())
    }

    pub fn base_get_children(&self, relpath: &RelPath) -> WcResult<Vec<String>> {
        let mut stmt = self.store.conn().prepare_cached(
            "SELECT local_relpath FROM base_node WHERE wc_id = ?1 AND parent_relpath = ?2",
        )?;
        let rows: Vec<String> = stmt
            .query_map(rusqlite::params![self.wc_id, relpath.as_str()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<_, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|full| RelPath::from(full).basename().map(str::to_owned))
            .sorted()
            .collect())
    }

    pub(crate) fn intern_repository(&self, root: &str, uuid: &str) -> WcResult<i64> {
        self.store.conn().execute(
            "INSERT OR IGNORE INTO repository (root, uuid) VALUES (?1, ?2)",
            rusqlite::params![root, uuid],
        )?;
        Ok(self.store.conn().query_row(
            "SELECT id FROM repository WHERE root = ?1 AND uuid = ?2",
            rusqlite::params![root, uuid],
            |row| row.get(0),
        )?)
    }

    pub(crate) fn read_repository(&self, repos_id: i64) -> WcResult<(String, String)> {
        self.store
            .conn()
            .query_row(
                "SELECT root, uuid FROM repository WHERE id = ?1",
                [repos_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|_| WcError::CorruptStore(format!("no repository row for id {repos_id}")))
    }

    fn parent_relpath_column(relpath: &RelPath) -> Option<String> {
        relpath.parent().map(|p| p.as_str().to_owned())
    }

    /// Inserts or replaces a BASE row for a regular file.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, props), fields(relpath = %relpath))]
    pub fn base_add_file(
        &self,
        relpath: &RelPath,
        repos: Option<(&str, &str, &str)>,
        revision: i64,
        changed: (i64, i64, &str),
        checksum: &Checksum,
        translated_size: i64,
        props: &PropertyMap,
    ) -> WcResult<()> {
        self.store.with_transaction(|txn| {
            let repos_id = repos
                .map(|(root, uuid, _)| self.intern_repository_txn(txn, root, uuid))
                .transpose()?;
            let repos_relpath = repos.map(|(_, _, rp)| rp);
            txn.execute(
                "INSERT OR REPLACE INTO base_node
                    (wc_id, local_relpath, parent_relpath, presence, kind, repos_id,
                     repos_relpath, revision, changed_rev, changed_date, changed_author,
                     checksum, translated_size, properties)
                 VALUES (?1, ?2, ?3, 'normal', 'file', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    self.wc_id,
                    relpath.as_str(),
                    Self::parent_relpath_column(relpath),
                    repos_id,
                    repos_relpath,
                    revision,
                    changed.0,
                    changed.1,
                    changed.2,
                    checksum.to_string(),
                    translated_size,
                    props,
                ],
            )?;
            Ok(())
        })
    }

    /// Inserts or replaces a BASE row for a directory, seeding an
    /// `incomplete` placeholder row for every listed child so the tree can
    /// be walked before the children's own data arrives.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, props, children), fields(relpath = %relpath))]
    pub fn base_add_directory(
        &self,
        relpath: &RelPath,
        repos: Option<(&str, &str, &str)>,
        revision: i64,
        changed: (i64, i64, &str),
        depth: Depth,
        props: &PropertyMap,
        children: &[String],
    ) -> WcResult<()> {
        self.store.with_transaction(|txn| {
            let repos_id = repos
                .map(|(root, uuid, _)| self.intern_repository_txn(txn, root, uuid))
                .transpose()?;
            let repos_relpath = repos.map(|(_, _, rp)| rp);
            txn.execute(
                "INSERT OR REPLACE INTO base_node
                    (wc_id, local_relpath, parent_relpath, presence, kind, repos_id,
                     repos_relpath, revision, changed_rev, changed_date, changed_author,
                     depth, properties)
                 VALUES (?1, ?2, ?3, 'normal', 'dir', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    self.wc_id,
                    relpath.as_str(),
                    Self::parent_relpath_column(relpath),
                    repos_id,
                    repos_relpath,
                    revision,
                    changed.0,
                    changed.1,
                    changed.2,
                    depth.as_str(),
                    props,
                ],
            )?;
            for child in children {
                let child_relpath = relpath.join(child);
                txn.execute(
                    "INSERT OR IGNORE INTO base_node
                        (wc_id, local_relpath, parent_relpath, presence, kind)
                     VALUES (?1, ?2, ?3, 'incomplete', 'file')",
                    rusqlite::params![self.wc_id, child_relpath.as_str(), relpath.as_str()],
                )?;
            }
            Ok(())
        })
    }

    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, props), fields(relpath = %relpath))]
    pub fn base_add_symlink(
        &self,
        relpath: &RelPath,
        repos: Option<(&str, &str, &str)>,
        revision: i64,
        changed: (i64, i64, &str),
        target: &str,
        props: &PropertyMap,
    ) -> WcResult<()> {
        self.store.with_transaction(|txn| {
            let repos_id = repos
                .map(|(root, uuid, _)| self.intern_repository_txn(txn, root, uuid))
                .transpose()?;
            let repos_relpath = repos.map(|(_, _, rp)| rp);
            txn.execute(
                "INSERT OR REPLACE INTO base_node
                    (wc_id, local_relpath, parent_relpath, presence, kind, repos_id,
                     repos_relpath, revision, changed_rev, changed_date, changed_author,
                     symlink_target, properties)
                 VALUES (?1, ?2, ?3, 'normal', 'symlink', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    self.wc_id,
                    relpath.as_str(),
                    Self::parent_relpath_column(relpath),
                    repos_id,
                    repos_relpath,
                    revision,
                    changed.0,
                    changed.1,
                    changed.2,
                    target,
                    props,
                ],
            )?;
            Ok(())
        })
    }

    /// Inserts a BASE row in a non-`normal` presence (`absent`, `excluded`,
    /// `not-present`, `incomplete`): a stub that records "something is
    /// here, but we have no local data for it".
    #[instrument(skip(self), fields(relpath = %relpath))]
    pub fn base_add_absent(
        &self,
        relpath: &RelPath,
        presence: BasePresence,
        kind: Kind,
        repos: Option<(&str, &str, &str)>,
        revision: Option<i64>,
    ) -> WcResult<()> {
        assert_ne!(presence, BasePresence::Normal, "use base_add_{{file,directory,symlink}}");
        self.store.with_transaction(|txn| {
            let repos_id = repos
                .map(|(root, uuid, _)| self.intern_repository_txn(txn, root, uuid))
                .transpose()?;
            let repos_relpath = repos.map(|(_, _, rp)| rp);
            txn.execute(
                "INSERT OR REPLACE INTO base_node
                    (wc_id, local_relpath, parent_relpath, presence, kind, repos_id,
                     repos_relpath, revision)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    self.wc_id,
                    relpath.as_str(),
                    Self::parent_relpath_column(relpath),
                    presence.as_str(),
                    kind.as_str(),
                    repos_id,
                    repos_relpath,
                    revision,
                ],
            )?;
            Ok(())
        })
    }

    fn intern_repository_txn(&self, txn: &Transaction, root: &str, uuid: &str) -> WcResult<i64> {
        txn.execute(
            "INSERT OR IGNORE INTO repository (root, uuid) VALUES (?1, ?2)",
            rusqlite::params![root, uuid],
        )?;
        Ok(txn.query_row(
            "SELECT id FROM repository WHERE root = ?1 AND uuid = ?2",
            rusqlite::params![root, uuid],
            |row| row.get(0),
        )?)
    }

    #[instrument(skip(self), fields(relpath = %relpath))]
    pub fn base_remove(&self, relpath: &RelPath) -> WcResult<()> {
        self.store.conn().execute(
            "DELETE FROM base_node WHERE wc_id = ?1 AND local_relpath = ?2",
            rusqlite::params![self.wc_id, relpath.as_str()],
        )?;
        Ok(())
    }

    /// Upserts the ACTUAL-layer property blob.
    #[instrument(skip(self, props), fields(relpath = %relpath))]
    pub fn set_props(&self, relpath: &RelPath, props: &PropertyMap) -> WcResult<()> {
        self.require_base_or_working(relpath)?;
        self.upsert_actual(relpath, |txn, exists| {
            if exists {
                txn.execute(
                    "UPDATE actual_node SET properties = ?3
                     WHERE wc_id = ?1 AND local_relpath = ?2",
                    rusqlite::params![self.wc_id, relpath.as_str(), props],
                )?;
            } else {
                txn.execute(
                    "INSERT INTO actual_node (wc_id, local_relpath, parent_relpath, properties)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        self.wc_id,
                        relpath.as_str(),
                        Self::parent_relpath_column(relpath),
                        props,
                    ],
                )?;
            }
            Ok(())
        })
    }

    /// Upserts properties on the specified underlying layer (BASE or
    /// WORKING); fails with `PathNotFound` if that layer has no row.
    #[instrument(skip(self, props), fields(relpath = %relpath))]
    pub fn set_pristine_props(&self, relpath: &RelPath, layer: Layer, props: &PropertyMap) -> WcResult<()> {
        let table = match layer {
            Layer::Base => "base_node",
            Layer::Working => "working_node",
        };
        let changed = self.store.conn().execute(
            &format!("UPDATE {table} SET properties = ?3 WHERE wc_id = ?1 AND local_relpath = ?2"),
            rusqlite::params![self.wc_id, relpath.as_str(), props],
        )?;
        if changed == 0 {
            return Err(WcError::PathNotFound);
        }
        Ok(())
    }

    /// Updates or clears the ACTUAL changelist. No-op if clearing a
    /// changelist that was never set and no ACTUAL row exists.
    #[instrument(skip(self), fields(relpath = %relpath))]
    pub fn set_changelist(&self, relpath: &RelPath, changelist: Option<&str>) -> WcResult<()> {
        let exists = self.read_actual(relpath)?.is_some();
        if !exists && changelist.is_none() {
            return Ok(());
        }
        self.require_base_or_working(relpath)?;
        self.upsert_actual(relpath, |txn, exists| {
            if exists {
                txn.execute(
                    "UPDATE actual_node SET changelist = ?3
                     WHERE wc_id = ?1 AND local_relpath = ?2",
                    rusqlite::params![self.wc_id, relpath.as_str(), changelist],
                )?;
                maybe_delete_empty_actual(txn, self.wc_id, relpath)?;
            } else {
                txn.execute(
                    "INSERT INTO actual_node (wc_id, local_relpath, parent_relpath, changelist)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        self.wc_id,
                        relpath.as_str(),
                        Self::parent_relpath_column(relpath),
                        changelist,
                    ],
                )?;
            }
            Ok(())
        })
    }

    /// Edits the single `basename` entry of `dir_relpath`'s tree-conflict
    /// map, re-serializing the whole blob stored on the parent. `conflict =
    /// None` removes the entry.
    #[instrument(skip(self, conflict), fields(dir = %dir_relpath))]
    pub fn set_tree_conflict(&self, dir_relpath: &RelPath, basename: &str, conflict: Option<&[u8]>) -> WcResult<()> {
        self.store.with_transaction(|txn| {
            let mut map = read_tree_conflicts_txn(txn, self.wc_id, dir_relpath)?;
            match conflict {
                Some(bytes) => map.insert(basename, bytes),
                None => map.remove(basename),
            }
            write_tree_conflicts_txn(txn, self.wc_id, dir_relpath, &map)
        })
    }

    /// Clears the requested conflict markers in a single transaction, so a
    /// caller clearing both text and prop conflicts never observes a state
    /// with one cleared and not the other.
    #[instrument(skip(self), fields(relpath = %relpath))]
    pub fn mark_resolved(&self, relpath: &RelPath, text: bool, props: bool, tree: bool) -> WcResult<()> {
        self.store.with_transaction(|txn| {
            if text {
                txn.execute(
                    "UPDATE actual_node SET conflict_old = NULL, conflict_new = NULL,
                        conflict_working = NULL
                     WHERE wc_id = ?1 AND local_relpath = ?2",
                    rusqlite::params![self.wc_id, relpath.as_str()],
                )?;
            }
            if props {
                txn.execute(
                    "UPDATE actual_node SET prop_reject = NULL
                     WHERE wc_id = ?1 AND local_relpath = ?2",
                    rusqlite::params![self.wc_id, relpath.as_str()],
                )?;
            }
            if tree {
                if let Some(parent) = relpath.parent() {
                    if let Some(basename) = relpath.basename() {
                        let mut map = read_tree_conflicts_txn(txn, self.wc_id, &parent)?;
                        map.remove(basename);
                        write_tree_conflicts_txn(txn, self.wc_id, &parent, &map)?;
                    }
                }
            }
            maybe_delete_empty_actual(txn, self.wc_id, relpath)?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(relpath = %relpath))]
    pub fn read_conflicts(&self, relpath: &RelPath) -> WcResult<Vec<Conflict>> {
        let mut out = Vec::new();
        if let Some(actual) = self.read_actual(relpath)? {
            if actual.conflict_old.is_some() || actual.conflict_new.is_some() || actual.conflict_working.is_some() {
                out.push(Conflict::Text {
                    old: actual.conflict_old,
                    new: actual.conflict_new,
                    working: actual.conflict_working,
                });
            }
            if let Some(reject) = actual.prop_reject {
                out.push(Conflict::Props(reject));
            }
        }
        if let Some(parent) = relpath.parent() {
            if let Some(basename) = relpath.basename() {
                let map = self.read_tree_conflicts_on(&parent)?;
                if let Some(bytes) = map.get(basename) {
                    out.push(Conflict::Tree(bytes.to_vec()));
                }
            }
        }
        Ok(out)
    }

    /// Basenames with a tree-conflict entry directly on `dir_relpath`.
    pub fn read_conflict_victims(&self, dir_relpath: &RelPath) -> WcResult<Vec<String>> {
        Ok(self
            .read_tree_conflicts_on(dir_relpath)?
            .into_map()
            .into_keys()
            .collect())
    }

    #[instrument(skip(self), fields(repos_relpath = %repos_relpath))]
    pub fn lock_add(&self, repos_id: i64, repos_relpath: &str, lock: &LockInfo) -> WcResult<()> {
        let changed = self.store.conn().execute(
            "UPDATE base_node SET lock_token = ?3, lock_owner = ?4, lock_comment = ?5, lock_date = ?6
             WHERE repos_id = ?1 AND repos_relpath = ?2",
            rusqlite::params![repos_id, repos_relpath, lock.token, lock.owner, lock.comment, lock.date],
        )?;
        if changed == 0 {
            return Err(WcError::PathNotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(repos_relpath = %repos_relpath))]
    pub fn lock_remove(&self, repos_id: i64, repos_relpath: &str) -> WcResult<()> {
        self.store.conn().execute(
            "UPDATE base_node SET lock_token = NULL, lock_owner = NULL, lock_comment = NULL, lock_date = NULL
             WHERE repos_id = ?1 AND repos_relpath = ?2",
            rusqlite::params![repos_id, repos_relpath],
        )?;
        Ok(())
    }

    fn require_base_or_working(&self, relpath: &RelPath) -> WcResult<()> {
        let present: i64 = self.store.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM base_node WHERE wc_id = ?1 AND local_relpath = ?2)
                 OR EXISTS(SELECT 1 FROM working_node WHERE wc_id = ?1 AND local_relpath = ?2)",
            rusqlite::params![self.wc_id, relpath.as_str()],
            |row| row.get(0),
        )?;
        if present == 0 {
            return Err(WcError::PathNotFound);
        }
        Ok(())
    }

    /// Nearest ancestor (inclusive) carrying non-sparse repository
    /// coordinates; the same walk [`crate::scan::Scanner::scan_base_repos`]
    /// performs, duplicated narrowly here to avoid a dependency on the
    /// scanner module for a single-field lookup.
    fn nearest_repos(&self, relpath: &RelPath) -> WcResult<(i64, String)> {
        for ancestor in relpath.ancestors() {
            if let Some(found) = self.base_repos_at(&ancestor)? {
                return Ok(found);
            }
        }
        Err(WcError::CorruptStore(
            "no ancestor up to the WCROOT carries repository coordinates".to_owned(),
        ))
    }

    /// Folds WORKING (and ACTUAL) into a new BASE row at `revision`,
    /// in one transaction. `content` must match the
    /// node's kind (WORKING's if present, else BASE's): this is enforced by
    /// the type itself rather than a runtime assert, since each
    /// [`CommitContent`] variant can only be constructed for one kind.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, content, dav_cache), fields(relpath = %relpath))]
    pub fn commit(
        &self,
        relpath: &RelPath,
        repos: (&str, &str, &str),
        new_revision: i64,
        changed: (i64, i64, &str),
        content: CommitContent,
        dav_cache: Option<&[u8]>,
        keep_changelist: bool,
    ) -> WcResult<()> {
        self.store.with_transaction(|txn| {
            let base = self.read_base(relpath)?;
            let working = self.read_working(relpath)?;
            let actual = self.read_actual(relpath)?;

            let kind = working
                .as_ref()
                .map(|w| w.kind)
                .or_else(|| base.as_ref().map(|b| b.kind))
                .ok_or(WcError::PathNotFound)?;
            match (&content, kind) {
                (CommitContent::File { .. }, Kind::File)
                | (CommitContent::Directory { .. }, Kind::Dir)
                | (CommitContent::Symlink { .. }, Kind::Symlink) => {}
                _ => {
                    return Err(WcError::UnexpectedStatus(
                        "commit content does not match the node's kind".to_owned(),
                    ))
                }
            }

            let properties = actual
                .as_ref()
                .and_then(|a| a.properties.clone())
                .or_else(|| working.as_ref().and_then(|w| w.properties.clone()))
                .or_else(|| base.as_ref().and_then(|b| b.properties.clone()))
                .unwrap_or_default();
            let depth = working
                .as_ref()
                .and_then(|w| w.depth)
                .or_else(|| base.as_ref().and_then(|b| b.depth));

            let repos_id = self.intern_repository_txn(txn, repos.0, repos.1)?;
            let repos_relpath = repos.2;
            let parent_relpath = Self::parent_relpath_column(relpath);

            match content {
                CommitContent::File {
                    checksum,
                    translated_size,
                } => {
                    txn.execute(
                        "INSERT OR REPLACE INTO base_node
                            (wc_id, local_relpath, parent_relpath, presence, kind, repos_id,
                             repos_relpath, revision, changed_rev, changed_date, changed_author,
                             checksum, translated_size, properties, dav_cache)
                         VALUES (?1, ?2, ?3, 'normal', 'file', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                        rusqlite::params![
                            self.wc_id,
                            relpath.as_str(),
                            parent_relpath,
                            repos_id,
                            repos_relpath,
                            new_revision,
                            changed.0,
                            changed.1,
                            changed.2,
                            checksum.to_string(),
                            translated_size,
                            &properties,
                            dav_cache,
                        ],
                    )?;
                }
                CommitContent::Directory { children } => {
                    txn.execute(
                        "INSERT OR REPLACE INTO base_node
                            (wc_id, local_relpath, parent_relpath, presence, kind, repos_id,
                             repos_relpath, revision, changed_rev, changed_date, changed_author,
                             depth, properties, dav_cache)
                         VALUES (?1, ?2, ?3, 'normal', 'dir', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                        rusqlite::params![
                            self.wc_id,
                            relpath.as_str(),
                            parent_relpath,
                            repos_id,
                            repos_relpath,
                            new_revision,
                            changed.0,
                            changed.1,
                            changed.2,
                            depth.unwrap_or(Depth::Infinity).as_str(),
                            &properties,
                            dav_cache,
                        ],
                    )?;
                    for child in children {
                        let child_relpath = relpath.join(child);
                        txn.execute(
                            "INSERT OR IGNORE INTO base_node
                                (wc_id, local_relpath, parent_relpath, presence, kind)
                             VALUES (?1, ?2, ?3, 'incomplete', 'file')",
                            rusqlite::params![self.wc_id, child_relpath.as_str(), relpath.as_str()],
                        )?;
                    }
                }
                CommitContent::Symlink { target } => {
                    txn.execute(
                        "INSERT OR REPLACE INTO base_node
                            (wc_id, local_relpath, parent_relpath, presence, kind, repos_id,
                             repos_relpath, revision, changed_rev, changed_date, changed_author,
                             symlink_target, properties, dav_cache)
                         VALUES (?1, ?2, ?3, 'normal', 'symlink', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                        rusqlite::params![
                            self.wc_id,
                            relpath.as_str(),
                            parent_relpath,
                            repos_id,
                            repos_relpath,
                            new_revision,
                            changed.0,
                            changed.1,
                            changed.2,
                            target,
                            &properties,
                            dav_cache,
                        ],
                    )?;
                }
            }

            txn.execute(
                "DELETE FROM working_node WHERE wc_id = ?1 AND local_relpath = ?2",
                rusqlite::params![self.wc_id, relpath.as_str()],
            )?;

            let keep = keep_changelist && actual.as_ref().and_then(|a| a.changelist.as_ref()).is_some();
            txn.execute(
                "DELETE FROM actual_node WHERE wc_id = ?1 AND local_relpath = ?2",
                rusqlite::params![self.wc_id, relpath.as_str()],
            )?;
            if keep {
                let changelist = actual.and_then(|a| a.changelist);
                txn.execute(
                    "INSERT INTO actual_node (wc_id, local_relpath, parent_relpath, changelist)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![self.wc_id, relpath.as_str(), parent_relpath, changelist],
                )?;
            }

            Ok(())
        })
    }

    /// Re-homes every BASE/WORKING-copyfrom row under `dir_relpath` whose
    /// repository coordinates still point at the old root, preserving UUID.
    /// The DAV cache is cleared for every relocated BASE row since it's
    /// meaningful only relative to a specific server root.
    #[instrument(skip(self), fields(dir = %dir_relpath, new_root_url = %new_root_url))]
    pub fn relocate(&self, dir_relpath: &RelPath, new_root_url: &str) -> WcResult<()> {
        self.store.with_transaction(|txn| {
            let (old_repos_id, repos_relpath) = self.nearest_repos(dir_relpath)?;
            let (_, uuid) = self.read_repository(old_repos_id)?;
            let new_repos_id = self.intern_repository_txn(txn, new_root_url, &uuid)?;

            let prefix = crate::store::escape_like_prefix(&repos_relpath);
            let like_pattern = format!("{prefix}/%");
            let escape = crate::store::LIKE_ESCAPE_CHAR.to_string();

            txn.execute(
                "UPDATE base_node SET repos_id = ?1, dav_cache = NULL
                 WHERE repos_id = ?2 AND (repos_relpath = ?3 OR repos_relpath LIKE ?4 ESCAPE ?5)",
                rusqlite::params![new_repos_id, old_repos_id, repos_relpath, like_pattern, escape],
            )?;
            txn.execute(
                "UPDATE working_node SET copyfrom_repos_id = ?1
                 WHERE copyfrom_repos_id = ?2 AND (copyfrom_relpath = ?3 OR copyfrom_relpath LIKE ?4 ESCAPE ?5)",
                rusqlite::params![new_repos_id, old_repos_id, repos_relpath, like_pattern, escape],
            )?;
            Ok(())
        })
    }

    fn upsert_actual(
        &self,
        relpath: &RelPath,
        f: impl FnOnce(&Transaction, bool) -> WcResult<()>,
    ) -> WcResult<()> {
        self.store.with_transaction(|txn| {
            let exists: i64 = txn.query_row(
                "SELECT EXISTS(SELECT 1 FROM actual_node WHERE wc_id = ?1 AND local_relpath = ?2)",
                rusqlite::params![self.wc_id, relpath.as_str()],
                |row| row.get(0),
            )?;
            f(txn, exists != 0)
        })
    }
}

fn read_tree_conflicts_txn(txn: &Transaction, wc_id: i64, dir_relpath: &RelPath) -> WcResult<PropertyMap> {
    Ok(txn
        .query_row(
            "SELECT tree_conflict_data FROM actual_node WHERE wc_id = ?1 AND local_relpath = ?2",
            rusqlite::params![wc_id, dir_relpath.as_str()],
            |row| row.get::<_, Option<PropertyMap>>(0),
        )
        .optional()?
        .flatten()
        .unwrap_or_default())
}

fn write_tree_conflicts_txn(txn: &Transaction, wc_id: i64, dir_relpath: &RelPath, map: &PropertyMap) -> WcResult<()> {
    let exists: i64 = txn.query_row(
        "SELECT EXISTS(SELECT 1 FROM actual_node WHERE wc_id = ?1 AND local_relpath = ?2)",
        rusqlite::params![wc_id, dir_relpath.as_str()],
        |row| row.get(0),
    )?;
    if map.is_empty() {
        if exists != 0 {
            txn.execute(
                "UPDATE actual_node SET tree_conflict_data = NULL
                 WHERE wc_id = ?1 AND local_relpath = ?2",
                rusqlite::params![wc_id, dir_relpath.as_str()],
            )?;
            maybe_delete_empty_actual(txn, wc_id, dir_relpath)?;
        }
        return Ok(());
    }
    if exists != 0 {
        txn.execute(
            "UPDATE actual_node SET tree_conflict_data = ?3
             WHERE wc_id = ?1 AND local_relpath = ?2",
            rusqlite::params![wc_id, dir_relpath.as_str(), map],
        )?;
    } else {
        txn.execute(
            "INSERT INTO actual_node (wc_id, local_relpath, parent_relpath, tree_conflict_data)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                wc_id,
                dir_relpath.as_str(),
                dir_relpath.parent().map(|p| p.as_str().to_owned()),
                map,
            ],
        )?;
    }
    Ok(())
}

/// Deletes an ACTUAL row once it carries no conflicts, no changelist, and
/// no local properties.
fn maybe_delete_empty_actual(txn: &Transaction, wc_id: i64, relpath: &RelPath) -> WcResult<()> {
    let empty: Option<i64> = txn
        .query_row(
            "SELECT 1 FROM actual_node
             WHERE wc_id = ?1 AND local_relpath = ?2
               AND (properties IS NULL OR length(properties) = 0)
               AND conflict_old IS NULL AND conflict_new IS NULL AND conflict_working IS NULL
               AND prop_reject IS NULL
               AND (tree_conflict_data IS NULL OR length(tree_conflict_data) = 0)
               AND changelist IS NULL",
            rusqlite::params![wc_id, relpath.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    if empty.is_some() {
        txn.execute(
            "DELETE FROM actual_node WHERE wc_id = ?1 AND local_relpath = ?2",
            rusqlite::params![wc_id, relpath.as_str()],
        )?;
    }
    Ok(())
}

/// Pure dispatch over the composite-status table: the presence/copyfrom/kind
/// combination fully determines the composite status, so this `match` is
/// the lookup table rendered as Rust's idiomatic equivalent.
fn composite_status(base: Option<&BaseRow>, working: Option<&WorkingRow>) -> WcResult<CompositeStatus> {
    use BasePresence::*;
    use WorkingPresence::*;

    let base_is_subdir = base.is_some_and(|b| b.kind == Kind::Subdir);

    Ok(match (base, working) {
        (Some(b), None) => match b.presence {
            Normal if base_is_subdir => CompositeStatus::Obstructed,
            Normal => CompositeStatus::Normal,
            Absent => CompositeStatus::Absent,
            Excluded => CompositeStatus::Excluded,
            NotPresent => CompositeStatus::NotPresent,
            Incomplete => CompositeStatus::Incomplete,
        },
        (None, None) => return Err(WcError::PathNotFound),
        (None, Some(w)) => match w.presence {
            WorkingPresence::Normal => {
                if w.copyfrom_repos_relpath.is_some() {
                    if w.moved_here {
                        CompositeStatus::MovedHere
                    } else {
                        CompositeStatus::Copied
                    }
                } else {
                    CompositeStatus::Added
                }
            }
            _ => return Err(WcError::CorruptStore(
                "working row with no base row must have presence=normal".to_owned(),
            )),
        },
        (Some(b), Some(w)) if b.presence == Normal && base_is_subdir => match w.presence {
            WorkingPresence::Normal => CompositeStatus::ObstructedAdd,
            WorkingPresence::NotPresent => CompositeStatus::ObstructedDelete,
            _ => CompositeStatus::Obstructed,
        },
        (Some(b), Some(w)) if b.presence == Normal => match w.presence {
            WorkingPresence::Normal => {
                if w.copyfrom_repos_relpath.is_some() {
                    if w.moved_here {
                        CompositeStatus::MovedHere
                    } else {
                        CompositeStatus::Copied
                    }
                } else {
                    CompositeStatus::Added
                }
            }
            WorkingPresence::NotPresent | WorkingPresence::BaseDeleted => CompositeStatus::Deleted,
            WorkingPresence::Incomplete => CompositeStatus::Incomplete,
        },
        (Some(_), Some(_)) => CompositeStatus::Obstructed,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tempfile::tempdir;
    use test_case::test_case;

    use super::*;
    use crate::store::Store;

    fn base_row(presence: BasePresence, kind: Kind) -> BaseRow {
        BaseRow {
            presence,
            kind,
            repos_id: None,
            repos_relpath: None,
            revision: None,
            changed_rev: None,
            changed_date: None,
            changed_author: None,
            depth: None,
            checksum: None,
            translated_size: None,
            symlink_target: None,
            properties: None,
            lock_token: None,
            lock_owner: None,
            lock_comment: None,
            lock_date: None,
        }
    }

    fn working_row(presence: WorkingPresence, copied: bool, moved_here: bool) -> WorkingRow {
        WorkingRow {
            presence,
            kind: Kind::File,
            changed_rev: None,
            changed_date: None,
            changed_author: None,
            depth: None,
            checksum: None,
            translated_size: None,
            symlink_target: None,
            properties: None,
            copyfrom_repos_relpath: copied.then(|| "trunk/a.txt".to_owned()),
            copyfrom_rev: copied.then_some(1),
            moved_here,
        }
    }

    #[test_case(BasePresence::Normal, Kind::File, CompositeStatus::Normal; "normal base file with no working row is normal")]
    #[test_case(BasePresence::Absent, Kind::File, CompositeStatus::Absent; "absent base row with no working row is absent")]
    #[test_case(BasePresence::Excluded, Kind::File, CompositeStatus::Excluded; "excluded base row with no working row is excluded")]
    #[test_case(BasePresence::NotPresent, Kind::File, CompositeStatus::NotPresent; "not-present base row with no working row is not-present")]
    #[test_case(BasePresence::Incomplete, Kind::File, CompositeStatus::Incomplete; "incomplete base row with no working row is incomplete")]
    #[test_case(BasePresence::Normal, Kind::Subdir, CompositeStatus::Obstructed; "a bare subdir stub with no working row is obstructed")]
    fn composite_status_base_only(presence: BasePresence, kind: Kind, expected: CompositeStatus) {
        let base = base_row(presence, kind);
        assert_eq!(composite_status(Some(&base), None).unwrap(), expected);
    }

    #[test_case(false, false, CompositeStatus::Added; "a plain working add with no base row is added")]
    #[test_case(true, false, CompositeStatus::Copied; "a copyfrom working add with no base row is copied")]
    #[test_case(true, true, CompositeStatus::MovedHere; "a moved-here working add with no base row is moved-here")]
    fn composite_status_working_only(copied: bool, moved_here: bool, expected: CompositeStatus) {
        let working = working_row(WorkingPresence::Normal, copied, moved_here);
        assert_eq!(composite_status(None, Some(&working)).unwrap(), expected);
    }

    #[test_case(WorkingPresence::Normal, false, false, CompositeStatus::Added; "a local add replacing a normal base row is added")]
    #[test_case(WorkingPresence::Normal, true, false, CompositeStatus::Copied; "a copy replacing a normal base row is copied")]
    #[test_case(WorkingPresence::Normal, true, true, CompositeStatus::MovedHere; "a move replacing a normal base row is moved-here")]
    #[test_case(WorkingPresence::NotPresent, false, false, CompositeStatus::Deleted; "a not-present working row over a normal base row is deleted")]
    #[test_case(WorkingPresence::BaseDeleted, false, false, CompositeStatus::Deleted; "a base-deleted working row over a normal base row is deleted")]
    #[test_case(WorkingPresence::Incomplete, false, false, CompositeStatus::Incomplete; "an incomplete working row over a normal base row is incomplete")]
    fn composite_status_base_and_working_over_normal_base(
        working_presence: WorkingPresence,
        copied: bool,
        moved_here: bool,
        expected: CompositeStatus,
    ) {
        let base = base_row(BasePresence::Normal, Kind::File);
        let working = working_row(working_presence, copied, moved_here);
        assert_eq!(composite_status(Some(&base), Some(&working)).unwrap(), expected);
    }

    #[test_case(WorkingPresence::Normal, CompositeStatus::ObstructedAdd; "an add over an obstructing subdir stub is obstructed-add")]
    #[test_case(WorkingPresence::NotPresent, CompositeStatus::ObstructedDelete; "a delete over an obstructing subdir stub is obstructed-delete")]
    #[test_case(WorkingPresence::Incomplete, CompositeStatus::Obstructed; "any other working row over an obstructing subdir stub is obstructed")]
    fn composite_status_working_over_subdir_stub(working_presence: WorkingPresence, expected: CompositeStatus) {
        let base = base_row(BasePresence::Normal, Kind::Subdir);
        let working = working_row(working_presence, false, false);
        assert_eq!(composite_status(Some(&base), Some(&working)).unwrap(), expected);
    }

    #[test]
    fn composite_status_working_row_over_a_non_normal_base_row_is_obstructed() {
        let base = base_row(BasePresence::Absent, Kind::File);
        let working = working_row(WorkingPresence::Normal, false, false);
        assert_eq!(composite_status(Some(&base), Some(&working)).unwrap(), CompositeStatus::Obstructed);
    }

    #[test]
    fn composite_status_with_neither_row_is_path_not_found() {
        assert_matches!(composite_status(None, None), Err(WcError::PathNotFound));
    }

    fn new_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::create(&dir.path().join("wc.db")).unwrap();
        store
            .conn()
            .execute("INSERT INTO wcroot (id, local_abspath) VALUES (1, ?1)", [dir.path().to_string_lossy()])
            .unwrap();
        (dir, store)
    }

    #[test]
    fn base_add_file_then_read_info_matches_the_full_node_info_exactly() {
        use pretty_assertions::assert_eq;

        let (_dir, store) = new_store();
        let nodes = NodeStore::new(&store, 1);
        let digest = Checksum::sha1("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        nodes
            .base_add_file(
                &RelPath::from("a.txt"),
                Some(("http://r/", "U", "proj/trunk/a.txt")),
                1,
                (1, 0, "alice"),
                &digest,
                42,
                &PropertyMap::new(),
            )
            .unwrap();

        let info = nodes.read_info(&RelPath::from("a.txt")).unwrap();
        assert_eq!(
            info,
            NodeInfo {
                status: CompositeStatus::Normal,
                kind: Kind::File,
                revision: Some(1),
                repos_relpath: Some("proj/trunk/a.txt".to_owned()),
                repos_root: Some("http://r/".to_owned()),
                repos_uuid: Some("U".to_owned()),
                changed_rev: Some(1),
                changed_date: Some(0),
                changed_author: Some("alice".to_owned()),
                depth: None,
                checksum: Some(digest),
                translated_size: Some(42),
                symlink_target: None,
                copyfrom: None,
                changelist: None,
                lock: None,
                base_shadowed: false,
                conflicted: false,
            }
        );
    }

    #[test]
    fn base_add_file_then_read_info_reports_checksum() {
        let (_dir, store) = new_store();
        let nodes = NodeStore::new(&store, 1);
        let digest = Checksum::sha1("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        nodes
            .base_add_file(
                &RelPath::from("a.txt"),
                Some(("http://r/", "U", "proj/trunk/a.txt")),
                1,
                (1, 0, "alice"),
                &digest,
                42,
                &PropertyMap::new(),
            )
            .unwrap();

        let info = nodes.read_info(&RelPath::from("a.txt")).unwrap();
        assert_eq!(info.status, CompositeStatus::Normal);
        assert_eq!(info.kind, Kind::File);
        assert_eq!(info.checksum, Some(digest));
    }

    #[test]
    fn base_add_directory_seeds_incomplete_children() {
        let (_dir, store) = new_store();
        let nodes = NodeStore::new(&store, 1);
        nodes
            .base_add_directory(
                &RelPath::root(),
                Some(("http://r/", "U", "proj/trunk")),
                0,
                (0, 0, "alice"),
                Depth::Infinity,
                &PropertyMap::new(),
                &["a".to_owned(), "b".to_owned()],
            )
            .unwrap();

        let children = nodes.read_children(&RelPath::root()).unwrap();
        assert_eq!(children, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn base_add_then_remove_is_path_not_found() {
        let (_dir, store) = new_store();
        let nodes = NodeStore::new(&store, 1);
        let digest = Checksum::sha1("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        let relpath = RelPath::from("a.txt");
        nodes
            .base_add_file(&relpath, None, 1, (1, 0, "alice"), &digest, 0, &PropertyMap::new())
            .unwrap();
        nodes.base_remove(&relpath).unwrap();
        assert_matches!(nodes.read_info(&relpath), Err(WcError::PathNotFound));
    }

    #[test]
    fn set_props_then_read_props_round_trips() {
        let (_dir, store) = new_store();
        let nodes = NodeStore::new(&store, 1);
        let digest = Checksum::sha1("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        let relpath = RelPath::from("a.txt");
        nodes
            .base_add_file(&relpath, None, 1, (1, 0, "alice"), &digest, 0, &PropertyMap::new())
            .unwrap();

        let mut map = std::collections::BTreeMap::new();
        map.insert("svn:eol-style".to_owned(), b"native".to_vec());
        let props = PropertyMap::from_map(map);
        nodes.set_props(&relpath, &props).unwrap();
        assert_eq!(nodes.read_props(&relpath).unwrap(), props);
    }

    #[test]
    fn set_tree_conflict_then_read_info_is_conflicted() {
        let (_dir, store) = new_store();
        let nodes = NodeStore::new(&store, 1);
        nodes
            .base_add_directory(&RelPath::root(), None, 0, (0, 0, "a"), Depth::Infinity, &PropertyMap::new(), &[])
            .unwrap();
        let digest = Checksum::sha1("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        let dir = RelPath::from("dir");
        nodes
            .base_add_directory(&dir, None, 0, (0, 0, "a"), Depth::Infinity, &PropertyMap::new(), &["c".to_owned()])
            .unwrap();
        let child = dir.join("c");
        nodes
            .base_add_file(&child, None, 1, (1, 0, "a"), &digest, 0, &PropertyMap::new())
            .unwrap();

        nodes.set_tree_conflict(&dir, "c", Some(b"X")).unwrap();
        let info = nodes.read_info(&child).unwrap();
        assert!(info.conflicted);
        assert_eq!(nodes.read_conflicts(&child).unwrap(), vec![Conflict::Tree(b"X".to_vec())]);

        nodes.set_tree_conflict(&dir, "c", None).unwrap();
        assert!(!nodes.read_info(&child).unwrap().conflicted);
    }

    #[test]
    fn set_changelist_inserts_minimal_actual_row() {
        let (_dir, store) = new_store();
        let nodes = NodeStore::new(&store, 1);
        let digest = Checksum::sha1("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        let relpath = RelPath::from("a.txt");
        nodes
            .base_add_file(&relpath, None, 1, (1, 0, "a"), &digest, 0, &PropertyMap::new())
            .unwrap();

        assert!(nodes.set_changelist(&relpath, None).is_ok());
        nodes.set_changelist(&relpath, Some("work")).unwrap();
        assert_eq!(nodes.read_info(&relpath).unwrap().changelist, Some("work".to_owned()));
        nodes.set_changelist(&relpath, None).unwrap();
        assert_eq!(nodes.read_info(&relpath).unwrap().changelist, None);
    }
}
