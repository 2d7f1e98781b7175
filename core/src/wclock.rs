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

//! The advisory lock. One row per `(wc_id, local_relpath)` in the
//! `lock` table records that *some* caller holds the working copy locked
//! at that path; it carries no owner identity or expiry; by design it only
//! protects against concurrent callers of this store, not concurrent
//! processes editing the filesystem directly underneath it.
//!
//! [`crate::path::Handle::mark_locked`]/`own_lock` track, per in-process
//! handle, whether *this* resolver session is the one holding the row —
//! the DB row is the cross-session mutex, the handle flag is the
//! in-process memory of having acquired it.

use rusqlite::OptionalExtension;
use tracing::instrument;

use crate::error::{WcError, WcResult};
use crate::relpath::RelPath;
use crate::store::Store;

/// One [`WcLock`] per open WCROOT store.
pub struct WcLock<'a> {
    store: &'a Store,
    wc_id: i64,
}

impl<'a> WcLock<'a> {
    pub fn new(store: &'a Store, wc_id: i64) -> Self {
        WcLock { store, wc_id }
    }

    /// Takes the lock at `relpath`. Fails with [`WcError::Locked`] if a row
    /// already exists there; does not recurse into descendants, matching
    /// `scan_deletion`'s subtree-root convention of naming one relpath per
    /// call.
    #[instrument(skip(self), fields(relpath = %relpath))]
    pub fn set(&self, relpath: &RelPath) -> WcResult<()> {
        let inserted = self
            .store
            .conn()
            .execute(
                "INSERT OR IGNORE INTO lock (wc_id, local_relpath) VALUES (?1, ?2)",
                rusqlite::params![self.wc_id, relpath.as_str()],
            )?;
        if inserted == 0 {
            return Err(WcError::Locked);
        }
        Ok(())
    }

    /// Whether `relpath` currently carries a lock row.
    #[instrument(skip(self), fields(relpath = %relpath))]
    pub fn check(&self, relpath: &RelPath) -> WcResult<bool> {
        Ok(self
            .store
            .conn()
            .query_row(
                "SELECT 1 FROM lock WHERE wc_id = ?1 AND local_relpath = ?2",
                rusqlite::params![self.wc_id, relpath.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some())
    }

    /// Releases the lock at `relpath`. Tolerates there being no row to
    /// remove, since a caller unwinding an error path may not know whether
    /// the lock was actually taken.
    #[instrument(skip(self), fields(relpath = %relpath))]
    pub fn remove(&self, relpath: &RelPath) -> WcResult<()> {
        self.store.conn().execute(
            "DELETE FROM lock WHERE wc_id = ?1 AND local_relpath = ?2",
            rusqlite::params![self.wc_id, relpath.as_str()],
        )?;
        Ok(())
    }
}
