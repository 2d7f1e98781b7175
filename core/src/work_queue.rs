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

//! The crash-safe cleanup queue. A caller that is about to perform an
//! on-disk side effect it cannot make atomic with the metadata update that
//! depends on it (a pristine-driven file write, a directory removal) first
//! queues the step here; a `CleanupRequired` error then forces every future
//! open of this WCROOT to run the queue to completion before anything else
//! can touch the store.
//!
//! Items are opaque [`WorkItem`] protobufs, FIFO by `id`: `add` appends,
//! `fetch` peeks the oldest pending item without removing it (so a crash
//! mid-replay just replays the same item again), `completed` removes it by
//! id once the caller has finished applying it.

use prost::Message;
use rusqlite::OptionalExtension;
use tracing::instrument;

use crate::error::WcResult;
use crate::protos::work_queue::WorkItem;
use crate::store::Store;

/// One [`WorkQueue`] per open WCROOT store. Unlike the node
/// tables, `work_queue` carries no `wc_id` column — there is exactly one
/// queue per `wc.db` file, matching the one-queue-per-administrative-area
/// design it's modeled on.
pub struct WorkQueue<'a> {
    store: &'a Store,
}

impl<'a> WorkQueue<'a> {
    pub fn new(store: &'a Store) -> Self {
        WorkQueue { store }
    }

    /// Appends `item` to the tail of the queue and returns its row id.
    #[instrument(skip(self, item))]
    pub fn add(&self, item: &WorkItem) -> WcResult<i64> {
        let encoded = item.encode_to_vec();
        self.store
            .conn()
            .execute("INSERT INTO work_queue (work) VALUES (?1)", [encoded])?;
        Ok(self.store.conn().last_insert_rowid())
    }

    /// Returns the oldest pending item, if any, without removing it.
    #[instrument(skip(self))]
    pub fn fetch(&self) -> WcResult<Option<(i64, WorkItem)>> {
        self.store
            .conn()
            .query_row(
                "SELECT id, work FROM work_queue ORDER BY id LIMIT 1",
                [],
                |row| {
                    let id: i64 = row.get(0)?;
                    let bytes: Vec<u8> = row.get(1)?;
                    Ok((id, bytes))
                },
            )
            .optional()?
            .map(|(id, bytes)| Ok((id, WorkItem::decode(bytes.as_slice())?)))
            .transpose()
    }

    /// Removes the item at `id`, once the caller has finished applying it.
    #[instrument(skip(self))]
    pub fn completed(&self, id: i64) -> WcResult<()> {
        self.store
            .conn()
            .execute("DELETE FROM work_queue WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Count of items still pending, the quantity `CleanupRequired` reports.
    #[instrument(skip(self))]
    pub fn pending_count(&self) -> WcResult<u64> {
        let count: i64 = self
            .store
            .conn()
            .query_row("SELECT COUNT(*) FROM work_queue", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
