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

//! The relational store wrapper. One [`Store`] owns one open connection to
//! one WCROOT's `wc.db`, and every other component reaches the database
//! only through it.

pub mod codec;
pub mod schema;

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::instrument;

use crate::error::{WcError, WcResult};

pub use codec::{escape_like_prefix, Checksum, PropertyMap, LIKE_ESCAPE_CHAR};

/// Whether a newly opened store is allowed to mutate the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    ReadWrite,
    ReadOnly,
}

pub struct Store {
    conn: Connection,
    abspath: PathBuf,
}

impl Store {
    /// Creates a brand-new `wc.db` at `path`, which must not already exist,
    /// and returns it positioned at schema version
    /// [`schema::CURRENT_SCHEMA_VERSION`].
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn create(path: &Path) -> WcResult<Store> {
        let conn = Connection::open(path)?;
        configure_connection(&conn)?;
        conn.execute_batch(schema::INIT_SCHEMA)?;
        conn.execute(
            "INSERT INTO schema_info (version) VALUES (?1)",
            [schema::CURRENT_SCHEMA_VERSION],
        )?;
        Ok(Store {
            conn,
            abspath: path.to_owned(),
        })
    }

    /// Opens an existing `wc.db`, applying upgrade scripts if `auto_upgrade`
    /// and the on-disk version is old, and failing with
    /// [`WcError::CleanupRequired`] if `enforce_empty_wq` and the work
    /// queue is non-empty.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn open(
        path: &Path,
        mode: OpenMode,
        auto_upgrade: bool,
        enforce_empty_wq: bool,
    ) -> WcResult<Store> {
        let conn = if mode == OpenMode::ReadOnly {
            Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?
        } else {
            Connection::open(path)?
        };
        configure_connection(&conn)?;

        let version: u32 = conn.query_row(
            "SELECT version FROM schema_info",
            [],
            |row| row.get::<_, i64>(0),
        ).map(|v| v as u32).map_err(|_| {
            WcError::CorruptStore("schema_info has no row".to_owned())
        })?;

        let version = if version > schema::CURRENT_SCHEMA_VERSION {
            return Err(WcError::UnsupportedFormat {
                found: version,
                min: schema::MIN_SUPPORTED_SCHEMA_VERSION,
                max: schema::CURRENT_SCHEMA_VERSION,
            });
        } else if version < schema::MIN_SUPPORTED_SCHEMA_VERSION {
            return Err(WcError::UnsupportedFormat {
                found: version,
                min: schema::MIN_SUPPORTED_SCHEMA_VERSION,
                max: schema::CURRENT_SCHEMA_VERSION,
            });
        } else if version < schema::CURRENT_SCHEMA_VERSION {
            if !auto_upgrade {
                return Err(WcError::UpgradeRequired {
                    found: version,
                    current: schema::CURRENT_SCHEMA_VERSION,
                });
            }
            run_upgrades(&conn, version)?
        } else {
            version
        };
        debug_assert_eq!(version, schema::CURRENT_SCHEMA_VERSION);

        if enforce_empty_wq {
            let pending: i64 =
                conn.query_row("SELECT COUNT(*) FROM work_queue", [], |row| row.get(0))?;
            if pending > 0 {
                return Err(WcError::CleanupRequired {
                    pending: pending as u64,
                });
            }
        }

        Ok(Store {
            conn,
            abspath: path.to_owned(),
        })
    }

    /// Closing is just dropping the connection; `rusqlite::Connection`'s
    /// `Drop` impl already tolerates being run more than once (e.g. via
    /// `Option::take` in a process pool's teardown path), so this is purely
    /// documentation of intent at call sites.
    pub fn close(self) {
        drop(self);
    }

    pub fn abspath(&self) -> &Path {
        &self.abspath
    }

    #[cfg(not(feature = "testing"))]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Raw connection access for integration tests that need to assert on
    /// rows no public accessor surfaces.
    #[cfg(feature = "testing")]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Runs `f` inside a transaction: commits if `f` returns `Ok`, rolls
    /// back on any `Err`.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction) -> WcResult<T>,
    ) -> WcResult<T> {
        let txn = self.conn.unchecked_transaction();
        let result = f(&txn);
        match result {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                // Rollback happens in Transaction::drop if we don't commit;
                // an explicit rollback here just surfaces its own failure
                // distinctly from the original error.
                drop(txn.rollback());
                Err(err)
            }
        }
    }
}

fn configure_connection(conn: &Connection) -> WcResult<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(())
}

fn run_upgrades(conn: &Connection, from_version: u32) -> WcResult<u32> {
    let mut version = from_version;
    while version < schema::CURRENT_SCHEMA_VERSION {
        let script = schema::UPGRADE_SCRIPTS[version as usize];
        conn.execute_batch("BEGIN;")?;
        let result = conn.execute_batch(script).and_then(|_| {
            conn.execute(
                "UPDATE schema_info SET version = ?1",
                [version + 1],
            )?;
            Ok(())
        });
        match result {
            Ok(()) => conn.execute_batch("COMMIT;")?,
            Err(err) => {
                conn.execute_batch("ROLLBACK;")?;
                return Err(err.into());
            }
        }
        version += 1;
    }
    Ok(version)
}
