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

//! The content-addressed pristine object store. One blob per distinct
//! base text, named by its checksum and shared across every node that
//! happens to carry that text.

use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{WcError, WcResult};
use crate::store::{Checksum, Store};

/// What [`Pristine::check`] is asked to confirm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckMode {
    RowOnly,
    FileOnly,
    Both,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
}

pub struct Pristine<'a> {
    store: &'a Store,
    admin_dir: PathBuf,
}

impl<'a> Pristine<'a> {
    pub fn new(store: &'a Store, admin_dir: PathBuf) -> Self {
        Pristine { store, admin_dir }
    }

    fn pristine_root(&self) -> PathBuf {
        self.admin_dir.join("pristine")
    }

    /// The on-disk path for `digest`, sharded by the first two hex chars so
    /// no directory accumulates more entries than a typical working copy
    /// has distinct file texts.
    fn path_for(&self, digest: &Checksum) -> PathBuf {
        let hex = digest.hex();
        let shard = &hex[..2.min(hex.len())];
        self.pristine_root().join(shard).join(hex)
    }

    pub fn tempdir(&self) -> WcResult<PathBuf> {
        let dir = self.admin_dir.join("tmp");
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn read(&self, digest: &Checksum) -> WcResult<File> {
        File::open(self.path_for(digest)).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                WcError::PathNotFound
            } else {
                err.into()
            }
        })
    }

    /// Atomically moves `temp_path` (which must lie under
    /// [`Pristine::tempdir`], so the rename is same-volume) into place as
    /// `digest`'s pristine file, then records its size. Tolerates `digest`
    /// already being installed: a rename landing on an existing file is not
    /// an error, and the row insert is a no-op via `INSERT OR IGNORE`.
    pub fn install(&self, temp_path: &Path, digest: &Checksum) -> WcResult<()> {
        let dest = self.path_for(digest);
        if let Some(shard_dir) = dest.parent() {
            fs::create_dir_all(shard_dir)?;
        }
        let size = fs::metadata(temp_path)?.len();
        match fs::rename(temp_path, &dest) {
            Ok(()) => {}
            Err(_) if dest.is_file() => {
                // Another install (or an earlier run of this one) already
                // landed the same content; drop our copy and proceed.
                let _ = fs::remove_file(temp_path);
            }
            Err(err) => return Err(err.into()),
        }

        self.store.conn().execute(
            "INSERT OR IGNORE INTO pristine (checksum, size) VALUES (?1, ?2)",
            rusqlite::params![digest.to_string(), size as i64],
        )?;
        Ok(())
    }

    pub fn check(&self, digest: &Checksum, mode: CheckMode) -> WcResult<Presence> {
        let row_present = matches!(mode, CheckMode::RowOnly | CheckMode::Both).then(|| {
            self.store.conn().query_row(
                "SELECT 1 FROM pristine WHERE checksum = ?1",
                [digest.to_string()],
                |_| Ok(()),
            )
        });
        let row_present = match row_present {
            Some(Ok(())) => true,
            Some(Err(rusqlite::Error::QueryReturnedNoRows)) => false,
            Some(Err(err)) => return Err(err.into()),
            None => true,
        };
        let file_present = match mode {
            CheckMode::FileOnly | CheckMode::Both => self.path_for(digest).is_file(),
            CheckMode::RowOnly => true,
        };
        Ok(if row_present && file_present {
            Presence::Present
        } else {
            Presence::Absent
        })
    }

    /// Deletes every pristine file with no remaining reference from any
    /// BASE or WORKING row. Run periodically, never inline with a single
    /// node mutation (which would make routine operations O(wcroot size)).
    pub fn collect_garbage(&self) -> WcResult<u64> {
        let referenced: Vec<String> = {
            let mut stmt = self.store.conn().prepare_cached(
                "SELECT checksum FROM base_node WHERE checksum IS NOT NULL
                 UNION
                 SELECT checksum FROM working_node WHERE checksum IS NOT NULL",
            )?;
            stmt.query_map([], |row| row.get(0))?
                .collect::<Result<_, _>>()?
        };
        let referenced: std::collections::HashSet<String> = referenced.into_iter().collect();

        let all: Vec<String> = {
            let mut stmt = self.store.conn().prepare_cached("SELECT checksum FROM pristine")?;
            stmt.query_map([], |row| row.get(0))?
                .collect::<Result<_, _>>()?
        };

        let mut removed = 0u64;
        for checksum in all {
            if referenced.contains(&checksum) {
                continue;
            }
            let digest: Checksum = checksum.parse()?;
            let path = self.path_for(&digest);
            if path.is_file() {
                fs::remove_file(&path)?;
            }
            self.store
                .conn()
                .execute("DELETE FROM pristine WHERE checksum = ?1", [checksum])?;
            removed += 1;
        }
        Ok(removed)
    }

    pub(crate) fn write_temp_file(&self, contents: &[u8]) -> WcResult<NamedTempFile> {
        let mut temp = NamedTempFile::new_in(self.tempdir()?)?;
        temp.write_all(contents)?;
        Ok(temp)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    use super::*;
    use crate::store::OpenMode;

    fn sha1_of(bytes: &[u8]) -> Checksum {
        use sha1::{Digest, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(bytes);
        Checksum::sha1(hex::encode(hasher.finalize())).unwrap()
    }

    #[test]
    fn install_then_read_round_trips_bytes() {
        let admin = tempdir().unwrap();
        let store = Store::create(&admin.path().join("wc.db")).unwrap();
        let pristine = Pristine::new(&store, admin.path().to_owned());

        let contents = b"hello pristine";
        let digest = sha1_of(contents);
        let temp = pristine.write_temp_file(contents).unwrap();
        pristine.install(temp.path(), &digest).unwrap();

        assert_eq!(pristine.check(&digest, CheckMode::Both).unwrap(), Presence::Present);
        let mut file = pristine.read(&digest).unwrap();
        let mut read_back = Vec::new();
        std::io::Read::read_to_end(&mut file, &mut read_back).unwrap();
        assert_eq!(read_back, contents);
    }

    #[test]
    fn install_is_idempotent_for_same_digest() {
        let admin = tempdir().unwrap();
        let store = Store::create(&admin.path().join("wc.db")).unwrap();
        let pristine = Pristine::new(&store, admin.path().to_owned());

        let contents = b"idempotent";
        let digest = sha1_of(contents);
        for _ in 0..2 {
            let temp = pristine.write_temp_file(contents).unwrap();
            pristine.install(temp.path(), &digest).unwrap();
        }
        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM pristine", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn read_missing_digest_is_path_not_found() {
        let admin = tempdir().unwrap();
        let store = Store::create(&admin.path().join("wc.db")).unwrap();
        let pristine = Pristine::new(&store, admin.path().to_owned());
        let digest = Checksum::sha1("0".repeat(40)).unwrap();
        assert_matches!(pristine.read(&digest), Err(WcError::PathNotFound));
    }

    #[test]
    fn garbage_collection_removes_unreferenced_blobs() {
        let admin = tempdir().unwrap();
        let store = Store::create(&admin.path().join("wc.db")).unwrap();
        let pristine = Pristine::new(&store, admin.path().to_owned());

        let digest = sha1_of(b"orphan");
        let temp = pristine.write_temp_file(b"orphan").unwrap();
        pristine.install(temp.path(), &digest).unwrap();

        let removed = pristine.collect_garbage().unwrap();
        assert_eq!(removed, 1);
        assert_eq!(pristine.check(&digest, CheckMode::Both).unwrap(), Presence::Absent);
    }
}
