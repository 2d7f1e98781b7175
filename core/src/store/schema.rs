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

//! The wc.db schema and its upgrade path.
//!
//! `CURRENT_SCHEMA_VERSION` is the newest format this binary understands.
//! `UPGRADE_SCRIPTS` holds one entry per version transition, indexed by the
//! *target* version (`UPGRADE_SCRIPTS[i]` upgrades from `i` to `i + 1`); a
//! store opened with auto-upgrade enabled runs every script from the
//! on-disk version up to `CURRENT_SCHEMA_VERSION`, each in its own
//! transaction.

pub const CURRENT_SCHEMA_VERSION: u32 = 1;
pub const MIN_SUPPORTED_SCHEMA_VERSION: u32 = 1;

/// Schemas below this were never shipped; anything found in the wild older
/// than `MIN_SUPPORTED_SCHEMA_VERSION` is unsupported-format, not
/// upgrade-required.
pub const UPGRADE_SCRIPTS: &[&str] = &[];

pub const INIT_SCHEMA: &str = r#"
CREATE TABLE schema_info (
    version INTEGER NOT NULL
);

CREATE TABLE wcroot (
    id INTEGER PRIMARY KEY,
    local_abspath TEXT NOT NULL
);

-- Interned (root-url, uuid) pairs. Sparse per-node storage references this
-- by repos_id rather than repeating the URL/UUID on every row.
CREATE TABLE repository (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    root TEXT NOT NULL,
    uuid TEXT NOT NULL,
    UNIQUE (root, uuid)
);

CREATE TABLE base_node (
    wc_id INTEGER NOT NULL REFERENCES wcroot (id),
    local_relpath TEXT NOT NULL,
    parent_relpath TEXT,
    presence TEXT NOT NULL,
    kind TEXT NOT NULL,
    repos_id INTEGER REFERENCES repository (id),
    repos_relpath TEXT,
    revision INTEGER,
    changed_rev INTEGER,
    changed_date INTEGER,
    changed_author TEXT,
    depth TEXT,
    checksum TEXT,
    translated_size INTEGER,
    symlink_target TEXT,
    properties BLOB,
    lock_token TEXT,
    lock_owner TEXT,
    lock_comment TEXT,
    lock_date INTEGER,
    dav_cache BLOB,
    last_mod_time INTEGER,
    PRIMARY KEY (wc_id, local_relpath),
    CHECK ((repos_id IS NULL) = (repos_relpath IS NULL))
);
CREATE INDEX base_node_parent ON base_node (wc_id, parent_relpath);

CREATE TABLE working_node (
    wc_id INTEGER NOT NULL REFERENCES wcroot (id),
    local_relpath TEXT NOT NULL,
    parent_relpath TEXT,
    presence TEXT NOT NULL,
    kind TEXT NOT NULL,
    changed_rev INTEGER,
    changed_date INTEGER,
    changed_author TEXT,
    depth TEXT,
    checksum TEXT,
    translated_size INTEGER,
    symlink_target TEXT,
    properties BLOB,
    copyfrom_repos_id INTEGER REFERENCES repository (id),
    copyfrom_relpath TEXT,
    copyfrom_rev INTEGER,
    moved_here INTEGER NOT NULL DEFAULT 0,
    moved_to TEXT,
    PRIMARY KEY (wc_id, local_relpath),
    CHECK ((copyfrom_repos_id IS NULL) = (copyfrom_relpath IS NULL))
);
CREATE INDEX working_node_parent ON working_node (wc_id, parent_relpath);

CREATE TABLE actual_node (
    wc_id INTEGER NOT NULL REFERENCES wcroot (id),
    local_relpath TEXT NOT NULL,
    parent_relpath TEXT,
    properties BLOB,
    conflict_old BLOB,
    conflict_new BLOB,
    conflict_working BLOB,
    prop_reject BLOB,
    tree_conflict_data BLOB,
    changelist TEXT,
    PRIMARY KEY (wc_id, local_relpath)
);
CREATE INDEX actual_node_parent ON actual_node (wc_id, parent_relpath);
CREATE INDEX actual_node_changelist ON actual_node (wc_id, changelist)
    WHERE changelist IS NOT NULL;

CREATE TABLE pristine (
    checksum TEXT NOT NULL,
    size INTEGER NOT NULL,
    PRIMARY KEY (checksum)
);

CREATE TABLE lock (
    wc_id INTEGER NOT NULL REFERENCES wcroot (id),
    local_relpath TEXT NOT NULL,
    PRIMARY KEY (wc_id, local_relpath)
);

CREATE TABLE work_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    work BLOB NOT NULL
);
"#;
