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

use std::path::PathBuf;

use thiserror::Error;

/// Every kind of failure the store can report to a caller.
#[derive(Error, Debug)]
pub enum WcError {
    #[error("no node exists at this path")]
    PathNotFound,

    #[error("not a working copy: ascended to the filesystem root without finding a store")]
    NotAWorkingCopy,

    #[error("store format {found} is unsupported (supported range is {min}..={max})")]
    UnsupportedFormat { found: u32, min: u32, max: u32 },

    #[error("store format {found} is older than {current} and auto-upgrade is disabled")]
    UpgradeRequired { found: u32, current: u32 },

    #[error("working copy has {pending} pending work queue item(s); run cleanup first")]
    CleanupRequired { pending: u64 },

    #[error("store invariant violated: {0}")]
    CorruptStore(String),

    #[error("the working copy is locked")]
    Locked,

    #[error("scanner invariant violated: {0}")]
    UnexpectedStatus(String),

    #[error("unsupported checksum kind {0:?}")]
    BadChecksumKind(String),

    #[error("checksum text {0:?} could not be parsed")]
    CorruptChecksum(String),

    #[error("store I/O error: {0}")]
    StoreIo(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protobuf decode error: {0}")]
    ProtoDecode(#[from] prost::DecodeError),

    #[error("{context} ({path}): {source}")]
    Context {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: Box<WcError>,
    },
}

pub type WcResult<T> = Result<T, WcError>;

impl WcError {
    /// Wraps `self` with the operation and path that failed, annotating a
    /// low-level error with the call site before it reaches the caller.
    pub fn with_context(self, context: &'static str, path: impl Into<PathBuf>) -> WcError {
        WcError::Context {
            context,
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// `true` for errors callers routinely recover from as a legitimate
    /// result of an optional query (e.g. `read_info` on an unversioned
    /// path).
    pub fn is_path_not_found(&self) -> bool {
        matches!(self, WcError::PathNotFound)
    }
}

/// Lets a collaborator wrapping a core call annotate a failure with the
/// operation and path it was trying, without matching on `WcError` first.
pub trait ResultExt<T> {
    fn context(self, context: &'static str, path: impl Into<PathBuf>) -> WcResult<T>;
}

impl<T> ResultExt<T> for WcResult<T> {
    fn context(self, context: &'static str, path: impl Into<PathBuf>) -> WcResult<T> {
        self.map_err(|err| err.with_context(context, path))
    }
}
