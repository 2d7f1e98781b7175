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

use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::Once;

use tempfile::TempDir;
use wc_core::node::Depth;
use wc_core::path::Handle;
use wc_core::WorkingCopy;

static TRACING_INIT: Once = Once::new();

/// Installs a `tracing` subscriber driven by `RUST_LOG`, once per process.
/// Harmless to call more than once; every test fixture below calls it.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn new_temp_dir() -> TempDir {
    init_tracing();
    tempfile::Builder::new()
        .prefix("wc-core-test-")
        .tempdir()
        .unwrap()
}

/// A freshly initialized WCROOT at the default repository coordinates
/// (`http://example.invalid/repo`, uuid `"test-uuid"`, revision 0, checked
/// out at `repos_relpath` "trunk"), together with the temp directory that
/// owns its lifetime.
pub struct TestWc {
    pub dir: TempDir,
    pub working_copy: WorkingCopy,
    pub root: Rc<Handle>,
}

impl TestWc {
    pub fn init() -> Self {
        Self::init_with_repos("http://example.invalid/repo", "test-uuid", "trunk")
    }

    pub fn init_with_repos(root_url: &str, uuid: &str, repos_relpath: &str) -> Self {
        let dir = new_temp_dir();
        let working_copy = WorkingCopy::new();
        let root = working_copy
            .init(dir.path(), repos_relpath, root_url, uuid, 0, Depth::Infinity)
            .unwrap();
        TestWc {
            dir,
            working_copy,
            root,
        }
    }

    pub fn abspath(&self) -> &Path {
        self.dir.path()
    }

    /// Resolves `relpath` (relative to the WCROOT) to a fresh handle.
    pub fn open(&self, relpath: &str) -> Rc<Handle> {
        let abspath = self.abspath().join(relpath);
        self.working_copy
            .open(&abspath, wc_core::store::OpenMode::ReadWrite)
            .unwrap()
    }
}

/// Asserts every `.rs` file in `test_dir` other than `runner.rs` is declared
/// with a `mod <name>;` in `runner.rs`, so a new test file can't silently
/// fail to run because someone forgot to wire it in.
pub fn assert_no_forgotten_test_files(test_dir: &Path) {
    let runner_path = test_dir.join("runner.rs");
    let runner = fs::read_to_string(&runner_path).unwrap();
    let entries = fs::read_dir(test_dir).unwrap();
    for entry in entries {
        let path = entry.unwrap().path();
        if let Some(ext) = path.extension() {
            let name = path.file_stem().unwrap();
            if ext == "rs" && name != "runner" {
                let search = format!("mod {};", name.to_str().unwrap());
                assert!(
                    runner.contains(&search),
                    "missing `{search}` declaration in {}",
                    runner_path.display()
                );
            }
        }
    }
}
