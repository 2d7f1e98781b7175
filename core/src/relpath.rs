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

//! Paths relative to a WCROOT, stored as the `local_relpath` primary-key
//! component of every node row.
//!
//! Unlike a filesystem `Path`, a [`RelPath`] always uses `/` as the
//! separator (so it is stable across platforms and usable directly as a
//! SQLite TEXT key) and normalizes to `""` for the WCROOT itself, never a
//! leading or trailing slash.

use std::cmp::Ordering;
use std::fmt;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RelPath {
    value: String,
}

impl RelPath {
    pub fn root() -> Self {
        RelPath {
            value: String::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.value.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Splits into (parent, basename); `None` for the root.
    pub fn split(&self) -> Option<(RelPath, &str)> {
        if self.is_root() {
            return None;
        }
        match self.value.rfind('/') {
            Some(i) => Some((
                RelPath {
                    value: self.value[..i].to_owned(),
                },
                &self.value[i + 1..],
            )),
            None => Some((RelPath::root(), &self.value[..])),
        }
    }

    pub fn basename(&self) -> Option<&str> {
        self.split().map(|(_, basename)| basename)
    }

    pub fn parent(&self) -> Option<RelPath> {
        self.split().map(|(parent, _)| parent)
    }

    pub fn join(&self, component: &str) -> RelPath {
        assert!(!component.is_empty() && !component.contains('/'));
        if self.is_root() {
            RelPath {
                value: component.to_owned(),
            }
        } else {
            RelPath {
                value: format!("{}/{}", self.value, component),
            }
        }
    }

    /// True if `self` is `other` or an ancestor of `other`.
    pub fn contains(&self, other: &RelPath) -> bool {
        if self.is_root() {
            return true;
        }
        other.value == self.value
            || other
                .value
                .strip_prefix(&self.value)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Components from root to this path, in order.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.value.split('/').filter(|s| !s.is_empty())
    }

    pub fn ancestors(&self) -> RelPathAncestors {
        RelPathAncestors {
            current: Some(self.clone()),
        }
    }
}

impl From<&str> for RelPath {
    fn from(value: &str) -> Self {
        assert!(!value.starts_with('/') && !value.ends_with('/'), "{value}");
        RelPath {
            value: value.to_owned(),
        }
    }
}

impl From<String> for RelPath {
    fn from(value: String) -> Self {
        RelPath::from(value.as_str())
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl fmt::Debug for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelPath({:?})", self.value)
    }
}

impl PartialOrd for RelPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RelPath {
    // Component-wise, so that a directory always sorts immediately before
    // its children regardless of what comes lexicographically between the
    // directory's basename and `/` (e.g. "dir" < "dir/sub" < "dir0").
    fn cmp(&self, other: &Self) -> Ordering {
        self.components().cmp(other.components())
    }
}

/// Yields `self`, then each ancestor up to (and including) the root, nearest
/// first — the order an upward parent walk visits them in.
pub struct RelPathAncestors {
    current: Option<RelPath>,
}

impl Iterator for RelPathAncestors {
    type Item = RelPath;

    fn next(&mut self) -> Option<RelPath> {
        let current = self.current.take()?;
        self.current = current.parent();
        Some(current)
    }
}
