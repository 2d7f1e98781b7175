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

//! Binding codecs for the two non-primitive column types every layer
//! carries: property maps and content checksums.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::error::WcError;

/// The character reserved for escaping `%`/`_`/itself in `LIKE` prefix
/// queries (the relocate/prefix-match contract). Chosen to be a byte that
/// can never appear in a `RelPath` component already reserved by `/`.
pub const LIKE_ESCAPE_CHAR: char = '\\';

/// Escapes `%`, `_`, and the escape character itself so that `path` matches
/// only literally when used as a `LIKE 'path%' ESCAPE '\'` prefix.
pub fn escape_like_prefix(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '%' || c == '_' || c == LIKE_ESCAPE_CHAR {
            escaped.push(LIKE_ESCAPE_CHAR);
        }
        escaped.push(c);
    }
    escaped
}

/// A property map: name -> byte-string value. Serialized as a sequence of
/// (u32 name-len, name bytes, u32 value-len, value bytes) records so that a
/// zero-length value round-trips as present-but-empty, distinct from the
/// whole blob being absent (NULL).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertyMap(BTreeMap<String, Vec<u8>>);

impl PropertyMap {
    pub fn new() -> Self {
        PropertyMap(BTreeMap::new())
    }

    pub fn from_map(map: BTreeMap<String, Vec<u8>>) -> Self {
        PropertyMap(map)
    }

    pub fn into_map(self) -> BTreeMap<String, Vec<u8>> {
        self.0
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for (name, value) in &self.0 {
            buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
            buf.extend_from_slice(value);
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WcError> {
        let mut map = BTreeMap::new();
        let mut pos = 0usize;
        let corrupt = || WcError::CorruptStore("malformed property blob".to_owned());
        while pos < bytes.len() {
            let name_len = read_u32(bytes, &mut pos).ok_or_else(corrupt)? as usize;
            let name = read_bytes(bytes, &mut pos, name_len).ok_or_else(corrupt)?;
            let name = String::from_utf8(name.to_vec()).map_err(|_| corrupt())?;
            let value_len = read_u32(bytes, &mut pos).ok_or_else(corrupt)? as usize;
            let value = read_bytes(bytes, &mut pos, value_len).ok_or_else(corrupt)?;
            map.insert(name, value.to_vec());
        }
        Ok(PropertyMap(map))
    }
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Option<u32> {
    let slice = bytes.get(*pos..*pos + 4)?;
    *pos += 4;
    Some(u32::from_le_bytes(slice.try_into().ok()?))
}

fn read_bytes<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> Option<&'a [u8]> {
    let slice = bytes.get(*pos..*pos + len)?;
    *pos += len;
    Some(slice)
}

impl ToSql for PropertyMap {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.encode()))
    }
}

impl FromSql for PropertyMap {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let bytes = value.as_blob()?;
        PropertyMap::decode(bytes).map_err(|err| FromSqlError::Other(Box::new(err)))
    }
}

/// A content digest, stored as `"{kind}:{hex}"` text (e.g. `sha1:da39a3ee...`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checksum {
    kind: String,
    hex: String,
}

impl Checksum {
    pub fn new(kind: impl Into<String>, hex: impl Into<String>) -> Result<Self, WcError> {
        let kind = kind.into();
        let hex = hex.into();
        if kind != "sha1" {
            return Err(WcError::BadChecksumKind(kind));
        }
        if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(WcError::CorruptChecksum(format!("{kind}:{hex}")));
        }
        Ok(Checksum { kind, hex })
    }

    pub fn sha1(hex: impl Into<String>) -> Result<Self, WcError> {
        Checksum::new("sha1", hex)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.hex)
    }
}

impl FromStr for Checksum {
    type Err = WcError;

    fn from_str(text: &str) -> Result<Self, WcError> {
        let (kind, hex) = text
            .split_once(':')
            .ok_or_else(|| WcError::CorruptChecksum(text.to_owned()))?;
        Checksum::new(kind, hex)
    }
}

impl ToSql for Checksum {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for Checksum {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse().map_err(|err| FromSqlError::Other(Box::new(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_round_trip_including_empty_value() {
        let mut map = BTreeMap::new();
        map.insert("svn:mime-type".to_owned(), b"text/plain".to_vec());
        map.insert("empty".to_owned(), Vec::new());
        let props = PropertyMap::from_map(map);
        let decoded = PropertyMap::decode(&props.encode()).unwrap();
        assert_eq!(props, decoded);
        assert_eq!(decoded.get("empty"), Some(&b""[..]));
        assert_eq!(decoded.get("missing"), None);
    }

    #[test]
    fn checksum_round_trip() {
        let sum = Checksum::sha1("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        assert_eq!(sum.to_string(), "sha1:da39a3ee5e6b4b0d3255bfef95601890afd80709");
        let parsed: Checksum = sum.to_string().parse().unwrap();
        assert_eq!(sum, parsed);
    }

    #[test]
    fn checksum_rejects_bad_kind_and_bad_hex() {
        assert!(Checksum::new("md5", "da39a3ee5e6b4b0d3255bfef95601890afd80709").is_err());
        assert!(Checksum::sha1("not-hex").is_err());
    }

    #[test]
    fn decoded_property_map_iterates_in_sorted_name_order() {
        let mut map = BTreeMap::new();
        map.insert("svn:mime-type".to_owned(), b"text/plain".to_vec());
        map.insert("svn:eol-style".to_owned(), b"native".to_vec());
        let props = PropertyMap::from_map(map);
        let decoded = PropertyMap::decode(&props.encode()).unwrap();
        let rendered = decoded
            .into_map()
            .into_iter()
            .map(|(name, value)| format!("{name}={}", String::from_utf8_lossy(&value)))
            .collect::<Vec<_>>()
            .join("\n");
        insta::assert_snapshot!(rendered, @r###"
        svn:eol-style=native
        svn:mime-type=text/plain
        "###);
    }

    #[test]
    fn like_escaping_is_literal() {
        assert_eq!(escape_like_prefix("100%_done"), r"100\%\_done");
        assert_eq!(escape_like_prefix(r"a\b"), r"a\\b");
    }
}
