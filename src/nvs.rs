//! NVS (non-volatile storage) key-value store: one file per namespace under
//! a host directory, holding a sequence of `{key_len, key, value_len, value}`
//! records, matching `examples/original_source/src/emu_nvs.c`'s on-disk
//! format and the typed accessor family in `SPEC_FULL.md` §3/§6.
//!
//! Durability is commit-driven rather than close-driven: `close` without a
//! preceding `commit` discards pending writes (`SPEC_FULL.md` §8 scenario 8).
//! This is a deliberate divergence from the original C, which also persists
//! on close if the namespace is dirty — see `DESIGN.md`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::SessionError;

const MAX_HANDLES: usize = 16;
const MAX_ENTRIES_PER_NAMESPACE: usize = 128;

/// A value stored under one key: either a fixed-width integer, a string, or
/// an opaque blob, matching the original's macro-generated typed API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Str(String),
    Blob(Vec<u8>),
}

impl Value {
    fn tag(&self) -> u8 {
        match self {
            Self::I8(_) => 0,
            Self::U8(_) => 1,
            Self::I16(_) => 2,
            Self::U16(_) => 3,
            Self::I32(_) => 4,
            Self::U32(_) => 5,
            Self::I64(_) => 6,
            Self::U64(_) => 7,
            Self::Str(_) => 8,
            Self::Blob(_) => 9,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.tag()];
        match self {
            Self::I8(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U8(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Str(v) => out.extend_from_slice(v.as_bytes()),
            Self::Blob(v) => out.extend_from_slice(v),
        }
        out
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let (&tag, rest) = bytes.split_first()?;
        Some(match tag {
            0 => Self::I8(i8::from_le_bytes(rest.try_into().ok()?)),
            1 => Self::U8(u8::from_le_bytes(rest.try_into().ok()?)),
            2 => Self::I16(i16::from_le_bytes(rest.try_into().ok()?)),
            3 => Self::U16(u16::from_le_bytes(rest.try_into().ok()?)),
            4 => Self::I32(i32::from_le_bytes(rest.try_into().ok()?)),
            5 => Self::U32(u32::from_le_bytes(rest.try_into().ok()?)),
            6 => Self::I64(i64::from_le_bytes(rest.try_into().ok()?)),
            7 => Self::U64(u64::from_le_bytes(rest.try_into().ok()?)),
            8 => Self::Str(String::from_utf8(rest.to_vec()).ok()?),
            9 => Self::Blob(rest.to_vec()),
            _ => return None,
        })
    }
}

/// Default NVS directory: `~/.cyd-emulator/nvs`, used when `Config::nvs_dir`
/// is unset.
#[must_use]
pub fn default_nvs_dir() -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/tmp"));
    home.join(".cyd-emulator").join("nvs")
}

fn namespace_path(dir: &Path, namespace: &str) -> PathBuf {
    dir.join(format!("{namespace}.nvs"))
}

/// A single open namespace: the in-memory record set plus a dirty flag
/// tracking uncommitted writes.
struct Namespace {
    path: PathBuf,
    entries: HashMap<String, Value>,
    dirty: bool,
}

impl Namespace {
    fn load(dir: &Path, name: &str) -> std::io::Result<Self> {
        let path = namespace_path(dir, name);
        let entries = match std::fs::read(&path) {
            Ok(bytes) => parse_records(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e),
        };
        Ok(Self { path, entries, dirty: false })
    }

    fn save(&mut self) -> std::io::Result<()> {
        let mut bytes = Vec::new();
        for (key, value) in &self.entries {
            let encoded = value.encode();
            bytes.push(key.len() as u8);
            bytes.extend_from_slice(key.as_bytes());
            bytes.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&encoded);
        }
        std::fs::write(&self.path, bytes)?;
        self.dirty = false;
        Ok(())
    }
}

fn parse_records(bytes: &[u8]) -> HashMap<String, Value> {
    let mut out = HashMap::new();
    let mut cursor = 0usize;
    while cursor < bytes.len() {
        let Some(&key_len) = bytes.get(cursor) else { break };
        cursor += 1;
        let Some(key_bytes) = bytes.get(cursor..cursor + key_len as usize) else { break };
        cursor += key_len as usize;
        let Some(len_bytes) = bytes.get(cursor..cursor + 4) else { break };
        let value_len = u32::from_le_bytes(len_bytes.try_into().expect("4-byte slice")) as usize;
        cursor += 4;
        let Some(value_bytes) = bytes.get(cursor..cursor + value_len) else { break };
        cursor += value_len;
        if let (Ok(key), Some(value)) = (std::str::from_utf8(key_bytes), Value::decode(value_bytes)) {
            out.insert(key.to_string(), value);
        }
    }
    out
}

/// The NVS store: a small handle table over open namespaces, all rooted at
/// one host directory.
pub struct Nvs {
    dir: PathBuf,
    handles: Vec<Option<Namespace>>,
}

impl Nvs {
    /// Opens (creating if necessary) the NVS directory.
    pub fn new(dir: PathBuf) -> Result<Self, SessionError> {
        std::fs::create_dir_all(&dir).map_err(|source| SessionError::NvsDirIo { path: dir.clone(), source })?;
        Ok(Self { dir, handles: Vec::new() })
    }

    /// Opens a namespace, returning a 1-based handle (matching the
    /// original's handle numbering).
    pub fn open(&mut self, namespace: &str) -> Result<u32, SessionError> {
        let ns = Namespace::load(&self.dir, namespace)
            .map_err(|source| SessionError::NvsDirIo { path: self.dir.clone(), source })?;
        if let Some((i, slot)) = self.handles.iter_mut().enumerate().find(|(_, s)| s.is_none()) {
            *slot = Some(ns);
            return Ok((i + 1) as u32);
        }
        if self.handles.len() >= MAX_HANDLES {
            return Err(SessionError::NvsDirIo {
                path: self.dir.clone(),
                source: std::io::Error::other("NVS handle table full"),
            });
        }
        self.handles.push(Some(ns));
        Ok(self.handles.len() as u32)
    }

    fn namespace_mut(&mut self, handle: u32) -> Option<&mut Namespace> {
        if handle == 0 {
            return None;
        }
        self.handles.get_mut(handle as usize - 1).and_then(|s| s.as_mut())
    }

    pub fn set(&mut self, handle: u32, key: &str, value: Value) -> Option<()> {
        let ns = self.namespace_mut(handle)?;
        if ns.entries.len() >= MAX_ENTRIES_PER_NAMESPACE && !ns.entries.contains_key(key) {
            return None;
        }
        ns.entries.insert(key.to_string(), value);
        ns.dirty = true;
        Some(())
    }

    #[must_use]
    pub fn get(&self, handle: u32, key: &str) -> Option<&Value> {
        let ns = self.handles.get(handle as usize - 1)?.as_ref()?;
        ns.entries.get(key)
    }

    /// Erases a key. Matches the original's swap-with-last removal (order
    /// is not preserved across the underlying map regardless).
    pub fn erase(&mut self, handle: u32, key: &str) -> Option<()> {
        let ns = self.namespace_mut(handle)?;
        ns.entries.remove(key)?;
        ns.dirty = true;
        Some(())
    }

    /// Rewrites the namespace file from the current in-memory entries.
    /// Until this is called, writes since the last commit are not durable
    /// across `close`/reopen (`SPEC_FULL.md` §8 scenario 8).
    pub fn commit(&mut self, handle: u32) -> Result<(), SessionError> {
        let dir = self.dir.clone();
        let ns = self.namespace_mut(handle).ok_or_else(|| SessionError::NvsDirIo {
            path: dir.clone(),
            source: std::io::Error::other("invalid NVS handle"),
        })?;
        ns.save().map_err(|source| SessionError::NvsDirIo { path: dir, source })
    }

    /// Closes the handle. Uncommitted writes are discarded — this is the
    /// point where this implementation diverges from the original, which
    /// also flushes a dirty namespace on close.
    pub fn close(&mut self, handle: u32) {
        if handle == 0 {
            return;
        }
        if let Some(slot) = self.handles.get_mut(handle as usize - 1) {
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_close_without_commit_is_not_durable() {
        let dir = tempfile::tempdir().unwrap();
        let mut nvs = Nvs::new(dir.path().to_path_buf()).unwrap();
        let h = nvs.open("cfg").unwrap();
        nvs.set(h, "k", Value::U32(7));
        nvs.close(h);

        let h2 = nvs.open("cfg").unwrap();
        assert_eq!(nvs.get(h2, "k"), None);
    }

    #[test]
    fn test_scenario_commit_then_close_is_durable() {
        let dir = tempfile::tempdir().unwrap();
        let mut nvs = Nvs::new(dir.path().to_path_buf()).unwrap();
        let h = nvs.open("cfg").unwrap();
        nvs.set(h, "k", Value::U32(7));
        nvs.commit(h).unwrap();
        nvs.close(h);

        let h2 = nvs.open("cfg").unwrap();
        assert_eq!(nvs.get(h2, "k"), Some(&Value::U32(7)));
    }

    #[test]
    fn test_erase_removes_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut nvs = Nvs::new(dir.path().to_path_buf()).unwrap();
        let h = nvs.open("cfg").unwrap();
        nvs.set(h, "k", Value::Str("hello".to_string()));
        nvs.erase(h, "k");
        assert_eq!(nvs.get(h, "k"), None);
    }

    #[test]
    fn test_blob_roundtrip_through_commit() {
        let dir = tempfile::tempdir().unwrap();
        let mut nvs = Nvs::new(dir.path().to_path_buf()).unwrap();
        let h = nvs.open("blobs").unwrap();
        nvs.set(h, "payload", Value::Blob(vec![1, 2, 3, 4]));
        nvs.commit(h).unwrap();
        nvs.close(h);

        let h2 = nvs.open("blobs").unwrap();
        assert_eq!(nvs.get(h2, "payload"), Some(&Value::Blob(vec![1, 2, 3, 4])));
    }

    #[test]
    fn test_namespaces_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let mut nvs = Nvs::new(dir.path().to_path_buf()).unwrap();
        let a = nvs.open("a").unwrap();
        let b = nvs.open("b").unwrap();
        nvs.set(a, "k", Value::I32(1));
        nvs.set(b, "k", Value::I32(2));
        assert_eq!(nvs.get(a, "k"), Some(&Value::I32(1)));
        assert_eq!(nvs.get(b, "k"), Some(&Value::I32(2)));
    }
}
