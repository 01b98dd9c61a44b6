//! In-memory directory index (ambient, §9 Design Notes): an arena of
//! [`Entry`] records keyed by 64-bit UIDs. Parent links and child lists are
//! UIDs, never owning pointers, so the parent/child cycle that a directory
//! tree naturally has never needs `Rc`/`Weak` or unsafe aliasing -- any
//! traversal is a lookup back into the arena. Mutation is serialized by the
//! same [`crate::lock::IndexLock`] the filesystem trait (`fs.rs`) uses to
//! take read/write locks around whole operations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use ltfs_api_types::Extent;

use crate::error::CoreError;
use crate::lock::IndexLock;

pub type Uid = u64;

pub const ROOT_UID: Uid = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Regular,
    Symlink,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub uid: Uid,
    pub name: String,
    pub parent: Option<Uid>,
    pub children: Vec<Uid>,
    pub kind: EntryKind,
    pub mode: u32,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub extents: Vec<Extent>,
    pub xattrs: HashMap<String, Vec<u8>>,
    pub symlink_target: Option<String>,
    pub read_only: bool,
}

impl Entry {
    fn new(uid: Uid, name: String, parent: Option<Uid>, kind: EntryKind, mode: u32, now: i64) -> Self {
        Self {
            uid,
            name,
            parent,
            children: Vec::new(),
            kind,
            mode,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
            extents: Vec::new(),
            xattrs: HashMap::new(),
            symlink_target: None,
            read_only: false,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

struct Arena {
    entries: HashMap<Uid, Entry>,
    next_uid: AtomicU64,
}

/// The directory tree plus its locking discipline. `fs.rs` wraps one of
/// these per mounted volume.
pub struct Index {
    pub lock: IndexLock,
    arena: Mutex<Arena>,
}

impl Default for Index {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Index {
    /// A fresh index with just the root directory, as written by `format`.
    pub fn new(now: i64) -> Self {
        let mut entries = HashMap::new();
        entries.insert(ROOT_UID, Entry::new(ROOT_UID, String::new(), None, EntryKind::Directory, 0o755, now));
        Self {
            lock: IndexLock::new(),
            arena: Mutex::new(Arena {
                entries,
                next_uid: AtomicU64::new(ROOT_UID + 1),
            }),
        }
    }

    fn alloc_uid(&self) -> Uid {
        let arena = self.arena.lock().unwrap();
        arena.next_uid.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, uid: Uid) -> Option<Entry> {
        self.arena.lock().unwrap().entries.get(&uid).cloned()
    }

    pub fn child_named(&self, parent: Uid, name: &str) -> Option<Uid> {
        let arena = self.arena.lock().unwrap();
        let parent_entry = arena.entries.get(&parent)?;
        parent_entry
            .children
            .iter()
            .copied()
            .find(|child| arena.entries.get(child).map(|e| e.name.as_str()) == Some(name))
    }

    /// Resolve a `/`-separated absolute path to a UID.
    pub fn resolve(&self, path: &str) -> Result<Uid, CoreError> {
        let mut current = ROOT_UID;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = self
                .child_named(current, component)
                .ok_or_else(|| CoreError::NotFound(path.to_string()))?;
        }
        Ok(current)
    }

    pub fn parent_of(&self, path: &str) -> Result<(Uid, String), CoreError> {
        let (parent_path, name) = match path.trim_end_matches('/').rsplit_once('/') {
            Some((parent, name)) => (parent, name),
            None => ("", path),
        };
        let parent = self.resolve(parent_path)?;
        Ok((parent, name.to_string()))
    }

    pub fn create(
        &self,
        parent: Uid,
        name: &str,
        kind: EntryKind,
        mode: u32,
        now: i64,
    ) -> Result<Uid, CoreError> {
        let uid = self.alloc_uid();
        let mut arena = self.arena.lock().unwrap();
        {
            let parent_entry = arena
                .entries
                .get(&parent)
                .ok_or_else(|| CoreError::NotFound(parent.to_string()))?;
            if !parent_entry.is_dir() {
                return Err(CoreError::NotADirectory(parent.to_string()));
            }
            if parent_entry.children.iter().any(|c| {
                arena.entries.get(c).map(|e| e.name.as_str()) == Some(name)
            }) {
                return Err(CoreError::AlreadyExists(name.to_string()));
            }
        }
        arena
            .entries
            .insert(uid, Entry::new(uid, name.to_string(), Some(parent), kind, mode, now));
        arena.entries.get_mut(&parent).unwrap().children.push(uid);
        Ok(uid)
    }

    pub fn remove(&self, parent: Uid, name: &str) -> Result<Uid, CoreError> {
        let mut arena = self.arena.lock().unwrap();
        let uid = {
            let parent_entry = arena
                .entries
                .get(&parent)
                .ok_or_else(|| CoreError::NotFound(parent.to_string()))?;
            parent_entry
                .children
                .iter()
                .copied()
                .find(|c| arena.entries.get(c).map(|e| e.name.as_str()) == Some(name))
                .ok_or_else(|| CoreError::NotFound(name.to_string()))?
        };
        if let Some(entry) = arena.entries.get(&uid) {
            if entry.is_dir() && !entry.children.is_empty() {
                return Err(CoreError::DirectoryNotEmpty(name.to_string()));
            }
        }
        arena.entries.remove(&uid);
        arena
            .entries
            .get_mut(&parent)
            .unwrap()
            .children
            .retain(|c| *c != uid);
        Ok(uid)
    }

    pub fn readdir(&self, dir: Uid) -> Result<Vec<(String, Uid)>, CoreError> {
        let arena = self.arena.lock().unwrap();
        let entry = arena
            .entries
            .get(&dir)
            .ok_or_else(|| CoreError::NotFound(dir.to_string()))?;
        if !entry.is_dir() {
            return Err(CoreError::NotADirectory(dir.to_string()));
        }
        Ok(entry
            .children
            .iter()
            .filter_map(|c| arena.entries.get(c).map(|e| (e.name.clone(), e.uid)))
            .collect())
    }

    pub fn rename(
        &self,
        old_parent: Uid,
        old_name: &str,
        new_parent: Uid,
        new_name: &str,
    ) -> Result<(), CoreError> {
        let mut arena = self.arena.lock().unwrap();
        let uid = {
            let parent_entry = arena
                .entries
                .get(&old_parent)
                .ok_or_else(|| CoreError::NotFound(old_parent.to_string()))?;
            parent_entry
                .children
                .iter()
                .copied()
                .find(|c| arena.entries.get(c).map(|e| e.name.as_str()) == Some(old_name))
                .ok_or_else(|| CoreError::NotFound(old_name.to_string()))?
        };
        if !arena.entries.contains_key(&new_parent) {
            return Err(CoreError::NotFound(new_parent.to_string()));
        }
        arena
            .entries
            .get_mut(&old_parent)
            .unwrap()
            .children
            .retain(|c| *c != uid);
        arena
            .entries
            .get_mut(&new_parent)
            .unwrap()
            .children
            .push(uid);
        let entry = arena.entries.get_mut(&uid).unwrap();
        entry.parent = Some(new_parent);
        entry.name = new_name.to_string();
        Ok(())
    }

    pub fn mutate<R>(&self, uid: Uid, f: impl FnOnce(&mut Entry) -> R) -> Result<R, CoreError> {
        let mut arena = self.arena.lock().unwrap();
        let entry = arena
            .entries
            .get_mut(&uid)
            .ok_or_else(|| CoreError::NotFound(uid.to_string()))?;
        Ok(f(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_resolve_round_trips() {
        let index = Index::new(0);
        let dir = index.create(ROOT_UID, "d", EntryKind::Directory, 0o755, 0).unwrap();
        let file = index.create(dir, "f.txt", EntryKind::Regular, 0o644, 0).unwrap();
        assert_eq!(index.resolve("/d/f.txt").unwrap(), file);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let index = Index::new(0);
        index.create(ROOT_UID, "a", EntryKind::Regular, 0o644, 0).unwrap();
        assert!(matches!(
            index.create(ROOT_UID, "a", EntryKind::Regular, 0o644, 0),
            Err(CoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn rmdir_requires_empty_directory() {
        let index = Index::new(0);
        let dir = index.create(ROOT_UID, "d", EntryKind::Directory, 0o755, 0).unwrap();
        index.create(dir, "f", EntryKind::Regular, 0o644, 0).unwrap();
        assert!(matches!(
            index.remove(ROOT_UID, "d"),
            Err(CoreError::DirectoryNotEmpty(_))
        ));
    }

    #[test]
    fn rename_moves_entry_between_directories() {
        let index = Index::new(0);
        let a = index.create(ROOT_UID, "a", EntryKind::Directory, 0o755, 0).unwrap();
        let b = index.create(ROOT_UID, "b", EntryKind::Directory, 0o755, 0).unwrap();
        index.create(a, "f", EntryKind::Regular, 0o644, 0).unwrap();
        index.rename(a, "f", b, "g").unwrap();
        assert!(index.resolve("/a/f").is_err());
        assert_eq!(index.resolve("/b/g").unwrap(), index.child_named(b, "g").unwrap());
    }
}
