//! Bidirectional mapping between watch ids and directory paths.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::event::WatchId;

/// The single source of truth for which directories are watched.
///
/// Paths are kept in a `BTreeMap`. `PathBuf` orders component by component,
/// so every descendant of a directory sorts contiguously right after it,
/// which is what makes [`remove_subtree`](Self::remove_subtree) and
/// [`rename_subtree`](Self::rename_subtree) range scans instead of full scans.
#[derive(Debug, Default)]
pub struct WatchTable {
    by_id: HashMap<WatchId, PathBuf>,
    by_path: BTreeMap<PathBuf, WatchId>,
}

impl WatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `wd` as watching `path`.
    ///
    /// Any previous entry for either `wd` or `path` is dropped first so both
    /// directions stay consistent.
    pub fn insert(&mut self, wd: WatchId, path: PathBuf) {
        if let Some(old_path) = self.by_id.remove(&wd) {
            self.by_path.remove(&old_path);
        }
        if let Some(old_wd) = self.by_path.remove(&path) {
            self.by_id.remove(&old_wd);
        }
        self.by_path.insert(path.clone(), wd);
        self.by_id.insert(wd, path);
    }

    pub fn lookup_by_id(&self, wd: WatchId) -> Option<&Path> {
        self.by_id.get(&wd).map(PathBuf::as_path)
    }

    pub fn lookup_by_path(&self, path: &Path) -> Option<WatchId> {
        self.by_path.get(path).copied()
    }

    pub fn contains(&self, wd: WatchId) -> bool {
        self.by_id.contains_key(&wd)
    }

    /// Point `wd` at `new_path`, leaving its descendants alone.
    ///
    /// Returns false if `wd` is not in the table.
    pub fn rename(&mut self, wd: WatchId, new_path: PathBuf) -> bool {
        if !self.by_id.contains_key(&wd) {
            return false;
        }
        self.insert(wd, new_path);
        true
    }

    /// Remove a single entry. Removing an absent id is a no-op.
    pub fn remove(&mut self, wd: WatchId) -> Option<PathBuf> {
        let path = self.by_id.remove(&wd)?;
        self.by_path.remove(&path);
        Some(path)
    }

    /// Remove `prefix` and every entry beneath it.
    ///
    /// Returns the removed entries, children before their parents. Purging a prefix
    /// that is not watched is a no-op.
    pub fn remove_subtree(&mut self, prefix: &Path) -> Vec<(WatchId, PathBuf)> {
        let doomed = self.subtree_paths(prefix);
        let mut removed = Vec::with_capacity(doomed.len());
        for path in doomed.into_iter().rev() {
            if let Some(wd) = self.by_path.remove(&path) {
                self.by_id.remove(&wd);
                removed.push((wd, path));
            }
        }
        if !removed.is_empty() {
            debug!(
                "Purged {} watches under {}",
                removed.len(),
                prefix.display()
            );
        }
        removed
    }

    /// Move `from` and every entry beneath it to the same relative position
    /// under `to`, keeping every watch id.
    ///
    /// Returns the number of entries rewritten.
    pub fn rename_subtree(&mut self, from: &Path, to: &Path) -> usize {
        if from == to {
            return 0;
        }
        let moved: Vec<(PathBuf, WatchId)> = self
            .subtree_paths(from)
            .into_iter()
            .filter_map(|path| self.by_path.remove(&path).map(|wd| (path, wd)))
            .collect();

        for (old_path, wd) in &moved {
            let new_path = match old_path.strip_prefix(from) {
                Ok(rest) if rest.as_os_str().is_empty() => to.to_path_buf(),
                Ok(rest) => to.join(rest),
                Err(_) => continue,
            };
            if let Some(stale) = self.by_path.insert(new_path.clone(), *wd) {
                if stale != *wd {
                    self.by_id.remove(&stale);
                }
            }
            self.by_id.insert(*wd, new_path);
        }
        moved.len()
    }

    /// Paths of `prefix` and its descendants, in table order.
    pub fn subtree_paths(&self, prefix: &Path) -> Vec<PathBuf> {
        self.by_path
            .range::<Path, _>((Bound::Included(prefix), Bound::Unbounded))
            .map(|(path, _)| path)
            .take_while(|path| path.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// All entries, ordered by path.
    pub fn iter(&self) -> impl Iterator<Item = (WatchId, &Path)> {
        self.by_path.iter().map(|(path, wd)| (*wd, path.as_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn wd(raw: i32) -> WatchId {
        WatchId::new(raw)
    }

    fn nested_table() -> WatchTable {
        let mut table = WatchTable::new();
        table.insert(wd(1), PathBuf::from("/w"));
        table.insert(wd(2), PathBuf::from("/w/a"));
        table.insert(wd(3), PathBuf::from("/w/a/b"));
        table.insert(wd(4), PathBuf::from("/w/a/b/c"));
        table.insert(wd(5), PathBuf::from("/w/a/b/c/d"));
        table.insert(wd(6), PathBuf::from("/w/a/e"));
        table.insert(wd(7), PathBuf::from("/w/ab"));
        table.insert(wd(8), PathBuf::from("/w/a-b"));
        table
    }

    #[test]
    fn test_lookup_both_directions() {
        let table = nested_table();
        assert_eq!(table.lookup_by_id(wd(3)), Some(Path::new("/w/a/b")));
        assert_eq!(table.lookup_by_path(Path::new("/w/a/b")), Some(wd(3)));
        assert_eq!(table.lookup_by_id(wd(99)), None);
        assert_eq!(table.lookup_by_path(Path::new("/w/zzz")), None);
    }

    #[test]
    fn test_insert_replaces_stale_entries() {
        let mut table = WatchTable::new();
        table.insert(wd(1), PathBuf::from("/w/a"));

        // Same id, new path.
        table.insert(wd(1), PathBuf::from("/w/b"));
        assert_eq!(table.lookup_by_path(Path::new("/w/a")), None);
        assert_eq!(table.len(), 1);

        // Same path, new id.
        table.insert(wd(2), PathBuf::from("/w/b"));
        assert_eq!(table.lookup_by_id(wd(1)), None);
        assert_eq!(table.lookup_by_path(Path::new("/w/b")), Some(wd(2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_subtree_multi_level() {
        let mut table = nested_table();
        let before = table.len();

        let removed = table.remove_subtree(Path::new("/w/a"));

        let removed_ids: Vec<_> = removed.iter().map(|(id, _)| *id).collect();
        assert_eq!(removed_ids.len(), 5);
        for id in [2, 3, 4, 5, 6] {
            assert!(removed_ids.contains(&wd(id)));
            assert_eq!(table.lookup_by_id(wd(id)), None);
        }
        for path in ["/w/a", "/w/a/b", "/w/a/b/c", "/w/a/b/c/d", "/w/a/e"] {
            assert_eq!(table.lookup_by_path(Path::new(path)), None);
        }
        assert_eq!(table.len(), before - 5);

        // Children before parents.
        assert_eq!(removed[0].1, PathBuf::from("/w/a/e"));
        assert_eq!(removed.last().map(|(_, p)| p.as_path()), Some(Path::new("/w/a")));
    }

    #[test]
    fn test_remove_subtree_keeps_name_prefixed_siblings() {
        let mut table = nested_table();
        table.remove_subtree(Path::new("/w/a"));

        assert_eq!(table.lookup_by_path(Path::new("/w/ab")), Some(wd(7)));
        assert_eq!(table.lookup_by_path(Path::new("/w/a-b")), Some(wd(8)));
        assert_eq!(table.lookup_by_path(Path::new("/w")), Some(wd(1)));
    }

    #[test]
    fn test_removal_is_idempotent() {
        let mut table = nested_table();

        assert!(table.remove(wd(4)).is_some());
        assert!(table.remove(wd(4)).is_none());

        let first = table.remove_subtree(Path::new("/w/a/b"));
        assert_eq!(first.len(), 2);
        let second = table.remove_subtree(Path::new("/w/a/b"));
        assert!(second.is_empty());
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn test_remove_subtree_of_unwatched_parent_purges_descendants() {
        let mut table = WatchTable::new();
        table.insert(wd(1), PathBuf::from("/w/x/y"));
        table.insert(wd(2), PathBuf::from("/w/x/y/z"));

        let removed = table.remove_subtree(Path::new("/w/x"));
        assert_eq!(removed.len(), 2);
        assert!(table.is_empty());
    }

    #[test]
    fn test_rename_subtree_preserves_ids() {
        let mut table = nested_table();

        let moved = table.rename_subtree(Path::new("/w/a"), Path::new("/w/renamed"));

        assert_eq!(moved, 5);
        assert_eq!(table.lookup_by_path(Path::new("/w/renamed")), Some(wd(2)));
        assert_eq!(table.lookup_by_path(Path::new("/w/renamed/b/c/d")), Some(wd(5)));
        assert_eq!(table.lookup_by_path(Path::new("/w/renamed/e")), Some(wd(6)));
        assert_eq!(table.lookup_by_id(wd(4)), Some(Path::new("/w/renamed/b/c")));
        assert_eq!(table.lookup_by_path(Path::new("/w/a")), None);
        assert_eq!(table.lookup_by_path(Path::new("/w/a/b")), None);
        assert_eq!(table.lookup_by_path(Path::new("/w/ab")), Some(wd(7)));
        assert_eq!(table.len(), 8);
    }

    #[test]
    fn test_rename_subtree_into_own_descendant_name() {
        let mut table = WatchTable::new();
        table.insert(wd(1), PathBuf::from("/w/a"));
        table.insert(wd(2), PathBuf::from("/w/a/b"));

        table.rename_subtree(Path::new("/w/a"), Path::new("/w/a2"));

        assert_eq!(table.lookup_by_path(Path::new("/w/a2")), Some(wd(1)));
        assert_eq!(table.lookup_by_path(Path::new("/w/a2/b")), Some(wd(2)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_rename_single_entry() {
        let mut table = nested_table();
        assert!(table.rename(wd(7), PathBuf::from("/w/seven")));
        assert_eq!(table.lookup_by_path(Path::new("/w/seven")), Some(wd(7)));
        assert_eq!(table.lookup_by_path(Path::new("/w/ab")), None);
        assert!(!table.rename(wd(42), PathBuf::from("/w/nothing")));
    }
}
