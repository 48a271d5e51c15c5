//! Directory name-expansion cache.
//!
//! A drive keeps one [`NameCache`] to translate the guest's case-insensitive
//! paths into host paths with their real casing, to hand out enumeration
//! cursors for FindFirst/FindNext, and to hold the volume label. Only the
//! interface matters to the drives; [`DirCache`] is a straightforward
//! rescan-based implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Identifier for one enumeration cursor inside a cache.
pub type SearchId = u16;

/// Number of enumeration cursors a cache keeps alive at once. Starting a
/// new search beyond this reuses the oldest slot.
pub const MAX_OPEN_SEARCHES: usize = 8;

/// Path expansion and directory enumeration service for one drive.
///
/// Cursor ids handed out by `find_first` are always below
/// [`MAX_OPEN_SEARCHES`]. `find_next` on a reused or never-issued id simply
/// reports exhaustion; every cursor yields a finite snapshot, which is what
/// bounds the drives' enumeration loops.
pub trait NameCache: Send + Sync {
    /// Set the host directory this cache serves.
    fn set_base_dir(&mut self, base: &Path);

    /// Correct the casing of each component of `path` (which must start
    /// with the base directory) against the host. Components that do not
    /// exist on the host are passed through unchanged.
    fn expand(&mut self, path: &Path) -> PathBuf;

    /// Start enumerating `dir`. `None` when the directory cannot be read.
    fn find_first(&mut self, dir: &Path) -> Option<SearchId>;

    /// Pull the next raw entry name for a cursor. `None` when exhausted.
    fn find_next(&mut self, id: SearchId) -> Option<String>;

    /// Record a newly created path so expansion finds it without a rescan.
    fn add_entry(&mut self, path: &Path, is_dir: bool);

    /// Forget a removed path.
    fn delete_entry(&mut self, path: &Path, is_dir: bool);

    /// Invalidate cached knowledge about a path (and its parent listing).
    fn cache_out(&mut self, path: &Path, is_dir: bool);

    /// Volume label, empty when none is set.
    fn label(&self) -> &str;

    fn set_label(&mut self, label: &str);

    /// Drop everything cached; the next operation rescans the host.
    fn empty_cache(&mut self);
}

struct SearchCursor {
    entries: Vec<String>,
    next: usize,
}

/// Rescan-based [`NameCache`]: per-directory case maps filled lazily from
/// `read_dir`, plus a rotating set of enumeration snapshots.
pub struct DirCache {
    base: PathBuf,
    label: String,
    /// parent host dir -> (UPPERCASED name -> actual host name)
    expansions: HashMap<PathBuf, HashMap<String, String>>,
    searches: Vec<Option<SearchCursor>>,
    next_slot: usize,
}

impl DirCache {
    pub fn new(base: &Path) -> Self {
        let mut searches = Vec::with_capacity(MAX_OPEN_SEARCHES);
        searches.resize_with(MAX_OPEN_SEARCHES, || None);
        Self {
            base: base.to_path_buf(),
            label: String::new(),
            expansions: HashMap::new(),
            searches,
            next_slot: 0,
        }
    }

    fn scan_dir(dir: &Path) -> HashMap<String, String> {
        let mut map = HashMap::new();
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let actual = entry.file_name().to_string_lossy().into_owned();
                map.insert(actual.to_uppercase(), actual);
            }
        }
        map
    }

    fn resolve_component(&mut self, parent: &Path, name: &str) -> String {
        // Exact casing already correct: no need to consult the map
        if parent.join(name).exists() {
            return name.to_string();
        }
        let map = self
            .expansions
            .entry(parent.to_path_buf())
            .or_insert_with(|| Self::scan_dir(parent));
        map.get(&name.to_uppercase())
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

impl NameCache for DirCache {
    fn set_base_dir(&mut self, base: &Path) {
        self.base = base.to_path_buf();
        self.empty_cache();
    }

    fn expand(&mut self, path: &Path) -> PathBuf {
        let Ok(rel) = path.strip_prefix(&self.base) else {
            return path.to_path_buf();
        };
        let rel = rel.to_path_buf();
        let mut out = self.base.clone();
        for component in rel.components() {
            let name = component.as_os_str().to_string_lossy().into_owned();
            if name == "." || name == ".." {
                out.push(name);
                continue;
            }
            let actual = self.resolve_component(&out, &name);
            out.push(actual);
        }
        out
    }

    fn find_first(&mut self, dir: &Path) -> Option<SearchId> {
        let host_dir = self.expand(dir);
        let read = std::fs::read_dir(&host_dir).ok()?;
        let mut entries: Vec<String> = read
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort_by(|a, b| a.to_uppercase().cmp(&b.to_uppercase()));
        // Subdirectories carry the conventional dot entries
        if host_dir != self.base {
            entries.insert(0, "..".to_string());
            entries.insert(0, ".".to_string());
        }

        let id = self.next_slot;
        self.next_slot = (self.next_slot + 1) % MAX_OPEN_SEARCHES;
        self.searches[id] = Some(SearchCursor { entries, next: 0 });
        Some(id as SearchId)
    }

    fn find_next(&mut self, id: SearchId) -> Option<String> {
        let cursor = self.searches.get_mut(id as usize)?.as_mut()?;
        let entry = cursor.entries.get(cursor.next)?.clone();
        cursor.next += 1;
        Some(entry)
    }

    fn add_entry(&mut self, path: &Path, _is_dir: bool) {
        let host = self.expand(path);
        if let (Some(parent), Some(name)) = (host.parent(), host.file_name()) {
            let actual = name.to_string_lossy().into_owned();
            if let Some(map) = self.expansions.get_mut(parent) {
                map.insert(actual.to_uppercase(), actual);
            }
        }
    }

    fn delete_entry(&mut self, path: &Path, is_dir: bool) {
        let host = self.expand(path);
        if let (Some(parent), Some(name)) = (host.parent(), host.file_name()) {
            let upper = name.to_string_lossy().to_uppercase();
            if let Some(map) = self.expansions.get_mut(parent) {
                map.remove(&upper);
            }
        }
        if is_dir {
            self.expansions.retain(|dir, _| !dir.starts_with(&host));
        }
    }

    fn cache_out(&mut self, path: &Path, is_dir: bool) {
        let host = self.expand(path);
        if let Some(parent) = host.parent() {
            self.expansions.remove(parent);
        }
        if is_dir {
            self.expansions.retain(|dir, _| !dir.starts_with(&host));
        }
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn set_label(&mut self, label: &str) {
        self.label = label.to_string();
    }

    fn empty_cache(&mut self) {
        self.expansions.clear();
        for slot in &mut self.searches {
            *slot = None;
        }
        self.next_slot = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_expand_corrects_case() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("SubDir")).unwrap();
        fs::write(dir.path().join("SubDir/MixedCase.txt"), b"x").unwrap();

        let mut cache = DirCache::new(dir.path());
        let expanded = cache.expand(&dir.path().join("SUBDIR/MIXEDCASE.TXT"));
        assert_eq!(expanded, dir.path().join("SubDir/MixedCase.txt"));
    }

    #[test]
    fn test_expand_passes_unknown_tail_through() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = DirCache::new(dir.path());
        let expanded = cache.expand(&dir.path().join("NEWFILE.TXT"));
        assert_eq!(expanded, dir.path().join("NEWFILE.TXT"));
    }

    #[test]
    fn test_enumeration_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), b"").unwrap();
        fs::write(dir.path().join("a.txt"), b"").unwrap();

        let mut cache = DirCache::new(dir.path());
        let id = cache.find_first(dir.path()).unwrap();
        assert_eq!(cache.find_next(id).unwrap(), "a.txt");
        assert_eq!(cache.find_next(id).unwrap(), "b.txt");
        assert!(cache.find_next(id).is_none());
        assert!(cache.find_next(id).is_none());
    }

    #[test]
    fn test_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = DirCache::new(dir.path());
        assert!(cache.find_first(&dir.path().join("NOPE")).is_none());
    }

    #[test]
    fn test_subdir_enumeration_has_dot_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/x.txt"), b"").unwrap();

        let mut cache = DirCache::new(dir.path());
        let id = cache.find_first(&dir.path().join("sub")).unwrap();
        assert_eq!(cache.find_next(id).unwrap(), ".");
        assert_eq!(cache.find_next(id).unwrap(), "..");
        assert_eq!(cache.find_next(id).unwrap(), "x.txt");
    }

    #[test]
    fn test_delete_entry_forgets_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Gone.txt"), b"").unwrap();

        let mut cache = DirCache::new(dir.path());
        // Prime the map
        let expanded = cache.expand(&dir.path().join("GONE.TXT"));
        assert_eq!(expanded, dir.path().join("Gone.txt"));

        fs::remove_file(dir.path().join("Gone.txt")).unwrap();
        cache.delete_entry(&dir.path().join("GONE.TXT"), false);
        let expanded = cache.expand(&dir.path().join("GONE.TXT"));
        assert_eq!(expanded, dir.path().join("GONE.TXT"));
    }
}
