use std::sync::Arc;
use std::path::Path;
use std::{fs, fmt};

use rustc_hash::FxHashMap;

use crate::error::Result;

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub(crate) usize);

/// An in-memory snapshot of a directory tree. Entries are never removed, so
/// an `EntryId` stays valid for the life of the tree.
#[derive(Debug)]
pub struct FsTree {
    entries: Vec<Entry>,
    map: FxHashMap<Arc<Path>, EntryId>,
}

#[derive(Debug)]
pub struct Entry {
    pub id: EntryId,
    pub path: Arc<Path>,
    pub file_name: String,
    pub file_type: fs::FileType,
    pub parent: Option<EntryId>,
    pub children: Vec<EntryId>,
    pub depth: usize,
}

#[derive(Default, Debug)]
struct FsMetadata(Option<fs::Metadata>);

impl FsTree {
    pub fn build<P: AsRef<Path>>(root: P) -> Result<Self> {
        use jwalk::WalkDirGeneric;

        let root = root.as_ref();
        let walker = WalkDirGeneric::<FsMetadata>::new(root)
            .follow_links(true)
            .sort(true)
            .process_read_dir(|_, _, _, entries| {
                entries.iter_mut()
                    .filter_map(|e| e.as_mut().ok())
                    .for_each(|e| e.client_state = FsMetadata(e.metadata().ok()))
            });

        let mut tree = FsTree { entries: vec![], map: FxHashMap::default() };
        let entries = walker.into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.depth == 0 || e.client_state.0.is_some());

        for entry in entries {
            tree.insert(entry);
        }

        if tree.entries.is_empty() {
            return err! {
                "file system tree discovery yielded zero files",
                "search root" => root.display(),
            }
        }

        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn root(&self) -> &Entry {
        &self[self.root_id()]
    }

    pub fn root_id(&self) -> EntryId {
        EntryId(0)
    }

    #[inline]
    pub fn get<R, P>(&self, root: R, path: P) -> Option<&Entry>
        where R: Into<Option<EntryId>>, P: AsRef<Path>
    {
        self.get_id(root, path).map(|id| &self[id])
    }

    pub fn get_id<R, P>(&self, root: R, path: P) -> Option<EntryId>
        where R: Into<Option<EntryId>>, P: AsRef<Path>
    {
        let root = root.into().unwrap_or(self.root_id());
        let full_path = self[root].path.join(path.as_ref());
        self.map.get(&*full_path).cloned()
    }

    pub fn get_file_id<R, P>(&self, root: R, path: P) -> Option<EntryId>
        where R: Into<Option<EntryId>>, P: AsRef<Path>
    {
        let id = self.get_id(root, path)?;
        self[id].file_type.is_file().then_some(id)
    }

    /// Visits `root` and its descendants depth-first. Children of an entry are
    /// only visited if `visit` returns `true` for it.
    pub fn depth_first_search<'a, F>(&'a self, root: EntryId, mut visit: F)
        where F: FnMut(&'a Entry) -> bool
    {
        fn _dfs<'a, F>(tree: &'a FsTree, root: EntryId, visit: &mut F)
            where F: FnMut(&'a Entry) -> bool
        {
            let entry = &tree[root];
            if visit(entry) {
                for &child in &entry.children {
                    _dfs(tree, child, visit)
                }
            }
        }

        _dfs(self, root, &mut visit)
    }

    /// All files beneath `root`, in sorted depth-first order.
    pub fn files(&self, root: EntryId) -> Vec<&Entry> {
        let mut files = vec![];
        self.depth_first_search(root, |entry| {
            if entry.file_type.is_file() {
                files.push(entry);
            }

            true
        });

        files
    }

    fn insert(&mut self, entry: jwalk::DirEntry<FsMetadata>) -> EntryId {
        let entry = Entry {
            id: EntryId(self.entries.len()),
            path: Arc::from(entry.path().into_boxed_path()),
            file_type: entry.file_type,
            file_name: entry.file_name.to_string_lossy().into_owned(),
            parent: self.map.get(&*entry.parent_path).cloned(),
            children: vec![],
            depth: entry.depth,
        };

        self.map.insert(entry.path.clone(), entry.id);
        if let Some(parent) = entry.parent {
            self.entries[parent.0].children.push(entry.id);
        }

        let id = entry.id;
        self.entries.push(entry);
        id
    }
}

impl Entry {
    /// File name without the extension.
    pub fn file_stem(&self) -> &str {
        match self.file_name.rsplit_once('.') {
            Some((left, _)) => left,
            None => &self.file_name,
        }
    }

    /// The last extension, if any.
    pub fn file_ext(&self) -> Option<&str> {
        self.file_name.rsplit_once('.').map(|(_, right)| right)
    }

    pub fn is_hidden(&self) -> bool {
        self.file_name.starts_with('.')
    }

    /// Path relative to `other`. `other` must be an ancestor of `self`.
    pub fn path_relative_to(&self, other: &Entry) -> Option<&Path> {
        self.path.strip_prefix(&other.path).ok()
    }
}

impl jwalk::ClientState for FsMetadata {
    type ReadDirState = ();
    type DirEntryState = Self;
}

impl std::ops::Index<EntryId> for FsTree {
    type Output = Entry;

    fn index(&self, index: EntryId) -> &Self::Output {
        &self.entries[index.0]
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::FsTree;

    #[test]
    fn builds_sorted_tree_with_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("photos/sub")).unwrap();
        fs::write(dir.path().join("photos/b.jpg"), b"b").unwrap();
        fs::write(dir.path().join("photos/a.jpg"), b"a").unwrap();
        fs::write(dir.path().join("photos/sub/c.png"), b"c").unwrap();

        let tree = FsTree::build(dir.path()).unwrap();
        let photos = tree.get(None, "photos").unwrap();
        assert!(photos.file_type.is_dir());

        let names: Vec<_> = tree.files(photos.id).iter()
            .map(|e| e.path_relative_to(photos).unwrap().to_path_buf())
            .collect();

        assert_eq!(names, vec![
            Path::new("a.jpg").to_path_buf(),
            Path::new("b.jpg").to_path_buf(),
            Path::new("sub/c.png").to_path_buf(),
        ]);

        let c = tree.get_file_id(photos.id, "sub/c.png").unwrap();
        assert_eq!(tree[c].file_stem(), "c");
        assert_eq!(tree[c].file_ext(), Some("png"));
        assert!(tree.get_file_id(None, "photos/sub").is_none());
    }

    #[test]
    fn search_prunes_and_yields_tree_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        fs::write(dir.path().join(".git/objects/x"), b"x").unwrap();
        fs::write(dir.path().join("pie.yaml"), b"p").unwrap();

        let tree = FsTree::build(dir.path()).unwrap();
        let mut seen = vec![];
        tree.depth_first_search(tree.root_id(), |entry| {
            if entry.depth > 0 && entry.is_hidden() {
                return false;
            }

            seen.push(entry);
            true
        });

        let names: Vec<&str> = seen.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names.len(), 2);
        assert_eq!(names[1], "pie.yaml");
        assert!(seen.iter().all(|e| !e.path.to_string_lossy().contains(".git")));
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FsTree::build(dir.path().join("nope")).is_err());
    }
}
