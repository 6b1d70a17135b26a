use std::path::{Component, Path};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::asset::{Asset, AssetId, AssetStore, Origin};
use crate::error::{Chainable, Result};
use crate::format::{Format, Json};
use crate::fstree::{Entry, FsTree};
use crate::image::{AlbumCatalog, HttpCache, LocalCatalog, ObjectCatalog, ObjectEntry};

/// `path` with `/` separators, whatever the platform.
fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn visible_files<'t>(tree: &'t FsTree, root: &Entry) -> Vec<&'t Entry> {
    tree.files(root.id)
        .into_iter()
        .filter(|e| !e.path_relative_to(root).is_some_and(|p| {
            p.components().any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
        }))
        .collect()
}

/// Images in named local directories, found by source name and relative path.
///
/// Source names are matched case-insensitively since URI hosts are.
#[derive(Debug, Default)]
pub struct SourceCatalog {
    map: FxHashMap<(Arc<str>, Arc<str>), AssetId>,
}

impl SourceCatalog {
    pub fn new() -> Self {
        SourceCatalog::default()
    }

    /// Catalogs every visible file beneath `dir` under the source `name`,
    /// registering each as an asset. Returns the number of files added. Files
    /// already cataloged under the same name and path are kept.
    pub fn add_source(&mut self, name: &str, dir: &Path, store: &AssetStore) -> Result<usize> {
        let tree = FsTree::build(dir).chain_with(|| error! {
            "failed to read image source",
            "source" => name,
            "path" => dir.display(),
        })?;

        let name: Arc<str> = name.to_lowercase().into();
        let mut added = 0;
        for file in visible_files(&tree, tree.root()) {
            let Some(relative) = file.path_relative_to(tree.root()) else { continue };
            let path: Arc<str> = slash_path(relative).into();
            let key = (name.clone(), path.clone());
            if self.map.contains_key(&key) {
                continue;
            }

            let origin = Origin::Source { name: name.clone(), path };
            let asset = store.register(Asset::new(file.path.clone(), origin, None));
            self.map.insert(key, asset.id.clone());
            added += 1;
        }

        tracing::debug!(source = %name, files = added, "cataloged image source");
        Ok(added)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl LocalCatalog for SourceCatalog {
    fn find_by_source_and_path(&self, source: &str, path: &str) -> Option<AssetId> {
        let key: (Arc<str>, Arc<str>) = (source.to_lowercase().into(), path.into());
        self.map.get(&key).cloned()
    }
}

/// A directory of photo albums, one subdirectory per album.
#[derive(Debug, Default)]
pub struct AlbumDirectory {
    by_album: FxHashMap<(Arc<str>, Arc<str>), AssetId>,
    by_name: FxHashMap<Arc<str>, AssetId>,
}

impl AlbumDirectory {
    pub fn build(dir: &Path, store: &AssetStore) -> Result<Self> {
        let tree = FsTree::build(dir).chain_with(|| error! {
            "failed to read album directory",
            "path" => dir.display(),
        })?;

        let mut albums = AlbumDirectory::default();
        let root = tree.root();
        for &child in &root.children {
            let album = &tree[child];
            if !album.file_type.is_dir() || album.is_hidden() {
                continue;
            }

            let name: Arc<str> = album.file_name.as_str().into();
            for file in visible_files(&tree, album) {
                let filename: Arc<str> = file.file_name.as_str().into();
                let origin = Origin::Album { album: name.clone(), filename: filename.clone() };
                let asset = store.register(Asset::new(file.path.clone(), origin, None));

                albums.by_album.entry((name.clone(), filename.clone()))
                    .or_insert_with(|| asset.id.clone());

                albums.by_name.entry(filename).or_insert_with(|| asset.id.clone());
            }
        }

        tracing::debug!(path = %dir.display(), photos = albums.by_album.len(), "cataloged albums");
        Ok(albums)
    }

    pub fn len(&self) -> usize {
        self.by_album.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_album.is_empty()
    }
}

impl AlbumCatalog for AlbumDirectory {
    fn find_by_filename(&self, album: Option<&str>, filename: &str) -> Option<AssetId> {
        match album {
            Some(album) => {
                let key: (Arc<str>, Arc<str>) = (album.into(), filename.into());
                self.by_album.get(&key).cloned()
            }
            None => self.by_name.get(filename).cloned(),
        }
    }
}

/// Listings name the keys of an object store, either as a plain array or in
/// the shape of an S3 `ListObjectsV2` response.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing {
    Keys(Vec<String>),
    Objects {
        #[serde(rename = "Contents", default)]
        contents: Vec<Object>,
    },
}

#[derive(Debug, Deserialize)]
struct Object {
    #[serde(rename = "Key")]
    key: String,
}

/// An object store served over HTTP. Every listed object is downloaded in
/// the background once [`ObjectStore::materialize()`] is called; entries stay
/// pending until their download completes.
#[derive(Debug)]
pub struct ObjectStore {
    base_url: url::Url,
    entries: FxHashMap<Arc<str>, Arc<ObjectEntry>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ObjectStore {
    pub fn new<I, S>(base_url: &str, keys: I) -> Result<Self>
        where I: IntoIterator<Item = S>, S: AsRef<str>
    {
        let mut base_url = url::Url::parse(base_url)
            .chain_with(|| error!("invalid object store URL", "url" => base_url))?;

        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let entries = keys.into_iter()
            .map(|key| key.as_ref().trim_start_matches('/').to_string())
            .filter(|key| !key.is_empty() && !key.ends_with('/'))
            .map(|key| {
                let key: Arc<str> = key.into();
                (key.clone(), Arc::new(ObjectEntry::new(key)))
            })
            .collect();

        Ok(ObjectStore { base_url, entries, tasks: Mutex::new(vec![]) })
    }

    /// Reads the keys from a JSON listing file.
    pub fn from_listing(base_url: &str, listing: &Path) -> Result<Self> {
        let keys = match Json::read::<Listing, _>(listing)? {
            Listing::Keys(keys) => keys,
            Listing::Objects { contents } => contents.into_iter().map(|o| o.key).collect(),
        };

        ObjectStore::new(base_url, keys)
    }

    pub fn url_of(&self, key: &str) -> Result<url::Url> {
        Ok(self.base_url.join(key)?)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Starts downloading every entry through `cache`. Must be called within
    /// a tokio runtime. Downloads still running when the store is dropped are
    /// aborted. A failed download leaves its entry pending.
    pub fn materialize(&self, cache: Arc<HttpCache>) {
        let mut tasks = self.tasks.lock();
        for entry in self.entries.values() {
            let url = match self.url_of(entry.key()) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(key = entry.key(), "skipping object:\n{e}");
                    continue;
                }
            };

            let (cache, entry) = (cache.clone(), entry.clone());
            tasks.push(tokio::spawn(async move {
                let Some(path) = cache.download(url.as_str()).await else {
                    tracing::warn!(key = entry.key(), %url, "object did not materialize");
                    return;
                };

                let origin = Origin::ObjectStore { key: entry.key().into() };
                let asset = cache.store().register(Asset::new(path, origin, None));
                entry.materialize(asset.id.clone());
            }));
        }
    }
}

impl ObjectCatalog for ObjectStore {
    fn find_by_key(&self, key: &str) -> Option<Arc<ObjectEntry>> {
        self.entries.get(key).cloned()
    }
}

impl Drop for ObjectStore {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use super::*;
    use crate::image::{await_condition, PROGRAMMATIC_SOURCE};

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"img").unwrap();
    }

    #[test]
    fn sources_are_found_by_name_and_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("recipe/pie/top.jpg"));
        touch(&dir.path().join("recipe/.hidden/x.jpg"));
        touch(&dir.path().join("extra/a.png"));

        let store = AssetStore::new();
        let mut catalog = SourceCatalog::new();
        assert_eq!(catalog.add_source("Recipe", &dir.path().join("recipe"), &store).unwrap(), 1);
        assert_eq!(catalog.add_source(PROGRAMMATIC_SOURCE, &dir.path().join("extra"), &store).unwrap(), 1);
        assert_eq!(store.len(), 2);

        let id = catalog.find_by_source_and_path("recipe", "pie/top.jpg").unwrap();
        assert_eq!(&*store.get(&id).unwrap().path, dir.path().join("recipe/pie/top.jpg"));
        assert!(catalog.find_by_source_and_path(PROGRAMMATIC_SOURCE, "a.png").is_some());
        assert!(catalog.find_by_source_and_path("recipe", ".hidden/x.jpg").is_none());
        assert!(catalog.find_by_source_and_path("extra", "a.png").is_none());

        assert!(catalog.add_source("missing", &dir.path().join("nope"), &store).is_err());
    }

    #[test]
    fn albums_scope_lookups() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Family Album/img1.jpg"));
        touch(&dir.path().join("Summer/img1.jpg"));
        touch(&dir.path().join("Summer/beach.png"));
        touch(&dir.path().join("loose.jpg"));

        let store = AssetStore::new();
        let albums = AlbumDirectory::build(dir.path(), &store).unwrap();
        assert_eq!(albums.len(), 3);

        let family = albums.find_by_filename(Some("Family Album"), "img1.jpg").unwrap();
        let summer = albums.find_by_filename(Some("Summer"), "img1.jpg").unwrap();
        assert_ne!(family, summer);
        assert_eq!(albums.find_by_filename(None, "img1.jpg"), Some(family));
        assert!(albums.find_by_filename(None, "beach.png").is_some());
        assert!(albums.find_by_filename(Some("Family Album"), "beach.png").is_none());
        assert!(albums.find_by_filename(None, "loose.jpg").is_none());
    }

    #[test]
    fn listings_come_in_two_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.json");
        fs::write(&plain, r#"["/a.jpg", "dir/", "b/c.png"]"#).unwrap();
        let s3 = dir.path().join("s3.json");
        fs::write(&s3, r#"{"Name": "bucket", "Contents": [{"Key": "a.jpg", "Size": 1}]}"#).unwrap();

        let store = ObjectStore::from_listing("https://cdn.example/photos", &plain).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.find_by_key("a.jpg").is_some());
        assert!(store.find_by_key("dir/").is_none());
        assert_eq!(store.url_of("b/c.png").unwrap().as_str(), "https://cdn.example/photos/b/c.png");

        let store = ObjectStore::from_listing("https://cdn.example/", &s3).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.find_by_key("a.jpg").unwrap().local_file().is_none());
    }

    #[tokio::test]
    async fn materialized_objects_become_available() {
        let dir = tempfile::tempdir().unwrap();
        let assets = Arc::new(AssetStore::new());
        let cache = Arc::new(HttpCache::new(dir.path(), assets.clone()).unwrap().offline(true));

        let objects = ObjectStore::new("https://cdn.example/", ["cached.jpg", "absent.jpg"]).unwrap();
        let url = objects.url_of("cached.jpg").unwrap();
        fs::write(cache.cache_path(url.as_str()), b"jpeg").unwrap();

        objects.materialize(cache);
        let cached = objects.find_by_key("cached.jpg").unwrap();
        let id = await_condition(Duration::from_secs(5), Duration::from_millis(5), || {
            std::future::ready(cached.local_file())
        }).await.unwrap();

        assert_eq!(assets.get(&id).unwrap().origin, Origin::ObjectStore { key: "cached.jpg".into() });
        assert!(objects.find_by_key("absent.jpg").unwrap().local_file().is_none());
    }
}
