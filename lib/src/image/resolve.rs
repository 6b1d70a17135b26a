use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;

use crate::asset::AssetId;
use crate::error::{Error, ErrorDetail, Result};
use crate::image::{await_condition_or_cancel, Cancel, ImageError, ImageRef, PollConfig};
use crate::recipe::{Recipe, RecipeId};

/// Fetches remote images into a local cache.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Returns the id of the cached copy of `url`, owned by `parent`, or
    /// `None` if it couldn't be fetched.
    async fn fetch_and_cache(&self, url: &str, parent: &RecipeId) -> Option<AssetId>;
}

/// Images from named local source directories.
pub trait LocalCatalog: Send + Sync {
    fn find_by_source_and_path(&self, source: &str, path: &str) -> Option<AssetId>;
}

/// Images from photo albums. Lookups without an album search every album.
pub trait AlbumCatalog: Send + Sync {
    fn find_by_filename(&self, album: Option<&str>, filename: &str) -> Option<AssetId>;
}

/// Objects listed in an object store, materialized locally in the background.
pub trait ObjectCatalog: Send + Sync {
    fn find_by_key(&self, key: &str) -> Option<Arc<ObjectEntry>>;
}

/// A cataloged object whose local copy may not exist yet.
#[derive(Debug)]
pub struct ObjectEntry {
    key: Arc<str>,
    local_file: OnceCell<AssetId>,
}

impl ObjectEntry {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        ObjectEntry { key: key.into(), local_file: OnceCell::new() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The local copy's asset id, or `None` while it is pending.
    pub fn local_file(&self) -> Option<AssetId> {
        self.local_file.get().cloned()
    }

    /// Records the local copy. Returns `false` if one was already recorded.
    pub fn materialize(&self, id: AssetId) -> bool {
        self.local_file.set(id).is_ok()
    }
}

/// Stands in for any collaborator a site doesn't configure: finds nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

#[async_trait]
impl RemoteCache for Unconfigured {
    async fn fetch_and_cache(&self, _url: &str, _parent: &RecipeId) -> Option<AssetId> {
        None
    }
}

impl LocalCatalog for Unconfigured {
    fn find_by_source_and_path(&self, _: &str, _: &str) -> Option<AssetId> {
        None
    }
}

impl AlbumCatalog for Unconfigured {
    fn find_by_filename(&self, _: Option<&str>, _: &str) -> Option<AssetId> {
        None
    }
}

impl ObjectCatalog for Unconfigured {
    fn find_by_key(&self, _: &str) -> Option<Arc<ObjectEntry>> {
        None
    }
}

/// Everything resolution needs: one collaborator per scheme, the poll budget
/// for eventually consistent catalogs, and the build's cancellation signal.
#[derive(Clone)]
pub struct ResolutionContext {
    remote: Arc<dyn RemoteCache>,
    local: Arc<dyn LocalCatalog>,
    albums: Arc<dyn AlbumCatalog>,
    objects: Arc<dyn ObjectCatalog>,
    poll: PollConfig,
    cancel: Cancel,
}

impl Default for ResolutionContext {
    fn default() -> Self {
        ResolutionContext::new()
    }
}

impl ResolutionContext {
    /// A context with no collaborators configured.
    pub fn new() -> Self {
        ResolutionContext {
            remote: Arc::new(Unconfigured),
            local: Arc::new(Unconfigured),
            albums: Arc::new(Unconfigured),
            objects: Arc::new(Unconfigured),
            poll: PollConfig::default(),
            cancel: Cancel::never(),
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteCache>) -> Self {
        self.remote = remote;
        self
    }

    pub fn with_local(mut self, local: Arc<dyn LocalCatalog>) -> Self {
        self.local = local;
        self
    }

    pub fn with_albums(mut self, albums: Arc<dyn AlbumCatalog>) -> Self {
        self.albums = albums;
        self
    }

    pub fn with_objects(mut self, objects: Arc<dyn ObjectCatalog>) -> Self {
        self.objects = objects;
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_cancel(mut self, cancel: Cancel) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn fetch_and_cache(&self, url: &str, parent: &RecipeId) -> Option<AssetId> {
        self.remote.fetch_and_cache(url, parent).await
    }

    pub fn find_local(&self, source: &str, path: &str) -> Option<AssetId> {
        self.local.find_by_source_and_path(source, path)
    }

    pub fn find_in_album(&self, album: Option<&str>, filename: &str) -> Option<AssetId> {
        self.albums.find_by_filename(album, filename)
    }

    pub fn find_object(&self, key: &str) -> Option<Arc<ObjectEntry>> {
        self.objects.find_by_key(key)
    }

    pub fn poll(&self) -> PollConfig {
        self.poll
    }

    pub fn cancel(&self) -> &Cancel {
        &self.cancel
    }
}

impl fmt::Debug for ResolutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionContext")
            .field("poll", &self.poll)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Resolves one image of `recipe` to an asset.
pub async fn resolve(
    image: &ImageRef,
    recipe: &RecipeId,
    cx: &ResolutionContext,
) -> Result<AssetId, ImageError> {
    let not_found = || ImageError::AssetNotFound { reference: image.to_string() };
    let result = match image {
        ImageRef::Local { source, path } => cx.find_local(source, path).ok_or_else(not_found),
        ImageRef::Album { album, filename } => {
            cx.find_in_album(album.as_deref(), filename).ok_or_else(not_found)
        }
        ImageRef::Remote { url } => tokio::select! {
            biased;
            _ = cx.cancel().cancelled() => Err(ImageError::Cancelled { reference: url.to_string() }),
            id = cx.fetch_and_cache(url, recipe) => id.ok_or_else(|| ImageError::Fetch {
                url: url.to_string(),
            }),
        },
        ImageRef::ObjectStore { key } => {
            let entry = cx.find_object(key).ok_or_else(not_found)?;
            let poll = cx.poll();
            await_condition_or_cancel(poll.timeout(), poll.interval(), cx.cancel(), || {
                std::future::ready(entry.local_file())
            }).await.map_err(|e| ImageError::from_poll(image, e))
        }
    };

    match &result {
        Ok(id) => tracing::debug!(%recipe, %image, %id, "resolved image"),
        Err(e) => tracing::debug!(%recipe, %image, error = %e, "failed to resolve image"),
    }

    result
}

/// Resolves every image of `recipe`, concurrently, returning one result per
/// input position. Equal references are resolved once.
pub async fn resolve_all(
    images: &[ImageRef],
    recipe: &RecipeId,
    cx: &ResolutionContext,
) -> Vec<Result<AssetId, ImageError>> {
    let mut unique: Vec<&ImageRef> = Vec::with_capacity(images.len());
    let mut seen: FxHashMap<&ImageRef, usize> = FxHashMap::default();
    let slots: Vec<usize> = images.iter()
        .map(|image| *seen.entry(image).or_insert_with(|| {
            unique.push(image);
            unique.len() - 1
        }))
        .collect();

    let results = join_all(unique.iter().map(|image| resolve(image, recipe, cx))).await;
    slots.into_iter().map(|i| results[i].clone()).collect()
}

/// What to do with an image that can't be resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OnError {
    /// Fail the build, reporting every unresolved image.
    #[default]
    Fail,
    /// Substitute the given asset and warn.
    Placeholder(AssetId),
}

/// An image that could not be resolved, with enough context to find it.
#[derive(Debug, Clone)]
pub struct Unresolved {
    pub recipe: RecipeId,
    pub reference: String,
    pub scheme: &'static str,
    pub error: ImageError,
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unresolved image in {}", self.recipe)
    }
}

impl ErrorDetail for Unresolved {
    fn context(&self) -> Vec<(Option<String>, String)> {
        vec![
            (Some("reference".into()), self.reference.clone()),
            (Some("scheme".into()), self.scheme.into()),
            (Some("cause".into()), self.error.to_string()),
        ]
    }
}

/// Resolves and attaches the images of every recipe, at most `concurrency`
/// recipes at a time.
///
/// With [`OnError::Fail`], any failure fails the whole call and recipes with
/// failures are left without assets. With [`OnError::Placeholder`], failures
/// are replaced and returned for reporting. A cancelled build always fails.
pub async fn resolve_recipes(
    recipes: &[Recipe],
    cx: &ResolutionContext,
    policy: &OnError,
    concurrency: usize,
) -> Result<Vec<Unresolved>> {
    let failures: Vec<Vec<Unresolved>> = stream::iter(recipes)
        .map(|recipe| resolve_recipe(recipe, cx, policy))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    if cx.cancel().is_cancelled() {
        return err!("image resolution was cancelled");
    }

    let failures: Vec<Unresolved> = failures.into_iter().flatten().collect();
    match policy {
        OnError::Fail => match Error::collect(failures) {
            Some(error) => Err(error.chain(error!("failed to resolve recipe images"))),
            None => Ok(vec![]),
        },
        OnError::Placeholder(_) => Ok(failures),
    }
}

async fn resolve_recipe(recipe: &Recipe, cx: &ResolutionContext, policy: &OnError) -> Vec<Unresolved> {
    let id = recipe.id();
    let results = resolve_all(recipe.image_refs(), &id, cx).await;

    let mut assets = Vec::with_capacity(results.len());
    let mut failures = vec![];
    let refs = recipe.image_refs().iter().zip(&recipe.images);
    for ((image, raw), result) in refs.zip(results) {
        match result {
            Ok(asset) => assets.push(asset),
            Err(error) => {
                let error = error.with_reference(raw);
                if let OnError::Placeholder(placeholder) = policy {
                    tracing::warn!(recipe = %id, reference = %raw, %error, "using placeholder image");
                    assets.push(placeholder.clone());
                }

                failures.push(Unresolved {
                    recipe: id.clone(),
                    reference: raw.clone(),
                    scheme: image.scheme(),
                    error,
                });
            }
        }
    }

    if assets.len() == recipe.image_refs().len() {
        recipe.attach_image_assets(assets);
    }

    failures
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::time::Instant;

    use super::*;
    use crate::image::{parse_all, PROGRAMMATIC_SOURCE};

    static_assertions::assert_impl_all!(ResolutionContext: Send, Sync);

    #[derive(Default)]
    struct Fakes {
        failing: HashSet<String>,
        fetched: Mutex<Vec<String>>,
        local: HashMap<(String, String), AssetId>,
        albums: HashMap<(Option<String>, String), AssetId>,
        objects: HashMap<String, Arc<ObjectEntry>>,
    }

    #[async_trait]
    impl RemoteCache for Fakes {
        async fn fetch_and_cache(&self, url: &str, parent: &RecipeId) -> Option<AssetId> {
            self.fetched.lock().push(url.to_string());
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self.failing.contains(url) {
                return None;
            }

            Some(AssetId::derive(&["http", url, parent.as_str()]))
        }
    }

    impl LocalCatalog for Fakes {
        fn find_by_source_and_path(&self, source: &str, path: &str) -> Option<AssetId> {
            self.local.get(&(source.to_string(), path.to_string())).cloned()
        }
    }

    impl AlbumCatalog for Fakes {
        fn find_by_filename(&self, album: Option<&str>, filename: &str) -> Option<AssetId> {
            self.albums.get(&(album.map(String::from), filename.to_string())).cloned()
        }
    }

    impl ObjectCatalog for Fakes {
        fn find_by_key(&self, key: &str) -> Option<Arc<ObjectEntry>> {
            self.objects.get(key).cloned()
        }
    }

    fn id(name: &str) -> AssetId {
        AssetId::derive(&[name])
    }

    fn fakes() -> Fakes {
        let mut fakes = Fakes::default();
        fakes.failing.insert("https://bad.example/2.jpg".into());
        fakes.local.insert(("recipe".into(), "a.jpg".into()), id("local"));
        fakes.local.insert((PROGRAMMATIC_SOURCE.into(), "b.jpg".into()), id("programmatic"));
        fakes.albums.insert((Some("Family Album".into()), "x.jpg".into()), id("album"));

        let ready = Arc::new(ObjectEntry::new("ready.jpg"));
        ready.materialize(id("object"));
        fakes.objects.insert("ready.jpg".into(), ready);
        fakes.objects.insert("pending.jpg".into(), Arc::new(ObjectEntry::new("pending.jpg")));
        fakes
    }

    fn context(fakes: Arc<Fakes>) -> ResolutionContext {
        ResolutionContext::new()
            .with_remote(fakes.clone())
            .with_local(fakes.clone())
            .with_albums(fakes.clone())
            .with_objects(fakes)
            .with_poll(PollConfig { timeout_ms: 100, interval_ms: 10 })
    }

    fn recipe(images: &[&str]) -> Recipe {
        let yaml = format!("name: Pie\npublished: 2021-01-01\nimages: {images:?}\n");
        Recipe::from_yaml(&yaml, "pie").unwrap()
    }

    #[tokio::test]
    async fn one_failure_does_not_block_siblings() {
        let cx = context(Arc::new(fakes()));
        let images = parse_all([
            "file://recipe/a.jpg",
            "https://good.example/1.jpg",
            "https://bad.example/2.jpg",
            "gphotos://Family+Album/x.jpg",
            "s3://bucket/ready.jpg",
        ]).unwrap();

        let pie = RecipeId::new("pie");
        let results = resolve_all(&images, &pie, &cx).await;
        assert_eq!(results.len(), 5);
        assert_eq!(results[0], Ok(id("local")));
        assert_eq!(results[1], Ok(AssetId::derive(&["http", "https://good.example/1.jpg", "recipe-pie"])));
        assert_eq!(results[2], Err(ImageError::Fetch { url: "https://bad.example/2.jpg".into() }));
        assert_eq!(results[3], Ok(id("album")));
        assert_eq!(results[4], Ok(id("object")));
    }

    #[tokio::test]
    async fn equal_references_are_fetched_once() {
        let fakes = Arc::new(fakes());
        let cx = context(fakes.clone());
        let images = parse_all([
            "https://good.example/1.jpg",
            "file:///b.jpg",
            "https://good.example/1.jpg",
        ]).unwrap();

        let results = resolve_all(&images, &RecipeId::new("pie"), &cx).await;
        assert_eq!(fakes.fetched.lock().len(), 1);
        assert_eq!(results[0], results[2]);
        assert_eq!(results[1], Ok(id("programmatic")));
    }

    #[tokio::test]
    async fn misses_are_not_found() {
        let cx = context(Arc::new(fakes()));
        let pie = RecipeId::new("pie");
        for raw in ["file://recipe/nope.jpg", "gphotos:///x.jpg", "s3:///unknown.jpg"] {
            let image = ImageRef::parse(raw).unwrap();
            let result = resolve(&image, &pie, &cx).await;
            assert!(matches!(result, Err(ImageError::AssetNotFound { .. })), "{raw}: {result:?}");
        }
    }

    #[tokio::test]
    async fn unconfigured_collaborators_find_nothing() {
        let cx = ResolutionContext::new();
        let pie = RecipeId::new("pie");
        let remote = ImageRef::parse("https://x/y.jpg").unwrap();
        assert!(matches!(resolve(&remote, &pie, &cx).await, Err(ImageError::Fetch { .. })));

        let local = ImageRef::parse("file:///y.jpg").unwrap();
        assert!(matches!(resolve(&local, &pie, &cx).await, Err(ImageError::AssetNotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn object_store_waits_for_materialization() {
        let fakes = Arc::new(fakes());
        let cx = context(fakes.clone()).with_poll(PollConfig::default());

        let entry = fakes.objects["pending.jpg"].clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            entry.materialize(id("late"));
        });

        let start = Instant::now();
        let image = ImageRef::parse("s3:///pending.jpg").unwrap();
        let result = resolve(&image, &RecipeId::new("pie"), &cx).await;
        assert_eq!(result, Ok(id("late")));
        assert!(start.elapsed() >= Duration::from_millis(2500));
        assert!(start.elapsed() < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn object_store_times_out_or_cancels() {
        let fakes = Arc::new(fakes());
        let image = ImageRef::parse("s3:///pending.jpg").unwrap();
        let pie = RecipeId::new("pie");

        let result = resolve(&image, &pie, &context(fakes.clone())).await;
        assert_eq!(result, Err(ImageError::Timeout {
            reference: "s3:///pending.jpg".into(),
            timeout: Duration::from_millis(100),
        }));

        let (handle, cancel) = Cancel::pair();
        let cx = context(fakes).with_cancel(cancel);
        handle.cancel();
        let result = resolve(&image, &pie, &cx).await;
        assert!(matches!(result, Err(ImageError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn failing_policy_reports_everything() {
        let cx = context(Arc::new(fakes()));
        let recipes = vec![
            recipe(&["file://recipe/a.jpg", "https://bad.example/2.jpg"]),
            recipe(&["gphotos://Family+Album/x.jpg"]),
        ];

        let error = resolve_recipes(&recipes, &cx, &OnError::Fail, 4).await.unwrap_err();
        let rendered = error.to_string();
        assert!(rendered.contains("failed to resolve recipe images"));
        assert!(rendered.contains("https://bad.example/2.jpg"));
        assert!(rendered.contains("scheme: http"));

        assert!(recipes[0].image_assets().is_empty());
        assert_eq!(recipes[1].image_assets(), [id("album")]);
    }

    #[tokio::test]
    async fn placeholder_policy_keeps_positions() {
        let cx = context(Arc::new(fakes()));
        let recipes = vec![recipe(&["https://bad.example/2.jpg", "file://recipe/a.jpg"])];
        let policy = OnError::Placeholder(id("placeholder"));

        let unresolved = resolve_recipes(&recipes, &cx, &policy, 1).await.unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].recipe, RecipeId::new("pie"));
        assert_eq!(unresolved[0].scheme, "http");
        assert_eq!(recipes[0].image_assets(), [id("placeholder"), id("local")]);
    }

    #[tokio::test]
    async fn failures_name_references_as_written() {
        let cx = context(Arc::new(fakes()));
        let raw = ["s3://my-bucket/k.jpg", "file://Recipe/My%20Pie.jpg", "file://recipe/a.jpg"];
        let recipes = vec![recipe(&raw)];
        let policy = OnError::Placeholder(id("placeholder"));

        let unresolved = resolve_recipes(&recipes, &cx, &policy, 1).await.unwrap();
        assert_eq!(unresolved.len(), 2);
        assert_eq!(unresolved[0].reference, "s3://my-bucket/k.jpg");
        assert_eq!(unresolved[0].error, ImageError::AssetNotFound { reference: raw[0].into() });
        assert_eq!(unresolved[1].reference, "file://Recipe/My%20Pie.jpg");
        assert!(unresolved[1].error.to_string().contains("file://Recipe/My%20Pie.jpg"));
    }

    #[tokio::test]
    async fn cancelled_builds_fail_regardless_of_policy() {
        let (handle, cancel) = Cancel::pair();
        let cx = context(Arc::new(fakes())).with_cancel(cancel);
        handle.cancel();

        let recipes = vec![recipe(&["https://good.example/1.jpg"])];
        let policy = OnError::Placeholder(id("placeholder"));
        assert!(resolve_recipes(&recipes, &cx, &policy, 1).await.is_err());
    }
}
