use std::sync::Arc;

use larder::{err, Site};
use larder::asset::{Asset, AssetStore, Origin};
use larder::error::{Chainable, Result};
use larder::image::*;

use crate::config::OnErrorSetting;
use crate::discover::Cookbook;

/// The catalogs a build resolves images against.
#[derive(Debug)]
pub struct Catalogs {
    pub sources: Arc<SourceCatalog>,
    pub albums: Option<Arc<AlbumDirectory>>,
    pub objects: Option<Arc<ObjectStore>>,
    pub http: Arc<HttpCache>,
}

impl Cookbook {
    pub fn build_catalogs(&self, store: &Arc<AssetStore>) -> Result<Catalogs> {
        let settings = &self.config.settings;

        let mut sources = SourceCatalog::new();
        for source in settings.sources() {
            let dir = self.input_path(&source.path);
            if !dir.is_dir() {
                tracing::warn!(path = %dir.display(), "image source directory is missing");
                continue;
            }

            let name = source.name.as_deref().unwrap_or(PROGRAMMATIC_SOURCE);
            sources.add_source(name, &dir, store)?;
        }

        let albums = match &settings.albums {
            Some(albums) => Some(Arc::new(AlbumDirectory::build(&self.input_path(&albums.path), store)?)),
            None => None,
        };

        let objects = match &settings.object_store {
            Some(config) => {
                let listing = self.input_path(&config.listing);
                let store = ObjectStore::from_listing(&config.base_url, &listing)
                    .chain_with(|| "failed to read the object store listing")?;

                tracing::info!(objects = store.len(), base = %config.base_url, "found object store");
                Some(Arc::new(store))
            }
            None => None,
        };

        let http = HttpCache::new(self.input_path(&settings.images.cache_dir), store.clone())?
            .offline(self.offline)
            .retries(settings.images.retries);

        Ok(Catalogs { sources: Arc::new(sources), albums, objects, http: Arc::new(http) })
    }

    /// The configured failure policy. The placeholder image, if any, is
    /// registered as an asset.
    pub fn on_error(&self, store: &AssetStore) -> Result<OnError> {
        let images = &self.config.settings.images;
        match (images.on_error, &images.placeholder) {
            (OnErrorSetting::Fail, _) => Ok(OnError::Fail),
            (OnErrorSetting::Placeholder, None) => err! {
                "`images.on_error` is `placeholder` but no placeholder is configured",
                "hint" => "set `images.placeholder` to an image path",
            },
            (OnErrorSetting::Placeholder, Some(path)) => {
                let path = self.input_path(path);
                if !path.is_file() {
                    return err!("placeholder image does not exist", "path" => path.display());
                }

                let asset = store.register(Asset::new(path.into(), Origin::Placeholder, None));
                Ok(OnError::Placeholder(asset.id.clone()))
            }
        }
    }

    /// Resolves the images of every recipe in `site`, attaching the assets to
    /// each recipe. Interrupting the process cancels resolution.
    pub fn resolve_images(&self, site: &Site) -> Result<Vec<Unresolved>> {
        let store = &site.assets;
        let policy = self.on_error(store)?;
        let catalogs = self.build_catalogs(store)?;
        let images = &self.config.settings.images;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .chain_with(|| "failed to start the async runtime")?;

        let unresolved = runtime.block_on(async {
            let (handle, cancel) = Cancel::pair();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupted: cancelling image resolution");
                    handle.cancel();
                }
            });

            let mut cx = ResolutionContext::new()
                .with_remote(catalogs.http.clone())
                .with_local(catalogs.sources.clone())
                .with_poll(images.poll)
                .with_cancel(cancel);

            if let Some(albums) = &catalogs.albums {
                cx = cx.with_albums(albums.clone());
            }

            if let Some(objects) = &catalogs.objects {
                objects.materialize(catalogs.http.clone());
                cx = cx.with_objects(objects.clone());
            }

            resolve_recipes(&site.recipes, &cx, &policy, images.concurrency).await
        })?;

        tracing::info!(assets = store.len(), unresolved = unresolved.len(), "resolved images");
        Ok(unresolved)
    }
}

/// Logs every image that was replaced with the placeholder.
pub fn report(unresolved: &[Unresolved]) {
    for failure in unresolved {
        tracing::warn!(
            recipe = %failure.recipe,
            reference = %failure.reference,
            scheme = failure.scheme,
            "{}", failure.error,
        );
    }

    if !unresolved.is_empty() {
        tracing::warn!(count = unresolved.len(), "some images were replaced with the placeholder");
    }
}
