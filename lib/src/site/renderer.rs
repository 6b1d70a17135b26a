use std::sync::Arc;

use rayon::prelude::*;

use crate::asset::Asset;
use crate::error::Result;
use crate::fstree::Entry;
use crate::recipe::Recipe;
use crate::site::Site;

/// The site-wide pages every build renders once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Page {
    Index,
    Categories,
    NotFound,
    Search,
}

impl Page {
    pub const ALL: [Page; 4] = [Page::Index, Page::Categories, Page::NotFound, Page::Search];
}

#[inline(always)]
pub fn render_site<R>(renderer: &R, site: &Arc<Site>) -> Result<R::Output>
    where R: Renderer + ?Sized
{
    let (rendered, copied): (Result<R::Output>, _) = rayon::join(
        || site.recipes.par_iter()
            .map(|recipe| renderer.render_recipe(site, recipe))
            .chain(site.categories.par_iter().map(|(name, _)| renderer.render_category(site, name)))
            .chain(Page::ALL.par_iter().map(|&page| renderer.render_page(site, page)))
            .collect(),
        || copy_files(renderer, site),
    );

    match (rendered, copied) {
        (Ok(v), Ok(_)) => Ok(v),
        (Ok(_), Err(e)) | (Err(e), Ok(_)) => Err(e),
        (Err(e1), Err(e2)) => Err(e1.chain(e2)),
    }
}

fn copy_files<R>(renderer: &R, site: &Arc<Site>) -> Result<()>
    where R: Renderer + ?Sized
{
    let assets = site.image_assets();
    let (resources, images) = rayon::join(
        || site.resources.par_iter().try_for_each(|&id| renderer.render_resource(site, &site.tree[id])),
        || assets.par_iter().try_for_each(|asset| renderer.render_asset(site, asset)),
    );

    match (resources, images) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(e)) | (Err(e), Ok(())) => Err(e),
        (Err(e1), Err(e2)) => Err(e1.chain(e2)),
    }
}

pub trait Renderer: Sync {
    type Output: FromParallelIterator<Self::Render> + Send;

    type Render: Send;

    #[inline(always)]
    fn render_site(&self, site: &Arc<Site>) -> Result<Self::Output> {
        render_site(self, site)
    }

    fn render_recipe(&self, site: &Arc<Site>, recipe: &Recipe) -> Result<Self::Render>;

    fn render_category(&self, site: &Arc<Site>, category: &str) -> Result<Self::Render>;

    fn render_page(&self, site: &Arc<Site>, page: Page) -> Result<Self::Render>;

    /// Publishes a static resource, such as a stylesheet.
    fn render_resource(&self, site: &Arc<Site>, entry: &Entry) -> Result<()>;

    /// Publishes an image some recipe refers to.
    fn render_asset(&self, site: &Arc<Site>, asset: &Asset) -> Result<()>;
}
