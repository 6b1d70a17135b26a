use std::sync::Arc;
use std::path::{Path, PathBuf};

use larder::Site;
use larder::asset::AssetStore;
use larder::error::{Chainable, Result};
use larder::fstree::{EntryId, FsTree};
use larder::rayon::prelude::*;
use larder::recipe::Recipe;
use larder::templating::EngineInit;

use crate::{ASSETS_DIR, CONTENT_DIR, RECIPE_DIR, TEMPLATE_DIR};
use crate::config::Config;
use crate::util::dircheck;

const RECIPE_EXTS: &[&str] = &["yaml", "yml", "md"];

#[derive(Debug)]
pub struct Cookbook {
    pub tree: Arc<FsTree>,
    pub config: Config,
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub recipe_root: Option<EntryId>,
    pub template_root: Option<EntryId>,
    pub asset_root: Option<EntryId>,
    pub offline: bool,
}

impl Cookbook {
    pub fn new<E, I>(input: I, output: Option<PathBuf>) -> Result<Self>
        where I: AsRef<Path>, E: EngineInit
    {
        let input = input.as_ref();
        let tree = Arc::new(FsTree::build(input)?);
        dircheck(&tree, None, CONTENT_DIR, true)?;

        Ok(Cookbook {
            input: input.to_path_buf(),
            output,
            recipe_root: dircheck(&tree, None, RECIPE_DIR, false)?,
            template_root: dircheck(&tree, None, TEMPLATE_DIR, false)?,
            asset_root: dircheck(&tree, None, ASSETS_DIR, false)?,
            config: Config::discover::<E>(tree.clone())?,
            offline: false,
            tree,
        })
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Resolves `path` from configuration against the input directory.
    pub fn input_path<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.input.join(path)
    }

    pub fn discover(&self, assets: Arc<AssetStore>) -> Result<Site> {
        let mut site = Site::new(self.tree.clone(), assets);
        self.build_site_items(&mut site);
        self.build_recipes(&mut site)?;
        site.finish();
        Ok(site)
    }

    fn build_site_items(&self, site: &mut Site) {
        let hidden = |filename: &str| filename.starts_with('.')
            || filename.starts_with('_')
            || filename.eq_ignore_ascii_case("include")
            || filename.eq_ignore_ascii_case("includes");

        let Some(asset_root) = self.asset_root else {
            return;
        };

        self.tree.depth_first_search(asset_root, |entry| {
            if hidden(&entry.file_name) {
                return false;
            }

            if entry.file_type.is_file() {
                site.add_resource(entry.id);
            }

            true
        });
    }

    fn build_recipes(&self, site: &mut Site) -> Result<()> {
        let Some(recipe_root) = self.recipe_root else {
            tracing::warn!("no `{RECIPE_DIR}` directory: the site has no recipes");
            return Ok(());
        };

        let files: Vec<_> = self.tree.files(recipe_root)
            .into_iter()
            .filter(|e| !e.is_hidden())
            .filter(|e| e.file_ext().is_some_and(|ext| RECIPE_EXTS.contains(&ext)))
            .collect();

        let recipes: Vec<Result<Recipe>> = files.par_iter()
            .map(|entry| Recipe::load(&entry.path))
            .collect();

        let mut errors = vec![];
        for recipe in recipes {
            match recipe.and_then(|r| site.add_recipe(r)) {
                Ok(()) => {},
                Err(e) => errors.push(e),
            }
        }

        match errors.into_iter().reduce(|a, b| a.chain(b)) {
            Some(error) => Err(error).chain_with(|| format!("failed to load recipes in {RECIPE_DIR}")),
            None => {
                tracing::info!(recipes = site.recipes.len(), "discovered recipes");
                Ok(())
            }
        }
    }
}
