use std::collections::BTreeMap;
use std::sync::Arc;

use derive_more::Debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::asset::{Asset, AssetStore};
use crate::error::Result;
use crate::fstree::{EntryId, FsTree};
use crate::recipe::Recipe;

/// Everything a build renders: recipes, their categories, the static
/// resources copied as-is, and the assets recipes refer to.
#[derive(Debug)]
pub struct Site {
    #[debug(ignore)]
    pub tree: Arc<FsTree>,
    pub recipes: Vec<Recipe>,
    /// Category name to indices into `recipes`, newest recipe first.
    pub categories: BTreeMap<String, Vec<usize>>,
    pub resources: Vec<EntryId>,
    #[debug(ignore)]
    pub assets: Arc<AssetStore>,
    by_slug: FxHashMap<String, usize>,
}

/// Categories sharing a first letter, for the category index.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CategoryGroup<'a> {
    pub letter: String,
    pub categories: Vec<(&'a str, usize)>,
}

impl Site {
    pub fn new(tree: Arc<FsTree>, assets: Arc<AssetStore>) -> Site {
        Site {
            tree,
            recipes: vec![],
            categories: BTreeMap::new(),
            resources: vec![],
            assets,
            by_slug: FxHashMap::default(),
        }
    }

    /// Adds a recipe. Two recipes may not share a slug.
    pub fn add_recipe(&mut self, recipe: Recipe) -> Result<()> {
        if self.by_slug.contains_key(&recipe.slug) {
            return err!("two recipes share a slug", "slug" => &recipe.slug);
        }

        self.by_slug.insert(recipe.slug.clone(), self.recipes.len());
        self.recipes.push(recipe);
        Ok(())
    }

    pub fn add_resource(&mut self, id: EntryId) {
        self.resources.push(id);
    }

    /// Orders recipes newest first and indexes them by category. Call once
    /// every recipe has been added.
    pub fn finish(&mut self) {
        self.recipes.sort_by(|a, b| b.published.cmp(&a.published).then_with(|| a.slug.cmp(&b.slug)));

        self.by_slug.clear();
        self.categories.clear();
        for (i, recipe) in self.recipes.iter().enumerate() {
            self.by_slug.insert(recipe.slug.clone(), i);
            for category in &recipe.categories {
                let list = self.categories.entry(category.clone()).or_default();
                if list.last() != Some(&i) {
                    list.push(i);
                }
            }
        }
    }

    pub fn recipe(&self, slug: &str) -> Option<&Recipe> {
        self.by_slug.get(slug).map(|&i| &self.recipes[i])
    }

    /// The newest recipe marked as featured.
    pub fn featured(&self) -> Option<&Recipe> {
        self.recipes.iter().find(|r| r.featured)
    }

    /// The `n` newest recipes, less the featured one.
    pub fn latest(&self, n: usize) -> Vec<&Recipe> {
        let featured = self.featured().map(|r| r.slug.as_str());
        self.recipes.iter()
            .take(n)
            .filter(|r| Some(r.slug.as_str()) != featured)
            .collect()
    }

    pub fn category(&self, name: &str) -> Vec<&Recipe> {
        self.categories.get(name)
            .map(|list| list.iter().map(|&i| &self.recipes[i]).collect())
            .unwrap_or_default()
    }

    pub fn category_groups(&self) -> Vec<CategoryGroup<'_>> {
        let mut groups: Vec<CategoryGroup<'_>> = vec![];
        for (name, recipes) in &self.categories {
            let entry = (name.as_str(), recipes.len());
            let letter: String = name.chars().next()
                .map(|c| c.to_uppercase().collect())
                .unwrap_or_default();

            match groups.last_mut() {
                Some(group) if group.letter == letter => group.categories.push(entry),
                _ => groups.push(CategoryGroup { letter, categories: vec![entry] }),
            }
        }

        groups
    }

    /// Every asset some recipe refers to, each once.
    pub fn image_assets(&self) -> Vec<Arc<Asset>> {
        let mut seen = FxHashSet::default();
        self.recipes.iter()
            .flat_map(|r| r.image_assets())
            .filter(|id| seen.insert(*id))
            .filter_map(|id| self.assets.get(id))
            .collect()
    }

    /// Prints the site's recipes and their images as a tree.
    pub fn visualize(&self) {
        println!("🗂  {} recipes, {} categories", self.recipes.len(), self.categories.len());
        for (i, recipe) in self.recipes.iter().enumerate() {
            let last = i == self.recipes.len() - 1;
            println!("{} 📝 {} ({})", if last { "└──" } else { "├──" }, recipe.slug, recipe.published);

            let assets = recipe.image_assets();
            for (j, image) in recipe.images.iter().enumerate() {
                let branch = if j == recipe.images.len() - 1 { "└──" } else { "├──" };
                let resolved = assets.get(j).map_or("unresolved".to_string(), |id| id.to_string());
                println!("{}   {branch} 🖼  {image} → {resolved}", if last { " " } else { "│" });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::asset::{AssetId, Origin};

    fn recipe(slug: &str, published: &str, categories: &[&str], featured: bool) -> Recipe {
        let yaml = format!(
            "slug: {slug}\nname: {slug}\npublished: {published}\ncategories: {categories:?}\nfeatured: {featured}\n"
        );

        Recipe::from_yaml(&yaml, slug).unwrap()
    }

    fn site() -> Site {
        let dir = tempfile::tempdir().unwrap();
        let tree = Arc::new(FsTree::build(dir.path()).unwrap());
        let mut site = Site::new(tree, Arc::new(AssetStore::new()));
        site.add_recipe(recipe("soup", "2021-01-05", &["dinner", "soups"], false)).unwrap();
        site.add_recipe(recipe("pie", "2021-03-01", &["dessert", "baking"], true)).unwrap();
        site.add_recipe(recipe("cake", "2021-06-01", &["dessert", "baking", "dessert"], false)).unwrap();
        site.add_recipe(recipe("bread", "2020-12-01", &["baking"], false)).unwrap();
        site.finish();
        site
    }

    #[test]
    fn recipes_are_newest_first() {
        let site = site();
        let slugs: Vec<_> = site.recipes.iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(slugs, ["cake", "pie", "soup", "bread"]);
        assert_eq!(site.recipe("soup").unwrap().slug, "soup");
    }

    #[test]
    fn featured_is_excluded_from_latest() {
        let site = site();
        assert_eq!(site.featured().unwrap().slug, "pie");

        let latest: Vec<_> = site.latest(3).iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(latest, ["cake", "soup"]);
    }

    #[test]
    fn categories_are_indexed_and_grouped() {
        let site = site();
        let dessert: Vec<_> = site.category("dessert").iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(dessert, ["cake", "pie"]);
        assert!(site.category("nope").is_empty());

        let groups = site.category_groups();
        let letters: Vec<_> = groups.iter().map(|g| g.letter.as_str()).collect();
        assert_eq!(letters, ["B", "D", "S"]);
        assert_eq!(groups[1].categories, [("dessert", 2), ("dinner", 1)]);
    }

    #[test]
    fn duplicate_slugs_are_rejected() {
        let mut site = site();
        assert!(site.add_recipe(recipe("pie", "2022-01-01", &[], false)).is_err());
    }

    #[test]
    fn image_assets_are_deduplicated() {
        let mut site = site();
        let asset = site.assets.register(Asset::new(
            Path::new("/tmp/a.jpg").into(),
            Origin::Source { name: "recipe".into(), path: "a.jpg".into() },
            None,
        ));

        let yaml = "slug: twice\nname: Twice\npublished: 2019-01-01\nimages: [file://recipe/a.jpg, file://recipe/a.jpg]\n";
        site.add_recipe(Recipe::from_yaml(yaml, "twice").unwrap()).unwrap();
        site.finish();

        let twice = site.recipe("twice").unwrap();
        twice.attach_image_assets(vec![asset.id.clone(), asset.id.clone()]);
        assert_eq!(site.image_assets().len(), 1);
        assert_eq!(site.image_assets()[0].id, asset.id);
        assert_ne!(asset.id, AssetId::derive(&["placeholder"]));
    }
}
