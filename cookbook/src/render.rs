use std::sync::Arc;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;

use larder::{err, error, Page, Renderer, Site};
use larder::asset::Asset;
use larder::error::{Chainable, Result};
use larder::format::Grass;
use larder::fstree::Entry;
use larder::recipe::{Recipe, RecipeId};
use larder::util::{category_title, is_template, slugify};

use crate::discover::Cookbook;
use crate::util::write_file;

pub const IMAGE_DIR: &str = "images";
const PREVIEW_LEN: usize = 160;
const LATEST: usize = 5;

/// A recipe as templates see it: every recipe field plus where it lives.
#[derive(Debug, Serialize)]
struct RecipeView<'a> {
    id: RecipeId,
    url: String,
    image_urls: Vec<String>,
    preview: String,
    #[serde(flatten)]
    recipe: &'a Recipe,
}

impl Cookbook {
    fn output_dir(&self) -> Result<&Path> {
        match &self.output {
            Some(output) => Ok(output.as_path()),
            None => err!("no output directory was given"),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.settings.root, path.trim_start_matches('/'))
    }

    fn view<'a>(&self, site: &Site, recipe: &'a Recipe) -> RecipeView<'a> {
        let image_urls = recipe.image_assets().iter()
            .filter_map(|id| site.assets.get(id))
            .map(|asset| self.url(&format!("{IMAGE_DIR}/{}", asset.output_name())))
            .collect();

        RecipeView {
            id: recipe.id(),
            url: self.url(&format!("{}/", recipe.slug)),
            image_urls,
            preview: recipe.preview(PREVIEW_LEN),
            recipe,
        }
    }

    fn views<'a>(&self, site: &Site, recipes: Vec<&'a Recipe>) -> Vec<RecipeView<'a>> {
        recipes.into_iter().map(|r| self.view(site, r)).collect()
    }

    fn template_exists(&self, name: &str) -> bool {
        self.template_root.is_some_and(|root| self.tree.get_file_id(root, name).is_some())
    }

    fn render_template<C: Serialize>(&self, template: &str, output: PathBuf, context: C) -> Result<()> {
        let context = serde_json::to_value(context)?;
        let html = self.config.engine.render(template, &context)
            .chain_with(|| error! {
                "failed to render page",
                "template" => template,
                "output" => output.display(),
            })?;

        write_file(&output, html)
    }
}

impl Renderer for Cookbook {
    type Output = ();
    type Render = ();

    fn render_recipe(&self, site: &Arc<Site>, recipe: &Recipe) -> Result<()> {
        let output = self.output_dir()?.join(&recipe.slug).join("index.html");
        self.render_template("recipe.html", output, json!({
            "recipe": self.view(site, recipe),
        }))
    }

    fn render_category(&self, site: &Arc<Site>, category: &str) -> Result<()> {
        let slug = slugify(category);
        let output = self.output_dir()?.join("categories").join(&slug).join("index.html");
        self.render_template("category.html", output, json!({
            "name": category,
            "title": category_title(category),
            "url": self.url(&format!("categories/{slug}/")),
            "recipes": self.views(site, site.category(category)),
        }))
    }

    fn render_page(&self, site: &Arc<Site>, page: Page) -> Result<()> {
        let output = self.output_dir()?;
        match page {
            Page::Index => self.render_template("index.html", output.join("index.html"), json!({
                "featured": site.featured().map(|r| self.view(site, r)),
                "latest": self.views(site, site.latest(LATEST)),
                "recipes": site.recipes.len(),
            })),
            Page::Categories => self.render_template(
                "categories.html",
                output.join("categories").join("index.html"),
                json!({ "groups": site.category_groups() }),
            ),
            Page::NotFound if !self.template_exists("404.html") => {
                tracing::debug!("no 404.html template: skipping the not-found page");
                Ok(())
            }
            Page::NotFound => self.render_template("404.html", output.join("404.html"), json!({})),
            Page::Search => {
                let documents: Vec<_> = site.recipes.iter()
                    .map(|recipe| {
                        let view = self.view(site, recipe);
                        json!({
                            "name": recipe.name,
                            "url": view.url,
                            "image": view.image_urls.first(),
                            "preview": view.preview,
                            "keywords": recipe.keywords,
                            "categories": recipe.categories,
                        })
                    })
                    .collect();

                write_file(&output.join("search.json"), serde_json::to_string(&documents)?)
            }
        }
    }

    fn render_resource(&self, _: &Arc<Site>, entry: &Entry) -> Result<()> {
        let Some(asset_root) = self.asset_root.map(|id| &self.tree[id]) else {
            return Ok(());
        };

        let Some(relative) = entry.path_relative_to(asset_root) else {
            return err!("resource is outside of the asset directory", "path" => entry.path.display());
        };

        let output = self.output_dir()?.join(relative);
        match entry.file_ext() {
            Some("scss") | Some("sass") => {
                let css = Grass::default().compile(&entry.path)?;
                write_file(&output.with_extension("css"), css)
            }
            Some("html") | Some("htm") => {
                let content = std::fs::read_to_string(&entry.path)
                    .chain_with(|| error!("failed to read resource", "path" => entry.path.display()))?;

                if !is_template(&content) {
                    return write_file(&output, content);
                }

                let name = relative.to_string_lossy();
                let html = self.config.engine.render_str(Some(&*name), &content, &json!({}))
                    .chain_with(|| error!("failed to render direct resource", "path" => name))?;

                write_file(&output, html)
            }
            _ => copy(&entry.path, &output),
        }
    }

    fn render_asset(&self, _: &Arc<Site>, asset: &Asset) -> Result<()> {
        let output = self.output_dir()?.join(IMAGE_DIR).join(asset.output_name());
        copy(&asset.path, &output)
    }
}

fn copy(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::copy(from, to).map(|_| ()).chain_with(|| error! {
        "failed to copy file",
        "source path" => from.display(),
        "destination path" => to.display(),
    })
}
