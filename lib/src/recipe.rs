use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Deserializer, Serialize};

use crate::asset::AssetId;
use crate::error::{Chainable, Result};
use crate::format::{Format, Yaml};
use crate::image::{self, ImageRef};
use crate::markdown::FrontMatter;
use crate::util::slugify;

/// Identifies a recipe within a build: `recipe-<slug>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecipeId(Arc<str>);

impl RecipeId {
    pub fn new(slug: &str) -> Self {
        RecipeId(format!("recipe-{slug}").into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct IngredientSection {
    #[serde(default)]
    pub name: Option<String>,
    pub ingredients: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct InstructionSection {
    #[serde(default)]
    pub name: Option<String>,
    pub instructions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    #[serde(default)]
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub cuisine: String,
    #[serde(default)]
    pub total_time: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub servings: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub published: NaiveDate,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub ingredient_sections: Vec<IngredientSection>,
    #[serde(default)]
    pub instruction_sections: Vec<InstructionSection>,
    #[serde(default)]
    pub tips: Option<String>,
    #[serde(default)]
    pub featured: bool,
    #[serde(skip)]
    image_refs: Vec<ImageRef>,
    #[serde(skip)]
    image_assets: OnceCell<Vec<AssetId>>,
}

fn string_or_number<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        String(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Scalar::deserialize(de)? {
        Scalar::String(s) => s,
        Scalar::Int(n) => n.to_string(),
        Scalar::Float(n) => n.to_string(),
    })
}

impl Recipe {
    /// Loads a recipe from a `.yaml`/`.yml` file, or from a `.md` file whose
    /// YAML front matter holds the recipe and whose body is its description.
    pub fn load(path: &Path) -> Result<Recipe> {
        let string = std::fs::read_to_string(path).chain_with(|| error! {
            "failed to read recipe",
            "path" => path.display(),
        })?;

        let stem = path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();

        let recipe = match path.extension().and_then(|e| e.to_str()) {
            Some("md") => Recipe::from_markdown(&string, stem),
            _ => Recipe::from_yaml(&string, stem),
        };

        recipe.chain_with(|| error!("invalid recipe", "path" => path.display()))
    }

    pub fn from_yaml(string: &str, stem: &str) -> Result<Recipe> {
        Yaml::from_str::<Recipe>(string)?.finish(stem)
    }

    pub fn from_markdown(string: &str, stem: &str) -> Result<Recipe> {
        let Some(front_matter) = FrontMatter::split(string) else {
            return err!("markdown recipe is missing `---` front matter");
        };

        let mut recipe: Recipe = front_matter.parse::<Yaml, _>()?;
        let body = front_matter.body.trim();
        if !body.is_empty() {
            recipe.description = Some(body.to_string());
        }

        recipe.finish(stem)
    }

    fn finish(mut self, stem: &str) -> Result<Recipe> {
        if self.slug.trim().is_empty() {
            self.slug = slugify(stem);
        }

        let slug = self.slug.as_str();
        if slug.is_empty()
            || matches!(slug, "." | "..")
            || slug.contains(['/', '\\'])
            || slug.chars().any(char::is_control)
        {
            return err! {
                "recipe slug must be a single, non-empty path segment",
                "slug" => format!("{slug:?}"),
                "file stem" => stem,
            };
        }

        self.image_refs = image::parse_all(&self.images)
            .chain_with(|| error!("recipe has a bad image reference", "recipe" => &self.slug))?;

        Ok(self)
    }

    pub fn id(&self) -> RecipeId {
        RecipeId::new(&self.slug)
    }

    /// The parsed image references, position-for-position with `images`.
    pub fn image_refs(&self) -> &[ImageRef] {
        &self.image_refs
    }

    /// Attaches the resolved image assets. Returns `false` if assets were
    /// already attached, in which case they are left unchanged.
    pub fn attach_image_assets(&self, assets: Vec<AssetId>) -> bool {
        debug_assert_eq!(assets.len(), self.image_refs.len());
        self.image_assets.set(assets).is_ok()
    }

    /// The resolved image assets, empty until attached.
    pub fn image_assets(&self) -> &[AssetId] {
        self.image_assets.get().map(|v| v.as_slice()).unwrap_or_default()
    }

    /// The first paragraph of the description, trimmed to roughly `max`
    /// characters on a word boundary.
    pub fn preview(&self, max: usize) -> String {
        let Some(description) = self.description.as_deref() else {
            return String::new();
        };

        let first = description.split("\n\n").next().unwrap_or_default().trim();
        let first = first.split_whitespace().collect::<Vec<_>>().join(" ");
        if first.chars().count() <= max {
            return first;
        }

        let mut preview = String::new();
        for word in first.split(' ') {
            if preview.chars().count() + word.chars().count() + 1 > max {
                break;
            }

            if !preview.is_empty() {
                preview.push(' ');
            }

            preview.push_str(word);
        }

        preview.push('…');
        preview
    }
}
