use std::path::PathBuf;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Deserialize;

use larder::error::Result;
use larder::format::{Format, Toml};
use larder::fstree::FsTree;
use larder::image::PollConfig;
use larder::templating::{Engine, EngineInit};

#[derive(Debug)]
pub struct Config {
    pub engine: Arc<dyn Engine>,
    pub settings: Settings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub title: String,
    pub root: String,
    pub images: ImageSettings,
    pub sources: Vec<SourceSettings>,
    pub albums: Option<AlbumSettings>,
    pub object_store: Option<ObjectStoreSettings>,
    pub globals: FxHashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnErrorSetting {
    #[default]
    Fail,
    Placeholder,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub on_error: OnErrorSetting,
    pub placeholder: Option<PathBuf>,
    pub concurrency: usize,
    pub cache_dir: PathBuf,
    pub retries: u32,
    #[serde(flatten)]
    pub poll: PollConfig,
}

/// A local directory of images. Unnamed sources are the default bucket.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSettings {
    #[serde(default)]
    pub name: Option<String>,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlbumSettings {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreSettings {
    pub base_url: String,
    pub listing: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            title: "Recipes".into(),
            root: "/".into(),
            images: ImageSettings::default(),
            sources: vec![],
            albums: None,
            object_store: None,
            globals: FxHashMap::default(),
        }
    }
}

impl Default for ImageSettings {
    fn default() -> Self {
        ImageSettings {
            on_error: OnErrorSetting::Fail,
            placeholder: None,
            concurrency: 8,
            cache_dir: PathBuf::from(".cache/images"),
            retries: 2,
            poll: PollConfig::default(),
        }
    }
}

impl Settings {
    /// The configured image sources, or the recipe directory as source
    /// `recipe` when none are configured.
    pub fn sources(&self) -> Vec<SourceSettings> {
        if !self.sources.is_empty() {
            return self.sources.clone();
        }

        vec![SourceSettings { name: Some("recipe".into()), path: crate::RECIPE_DIR.into() }]
    }

    /// The values every template sees as `G`.
    pub fn template_globals(&self) -> serde_json::Value {
        serde_json::json!({
            "title": self.title,
            "root": self.root,
            "globals": self.globals,
        })
    }
}

/// Makes a root URL prefix absolute with a trailing slash.
fn normalize_root(root: &str) -> String {
    let mut root = root.trim().to_string();
    if !root.contains("://") && !root.starts_with('/') {
        root.insert(0, '/');
    }

    if !root.ends_with('/') {
        root.push('/');
    }

    root
}

impl Config {
    pub fn discover<E: EngineInit>(tree: Arc<FsTree>) -> Result<Self> {
        let mut settings: Settings = match tree.get_file_id(None, crate::CONFIG_FILE) {
            Some(id) => Toml::read(&*tree[id].path)?,
            None => Settings::default(),
        };

        settings.root = normalize_root(&settings.root);
        settings.images.concurrency = settings.images.concurrency.max(1);
        let templates_entry = crate::util::dircheck(&tree, None, crate::TEMPLATE_DIR, false)?;
        let engine = Arc::new(E::init(tree.clone(), templates_entry, settings.template_globals()));
        Ok(Config { engine, settings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roots_are_normalized() {
        assert_eq!(normalize_root(""), "/");
        assert_eq!(normalize_root("recipes"), "/recipes/");
        assert_eq!(normalize_root("/recipes/"), "/recipes/");
        assert_eq!(normalize_root("https://example.com"), "https://example.com/");
    }

    #[test]
    fn settings_parse_with_defaults() {
        let settings: Settings = Toml::from_str(r#"
            title = "Things We Make"

            [images]
            on_error = "placeholder"
            placeholder = "assets/missing.jpg"
            timeout_ms = 500

            [[sources]]
            path = "photos"

            [[sources]]
            name = "recipe"
            path = "content/recipes"

            [object_store]
            base_url = "https://cdn.example/"
            listing = "objects.json"

            [globals]
            tagline = "From us to you"
        "#).unwrap();

        assert_eq!(settings.title, "Things We Make");
        assert_eq!(settings.images.on_error, OnErrorSetting::Placeholder);
        assert_eq!(settings.images.poll.timeout_ms, 500);
        assert_eq!(settings.images.poll.interval_ms, 1000);
        assert_eq!(settings.images.concurrency, 8);
        assert_eq!(settings.sources.len(), 2);
        assert_eq!(settings.sources[0].name, None);
        assert!(settings.albums.is_none());
        assert_eq!(settings.globals["tagline"], "From us to you");
    }

    #[test]
    fn recipes_are_the_default_source() {
        let sources = Settings::default().sources();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name.as_deref(), Some("recipe"));
    }
}
