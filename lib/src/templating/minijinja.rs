use std::sync::Arc;

use minijinja::{Environment, path_loader};
use minijinja::value::{Rest, Value};
use serde::Serialize;

use crate::error::Result;
use crate::fstree::{FsTree, EntryId};
use crate::templating::{Engine, EngineInit};

#[derive(Debug)]
pub struct MiniJinjaEngine {
    env: Environment<'static>,
}

fn init<G: Serialize>(tree: Arc<FsTree>, root: Option<EntryId>, globals: G) -> Environment<'static> {
    let mut env = Environment::new();
    if let Some(root) = root {
        env.set_loader(path_loader(&tree[root].path));
    }

    let globals = Value::from_serializable(&globals);
    let url_root: Arc<str> = globals.get_attr("root").ok()
        .and_then(|v| v.as_str().map(Arc::from))
        .unwrap_or_else(|| "/".into());

    env.add_global("G", globals);
    env.add_function("url", move |parts: Rest<Arc<str>>| ext::url(&url_root, &parts));
    env.add_filter("date", ext::date);
    env.add_filter("category_title", ext::category_title);
    env.add_filter("slugify", ext::slugify);
    env.add_filter("markdown", ext::markdown);
    env
}

impl EngineInit for MiniJinjaEngine {
    type Engine = Self;

    fn init<G: Serialize>(tree: Arc<FsTree>, root: Option<EntryId>, globals: G) -> Self::Engine {
        MiniJinjaEngine { env: init(tree, root, globals) }
    }
}

impl Engine for MiniJinjaEngine {
    fn render(&self, name: &str, context: &serde_json::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        Ok(template.render(Value::from_serializable(context))?)
    }

    fn render_str(
        &self,
        name: Option<&str>,
        template_str: &str,
        context: &serde_json::Value,
    ) -> Result<String> {
        let context = Value::from_serializable(context);
        let string = match name {
            Some(name) => self.env.render_named_str(name, template_str, context)?,
            None => self.env.render_str(template_str, context)?,
        };

        Ok(string)
    }
}

mod ext {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
    use minijinja::{value::Value, Error, ErrorKind};

    use crate::markdown::Markdown;

    /// Joins `parts` onto the site root with single slashes.
    pub fn url(root: &str, parts: &[std::sync::Arc<str>]) -> Value {
        let mut url = root.trim_end_matches('/').to_string();
        for part in parts.iter().map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
            url.push('/');
            url.push_str(part);
        }

        let trailing = parts.last().map_or(true, |p| p.ends_with('/'));
        if trailing || url.is_empty() {
            url.push('/');
        }

        Value::from_safe_string(url)
    }

    pub fn date(value: Value, fmt: &str) -> Result<Value, Error> {
        if let Ok(ts) = i64::try_from(value.clone()) {
            let datetime = DateTime::<Utc>::from_timestamp(ts, 0)
                .ok_or_else(|| Error::new(
                    ErrorKind::InvalidOperation,
                    "invalid timestamp provided to `date`"
                ))?;

            return Ok(datetime.format(fmt).to_string().into());
        }

        let kind = value.kind();
        let string = value.as_str().ok_or_else(|| Error::new(
            ErrorKind::InvalidOperation,
            format!("`date` must be applied to a string or integer, found {kind}")
        ))?;

        let formatted = string.parse::<NaiveDate>().map(|d| d.format(fmt))
            .or_else(|_| string.parse::<NaiveDateTime>().map(|dt| dt.format(fmt)))
            .or_else(|_| string.parse::<DateTime<Utc>>().map(|dt| dt.format(fmt)))
            .map_err(|e| Error::new(
                ErrorKind::InvalidOperation,
                format!("failed to parse {string}: {e}")
            ))?;

        Ok(formatted.to_string().into())
    }

    pub fn category_title(value: &str) -> String {
        crate::util::category_title(value)
    }

    pub fn slugify(value: &str) -> String {
        crate::util::slugify(value)
    }

    /// Renders markdown to HTML. With `inline`, a lone paragraph is unwrapped.
    pub fn markdown(value: &str, inline: Option<bool>) -> Value {
        let markdown = Markdown::default();
        let html = match inline {
            Some(true) => markdown.to_inline_html(value),
            _ => markdown.to_html(value),
        };

        Value::from_safe_string(html)
    }
}

impl_error_detail_with_std_error!(minijinja::Error);

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;

    fn engine(dir: &std::path::Path) -> MiniJinjaEngine {
        let tree = Arc::new(FsTree::build(dir).unwrap());
        let root = tree.get_id(None, "templates");
        MiniJinjaEngine::init(tree, root, json!({ "root": "/recipes/", "title": "Things We Make" }))
    }

    #[test]
    fn renders_named_templates_with_globals_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("templates")).unwrap();
        fs::write(
            dir.path().join("templates/page.html"),
            "{{ G.title }}|{{ name }}|{{ published | date('%B %-d, %Y') }}|\
             {{ category | category_title }}|{{ url(category | slugify, '/') }}|\
             {{ tip | markdown(true) }}",
        ).unwrap();

        let engine = engine(dir.path());
        let context = json!({
            "name": "Pie",
            "published": "2021-10-03",
            "category": "Main Dishes",
            "tip": "Use *cold* butter.",
        });

        let html = engine.render("page.html", &context).unwrap();
        assert_eq!(
            html,
            "Things We Make|Pie|October 3, 2021|Main Dishes|/recipes/main-dishes/|Use <em>cold</em> butter."
        );

        assert!(engine.render("missing.html", &context).is_err());
    }

    #[test]
    fn renders_strings_and_urls() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());

        let context = json!({ "slug": "pie" });
        let rendered = engine.render_str(None, "{{ url() }} {{ url(slug, '/') }} {{ url('images', 'a.jpg') }}", &context);
        assert_eq!(rendered.unwrap(), "/recipes/ /recipes/pie/ /recipes/images/a.jpg");

        let error = engine.render_str(Some("bad"), "{{ 'x' | date('%Y') }}", &context).unwrap_err();
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn unconfigured_root_defaults_to_slash() {
        let dir = tempfile::tempdir().unwrap();
        let tree = Arc::new(FsTree::build(dir.path()).unwrap());
        let engine = MiniJinjaEngine::init(tree, None, json!({}));
        let rendered = engine.render_str(None, "{{ url('a', '/') }}", &json!({})).unwrap();
        assert_eq!(rendered, "/a/");
    }
}
