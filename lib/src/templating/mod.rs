pub mod minijinja;

use std::fmt::Debug;
use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::fstree::{EntryId, FsTree};

pub trait EngineInit {
    type Engine: Engine + 'static;

    /// Initializes an engine loading templates from `root`. `globals` are
    /// available to every template as `G`; its `root` field, if any, is the
    /// site's URL prefix.
    fn init<G: Serialize>(tree: Arc<FsTree>, root: Option<EntryId>, globals: G) -> Self::Engine;
}

pub trait Engine: Send + Sync + Debug {
    fn render(&self, name: &str, context: &serde_json::Value) -> Result<String>;

    fn render_str(
        &self,
        name: Option<&str>,
        template_str: &str,
        context: &serde_json::Value,
    ) -> Result<String>;
}
