use std::sync::Arc;
use std::time::Instant;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use larder::Renderer;
use larder::asset::AssetStore;
use larder::error::Result;
use larder::templating::minijinja::MiniJinjaEngine;

use crate::discover::Cookbook;

mod config;
mod discover;
mod render;
mod resolve;
mod util;

pub const CONTENT_DIR: &str = "content";
pub const RECIPE_DIR: &str = "content/recipes";
pub const TEMPLATE_DIR: &str = "templates";
pub const ASSETS_DIR: &str = "assets";
pub const CONFIG_FILE: &str = "config.toml";

mod flags {
    use std::path::PathBuf;

    xflags::xflags! {
        /// Builds a recipe website.
        cmd cookbook {
            /// Log debug output.
            optional -v,--verbose

            /// Builds the site in `input` into `output`.
            cmd build {
                required input: PathBuf
                required output: PathBuf
                /// Number of rendering threads.
                optional -j,--jobs n: usize
                /// Only use images already in the download cache.
                optional --offline
            }

            /// Loads every recipe and resolves its images without rendering.
            cmd check {
                required input: PathBuf
                /// Only use images already in the download cache.
                optional --offline
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn build(cmd: flags::Build, verbose: bool) -> Result<()> {
    if let Some(jobs) = cmd.jobs {
        larder::rayon::ThreadPoolBuilder::new()
            .num_threads(jobs.max(1))
            .build_global()
            .map_err(|e| larder::error!("failed to configure rendering threads", e))?;
    }

    let start = Instant::now();
    let cookbook = Cookbook::new::<MiniJinjaEngine, _>(&cmd.input, Some(cmd.output))?
        .offline(cmd.offline);

    let assets = Arc::new(AssetStore::new());
    let site = cookbook.discover(assets)?;
    tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "discovery complete");

    let resolving = Instant::now();
    let unresolved = cookbook.resolve_images(&site)?;
    resolve::report(&unresolved);
    tracing::info!(elapsed_ms = resolving.elapsed().as_millis() as u64, "resolution complete");

    let rendering = Instant::now();
    let site = Arc::new(site);
    cookbook.render_site(&site)?;
    tracing::info!(elapsed_ms = rendering.elapsed().as_millis() as u64, "render complete");
    tracing::info!(elapsed_ms = start.elapsed().as_millis() as u64, "build complete");

    if verbose {
        site.visualize();
    }

    Ok(())
}

fn check(cmd: flags::Check, verbose: bool) -> Result<()> {
    let cookbook = Cookbook::new::<MiniJinjaEngine, _>(&cmd.input, None)?
        .offline(cmd.offline);

    let site = cookbook.discover(Arc::new(AssetStore::new()))?;
    let unresolved = cookbook.resolve_images(&site)?;
    resolve::report(&unresolved);
    if verbose {
        site.visualize();
    }

    tracing::info!(recipes = site.recipes.len(), "check passed");
    Ok(())
}

pub fn main() {
    let flags = flags::Cookbook::from_env_or_exit();
    init_logging(flags.verbose);

    let result = match flags.subcommand {
        flags::CookbookCmd::Build(cmd) => build(cmd, flags.verbose),
        flags::CookbookCmd::Check(cmd) => check(cmd, flags.verbose),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
