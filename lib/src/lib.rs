#![doc = svgbobdoc::transform!(
//! A toolkit for building recipe websites.
//!
//! # Overview
//!
//! Larder turns a directory of recipes into a static web site. Recipes are
//! YAML documents (or markdown with YAML front matter) that, among other
//! things, name their photos with URIs:
//!
//! ```yaml
//! images:
//!   - file://recipe/pie/top.jpg          # a file in a local source
//!   - https://example.com/pie.jpg        # fetched and cached
//!   - gphotos://Family+Album/pie.jpg     # a photo in an album
//!   - s3://bucket/pie/slice.jpg          # an object-store key
//! ```
//!
//! A build moves through the following phases:
//!
//! ```svgbob
//!  +-----------+     +-----------+     +-----------+     +-----------+
//!  | discover  |---->|  catalog  |---->|  resolve  |---->|  render   |
//!  +-----------+     +-----------+     +-----------+     +-----------+
//!   recipes,          sources,          ImageRef ->       pages, images,
//!   ImageRefs         albums, objects,  AssetId           stylesheets
//!                     http cache
//! ```
//!
//! 1. Files are read into an [`FsTree`](fstree::FsTree); recipes are loaded
//!    and their image references parsed with
//!    [`ImageRef::parse()`](image::ImageRef::parse). A bad reference fails
//!    the build.
//! 2. Catalogs of locally available images are built, each registering
//!    [`Asset`](asset::Asset)s in a shared [`AssetStore`](asset::AssetStore).
//! 3. Every recipe's references are resolved concurrently through a
//!    [`ResolutionContext`](image::ResolutionContext), yielding one
//!    [`AssetId`](asset::AssetId) per reference, in order.
//! 4. A [`Renderer`] writes the [`Site`] out in parallel.
)]

#[macro_use]
pub mod error;
pub mod util;
pub mod fstree;
pub mod format;
pub mod markdown;
pub mod recipe;
pub mod asset;
pub mod image;
pub mod site;
pub mod templating;

pub use site::*;

pub use rayon;
