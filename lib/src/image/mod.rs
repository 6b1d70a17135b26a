//! Image references and their resolution to local assets.
//!
//! A recipe names its images with URIs. [`ImageRef::parse()`] turns each into
//! a typed descriptor, [`resolve()`] and [`resolve_all()`] find or fetch the
//! asset behind a descriptor through a [`ResolutionContext`], and
//! [`await_condition()`] provides the bounded poll used for catalogs that are
//! populated in the background.

mod reference;
mod poll;
mod resolve;
mod catalog;
mod http;

pub use reference::*;
pub use poll::*;
pub use resolve::*;
pub use catalog::*;
pub use http::*;

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("malformed image reference `{reference}`: {reason}")]
    Malformed { reference: String, reason: String },
    #[error("unsupported scheme `{scheme}` in image reference `{reference}`")]
    UnsupportedScheme { reference: String, scheme: String },
    #[error("no asset found for image reference `{reference}`")]
    AssetNotFound { reference: String },
    #[error("failed to fetch `{url}`")]
    Fetch { url: String },
    #[error("image reference `{reference}` did not materialize within {}ms", .timeout.as_millis())]
    Timeout { reference: String, timeout: Duration },
    #[error("resolution of `{reference}` was cancelled")]
    Cancelled { reference: String },
}

impl ImageError {
    /// Maps a failed poll for `reference` to the resolution error it implies.
    pub fn from_poll(reference: &ImageRef, error: PollError) -> Self {
        let reference = reference.to_string();
        match error {
            PollError::Timeout { timeout, .. } => ImageError::Timeout { reference, timeout },
            PollError::Cancelled => ImageError::Cancelled { reference },
        }
    }

    /// Replaces the reference this error names with `raw`, the text the
    /// recipe author wrote. Fetch errors keep their URL.
    pub fn with_reference(mut self, raw: &str) -> Self {
        match &mut self {
            ImageError::Malformed { reference, .. }
            | ImageError::UnsupportedScheme { reference, .. }
            | ImageError::AssetNotFound { reference }
            | ImageError::Timeout { reference, .. }
            | ImageError::Cancelled { reference } => *reference = raw.to_string(),
            ImageError::Fetch { .. } => {}
        }

        self
    }
}

impl_error_detail_with_std_error!(ImageError, PollError);
