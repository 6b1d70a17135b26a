use std::fmt;
use std::sync::Arc;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::image::ImageError;

/// Source bucket used by `file` references that don't name one.
pub const PROGRAMMATIC_SOURCE: &str = "__PROGRAMMATIC__";

/// A parsed image reference.
///
/// References are URIs of the form `scheme://[host]/[path]`:
///
/// | scheme          | host                  | path                   |
/// |-----------------|-----------------------|------------------------|
/// | `file`          | source bucket         | path within the bucket |
/// | `http`, `https` | (literal URL)         | (literal URL)          |
/// | `gphotos`       | album, `+` for spaces | file name in the album |
/// | `s3`            | ignored               | object key             |
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageRef {
    Local { source: Arc<str>, path: Arc<str> },
    Remote { url: Arc<str> },
    Album { album: Option<Arc<str>>, filename: Arc<str> },
    ObjectStore { key: Arc<str> },
}

impl ImageRef {
    /// Parses a raw reference.
    ///
    /// ```rust
    /// use larder::image::ImageRef;
    ///
    /// let image = ImageRef::parse("gphotos://Family+Album/img1.jpg").unwrap();
    /// assert_eq!(image, ImageRef::Album {
    ///     album: Some("Family Album".into()),
    ///     filename: "img1.jpg".into(),
    /// });
    ///
    /// assert!(ImageRef::parse("ftp://x/y").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<ImageRef, ImageError> {
        let url = Url::parse(raw).map_err(|e| ImageError::Malformed {
            reference: raw.into(),
            reason: e.to_string(),
        })?;

        let image = match url.scheme() {
            "file" => ImageRef::Local {
                source: url.host_str()
                    .filter(|host| !host.is_empty())
                    .unwrap_or(PROGRAMMATIC_SOURCE)
                    .into(),
                path: path_of(raw, &url)?,
            },
            "http" | "https" => ImageRef::Remote { url: raw.into() },
            "gphotos" => ImageRef::Album {
                album: url.host_str()
                    .filter(|host| !host.is_empty())
                    .map(|host| decode(&host.replace('+', " ")).into()),
                filename: path_of(raw, &url)?,
            },
            "s3" => ImageRef::ObjectStore { key: path_of(raw, &url)? },
            scheme => return Err(ImageError::UnsupportedScheme {
                reference: raw.into(),
                scheme: scheme.into(),
            }),
        };

        Ok(image)
    }

    /// The URI scheme family of this reference.
    pub fn scheme(&self) -> &'static str {
        match self {
            ImageRef::Local { .. } => "file",
            ImageRef::Remote { .. } => "http",
            ImageRef::Album { .. } => "gphotos",
            ImageRef::ObjectStore { .. } => "s3",
        }
    }
}

/// Parses every reference in `raws`, in order, stopping at the first one that
/// fails to parse.
pub fn parse_all<I, S>(raws: I) -> Result<Vec<ImageRef>, ImageError>
    where I: IntoIterator<Item = S>, S: AsRef<str>
{
    raws.into_iter()
        .map(|raw| ImageRef::parse(raw.as_ref()))
        .collect()
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

fn path_of(raw: &str, url: &Url) -> Result<Arc<str>, ImageError> {
    let path = decode(url.path().trim_start_matches('/'));
    if path.is_empty() {
        return Err(ImageError::Malformed {
            reference: raw.into(),
            reason: "reference does not name a file".into(),
        });
    }

    Ok(path.into())
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRef::Local { source, path } if &**source == PROGRAMMATIC_SOURCE => {
                write!(f, "file:///{path}")
            }
            ImageRef::Local { source, path } => write!(f, "file://{source}/{path}"),
            ImageRef::Remote { url } => url.fmt(f),
            ImageRef::Album { album: Some(album), filename } => {
                let album = album.replace('%', "%25").replace('+', "%2B").replace(' ', "+");
                write!(f, "gphotos://{album}/{filename}")
            }
            ImageRef::Album { album: None, filename } => write!(f, "gphotos:///{filename}"),
            ImageRef::ObjectStore { key } => write!(f, "s3:///{key}"),
        }
    }
}
