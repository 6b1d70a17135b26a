use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{Chainable, ErrorDetail, Result};

/// A text data format that content and configuration files are written in.
pub trait Format: Sized {
    /// The data format's error type.
    type Error: serde::de::Error + ErrorDetail + 'static;

    /// Parses `string` in the data format `Self` as a `T`.
    fn from_str<T: DeserializeOwned>(string: &str) -> Result<T, Self::Error>;

    /// Reads the file at `path` and parses it as a `T`.
    fn read<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
        let path = path.as_ref();
        let string = std::fs::read_to_string(path).chain_with(|| error! {
            "failed to open file for reading",
            "file path" => path.display(),
        })?;

        Self::from_str(&string).chain_with(|| error! {
            format!("{} deserialization failed", Self::NAME),
            "file path" => path.display(),
        })
    }

    const NAME: &'static str;
}

macro_rules! impl_format {
    ($name:ident : $func:expr, $E:ty) => (
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $name;

        impl Format for $name {
            type Error = $E;

            const NAME: &'static str = stringify!($name);

            fn from_str<T: DeserializeOwned>(s: &str) -> Result<T, $E> {
                $func(s)
            }
        }
    );
}

impl_format!(Toml: toml::from_str, toml::de::Error);
impl_format!(Json: serde_json::from_str, serde_json::Error);
impl_format!(Yaml: serde_yaml::from_str, serde_yaml::Error);

/// Compiles SCSS/Sass stylesheets to CSS.
#[cfg(feature = "sass")]
#[derive(Debug, Default)]
pub struct Grass {
    options: grass::Options<'static>,
}

#[cfg(feature = "sass")]
impl Grass {
    pub fn compile<P: AsRef<Path>>(&self, path: P) -> Result<String> {
        let path = path.as_ref();
        grass::from_path(path, &self.options)
            .map_err(|e| error!("failed to render sass as css", "path" => path.display(), e))
    }
}
