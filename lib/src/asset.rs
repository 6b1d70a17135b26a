use std::fmt;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::recipe::RecipeId;

type Hasher = std::hash::BuildHasherDefault<rustc_hash::FxHasher>;

/// An opaque, stable identifier for a locally available image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AssetId(Arc<str>);

impl AssetId {
    /// Derives an id from the parts that identify an asset's origin. Equal
    /// parts always yield equal ids, across builds.
    pub fn derive(parts: &[&str]) -> AssetId {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0]);
        }

        AssetId(hex::encode(&hasher.finalize()[..12]).into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Source { name: Arc<str>, path: Arc<str> },
    Album { album: Arc<str>, filename: Arc<str> },
    Remote { url: Arc<str> },
    ObjectStore { key: Arc<str> },
    Placeholder,
}

impl Origin {
    /// The id an asset of this origin receives.
    pub fn asset_id(&self, parent: Option<&RecipeId>) -> AssetId {
        match self {
            Origin::Source { name, path } => AssetId::derive(&["file", name, path]),
            Origin::Album { album, filename } => AssetId::derive(&["gphotos", album, filename]),
            Origin::Remote { url } => match parent {
                Some(parent) => AssetId::derive(&["http", url, parent.as_str()]),
                None => AssetId::derive(&["http", url]),
            },
            Origin::ObjectStore { key } => AssetId::derive(&["s3", key]),
            Origin::Placeholder => AssetId::derive(&["placeholder"]),
        }
    }
}

/// A locally available image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub id: AssetId,
    pub path: Arc<Path>,
    pub origin: Origin,
    /// The recipe that caused this asset to exist, if any.
    pub parent: Option<RecipeId>,
}

impl Asset {
    pub fn new(path: Arc<Path>, origin: Origin, parent: Option<RecipeId>) -> Asset {
        Asset { id: origin.asset_id(parent.as_ref()), path, origin, parent }
    }

    pub fn file_ext(&self) -> Option<&str> {
        self.path.extension().and_then(|e| e.to_str())
    }

    /// The file name this asset is published under.
    pub fn output_name(&self) -> String {
        match self.file_ext() {
            Some(ext) => format!("{}.{}", self.id, ext.to_ascii_lowercase()),
            None => self.id.to_string(),
        }
    }
}

/// Every asset known to a build, keyed by id.
#[derive(Debug, Default)]
pub struct AssetStore {
    map: DashMap<AssetId, Arc<Asset>, Hasher>,
}

impl AssetStore {
    pub fn new() -> Self {
        AssetStore::default()
    }

    /// Registers `asset`, returning the stored asset. Registering an id that
    /// already exists keeps the existing asset.
    pub fn register(&self, asset: Asset) -> Arc<Asset> {
        self.map.entry(asset.id.clone())
            .or_insert_with(|| Arc::new(asset))
            .clone()
    }

    pub fn get(&self, id: &AssetId) -> Option<Arc<Asset>> {
        self.map.get(id).map(|r| r.value().clone())
    }

    pub fn contains(&self, id: &AssetId) -> bool {
        self.map.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
