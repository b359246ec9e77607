//! Image Catalog - Records and Sources
//!
//! The catalog is the outside world: whatever lists images hands the auditor
//! a finished sequence of `ImageRecord`s. Retrieval failures are fatal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Namespace every schema-governed property key lives under.
pub const NAMESPACE_PREFIX: &str = "unikorn:";

/// One image's metadata. Ordered so reports are deterministic.
pub type PropertyBag = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum ImageRetrievalError {
    #[error("Failed to read image listing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode image listing: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageRecord {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub properties: PropertyBag,
    /// Namespaced keys whose listed value was not a string. Disjoint from
    /// `properties`; the classifier reports them as invalid values.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub mistyped: BTreeSet<String>,
}

impl ImageRecord {
    /// Whether any property sits under the governed namespace.
    pub fn is_eligible(&self) -> bool {
        !self.mistyped.is_empty() || is_eligible(&self.properties)
    }

    // String values land in the bag. Other values are only remembered when
    // they are namespaced; the first occurrence of a key wins.
    fn absorb(&mut self, key: String, value: Value) {
        if self.properties.contains_key(&key) || self.mistyped.contains(&key) {
            return;
        }
        match value {
            Value::String(s) => {
                self.properties.insert(key, s);
            }
            _ if key.starts_with(NAMESPACE_PREFIX) => {
                tracing::debug!(image = %self.id, property = %key, "non-string property value");
                self.mistyped.insert(key);
            }
            _ => {}
        }
    }
}

/// A bag with no namespaced key is not subject to the schema at all.
pub fn is_eligible(bag: &PropertyBag) -> bool {
    bag.keys().any(|k| k.starts_with(NAMESPACE_PREFIX))
}

/// Anything that can produce the catalog's image records.
pub trait ImageSource {
    fn images(&self) -> Result<Vec<ImageRecord>, ImageRetrievalError>;
}

/// In-memory source, mostly for tests and embedding.
impl ImageSource for Vec<ImageRecord> {
    fn images(&self) -> Result<Vec<ImageRecord>, ImageRetrievalError> {
        Ok(self.clone())
    }
}

/// Reads an image listing from a JSON file, or stdin for `-`.
///
/// Accepts a bare array or an image-service listing (`{"images": [...]}`).
/// Custom properties may be nested under `properties` or, as image services
/// return them, appear as top-level fields.
pub struct JsonImageSource {
    path: PathBuf,
}

impl JsonImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_stdin(&self) -> bool {
        self.path.as_os_str() == "-"
    }
}

impl ImageSource for JsonImageSource {
    fn images(&self) -> Result<Vec<ImageRecord>, ImageRetrievalError> {
        let records = if self.is_stdin() {
            read_listing(std::io::stdin().lock())?
        } else {
            let file = File::open(&self.path).map_err(|source| ImageRetrievalError::Io {
                path: self.path.clone(),
                source,
            })?;
            read_listing(BufReader::new(file))?
        };
        tracing::debug!(path = %self.path.display(), images = records.len(), "read image listing");
        Ok(records)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Listing {
    Wrapped { images: Vec<RawImage> },
    Bare(Vec<RawImage>),
}

#[derive(Deserialize)]
struct RawImage {
    id: String,
    #[serde(default)]
    name: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default, alias = "size_bytes")]
    size: Option<u64>,
    #[serde(default)]
    visibility: Option<String>,
    #[serde(default)]
    properties: BTreeMap<String, Value>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl From<RawImage> for ImageRecord {
    fn from(raw: RawImage) -> Self {
        let mut record = Self {
            id: raw.id,
            name: raw.name.unwrap_or_default(),
            created_at: raw.created_at,
            size_bytes: raw.size.unwrap_or(0),
            visibility: raw.visibility,
            properties: PropertyBag::new(),
            mistyped: BTreeSet::new(),
        };

        // Explicit `properties` take precedence over top-level extras
        for (key, value) in raw.properties.into_iter().chain(raw.extra) {
            record.absorb(key, value);
        }

        record
    }
}

/// Decode a listing document into image records.
pub fn parse_listing(content: &str) -> Result<Vec<ImageRecord>, ImageRetrievalError> {
    read_listing(content.as_bytes())
}

/// Decode a listing from any reader.
pub fn read_listing<R: Read>(reader: R) -> Result<Vec<ImageRecord>, ImageRetrievalError> {
    let raw = match serde_json::from_reader::<_, Listing>(reader)? {
        Listing::Wrapped { images } => images,
        Listing::Bare(images) => images,
    };
    Ok(raw.into_iter().map(ImageRecord::from).collect())
}
