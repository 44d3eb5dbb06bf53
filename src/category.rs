use crate::catalog::FilterSet;
use crate::error::FilesystemError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrbitDirection {
    #[serde(alias = "ascending")]
    Ascending,
    #[serde(alias = "descending")]
    Descending,
}

impl OrbitDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascending => "ASCENDING",
            Self::Descending => "DESCENDING",
        }
    }
}

impl fmt::Display for OrbitDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Auxiliary orbit file flavour. POEORB is the precise orbit, RESORB the restituted one.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrbitFileType {
    Poeorb,
    Resorb,
}

impl OrbitFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poeorb => "POEORB",
            Self::Resorb => "RESORB",
        }
    }

    /// Catalog product type under which these files are published
    pub fn product_type(&self) -> String {
        format!("AUX_{}", self.as_str())
    }
}

impl fmt::Display for OrbitFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Product(OrbitDirection),
    OrbitFile(OrbitFileType),
}

impl Category {
    /// Narrow a filter set to the features belonging to this category
    pub fn apply(&self, filter: &mut FilterSet) {
        match self {
            Self::Product(direction) => filter.orbit_direction = Some(*direction),
            Self::OrbitFile(kind) => filter.product_type = Some(kind.product_type()),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Product(direction) => write!(f, "products/{direction}"),
            Self::OrbitFile(kind) => write!(f, "orbits/{kind}"),
        }
    }
}

/// Maps categories onto folders below a base directory.
#[derive(Debug, Clone)]
pub struct CategoryRouter {
    base: PathBuf,
}

impl CategoryRouter {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn resolve(&self, category: Category) -> PathBuf {
        match category {
            Category::Product(direction) => self.base.join("products").join(direction.as_str()),
            Category::OrbitFile(kind) => self.base.join("orbits").join(kind.as_str()),
        }
    }

    /// Create `path` and any missing ancestors. Succeeds when it already exists.
    pub async fn ensure(&self, path: &Path) -> Result<(), FilesystemError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|source| FilesystemError {
                path: path.to_path_buf(),
                source,
            })
    }
}
