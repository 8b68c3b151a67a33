//! Bootstrap catalog: which labeled images seed the descriptor store.

use crate::frame::has_frame_extension;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Identities shipped with the seed image set, in bootstrap order.
pub const SEED_LABELS: [&str; 7] = [
    "Black Widow",
    "Captain America",
    "Hawkeye",
    "Jim Rhodes",
    "Tony Stark",
    "Thor",
    "Captain Marvel",
];

const SEED_IMAGES_PER_LABEL: usize = 2;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid catalog: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("catalog identity has an empty label")]
    EmptyLabel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogIdentity {
    pub label: String,
    #[serde(default)]
    pub images: Vec<PathBuf>,
}

/// Ordered `(label, image paths)` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(rename = "identity", default)]
    pub identities: Vec<CatalogIdentity>,
}

impl Catalog {
    /// The fixed seed table: `<root>/<label>/1.jpg` and `2.jpg` per label.
    pub fn seed(root: &Path) -> Self {
        let identities = SEED_LABELS
            .iter()
            .map(|label| CatalogIdentity {
                label: label.to_string(),
                images: (1..=SEED_IMAGES_PER_LABEL)
                    .map(|n| root.join(label).join(format!("{n}.jpg")))
                    .collect(),
            })
            .collect();
        Self { identities }
    }

    /// Parse TOML; relative image paths resolve against `base`.
    pub fn from_toml_str(src: &str, base: &Path) -> Result<Self, CatalogError> {
        let mut catalog: Catalog = toml::from_str(src)?;
        for identity in &mut catalog.identities {
            if identity.label.trim().is_empty() {
                return Err(CatalogError::EmptyLabel);
            }
            for image in &mut identity.images {
                if image.is_relative() {
                    *image = base.join(&*image);
                }
            }
        }
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let src = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let catalog = Self::from_toml_str(&src, base)?;
        tracing::info!(
            path = %path.display(),
            identities = catalog.identities.len(),
            images = catalog.image_count(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    /// One identity per subdirectory of `root`, named after it.
    pub fn from_dir(root: &Path) -> Result<Self, CatalogError> {
        let io_err = |source| CatalogError::Io {
            path: root.to_path_buf(),
            source,
        };
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)
            .map_err(io_err)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        let mut identities = Vec::with_capacity(dirs.len());
        for dir in dirs {
            let Some(label) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let mut images: Vec<PathBuf> = std::fs::read_dir(&dir)
                .map_err(|source| CatalogError::Io {
                    path: dir.clone(),
                    source,
                })?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && has_frame_extension(p))
                .collect();
            images.sort();
            identities.push(CatalogIdentity { label, images });
        }
        Ok(Self { identities })
    }

    pub fn image_count(&self) -> usize {
        self.identities.iter().map(|i| i.images.len()).sum()
    }
}
