//! Item-source collaborator.
//!
//! Supplies the local participant's identifiers. Failure here is fatal for the
//! session: there is nothing to intersect.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::Identifier;

#[derive(Debug, Error)]
pub enum ItemSourceError {
    #[error("Failed to read items from '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Item source unavailable: {0}")]
    Unavailable(String),
}

/// Source of the local participant's items.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Load the items to intersect. Order and duplicates do not matter.
    async fn load_items(&self) -> Result<Vec<Identifier>, ItemSourceError>;
}

/// Fixed in-memory list.
#[derive(Debug, Clone, Default)]
pub struct StaticItemSource {
    items: Vec<Identifier>,
}

impl StaticItemSource {
    pub fn new<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Identifier>,
    {
        Self {
            items: items.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ItemSource for StaticItemSource {
    async fn load_items(&self) -> Result<Vec<Identifier>, ItemSourceError> {
        Ok(self.items.clone())
    }
}

/// Newline-delimited text file, one identifier per line.
///
/// Surrounding whitespace is trimmed; blank lines and `#` comments are skipped.
#[derive(Debug, Clone)]
pub struct FileItemSource {
    path: PathBuf,
}

impl FileItemSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

fn parse_items(contents: &str) -> Vec<Identifier> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(Identifier::from)
        .collect()
}

#[async_trait]
impl ItemSource for FileItemSource {
    async fn load_items(&self) -> Result<Vec<Identifier>, ItemSourceError> {
        let contents =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|source| ItemSourceError::Io {
                    path: self.path.clone(),
                    source,
                })?;
        Ok(parse_items(&contents))
    }
}
