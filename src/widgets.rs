//! Widget catalog: the universe of dashboard widget names, discovered once
//! at startup from the frontend's widget component directory.

use std::path::Path;

use crate::config::WidgetsConfig;
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WidgetCatalog {
    names: Vec<String>,
}

impl WidgetCatalog {
    /// sorted, de-duplicated
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    /// One widget per component file: `PressureWidget.tsx` -> `PressureWidget`.
    pub fn discover(dir: &Path, extensions: &[String]) -> Result<Self> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| extensions.iter().any(|wanted| wanted == e))
                .unwrap_or(false);
            if !matches {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        Ok(Self::from_names(names))
    }

    /// Discover, or start with an empty catalog if the directory is unreadable.
    pub fn load_or_empty(config: &WidgetsConfig) -> Self {
        match Self::discover(&config.catalog_dir, &config.extensions) {
            Ok(catalog) => {
                tracing::info!(
                    "discovered {} widgets in {}",
                    catalog.len(),
                    config.catalog_dir.display()
                );
                catalog
            }
            Err(e) => {
                tracing::warn!(
                    "cannot read widget directory {}: {} - starting with no widgets",
                    config.catalog_dir.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
