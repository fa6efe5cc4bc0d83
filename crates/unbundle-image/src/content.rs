//! Extracted content owned by a single pipeline run

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::error::Result;

const TEMP_PREFIX: &str = "unbundle-";

/// A directory of bundle or catalog content
///
/// Content pulled from a registry lives in a private temporary directory that
/// is removed by `release()` or, at the latest, when the value is dropped.
/// Local directories are borrowed as-is and never removed.
#[derive(Debug)]
pub struct BundleContent {
    path: PathBuf,
    temp: Option<TempDir>,
}

impl BundleContent {
    /// Use an existing local directory
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temp: None,
        }
    }

    /// Create a fresh, uniquely named temporary directory
    ///
    /// `root` selects the parent directory; the system temp dir is used when
    /// it is `None`.
    pub fn temporary(root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TEMP_PREFIX);
        let temp = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        debug!(path = %temp.path().display(), "created extraction directory");
        Ok(Self {
            path: temp.path().to_path_buf(),
            temp: Some(temp),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True while this value still owns a temporary directory
    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    /// Remove the temporary directory, if any
    ///
    /// Safe to call more than once and on content whose pull failed halfway.
    pub fn release(&mut self) -> Result<()> {
        if let Some(temp) = self.temp.take() {
            debug!(path = %temp.path().display(), "removing extraction directory");
            temp.close()?;
        }
        Ok(())
    }
}
