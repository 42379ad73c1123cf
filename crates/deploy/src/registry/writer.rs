//! Persists the registry.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use super::{Registry, RegistryFormat, RegistryTemplate};
use crate::DeployError;

/// Writes the rendered registry to a destination path.
///
/// The document is written to a temporary file next to the destination and
/// renamed over it, so readers see either the previous file or the complete
/// new one.
pub struct RegistryWriter {
    path: PathBuf,
    environment: String,
    template: Box<dyn RegistryTemplate>,
}

impl RegistryWriter {
    pub fn new(path: impl Into<PathBuf>, environment: impl Into<String>, format: RegistryFormat) -> Self {
        Self::with_template(path, environment, format.template())
    }

    pub fn with_template(
        path: impl Into<PathBuf>,
        environment: impl Into<String>,
        template: Box<dyn RegistryTemplate>,
    ) -> Self {
        Self {
            path: path.into(),
            environment: environment.into(),
            template,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render the full document without writing it.
    pub fn render(&self, registry: &Registry) -> Result<String, DeployError> {
        self.template
            .render(&registry.to_document(), &self.environment)
    }

    /// Render and atomically replace the destination file.
    pub fn write(&self, registry: &Registry) -> Result<(), DeployError> {
        let rendered = self.render(registry)?;

        tracing::info!(
            path = %self.path.display(),
            environment = %self.environment,
            contracts = registry.len(),
            "Writing smart contract listing"
        );

        self.write_atomic(rendered.as_bytes())
    }

    fn write_atomic(&self, contents: &[u8]) -> Result<(), DeployError> {
        let io_error = |source: std::io::Error| DeployError::Io {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        // Dropping the temp file on any error below removes it.
        let mut file = NamedTempFile::new_in(dir).map_err(io_error)?;
        file.write_all(contents).map_err(io_error)?;
        file.as_file().sync_all().map_err(io_error)?;
        file.persist(&self.path).map_err(|e| io_error(e.error))?;

        Ok(())
    }
}

impl std::fmt::Debug for RegistryWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryWriter")
            .field("path", &self.path)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}
