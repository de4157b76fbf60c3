use std::path::PathBuf;

use diagnostics_bundle::node::NodeDescriptor;
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum ProviderError {
    #[snafu(display("failed to read nodes file {path:?}"))]
    ReadNodesFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse nodes file {path:?}"))]
    ParseNodesFile {
        source: serde_json::Error,
        path: PathBuf,
    },
}

/// Supplies the current cluster membership. Stands in for the deployment's
/// discovery mechanism (exhibitor, DNS).
pub trait NodeProvider: Send + Sync {
    fn nodes(&self) -> Result<Vec<NodeDescriptor>, ProviderError>;
}

/// Reads a JSON array of node descriptors, re-read on every call so
/// membership changes need no restart.
pub struct FileNodeProvider {
    path: PathBuf,
}

impl FileNodeProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NodeProvider for FileNodeProvider {
    fn nodes(&self) -> Result<Vec<NodeDescriptor>, ProviderError> {
        let raw = std::fs::read(&self.path).context(ReadNodesFileSnafu { path: &self.path })?;
        serde_json::from_slice(&raw).context(ParseNodesFileSnafu { path: &self.path })
    }
}
