pub mod command;
pub mod endpoint;
pub mod file;

use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use snafu::Snafu;
use tokio_util::sync::CancellationToken;
use url::Url;

pub use command::CommandCollector;
pub use endpoint::EndpointCollector;
pub use file::FileCollector;

pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Output of a successful collection: a lazy byte stream plus whether the
/// bytes are gzip-framed (which earns the archive entry a `.gz` suffix).
pub struct Collected {
    pub stream: ByteStream,
    pub gzip_encoded: bool,
}

impl std::fmt::Debug for Collected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collected")
            .field("gzip_encoded", &self.gzip_encoded)
            .finish_non_exhaustive()
    }
}

impl Collected {
    pub fn plain(stream: ByteStream) -> Self {
        Self {
            stream,
            gzip_encoded: false,
        }
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("cannot run an empty command"))]
    EmptyCommand,

    #[snafu(display("command {command:?} timed out after {timeout:?}"))]
    CommandTimeout {
        command: Vec<String>,
        timeout: Duration,
    },

    #[snafu(display("failed to run command {command:?}"))]
    RunCommand {
        source: std::io::Error,
        command: Vec<String>,
    },

    #[snafu(display("failed to open {path:?}"))]
    OpenFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to fetch {url}"))]
    HttpRequest { source: reqwest::Error, url: Url },

    #[snafu(display("{url} returned {status}: {body}"))]
    HttpErrorResponse {
        url: Url,
        status: reqwest::StatusCode,
        body: String,
    },

    #[snafu(display("collection was canceled"))]
    Canceled,
}

/// A named producer of one byte stream destined for the bundle archive.
///
/// Implementations must fail fast once `cancel` fires and must not leak
/// processes, file descriptors, or connections on any exit path. Failures
/// of optional collectors are logged by the builder instead of being
/// recorded as bundle errors.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Entry name inside the archive, unique per bundle.
    fn name(&self) -> &str;

    fn optional(&self) -> bool;

    async fn collect(&self, cancel: &CancellationToken) -> Result<Collected, Error>;
}
