use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use snafu::ResultExt;
use tokio_util::{io::ReaderStream, sync::CancellationToken};

use super::{CanceledSnafu, Collected, Collector, Error, OpenFileSnafu};

/// Streams a local file read-only. The descriptor is released when the
/// stream is dropped; cancellation cuts the stream off at the next read.
pub struct FileCollector {
    name: String,
    optional: bool,
    location: PathBuf,
}

impl FileCollector {
    pub fn new(name: impl Into<String>, optional: bool, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            optional,
            location: location.into(),
        }
    }
}

#[async_trait]
impl Collector for FileCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn optional(&self) -> bool {
        self.optional
    }

    async fn collect(&self, cancel: &CancellationToken) -> Result<Collected, Error> {
        if cancel.is_cancelled() {
            return CanceledSnafu.fail();
        }
        let file = tokio::fs::File::open(&self.location)
            .await
            .context(OpenFileSnafu {
                path: &self.location,
            })?;
        let stream = ReaderStream::new(file)
            .take_until(cancel.clone().cancelled_owned())
            .boxed();
        Ok(Collected::plain(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn streams_file_contents() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mesos-master.log");
        tokio::fs::write(&path, b"log line\n").await.unwrap();

        let collector = FileCollector::new("mesos-master.log", false, &path);
        let collected = collector
            .collect(&CancellationToken::new())
            .await
            .unwrap();
        let bytes: Vec<u8> = collected
            .stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .unwrap();
        assert_eq!(bytes, b"log line\n");
    }

    #[tokio::test]
    async fn missing_file_reports_the_path() {
        let collector = FileCollector::new("gone", false, "/does/not/exist");
        let error = collector
            .collect(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(error.to_string().contains("/does/not/exist"));
    }

    #[tokio::test]
    async fn canceled_token_yields_no_data() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data");
        tokio::fs::write(&path, vec![0u8; 1 << 16]).await.unwrap();

        let cancel = CancellationToken::new();
        let collector = FileCollector::new("data", false, &path);
        let collected = collector.collect(&cancel).await.unwrap();
        cancel.cancel();
        let chunks: Vec<_> = collected.stream.collect::<Vec<_>>().await;
        // already-canceled token terminates the stream before the first read
        assert!(chunks.is_empty());
    }
}
