use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{CanceledSnafu, Collected, Collector, Error, HttpErrorResponseSnafu, HttpRequestSnafu};

/// How much of a failing endpoint's body is quoted in the error.
const MAX_ERROR_BODY_BYTES: usize = 4096;

/// Fetches one HTTP endpoint. The request advertises `Accept-Encoding:
/// gzip` explicitly, so gzip-framed bodies arrive verbatim and are stored
/// as-is (the entry name then carries a `.gz` suffix).
pub struct EndpointCollector {
    name: String,
    optional: bool,
    url: Url,
    http: reqwest::Client,
    timeout: Duration,
}

impl EndpointCollector {
    pub fn new(
        name: impl Into<String>,
        optional: bool,
        url: Url,
        http: reqwest::Client,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            optional,
            url,
            http,
            timeout,
        }
    }
}

#[async_trait]
impl Collector for EndpointCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn optional(&self) -> bool {
        self.optional
    }

    async fn collect(&self, cancel: &CancellationToken) -> Result<Collected, Error> {
        let request = self
            .http
            .get(self.url.clone())
            .header(header::ACCEPT_ENCODING, "gzip")
            .timeout(self.timeout);
        let response = tokio::select! {
            _ = cancel.cancelled() => return CanceledSnafu.fail(),
            response = request.send() => response.context(HttpRequestSnafu {
                url: self.url.clone(),
            })?,
        };

        let status = response.status();
        let gzip_encoded = response
            .headers()
            .get(header::CONTENT_ENCODING)
            .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"gzip"));
        if !status.is_success() {
            let raw = response.bytes().await.unwrap_or_default();
            return HttpErrorResponseSnafu {
                url: self.url.clone(),
                status,
                body: decode_error_body(&raw, gzip_encoded),
            }
            .fail();
        }

        let stream = response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .take_until(cancel.clone().cancelled_owned())
            .boxed();
        Ok(Collected {
            stream,
            gzip_encoded,
        })
    }
}

/// Decompresses a gzip-framed error body if needed and truncates it.
fn decode_error_body(raw: &[u8], gzip_encoded: bool) -> String {
    use std::io::Read;

    let mut decoded = Vec::new();
    if gzip_encoded {
        let mut limited =
            flate2::read::GzDecoder::new(raw).take(MAX_ERROR_BODY_BYTES as u64);
        if limited.read_to_end(&mut decoded).is_err() {
            decoded.clear();
        }
    }
    if decoded.is_empty() {
        decoded.extend_from_slice(&raw[..raw.len().min(MAX_ERROR_BODY_BYTES)]);
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
