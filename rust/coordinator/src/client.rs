use std::path::{Path, PathBuf};

use diagnostics_bundle::bundle::Bundle;
use futures::StreamExt;
use reqwest::{RequestBuilder, Response, StatusCode};
use snafu::{ResultExt, Snafu};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("base url {base} cannot carry path segments"))]
    BuildUrl { base: Url },

    #[snafu(display("failed to execute request to {url}"))]
    HttpRequest { source: reqwest::Error, url: Url },

    #[snafu(display("failed to parse json response from {url}"))]
    ParseJson { source: reqwest::Error, url: Url },

    #[snafu(display("{url} returned {status}: {text}"))]
    HttpErrorResponse {
        status: StatusCode,
        url: Url,
        text: String,
    },

    #[snafu(display("{url} returned {status} with an undecodable body"))]
    HttpErrorResponseUndecodableText {
        status: StatusCode,
        url: Url,
        encoding_error: reqwest::Error,
    },

    #[snafu(display("failed to write downloaded archive to {path:?}"))]
    WriteDownload {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("request to {url} was canceled"))]
    Canceled { url: Url },
}

/// Typed client for the diagnostics resource of a single peer node.
///
/// The `reqwest::Client` is supplied by the host so that TLS material and
/// auth headers stay outside this crate; every operation aborts as soon as
/// the caller's cancellation token fires.
#[derive(Clone, Debug)]
pub struct NodeClient {
    http: reqwest::Client,
}

impl NodeClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn url(base: &Url, segments: &[&str]) -> Result<Url, Error> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::BuildUrl { base: base.clone() })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Starts a local bundle named `id` on the peer.
    pub async fn create(
        &self,
        base: &Url,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Bundle, Error> {
        let url = Self::url(base, &["diagnostics", id])?;
        let request = self
            .http
            .put(url.clone())
            .json(&serde_json::json!({ "type": "local" }));
        let response = error_for_status(self.send(request, &url, cancel).await?, &url).await?;
        response.json().await.context(ParseJsonSnafu { url })
    }

    /// Fetches the peer's view of bundle `id`. A 404 is not an error: the
    /// peer may not have persisted the record yet, so it maps to Unknown.
    pub async fn status(
        &self,
        base: &Url,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Bundle, Error> {
        let url = Self::url(base, &["diagnostics", id])?;
        let response = self.send(self.http.get(url.clone()), &url, cancel).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Bundle::unknown(id));
        }
        let response = error_for_status(response, &url).await?;
        response.json().await.context(ParseJsonSnafu { url })
    }

    /// Streams the peer's archive into `dst`.
    pub async fn get_file(
        &self,
        base: &Url,
        id: &str,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let url = Self::url(base, &["diagnostics", id, "file"])?;
        let response =
            error_for_status(self.send(self.http.get(url.clone()), &url, cancel).await?, &url)
                .await?;
        let mut file = tokio::fs::File::create(dst)
            .await
            .context(WriteDownloadSnafu { path: dst })?;
        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return CanceledSnafu { url }.fail(),
                chunk = stream.next() => chunk,
            };
            match chunk {
                None => break,
                Some(chunk) => {
                    let chunk = chunk.context(HttpRequestSnafu { url: url.clone() })?;
                    file.write_all(&chunk)
                        .await
                        .context(WriteDownloadSnafu { path: dst })?;
                }
            }
        }
        file.flush().await.context(WriteDownloadSnafu { path: dst })
    }

    /// Reclaims the bundle on the peer. Replies like 304 (already terminal)
    /// count as success.
    pub async fn delete(
        &self,
        base: &Url,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let url = Self::url(base, &["diagnostics", id])?;
        let response = self.send(self.http.delete(url.clone()), &url, cancel).await?;
        error_for_status(response, &url).await?;
        Ok(())
    }

    async fn send(
        &self,
        request: RequestBuilder,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<Response, Error> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => CanceledSnafu { url: url.clone() }.fail(),
            response = request.send() => response.context(HttpRequestSnafu { url: url.clone() }),
        }
    }
}

/// Wraps a response into a result, extracting the body of client and server
/// errors so the caller sees what the peer actually said.
async fn error_for_status(response: Response, url: &Url) -> Result<Response, Error> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        match response.text().await {
            Ok(text) => HttpErrorResponseSnafu {
                status,
                url: url.clone(),
                text,
            }
            .fail()?,
            Err(encoding_error) => HttpErrorResponseUndecodableTextSnafu {
                status,
                url: url.clone(),
                encoding_error,
            }
            .fail()?,
        }
    } else {
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path as AxumPath,
        http::StatusCode,
        routing::{delete, get, put},
        Json, Router,
    };
    use diagnostics_bundle::bundle::{BundleStatus, BundleType};

    async fn serve(router: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service())
                .await
                .unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    #[tokio::test]
    async fn create_puts_a_local_bundle_request() {
        let base = serve(Router::new().route(
            "/diagnostics/{id}",
            put(
                |AxumPath(id): AxumPath<String>, Json(body): Json<serde_json::Value>| async move {
                    assert_eq!(body, serde_json::json!({"type": "local"}));
                    Json(Bundle::new(id, BundleType::Local))
                },
            ),
        ))
        .await;

        let bundle = NodeClient::new(reqwest::Client::new())
            .create(&base, "bundle-7", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(bundle.id, "bundle-7");
        assert_eq!(bundle.status, BundleStatus::Started);
    }

    #[tokio::test]
    async fn status_treats_404_as_unknown() {
        let base = serve(Router::new().route(
            "/diagnostics/{id}",
            get(|| async { (StatusCode::NOT_FOUND, "nothing here") }),
        ))
        .await;

        let bundle = NodeClient::new(reqwest::Client::new())
            .status(&base, "bundle-7", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(bundle.status, BundleStatus::Unknown);
        assert_eq!(bundle.id, "bundle-7");
    }

    #[tokio::test]
    async fn status_surfaces_other_errors_with_body() {
        let base = serve(Router::new().route(
            "/diagnostics/{id}",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "disk on fire") }),
        ))
        .await;

        let error = NodeClient::new(reqwest::Client::new())
            .status(&base, "bundle-7", &CancellationToken::new())
            .await
            .unwrap_err();
        let message = error.to_string();
        assert!(message.contains("500"), "{message}");
        assert!(message.contains("disk on fire"), "{message}");
    }

    #[tokio::test]
    async fn get_file_streams_to_destination() {
        let base = serve(Router::new().route(
            "/diagnostics/{id}/file",
            get(|| async { b"PK\x03\x04fake".to_vec() }),
        ))
        .await;

        let dir = tempfile::TempDir::new().unwrap();
        let dst = dir.path().join("download.zip");
        NodeClient::new(reqwest::Client::new())
            .get_file(&base, "bundle-7", &dst, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"PK\x03\x04fake");
    }

    #[tokio::test]
    async fn delete_accepts_not_modified() {
        let base = serve(Router::new().route(
            "/diagnostics/{id}",
            delete(|| async { StatusCode::NOT_MODIFIED }),
        ))
        .await;

        NodeClient::new(reqwest::Client::new())
            .delete(&base, "bundle-7", &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn canceled_token_aborts_before_sending() {
        let base = Url::parse("http://127.0.0.1:9/").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let error = NodeClient::new(reqwest::Client::new())
            .status(&base, "bundle-7", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Canceled { .. }));
    }
}
