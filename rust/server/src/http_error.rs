use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

pub trait Error: std::error::Error {
    fn status_code(&self) -> StatusCode;
}

/// Renders an error as the `{code, error}` JSON envelope with its mapped
/// status code. The error text includes the full source chain.
pub struct JsonResponse<E> {
    error: E,
}

impl<E> From<E> for JsonResponse<E> {
    fn from(error: E) -> Self {
        Self { error }
    }
}

impl<E: Error> IntoResponse for JsonResponse<E> {
    fn into_response(self) -> axum::response::Response {
        let status = self.error.status_code();
        let message =
            std::iter::successors(Some(&self.error as &dyn std::error::Error), |error| {
                error.source()
            })
            .map(|error| error.to_string())
            .collect::<Vec<_>>()
            .join(": ");
        (
            status,
            Json(Envelope {
                code: status.as_u16(),
                error: message,
            }),
        )
            .into_response()
    }
}

#[derive(Serialize)]
struct Envelope {
    code: u16,
    error: String,
}
