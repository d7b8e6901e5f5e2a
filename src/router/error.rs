use askama_axum::IntoResponse;
use axum::{http::StatusCode, response::Response};

use crate::{
    error::{ErrorKind, PostError},
    templates::ErrorPage,
};

fn page(status: StatusCode, message: String) -> Response {
    let page = ErrorPage {
        title: "Error".into(),
        message,
    };
    (status, page).into_response()
}

pub fn http_404() -> Response {
    page(StatusCode::NOT_FOUND, "Error: Not found.".into())
}

pub fn http_400() -> Response {
    page(StatusCode::BAD_REQUEST, "Error: Malformed request.".into())
}

pub fn status_of(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::DuplicateContent => StatusCode::CONFLICT,
        ErrorKind::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ErrorKind::Storage | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for PostError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let message = match kind {
            ErrorKind::Internal => {
                tracing::error!("{self:?}");
                "Error: Internal failure.".to_string()
            }
            ErrorKind::Storage => {
                tracing::error!("{self:?}");
                self.to_string()
            }
            _ => {
                tracing::debug!("Rejected: {self}");
                self.to_string()
            }
        };
        page(status_of(kind), message)
    }
}
