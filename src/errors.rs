use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("image provided in not supported format, supported formats png, jpeg: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid spreadsheet: {0}")]
    Excel(#[from] calamine::XlsxError),

    /// Kept as text: `MultipartError` can carry a non-`Send` actix error.
    #[error("invalid multipart payload: {0}")]
    Multipart(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("couldn't get db connection from pool: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blocking task failed: {0}")]
    Blocking(#[from] actix_web::error::BlockingError),
}

impl PortalError {
    pub fn not_found(what: impl Into<String>) -> Self {
        PortalError::NotFound(what.into())
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        PortalError::BadRequest(reason.into())
    }
}

impl From<actix_multipart::MultipartError> for PortalError {
    fn from(e: actix_multipart::MultipartError) -> Self {
        PortalError::Multipart(e.to_string())
    }
}

impl ResponseError for PortalError {
    fn status_code(&self) -> StatusCode {
        match self {
            PortalError::NotFound(_) => StatusCode::NOT_FOUND,
            PortalError::BadRequest(_)
            | PortalError::Image(_)
            | PortalError::Csv(_)
            | PortalError::Excel(_)
            | PortalError::Multipart(_) => StatusCode::BAD_REQUEST,
            PortalError::Database(_)
            | PortalError::Pool(_)
            | PortalError::Migration(_)
            | PortalError::Io(_)
            | PortalError::Blocking(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            return HttpResponse::InternalServerError().finish();
        }
        HttpResponse::build(status).body(self.to_string())
    }
}

pub type PortalResult<T> = Result<T, PortalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_keep_their_reason() {
        let err = PortalError::bad_request("model version is required");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "model version is required");
    }

    #[test]
    fn missing_rows_map_to_404() {
        let err = PortalError::not_found("model 7");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "model 7 not found");
    }

    fn assert_send<T: Send>() {}

    #[test]
    fn results_can_cross_the_blocking_pool() {
        assert_send::<PortalResult<Vec<u8>>>();
    }

    #[test]
    fn broken_multipart_is_a_bad_request() {
        let err = PortalError::from(actix_multipart::MultipartError::Incomplete);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().starts_with("invalid multipart payload"));
    }

    #[test]
    fn database_failures_are_opaque_500s() {
        let err = PortalError::from(diesel::result::Error::RollbackTransaction);
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
