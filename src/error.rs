use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use warp::{Rejection, Reply, hyper::StatusCode, reject::Reject};

#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("No auth header provided")]
    MissingAuthHeaderError,
    #[error("The auth header is not formatted correctly (expected JWT 'Bearer ' header)")]
    InvalidAuthHeaderError,
    #[error("Failed to decode request header as valid utf8")]
    UtfEncodingError,
    #[error("The JWT is not or no longer valid")]
    InvalidJwtError,
    #[error("The request is not formatted correctly: {0}")]
    BadRequestError(String),
    #[error("The provided file is invalid: {0}")]
    InvalidFileError(String),
    #[error("Unsupported media type '{0}'")]
    UnsupportedMediaTypeError(String),
    #[error("The uploaded file is too large (maximum size is {0} bytes)")]
    UploadTooLargeError(u64),
    #[error("Video {0} not found")]
    VideoNotFoundError(Uuid),
    #[error("The creator of the video isn't the currently logged in user")]
    ForbiddenError,
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Failed to probe video: {0}")]
    ProbeError(String),
    #[error("Failed to transcode video: {0}")]
    TranscodeError(String),
    #[error("Error in object storage: {0}")]
    StorageError(String),
    #[error("Object storage responded with error status {0}")]
    S3ResponseError(u16),
    #[error("Failed to persist video record: {0}")]
    PersistError(String),
    #[error("Could not establish database connection")]
    DatabaseConnectionError,
    #[error("There has been an error executing a query: '{0}'")]
    QueryError(String),
    #[error("The operation was cancelled")]
    CancellationError,
}

impl Reject for Error {}

impl From<diesel::result::Error> for Error {
    fn from(e: diesel::result::Error) -> Self {
        Error::QueryError(e.to_string())
    }
}

impl From<s3::error::S3Error> for Error {
    fn from(e: s3::error::S3Error) -> Self {
        Error::StorageError(e.to_string())
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingAuthHeaderError
            | Error::InvalidAuthHeaderError
            | Error::UtfEncodingError
            | Error::InvalidJwtError => StatusCode::UNAUTHORIZED,
            Error::BadRequestError(_)
            | Error::InvalidFileError(_)
            | Error::UnsupportedMediaTypeError(_)
            | Error::UploadTooLargeError(_) => StatusCode::BAD_REQUEST,
            Error::ForbiddenError => StatusCode::FORBIDDEN,
            Error::VideoNotFoundError(_) => StatusCode::NOT_FOUND,
            Error::ProbeError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::StorageError(_) | Error::S3ResponseError(_) => StatusCode::BAD_GATEWAY,
            Error::IoError(_)
            | Error::TranscodeError(_)
            | Error::PersistError(_)
            | Error::DatabaseConnectionError
            | Error::QueryError(_)
            | Error::CancellationError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    message: String,
    status: String,
}

/// Creates a Rejection response for the given error and logs server side errors.
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    if let Some(e) = err.find::<Error>() {
        let code = e.status_code();
        if code.is_server_error() {
            log::error!("Encountered server error: {}", e);
        }

        let err_response = ErrorResponse {
            message: e.to_string(),
            status: code.to_string(),
        };

        let json = warp::reply::json(&err_response);

        Ok(warp::reply::with_status(json, code))
    } else {
        Err(err)
    }
}
