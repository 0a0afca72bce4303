//! Error bodies and status mapping for the HTTP boundary.

use crate::engine::EngineError;
use crate::position::Position;
use serde::Serialize;
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Rejection, Reply};

/// Rejected before reaching a handler: no usable `x-holder-id` header.
#[derive(Debug)]
pub struct MissingHolder;

impl warp::reject::Reject for MissingHolder {}

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    Unauthorized,
    BadRequest(String),
    NotFound,
    MethodNotAllowed,
    PayloadTooLarge,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
    /// Terminal record when the position was already closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: ErrorBody,
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(err) => match err {
                EngineError::Validation(_)
                | EngineError::InsufficientFunds { .. }
                | EngineError::AlreadyClosed(_) => StatusCode::BAD_REQUEST,
                EngineError::EligibilityDenied { .. } => StatusCode::FORBIDDEN,
                EngineError::ConcurrentUpdate => StatusCode::CONFLICT,
                EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                EngineError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                EngineError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    pub fn body(&self) -> ErrorBody {
        match self {
            ApiError::Engine(err) => ErrorBody {
                code: err.code(),
                // internals stay in the logs
                message: match err {
                    EngineError::Unexpected(_) => "internal error".to_string(),
                    other => other.to_string(),
                },
                retryable: err.is_retryable(),
                position: match err {
                    EngineError::AlreadyClosed(position) => Some(position.as_ref().clone()),
                    _ => None,
                },
            },
            ApiError::Unauthorized => simple("unauthorized", "missing or invalid x-holder-id header"),
            ApiError::BadRequest(message) => simple("bad_request", message),
            ApiError::NotFound => simple("route_not_found", "no such route"),
            ApiError::MethodNotAllowed => simple("method_not_allowed", "method not allowed"),
            ApiError::PayloadTooLarge => simple("payload_too_large", "request body too large"),
        }
    }

    pub fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = ?self, "request failed");
        }
        let envelope = ErrorEnvelope {
            success: false,
            error: self.body(),
        };
        warp::reply::with_status(warp::reply::json(&envelope), status).into_response()
    }
}

fn simple(code: &'static str, message: &str) -> ErrorBody {
    ErrorBody {
        code,
        message: message.to_string(),
        retryable: false,
        position: None,
    }
}

/// Turns warp's own rejections into the same error envelope handlers use.
pub async fn recover(rejection: Rejection) -> Result<Response, Infallible> {
    let err = if rejection.find::<MissingHolder>().is_some() {
        ApiError::Unauthorized
    } else if rejection.is_not_found() {
        ApiError::NotFound
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        ApiError::BadRequest(e.to_string())
    } else if let Some(e) = rejection.find::<warp::reject::InvalidQuery>() {
        ApiError::BadRequest(e.to_string())
    } else if rejection.find::<warp::reject::LengthRequired>().is_some() {
        ApiError::BadRequest("content-length header required".to_string())
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        ApiError::PayloadTooLarge
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        ApiError::MethodNotAllowed
    } else {
        ApiError::Engine(EngineError::Unexpected(format!("unhandled rejection: {rejection:?}")))
    };
    Ok(err.into_response())
}
