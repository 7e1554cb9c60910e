//! Controller errors and JSON error responses for the router

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Runtime operation that failed, for error messages and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeOp {
    Create,
    Start,
    Inspect,
    Stop,
    Kill,
    Remove,
}

impl fmt::Display for RuntimeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            RuntimeOp::Create => "create",
            RuntimeOp::Start => "start",
            RuntimeOp::Inspect => "inspect",
            RuntimeOp::Stop => "stop",
            RuntimeOp::Kill => "kill",
            RuntimeOp::Remove => "remove",
        };
        f.write_str(verb)
    }
}

/// Errors produced by the request controller
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Configuration rejected before a controller could be built
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A container runtime call failed during a lifecycle operation
    #[error("unable to {op} container {container}: {source:#}")]
    Runtime {
        op: RuntimeOp,
        /// Container name or id
        container: String,
        source: anyhow::Error,
    },

    /// `init` called on a pool that was already provisioned
    #[error("container pool is already initialized")]
    AlreadyInitialized,

    /// Every container is stopped or dirty, or the pool is empty
    #[error("no ready containers (pool size {pool_size})")]
    NoReadyContainers { pool_size: usize },
}

impl ControllerError {
    pub(crate) fn runtime(op: RuntimeOp, container: &str, source: anyhow::Error) -> Self {
        ControllerError::Runtime {
            op,
            container: container.to_string(),
            source,
        }
    }
}

/// Error codes for router responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProxyErrorCode {
    /// Waking a dormant pool failed
    PoolStartFailed,
    /// No started, non-dirty container to route to
    NoReadyContainers,
    /// The selected container did not answer
    ConnectionFailed,
    /// The caller's request body failed while being forwarded
    RequestBodyFailed,
    /// The upstream request could not be built
    InternalError,
}

impl ProxyErrorCode {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyErrorCode::PoolStartFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyErrorCode::NoReadyContainers => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyErrorCode::ConnectionFailed => StatusCode::BAD_GATEWAY,
            ProxyErrorCode::RequestBodyFailed => StatusCode::BAD_REQUEST,
            ProxyErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code as a string for the X-Proxy-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            ProxyErrorCode::PoolStartFailed => "POOL_START_FAILED",
            ProxyErrorCode::NoReadyContainers => "NO_READY_CONTAINERS",
            ProxyErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ProxyErrorCode::RequestBodyFailed => "REQUEST_BODY_FAILED",
            ProxyErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: ProxyErrorCode,
    pub message: String,
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: ProxyErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with X-Proxy-Error header
pub fn json_error_response(
    code: ProxyErrorCode,
    message: impl Into<String>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let error = ErrorResponse::new(code, message);
    let body = error.to_json();

    Response::builder()
        .status(code.status_code())
        .header("Content-Type", "application/json")
        .header("X-Proxy-Error", code.as_header_value())
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_codes() {
        assert_eq!(
            ProxyErrorCode::PoolStartFailed.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ProxyErrorCode::NoReadyContainers.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ProxyErrorCode::ConnectionFailed.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyErrorCode::RequestBodyFailed.status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_error_response_json() {
        let error = ErrorResponse::new(ProxyErrorCode::NoReadyContainers, "No container available");
        let json = error.to_json();

        assert!(json.contains("\"code\":\"NO_READY_CONTAINERS\""));
        assert!(json.contains("\"message\":\"No container available\""));
        assert!(json.contains("\"status\":500"));
    }

    #[test]
    fn test_json_error_response() {
        let response = json_error_response(ProxyErrorCode::ConnectionFailed, "Backend unreachable");

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json"
        );
        assert_eq!(
            response.headers().get("X-Proxy-Error").unwrap(),
            "CONNECTION_FAILED"
        );
    }

    #[test]
    fn test_runtime_error_message() {
        let err = ControllerError::runtime(
            RuntimeOp::Start,
            "shop-1",
            anyhow::anyhow!("daemon said no"),
        );
        assert_eq!(err.to_string(), "unable to start container shop-1: daemon said no");
    }

    #[test]
    fn test_no_ready_containers_message() {
        let err = ControllerError::NoReadyContainers { pool_size: 0 };
        assert!(err.to_string().contains("no ready containers"));
    }
}
