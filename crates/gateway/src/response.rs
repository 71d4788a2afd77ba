//! The `{success, message, data?}` response envelope.

use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde::Serialize,
    serde_json::Value,
};

pub const REQUIRED_INPUT: &str = "Please fill out all required input.";
pub const SESSION_NOT_FOUND: &str = "Session not found.";
pub const GROUP_NOT_FOUND: &str = "The group is not exists.";
pub const RECEIVER_NOT_FOUND: &str = "The receiver number is not exists.";

#[derive(Debug, Serialize)]
struct Envelope {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// An HTTP reply in the gateway's envelope. Used for both the success and
/// the error side of handler results.
#[derive(Debug)]
pub struct Reply {
    status: StatusCode,
    body: Envelope,
}

pub type ApiResult = Result<Reply, Reply>;

impl Reply {
    pub fn new(status: StatusCode, success: bool, message: impl Into<String>) -> Self {
        Self {
            status,
            body: Envelope {
                success,
                message: message.into(),
                data: None,
            },
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, true, message)
    }

    pub fn data(data: impl Serialize) -> Self {
        Self::ok("").with_data(data)
    }

    pub fn with_data(mut self, data: impl Serialize) -> Self {
        self.body.data = serde_json::to_value(data).ok();
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, false, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, false, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, false, message)
    }

    pub fn invalid_input() -> Self {
        Self::bad_request(REQUIRED_INPUT)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
