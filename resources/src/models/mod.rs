use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};

/// JSON envelope used by every façade endpoint: a `status` marker, an
/// RFC 3339 UTC `timestamp`, and endpoint-specific fields merged in.
#[derive(Debug, Clone, Serialize)]
pub struct ApiBody(Map<String, Value>);

impl ApiBody {
    pub fn new(status: &str) -> Self {
        let mut map = Map::new();
        map.insert("status".to_string(), Value::String(status.to_string()));
        map.insert("timestamp".to_string(), Value::String(Utc::now().to_rfc3339()));
        ApiBody(map)
    }

    pub fn success() -> Self {
        Self::new("success")
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new("warning").field("message", message.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new("error").field("message", message.into())
    }

    pub fn field(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.0.insert(key.to_string(), value);
        self
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl IntoResponse for ApiBody {
    fn into_response(self) -> Response {
        Json(self.0).into_response()
    }
}

/// Handler-side error carrying the HTTP status it should surface as.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
            ApiBody::error(self.message),
        )
            .into_response()
    }
}

pub type HandlerResult<T = ApiBody> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_carries_status_timestamp_and_fields() {
        let value = ApiBody::success()
            .field("count", 3)
            .field("data", vec!["a", "b"])
            .into_value();
        assert_eq!(value["status"], "success");
        assert!(value["timestamp"].is_string());
        assert_eq!(value["count"], 3);
        assert_eq!(value["data"][1], "b");
    }

    #[test]
    fn warning_and_error_include_message() {
        let value = ApiBody::warning("degraded").into_value();
        assert_eq!(value["status"], "warning");
        assert_eq!(value["message"], "degraded");

        let value = ApiBody::error("boom").into_value();
        assert_eq!(value["status"], "error");
        assert_eq!(value["message"], "boom");
    }
}
