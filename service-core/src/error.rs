use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

/// Field-level validation failure reported back to API clients.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Flatten derived validation errors into `a.b[0].c` paths, sorted by path.
    ///
    /// Field names are reported in camelCase to match the JSON wire shape.
    pub fn from_validation(errors: &ValidationErrors) -> Vec<FieldError> {
        let mut out = Vec::new();
        collect_field_errors("", errors, &mut out);
        out.sort_by(|a, b| a.field.cmp(&b.field));
        out
    }
}

fn collect_field_errors(prefix: &str, errors: &ValidationErrors, out: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        let path = if *field == "__all__" {
            prefix.to_string()
        } else if prefix.is_empty() {
            camel_case(field)
        } else {
            format!("{prefix}.{}", camel_case(field))
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                for err in list {
                    let message = err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| err.code.to_string());
                    out.push(FieldError::new(path.clone(), message));
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_field_errors(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    collect_field_errors(&format!("{path}[{idx}]"), inner, out);
                }
            }
        }
    }
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = !out.is_empty();
        } else if upper {
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Unprocessable entity: {message}")]
    Unprocessable {
        message: String,
        fields: Vec<FieldError>,
    },

    /// Client error carrying a stable machine-readable code.
    #[error("Bad request: {1}")]
    BadRequest(&'static str, anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {1}")]
    Unauthorized(&'static str, anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Conflict: {1}")]
    Conflict(&'static str, anyhow::Error),

    #[error("Too many requests: {0}")]
    TooManyRequests(String, Option<u64>),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Bad Gateway: {1}")]
    BadGateway(&'static str, String, Option<String>),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    /// Stable machine-readable error code used in response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) | AppError::Unprocessable { .. } => "validation_error",
            AppError::BadRequest(code, _) => *code,
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized(code, _) => *code,
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict(code, _) => *code,
            AppError::TooManyRequests(_, _) => "rate_limited",
            AppError::InternalError(_) => "internal_error",
            AppError::BadGateway(code, _, _) => *code,
            AppError::ServiceUnavailable => "service_unavailable",
            AppError::ConfigError(_) => "configuration_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::Unprocessable { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::BadRequest(_, _) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_, _) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_, _) => StatusCode::CONFLICT,
            AppError::TooManyRequests(_, _) => StatusCode::TOO_MANY_REQUESTS,
            AppError::InternalError(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::BadGateway(_, _, _) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
            message: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<serde_json::Value>,
        }

        let status = self.status();
        let code = self.code();

        let (message, details, retry_after) = match self {
            AppError::ValidationError(err) => (
                "Validation error".to_string(),
                serde_json::to_value(FieldError::from_validation(&err)).ok(),
                None,
            ),
            AppError::Unprocessable { message, fields } => {
                (message, serde_json::to_value(&fields).ok(), None)
            }
            AppError::BadRequest(_, err)
            | AppError::NotFound(err)
            | AppError::Unauthorized(_, err)
            | AppError::Forbidden(err)
            | AppError::Conflict(_, err) => (err.to_string(), None, None),
            AppError::TooManyRequests(msg, retry) => (msg, None, retry),
            AppError::InternalError(err) => {
                tracing::error!(error = ?err, "Internal server error");
                ("Internal server error".to_string(), None, None)
            }
            AppError::BadGateway(_, msg, detail) => {
                (msg, detail.map(serde_json::Value::String), None)
            }
            AppError::ServiceUnavailable => ("Service unavailable".to_string(), None, None),
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Configuration error");
                ("Configuration error".to_string(), None, None)
            }
        };

        let mut res = (
            status,
            Json(ErrorResponse {
                error: code,
                message,
                details,
            }),
        )
            .into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Line {
        #[validate(range(exclusive_min = 0.0, message = "must be greater than 0"))]
        unit_quantity: f64,
    }

    #[derive(Validate)]
    struct Doc {
        #[validate(length(min = 1, message = "required"))]
        order_number: String,
        #[validate(nested)]
        lines: Vec<Line>,
    }

    fn invalid_doc() -> Doc {
        Doc {
            order_number: String::new(),
            lines: vec![
                Line { unit_quantity: 1.0 },
                Line { unit_quantity: 0.0 },
            ],
        }
    }

    #[test]
    fn codes_are_stable() {
        let err = AppError::BadRequest("missing_idempotency_key", anyhow::anyhow!("missing"));
        assert_eq!(err.code(), "missing_idempotency_key");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = AppError::Unprocessable {
            message: "invalid order".into(),
            fields: vec![FieldError::new("lines[0].quantity", "must be > 0")],
        };
        assert_eq!(err.code(), "validation_error");
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn derived_errors_flatten_to_camel_case_paths() {
        let errors = invalid_doc().validate().unwrap_err();
        let fields = FieldError::from_validation(&errors);
        assert_eq!(
            fields,
            vec![
                FieldError::new("lines[1].unitQuantity", "must be greater than 0"),
                FieldError::new("orderNumber", "required"),
            ]
        );
    }

    #[tokio::test]
    async fn validation_error_body_lists_fields() {
        let errors = invalid_doc().validate().unwrap_err();
        let res = AppError::from(errors).into_response();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "validation_error");
        assert_eq!(body["details"][0]["field"], "lines[1].unitQuantity");
        assert_eq!(body["details"][1]["field"], "orderNumber");
    }

    #[test]
    fn too_many_requests_sets_retry_after() {
        let res = AppError::TooManyRequests("slow down".into(), Some(7)).into_response();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            res.headers()
                .get(axum::http::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("7")
        );
    }
}
