use application::{ApplicationError, AuthError, UploadError};
use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{DomainError, RepositoryError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                success: false,
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        let code = match error {
            AuthError::Missing => "AUTH_MISSING",
            AuthError::Expired => "AUTH_EXPIRED",
            AuthError::Revoked => "AUTH_REVOKED",
            AuthError::BadLogin => "BAD_LOGIN",
            AuthError::Invalid | AuthError::UnknownUser => "AUTH_INVALID",
        };
        ApiError::new(StatusCode::UNAUTHORIZED, code, error.to_string())
    }
}

impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        ApiError::bad_request(format!("invalid multipart body: {}", error.body_text()))
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::ApplicationError as AppErr;

        match error {
            AppErr::Domain(err) => match &err {
                DomainError::Validation { .. } => {
                    ApiError::new(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", err.to_string())
                }
                DomainError::NotFound { .. } => {
                    ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
                }
                DomainError::PermissionDenied { .. } => {
                    ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", err.to_string())
                }
                DomainError::Conflict { .. } => {
                    ApiError::new(StatusCode::CONFLICT, "CONFLICT", err.to_string())
                }
                DomainError::BusinessRule { .. } => {
                    ApiError::new(StatusCode::BAD_REQUEST, "BUSINESS_RULE", err.to_string())
                }
            },
            AppErr::Repository(repo_err) => match repo_err {
                RepositoryError::NotFound => ApiError::new(
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    "requested resource not found",
                ),
                RepositoryError::Conflict => {
                    ApiError::new(StatusCode::CONFLICT, "CONFLICT", "resource already exists")
                }
                RepositoryError::Storage { message } => {
                    tracing::error!(error = %message, "存储层错误");
                    ApiError::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "DATABASE_ERROR",
                        "database error",
                    )
                }
            },
            AppErr::Authentication(err) => ApiError::from(err),
            AppErr::Upload(err) => match &err {
                UploadError::Rejected { .. } => {
                    ApiError::new(StatusCode::BAD_GATEWAY, "UPLOAD_REJECTED", err.to_string())
                }
                UploadError::Unavailable(_) => ApiError::new(
                    StatusCode::BAD_GATEWAY,
                    "UPLOAD_UNAVAILABLE",
                    err.to_string(),
                ),
            },
            AppErr::Password(err) => {
                tracing::error!(error = %err, "密码处理失败");
                ApiError::internal_server_error("password processing failed")
            }
            AppErr::Infrastructure(message) => {
                tracing::error!(error = %message, "基础设施错误");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INFRASTRUCTURE_ERROR",
                    message,
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_statuses() {
        let cases = [
            (DomainError::validation("name", "is required"), StatusCode::BAD_REQUEST),
            (DomainError::not_found("chat"), StatusCode::NOT_FOUND),
            (DomainError::permission_denied("rename"), StatusCode::FORBIDDEN),
            (DomainError::conflict("exists"), StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(ApplicationError::from(err)).status(), status);
        }
    }

    #[test]
    fn storage_details_are_not_leaked() {
        let err = ApiError::from(ApplicationError::from(RepositoryError::storage(
            "connection refused at 10.0.0.3",
        )));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body.message, "database error");
    }

    #[test]
    fn upload_failures_are_bad_gateway() {
        let err = ApiError::from(ApplicationError::from(UploadError::Unavailable(
            "timeout".into(),
        )));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(!err.body.success);
    }
}
