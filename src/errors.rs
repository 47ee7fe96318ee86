use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Unknown key: {0}")]
    UnknownKey(String),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

/// Opening the transport or creating the printer device failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Invalid printer endpoint {host}:{port}")]
    InvalidEndpoint { host: String, port: String },

    #[error("Transport unavailable: {0}")]
    Transport(String),

    #[error("Device creation failed: {0}")]
    DeviceCreation(String),

    #[error("No printer endpoint has been configured")]
    NoEndpoint,
}

#[derive(Debug, Error)]
pub enum PrintError {
    #[error("Printer connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Print job failed: {0}")]
    SendFailed(String),

    #[error("Printer timed out after {0} seconds")]
    Timeout(u64),

    #[error("Printer I/O error: {0}")]
    IoError(#[from] io::Error),
}

/// The registration service rejected the group or could not be reached
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Printer is not connected")]
    DeviceNotReady,

    #[error("Registration failed: {0}")]
    Remote(#[from] RemoteError),

    /// The group is registered remotely; only the tickets are missing
    #[error("Printing failed after registration of group {group_id}: {source}")]
    Print {
        group_id: String,
        #[source]
        source: PrintError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,

    #[error("KIOSK_ENTRANCE must be one of west, front, new (got {value:?})")]
    InvalidEntrance { value: Option<String> },

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings store unavailable: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Initialization(_) => 500,
            AppError::Input(_) => 400,
            AppError::UnknownKey(_) => 400,
            AppError::Connection(ConnectionError::InvalidEndpoint { .. }) => 400,
            AppError::Connection(_) => 503,
            AppError::Submission(SubmissionError::Validation(_)) => 422,
            AppError::Submission(SubmissionError::DeviceNotReady) => 503,
            AppError::Submission(SubmissionError::Remote(_)) => 502,
            AppError::Submission(SubmissionError::Print { .. }) => 503,
            AppError::Config(_) => 500,
            AppError::Settings(_) => 503,
        }
    }

    pub fn error_response(&self) -> serde_json::Value {
        serde_json::json!({
            "ok": false,
            "error": self.to_string(),
            "error_type": self.error_type()
        })
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::Initialization(_) => "initialization_error",
            AppError::Input(_) => "input_error",
            AppError::UnknownKey(_) => "unknown_key",
            AppError::Connection(_) => "connection_error",
            AppError::Submission(e) => e.error_type(),
            AppError::Config(_) => "config_error",
            AppError::Settings(_) => "settings_error",
        }
    }
}

impl SubmissionError {
    pub fn error_type(&self) -> &'static str {
        match self {
            SubmissionError::Validation(_) => "validation_error",
            SubmissionError::DeviceNotReady => "device_not_ready",
            SubmissionError::Remote(_) => "remote_error",
            SubmissionError::Print { .. } => "print_error",
        }
    }
}

impl actix_web::ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        actix_web::HttpResponse::build(actix_web::ResponseError::status_code(self))
            .json(AppError::error_response(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        let err = SubmissionError::Remote(RemoteError {
            status: Some(409),
            message: "capacity exceeded".to_string(),
        });
        assert_eq!(err.to_string(), "Registration failed: capacity exceeded");
    }

    #[test]
    fn test_print_error_wraps_connection_reason() {
        let err = PrintError::from(ConnectionError::Transport("refused".to_string()));
        assert_eq!(
            err.to_string(),
            "Printer connection failed: Transport unavailable: refused"
        );
    }

    #[test]
    fn test_app_error_status_codes() {
        let err = AppError::Submission(SubmissionError::Validation("empty".to_string()));
        assert_eq!(err.status_code(), 422);

        let err = AppError::Connection(ConnectionError::InvalidEndpoint {
            host: "".to_string(),
            port: "x".to_string(),
        });
        assert_eq!(err.status_code(), 400);

        let err = AppError::Submission(SubmissionError::DeviceNotReady);
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn test_error_response_json() {
        let err = AppError::Submission(SubmissionError::DeviceNotReady);
        let json = err.error_response();

        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "Submission error: Printer is not connected");
        assert_eq!(json["error_type"], "device_not_ready");
    }
}
