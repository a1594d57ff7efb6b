use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidJson,
    ConfigInvalidValue,
    ConfigNotFound,

    ValidationMissingArgument,
    ValidationInvalidArgument,
    ValidationUnsafePath,

    SshConnectFailed,
    RemoteCommandFailed,
    TransferFailed,

    StepRetriesExhausted,
    FanOutCancelled,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",
            ErrorCode::ConfigNotFound => "config.not_found",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",
            ErrorCode::ValidationUnsafePath => "validation.unsafe_path",

            ErrorCode::SshConnectFailed => "ssh.connect_failed",
            ErrorCode::RemoteCommandFailed => "remote.command_failed",
            ErrorCode::TransferFailed => "transfer.failed",

            ErrorCode::StepRetriesExhausted => "step.retries_exhausted",
            ErrorCode::FanOutCancelled => "fanout.cancelled",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl TargetDetails {
    pub fn local() -> Self {
        Self {
            host: Some("local".to_string()),
            user: None,
            port: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub target: TargetDetails,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFailedDetails {
    pub source: String,
    pub destination: String,
    pub exit_code: i32,
    pub stderr: String,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            format!("Invalid argument: {}", problem),
            details,
        )
    }

    /// Refusal to run a destructive operation against an empty or root path.
    pub fn validation_unsafe_path(path: impl Into<String>, problem: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(
            ErrorCode::ValidationUnsafePath,
            format!("Refusing to operate on unsafe path '{}'", path),
            serde_json::json!({ "path": path, "problem": problem.into() }),
        )
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        let key = key.into();
        Self::new(
            ErrorCode::ConfigMissingKey,
            format!("The config file doesn't define a {} attribute.", key),
            to_details(ConfigMissingKeyDetails { key, path }),
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            serde_json::json!({ "path": path.into(), "error": err.to_string() }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.clone(),
        });

        Self::new(
            ErrorCode::ConfigInvalidValue,
            format!("Invalid configuration value: {}", problem),
            details,
        )
    }

    pub fn config_not_found(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(
            ErrorCode::ConfigNotFound,
            format!("Config module not found: {}", path),
            serde_json::json!({ "path": path }),
        )
        .with_hint("Pass --config-module to name the step manifest inside the config directory")
    }

    pub fn ssh_connect_failed(target: TargetDetails, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        Self::new(
            ErrorCode::SshConnectFailed,
            format!("Unable to connect: {}", stderr.trim()),
            serde_json::json!({ "target": target, "stderr": stderr }),
        )
        .with_retryable(true)
    }

    pub fn remote_command_failed(details: RemoteCommandFailedDetails) -> Self {
        let message = format!(
            "Command failed with exit code {}: {}",
            details.exit_code, details.command
        );
        Self::new(ErrorCode::RemoteCommandFailed, message, to_details(details))
    }

    pub fn transfer_failed(details: TransferFailedDetails) -> Self {
        let message = format!(
            "Failed to transfer {} to {}",
            details.source, details.destination
        );
        Self::new(ErrorCode::TransferFailed, message, to_details(details)).with_retryable(true)
    }

    pub fn step_retries_exhausted(attempts: u32, last_error: impl Into<String>) -> Self {
        let last_error = last_error.into();
        Self::new(
            ErrorCode::StepRetriesExhausted,
            format!(
                "unable to execute after {} attempts. last err: {}",
                attempts, last_error
            ),
            serde_json::json!({ "attempts": attempts, "lastError": last_error }),
        )
    }

    pub fn fan_out_cancelled(host: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::FanOutCancelled,
            "Skipped after an earlier host failed",
            serde_json::json!({ "host": host.into() }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalIoErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            serde_json::json!({ "error": error.into(), "context": context }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::internal_unexpected(message)
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    /// Human-readable detail for logs: the message plus captured stderr when present.
    pub fn detail_text(&self) -> String {
        let stderr = self
            .details
            .get("stderr")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let error = self
            .details
            .get("error")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());

        match (stderr, error) {
            (Some(stderr), _) => format!("{}: {}", self.message, stderr),
            (None, Some(error)) => format!("{}: {}", self.message, error),
            (None, None) => self.message.clone(),
        }
    }
}
