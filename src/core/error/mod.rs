use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidValue,
    ConfigParseFailed,

    ValidationMissingArgument,
    ValidationInvalidArgument,

    SiteNotFound,
    SiteConflict,
    ProfileNotFound,
    StoreFailed,

    SshConnectFailed,
    SshAuthFailed,
    CommandSpawnFailed,
    CommandTimeout,

    CommandFailed,

    VaultEncryptFailed,
    VaultDecryptFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

/// Coarse failure classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input, rejected before anything is dispatched.
    Validation,
    /// The target could not be reached or the process could not be run.
    Transport,
    /// The process ran and exited non-zero.
    CommandFailed,
    /// Uniqueness violation in the record store.
    Conflict,
    NotFound,
    Config,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",
            ErrorCode::ConfigParseFailed => "config.parse_failed",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::SiteNotFound => "site.not_found",
            ErrorCode::SiteConflict => "site.conflict",
            ErrorCode::ProfileNotFound => "profile.not_found",
            ErrorCode::StoreFailed => "store.failed",

            ErrorCode::SshConnectFailed => "ssh.connect_failed",
            ErrorCode::SshAuthFailed => "ssh.auth_failed",
            ErrorCode::CommandSpawnFailed => "command.spawn_failed",
            ErrorCode::CommandTimeout => "command.timeout",

            ErrorCode::CommandFailed => "command.failed",

            ErrorCode::VaultEncryptFailed => "vault.encrypt_failed",
            ErrorCode::VaultDecryptFailed => "vault.decrypt_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ErrorCode::ValidationMissingArgument
            | ErrorCode::ValidationInvalidArgument => ErrorKind::Validation,

            ErrorCode::SshConnectFailed
            | ErrorCode::SshAuthFailed
            | ErrorCode::CommandSpawnFailed
            | ErrorCode::CommandTimeout => ErrorKind::Transport,

            ErrorCode::CommandFailed => ErrorKind::CommandFailed,

            ErrorCode::SiteConflict => ErrorKind::Conflict,

            ErrorCode::SiteNotFound | ErrorCode::ProfileNotFound => ErrorKind::NotFound,

            ErrorCode::ConfigMissingKey
            | ErrorCode::ConfigInvalidValue
            | ErrorCode::ConfigParseFailed => ErrorKind::Config,

            ErrorCode::StoreFailed
            | ErrorCode::VaultEncryptFailed
            | ErrorCode::VaultDecryptFailed
            | ErrorCode::InternalIoError
            | ErrorCode::InternalJsonError
            | ErrorCode::InternalUnexpected => ErrorKind::Internal,
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
pub struct NotFoundDetails {
    pub id: String,
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
pub struct SiteConflictDetails {
    pub owner: String,
    pub domain: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDetails {
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub target: TargetDetails,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportDetails {
    pub command: String,
    pub target: TargetDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
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

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Raw stderr for `command.failed`, if present.
    pub fn stderr(&self) -> Option<&str> {
        if self.code != ErrorCode::CommandFailed {
            return None;
        }
        self.details.get("stderr").and_then(Value::as_str)
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

    pub fn site_not_found(id: impl Into<String>) -> Self {
        Self::not_found(ErrorCode::SiteNotFound, "Site not found", id)
            .with_hint("Run 'skydock site list <owner>' to see the owner's sites")
    }

    pub fn profile_not_found(account: impl Into<String>) -> Self {
        Self::not_found(ErrorCode::ProfileNotFound, "SSH profile not found", account)
            .with_hint("Run 'skydock profile set <account> ...' to store one")
    }

    fn not_found(code: ErrorCode, message: &str, id: impl Into<String>) -> Self {
        Self::new(code, message, to_details(NotFoundDetails { id: id.into() }))
    }

    pub fn site_conflict(owner: impl Into<String>, domain: impl Into<String>) -> Self {
        let domain = domain.into();
        Self::new(
            ErrorCode::SiteConflict,
            format!("A website with domain {} already exists", domain),
            to_details(SiteConflictDetails {
                owner: owner.into(),
                domain,
            }),
        )
    }

    pub fn store_failed(err: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::StoreFailed,
            "Record store error",
            to_details(InternalErrorDetails {
                error: err.into(),
                context,
            }),
        )
    }

    pub fn ssh_connect_failed(message: impl Into<String>, details: TransportDetails) -> Self {
        Self::new(ErrorCode::SshConnectFailed, message, to_details(details))
    }

    pub fn ssh_auth_failed(message: impl Into<String>, details: TransportDetails) -> Self {
        Self::new(ErrorCode::SshAuthFailed, message, to_details(details))
            .with_hint("Check the stored SSH profile credentials with 'skydock profile show'")
    }

    pub fn command_spawn_failed(err: impl Into<String>, details: TransportDetails) -> Self {
        let err = err.into();
        Self::new(
            ErrorCode::CommandSpawnFailed,
            format!("Failed to start {}: {}", details.command, err),
            to_details(TransportDetails {
                error: Some(err),
                ..details
            }),
        )
    }

    pub fn command_timeout(details: TransportDetails) -> Self {
        let secs = details.timeout_secs.unwrap_or_default();
        Self::new(
            ErrorCode::CommandTimeout,
            format!("{} timed out after {}s", details.command, secs),
            to_details(details),
        )
    }

    /// `message` should already contain the raw stderr; it is never sanitized.
    pub fn command_failed(message: impl Into<String>, details: CommandFailedDetails) -> Self {
        Self::new(ErrorCode::CommandFailed, message, to_details(details))
    }

    pub fn vault_encrypt_failed(err: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::VaultEncryptFailed,
            "Refusing to store credential: encryption failed",
            to_details(InternalErrorDetails {
                error: err.into(),
                context: None,
            }),
        )
    }

    pub fn vault_decrypt_failed(err: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::VaultDecryptFailed,
            "Stored credential could not be decrypted",
            to_details(InternalErrorDetails {
                error: err.into(),
                context: None,
            }),
        )
        .with_hint("The encryption key may have changed since the credential was stored")
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        Self::new(
            ErrorCode::ConfigMissingKey,
            "Missing required configuration key",
            to_details(ConfigMissingKeyDetails {
                key: key.into(),
                path,
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            to_details(ConfigInvalidValueDetails {
                key: key.into(),
                value,
                problem: problem.into(),
            }),
        )
    }

    pub fn config_parse_failed(path: impl Into<String>, err: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ConfigParseFailed,
            "Configuration file could not be parsed",
            to_details(InternalErrorDetails {
                error: err.into(),
                context: Some(path.into()),
            }),
        )
    }

    pub fn internal_io(err: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalErrorDetails {
                error: err.into(),
                context,
            }),
        )
    }

    pub fn internal_json(err: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            to_details(InternalErrorDetails {
                error: err.into(),
                context,
            }),
        )
    }

    pub fn internal_unexpected(err: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            to_details(InternalErrorDetails {
                error: err.into(),
                context: None,
            }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    pub fn with_details(mut self, key: &str, value: Value) -> Self {
        if let Value::Object(map) = &mut self.details {
            map.insert(key.to_string(), value);
        }
        self
    }
}
