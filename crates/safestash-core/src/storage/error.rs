//! Storage error classification
//!
//! Maps raw store failures to a fixed set of error kinds, each with a
//! descriptive message and recovery actions for the UI layer.

use std::fmt;
use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::quota::QuotaInfo;

/// Legacy DOMException code for a quota violation
pub const QUOTA_EXCEEDED_CODE: u16 = 22;

/// Code reported by Gecko-based hosts when the quota is reached
pub const QUOTA_REACHED_CODE: u16 = 1014;

/// Callback invoked with a classified failure
///
/// Called at most once per failing operation.
pub type ErrorCallback = Arc<dyn Fn(&StorageError) + Send + Sync>;

/// A raw failure reported by the underlying store
///
/// Carries the host's own `name`, optional numeric `code` and message,
/// untouched. Classification happens in [`detect_error_type`].
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{name}: {message}")]
pub struct StoreFailure {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    pub message: String,
}

impl StoreFailure {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    /// The failure a host raises when a write would exceed its quota
    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new("QuotaExceededError", message).with_code(QUOTA_EXCEEDED_CODE)
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::new("SecurityError", message)
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new("NotSupportedError", message)
    }

    pub fn data_clone(message: impl Into<String>) -> Self {
        Self::new("DataCloneError", message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new("InvalidStateError", message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new("SyntaxError", message)
    }

    /// Translate an I/O error into the failure a browser host would report
    ///
    /// Disk-full conditions become quota failures so the reclaim-and-retry
    /// path applies to file-backed stores too.
    pub fn from_io(error: &io::Error, key: &str) -> Self {
        let message = format!("'{}': {}", key, error);
        match error.kind() {
            io::ErrorKind::PermissionDenied => Self::security(message),
            io::ErrorKind::Unsupported => Self::not_supported(message),
            io::ErrorKind::InvalidData => Self::syntax(message),
            _ if is_disk_full_error(error) => Self::quota_exceeded(message),
            _ => Self::new("Error", message),
        }
    }
}

impl From<serde_json::Error> for StoreFailure {
    fn from(error: serde_json::Error) -> Self {
        if error.is_data() || error.is_syntax() || error.is_eof() {
            Self::syntax(format!("JSON parse error: {}", error))
        } else {
            Self::data_clone(format!("JSON encode error: {}", error))
        }
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    // ENOSPC / EDQUOT
    if matches!(error.raw_os_error(), Some(28) | Some(122)) {
        return true;
    }
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Classified kind of a storage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    QuotaExceeded,
    SecurityError,
    NotSupported,
    DataClone,
    InvalidState,
    ParseError,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorKind::SecurityError => "SECURITY_ERROR",
            ErrorKind::NotSupported => "NOT_SUPPORTED",
            ErrorKind::DataClone => "DATA_CLONE",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::ParseError => "PARSE_ERROR",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// Whether the core attempts local recovery for this kind
    ///
    /// Quota failures get reclamation plus one retry, parse failures get one
    /// restore from backup. Everything else is surfaced immediately.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ErrorKind::QuotaExceeded | ErrorKind::ParseError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a raw failure
///
/// Checks, in order: quota names, quota codes, security, not-supported,
/// data-clone, invalid-state, and parse/syntax patterns. The first match
/// wins; a missing or unrecognized failure is `Unknown`.
pub fn detect_error_type(error: Option<&StoreFailure>) -> ErrorKind {
    let Some(error) = error else {
        return ErrorKind::Unknown;
    };

    let name = error.name.to_ascii_lowercase();
    let message = error.message.to_ascii_lowercase();

    if name.contains("quota") {
        ErrorKind::QuotaExceeded
    } else if matches!(error.code, Some(QUOTA_EXCEEDED_CODE | QUOTA_REACHED_CODE)) {
        ErrorKind::QuotaExceeded
    } else if name.contains("securityerror") {
        ErrorKind::SecurityError
    } else if name.contains("notsupportederror") {
        ErrorKind::NotSupported
    } else if name.contains("dataclone") {
        ErrorKind::DataClone
    } else if name.contains("invalidstate") {
        ErrorKind::InvalidState
    } else if name.contains("syntaxerror")
        || name.contains("parse")
        || message.contains("json parse")
        || message.contains("unexpected token")
        || message.contains("unexpected end of json")
    {
        ErrorKind::ParseError
    } else {
        ErrorKind::Unknown
    }
}

/// How urgently the UI should surface a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => f.write_str("critical"),
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// User-facing description of an error kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorMessage {
    pub title: String,
    pub message: String,
    pub actions: Vec<String>,
    pub severity: Severity,
}

impl ErrorMessage {
    fn new(title: &str, message: &str, actions: &[&str], severity: Severity) -> Self {
        Self {
            title: title.to_string(),
            message: message.to_string(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
            severity,
        }
    }
}

/// Message template for an error kind
pub fn error_message(kind: ErrorKind) -> ErrorMessage {
    match kind {
        ErrorKind::QuotaExceeded => ErrorMessage::new(
            "Storage Full",
            "Storage is full and your latest changes could not be saved.",
            &[
                "Delete records you no longer need",
                "Remove old backups to free space",
                "Export your data, then clear old entries",
            ],
            Severity::Critical,
        ),
        ErrorKind::SecurityError => ErrorMessage::new(
            "Storage Access Denied",
            "Access to storage was blocked, possibly by private browsing or privacy settings.",
            &[
                "Disable private browsing for this site",
                "Allow site data in your browser settings",
            ],
            Severity::Critical,
        ),
        ErrorKind::NotSupported => ErrorMessage::new(
            "Storage Not Supported",
            "This environment does not support persistent storage.",
            &["Use a browser with local storage support"],
            Severity::Error,
        ),
        ErrorKind::DataClone => ErrorMessage::new(
            "Data Cannot Be Stored",
            "The data contains values that cannot be serialized for storage.",
            &["Check the record for unsupported values", "Try saving again"],
            Severity::Error,
        ),
        ErrorKind::InvalidState => ErrorMessage::new(
            "Storage Unavailable",
            "Storage is temporarily in an invalid state.",
            &["Reload the application", "Try again in a moment"],
            Severity::Warning,
        ),
        ErrorKind::ParseError => ErrorMessage::new(
            "Data Corrupted",
            "Stored data could not be read and may be corrupted.",
            &[
                "Restore from backup",
                "Clear the corrupted data and start fresh",
            ],
            Severity::Error,
        ),
        ErrorKind::Unknown => ErrorMessage::new(
            "Unclassified Storage Error",
            "An unexpected storage error occurred.",
            &["Try again", "Reload the application"],
            Severity::Error,
        ),
    }
}

/// A classified failure, ready for the UI layer
///
/// Built per failure and handed to an [`ErrorCallback`]; never stored.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("{title}: {message}")]
pub struct StorageError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub title: String,
    pub message: String,
    pub actions: Vec<String>,
    pub severity: Severity,
    pub original_error: Option<StoreFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<QuotaInfo>,
}

impl StorageError {
    pub fn new(kind: ErrorKind, original_error: Option<StoreFailure>) -> Self {
        let template = error_message(kind);
        Self {
            kind,
            title: template.title,
            message: template.message,
            actions: template.actions,
            severity: template.severity,
            original_error,
            quota: None,
        }
    }

    /// Classify `failure` and describe it
    pub fn from_failure(failure: StoreFailure) -> Self {
        let kind = detect_error_type(Some(&failure));
        Self::new(kind, Some(failure))
    }

    /// Attach a quota snapshot
    pub fn with_quota(mut self, quota: QuotaInfo) -> Self {
        self.quota = Some(quota);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KINDS: [ErrorKind; 7] = [
        ErrorKind::QuotaExceeded,
        ErrorKind::SecurityError,
        ErrorKind::NotSupported,
        ErrorKind::DataClone,
        ErrorKind::InvalidState,
        ErrorKind::ParseError,
        ErrorKind::Unknown,
    ];

    #[test]
    fn test_quota_names_classified() {
        for name in [
            "QuotaExceededError",
            "NS_ERROR_DOM_QUOTA_REACHED",
            "quotaexceedederror",
        ] {
            let failure = StoreFailure::new(name, "full");
            assert_eq!(
                detect_error_type(Some(&failure)),
                ErrorKind::QuotaExceeded,
                "{name}"
            );
        }
    }

    #[test]
    fn test_quota_codes_classified() {
        for code in [QUOTA_EXCEEDED_CODE, QUOTA_REACHED_CODE] {
            let failure = StoreFailure::new("Error", "write rejected").with_code(code);
            assert_eq!(detect_error_type(Some(&failure)), ErrorKind::QuotaExceeded);
        }
    }

    #[test]
    fn test_missing_failure_is_unknown() {
        assert_eq!(detect_error_type(None), ErrorKind::Unknown);
    }

    #[test]
    fn test_unrecognized_failure_is_unknown() {
        let failure = StoreFailure::new("TypeError", "undefined is not a function");
        assert_eq!(detect_error_type(Some(&failure)), ErrorKind::Unknown);
    }

    #[test]
    fn test_named_failures_classified() {
        let cases = [
            (StoreFailure::security("blocked"), ErrorKind::SecurityError),
            (StoreFailure::not_supported("nope"), ErrorKind::NotSupported),
            (StoreFailure::data_clone("cyclic"), ErrorKind::DataClone),
            (StoreFailure::invalid_state("closed"), ErrorKind::InvalidState),
            (StoreFailure::syntax("bad"), ErrorKind::ParseError),
        ];
        for (failure, expected) in cases {
            assert_eq!(detect_error_type(Some(&failure)), expected);
        }
    }

    #[test]
    fn test_quota_name_wins_over_later_patterns() {
        // A quota name that also mentions JSON still classifies as quota
        let failure = StoreFailure::new("QuotaExceededError", "JSON payload too large");
        assert_eq!(detect_error_type(Some(&failure)), ErrorKind::QuotaExceeded);
    }

    #[test]
    fn test_json_mention_alone_is_not_parse_error() {
        let failure = StoreFailure::new("Error", "could not write json file");
        assert_eq!(detect_error_type(Some(&failure)), ErrorKind::Unknown);

        let failure = StoreFailure::new("Error", "JSON parse failed at line 1");
        assert_eq!(detect_error_type(Some(&failure)), ErrorKind::ParseError);

        let failure = StoreFailure::new("Error", "Unexpected end of JSON input");
        assert_eq!(detect_error_type(Some(&failure)), ErrorKind::ParseError);
    }

    #[test]
    fn test_serde_error_is_parse_error() {
        let err = serde_json::from_str::<Vec<u32>>("{not json").unwrap_err();
        let failure = StoreFailure::from(err);
        assert_eq!(failure.name, "SyntaxError");
        assert_eq!(detect_error_type(Some(&failure)), ErrorKind::ParseError);
    }

    #[test]
    fn test_io_classification() {
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        assert_eq!(
            detect_error_type(Some(&StoreFailure::from_io(&denied, "tasks"))),
            ErrorKind::SecurityError
        );

        let full = io::Error::new(io::ErrorKind::Other, "No space left on device");
        let failure = StoreFailure::from_io(&full, "tasks");
        assert_eq!(failure.code, Some(QUOTA_EXCEEDED_CODE));
        assert_eq!(detect_error_type(Some(&failure)), ErrorKind::QuotaExceeded);

        let other = io::Error::new(io::ErrorKind::Other, "something odd");
        assert_eq!(
            detect_error_type(Some(&StoreFailure::from_io(&other, "tasks"))),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_every_kind_has_complete_message() {
        for kind in ALL_KINDS {
            let msg = error_message(kind);
            assert!(!msg.title.is_empty(), "{kind}");
            assert!(!msg.message.is_empty(), "{kind}");
            assert!(!msg.actions.is_empty(), "{kind}");
        }
    }

    #[test]
    fn test_critical_severity_for_quota_and_security() {
        assert_eq!(
            error_message(ErrorKind::QuotaExceeded).severity,
            Severity::Critical
        );
        assert_eq!(
            error_message(ErrorKind::SecurityError).severity,
            Severity::Critical
        );
    }

    #[test]
    fn test_parse_error_offers_restore() {
        let msg = error_message(ErrorKind::ParseError);
        assert_eq!(msg.severity, Severity::Error);
        assert!(msg
            .actions
            .iter()
            .any(|a| a.to_lowercase().contains("restore from backup")));
    }

    #[test]
    fn test_unknown_title_says_unclassified() {
        let msg = error_message(ErrorKind::Unknown);
        assert!(msg.title.to_lowercase().contains("unclassified"));
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(ErrorKind::QuotaExceeded.is_recoverable());
        assert!(ErrorKind::ParseError.is_recoverable());
        assert!(!ErrorKind::SecurityError.is_recoverable());
        assert!(!ErrorKind::Unknown.is_recoverable());
    }

    #[test]
    fn test_storage_error_serialization_shape() {
        let err = StorageError::from_failure(StoreFailure::quota_exceeded("full"));
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["type"], "QUOTA_EXCEEDED");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["originalError"]["name"], "QuotaExceededError");
        assert_eq!(json["originalError"]["code"], 22);
        assert!(json.get("quota").is_none());
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::new(ErrorKind::ParseError, None);
        let msg = err.to_string();
        assert!(msg.contains("Data Corrupted"));
        assert!(msg.contains("corrupted"));
    }
}
