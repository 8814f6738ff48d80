use std::fmt;

/// One backend that was tried during selection and why it was passed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAttempt {
    pub backend: &'static str,
    pub reason: String,
}

impl BackendAttempt {
    pub fn new(backend: &'static str, reason: impl Into<String>) -> Self {
        Self {
            backend,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for BackendAttempt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.reason)
    }
}

fn format_attempts(attempts: &[BackendAttempt]) -> String {
    if attempts.is_empty() {
        return "no backends registered".to_string();
    }
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("Camera initialization error: {0}")]
    InitializationError(String),
    #[error("Resolution negotiation error: {0}")]
    NegotiationError(String),
    #[error("No camera backend available ({})", format_attempts(.attempts))]
    NoBackendAvailable { attempts: Vec<BackendAttempt> },
    #[error("Capture error: {0}")]
    CaptureError(String),
    #[error("Still capture error: {0}")]
    StillCaptureError(String),
    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),
    #[error("Encoding error: {0}")]
    EncodingError(String),
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CameraError {
    /// Transient conditions a caller may simply retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CameraError::CaptureUnavailable(_) | CameraError::CaptureError(_)
        )
    }

    /// Backends listed by a `NoBackendAvailable` error, in the order they were tried.
    pub fn attempts(&self) -> &[BackendAttempt] {
        match self {
            CameraError::NoBackendAvailable { attempts } => attempts,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_backend_lists_every_attempt() {
        let error = CameraError::NoBackendAvailable {
            attempts: vec![
                BackendAttempt::new("rpicam", "not available"),
                BackendAttempt::new("v4l2", "device busy"),
            ],
        };
        let msg = error.to_string();
        assert!(msg.contains("rpicam: not available"));
        assert!(msg.contains("v4l2: device busy"));
        assert_eq!(error.attempts().len(), 2);
    }

    #[test]
    fn test_empty_attempts_message() {
        let error = CameraError::NoBackendAvailable { attempts: vec![] };
        assert!(error.to_string().contains("no backends registered"));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(CameraError::CaptureUnavailable("reconnecting".into()).is_retryable());
        assert!(CameraError::CaptureError("timeout".into()).is_retryable());
        assert!(!CameraError::ConfigError("bad".into()).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: CameraError = io.into();
        assert_eq!(error.to_string(), "IO error: missing");
    }
}
