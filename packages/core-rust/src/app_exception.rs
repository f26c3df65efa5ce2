//! Application-level exceptions synthesized as local replies.

/// Application exception kinds, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppExceptionType {
    Unknown = 0,
    UnknownMethod = 1,
    InvalidMessageType = 2,
    WrongMethodName = 3,
    BadSequenceId = 4,
    MissingResult = 5,
    InternalError = 6,
    ProtocolError = 7,
    InvalidTransform = 8,
    InvalidProtocol = 9,
    UnsupportedClientType = 10,
}

/// An exception reply generated by the proxy rather than an upstream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct AppException {
    pub kind: AppExceptionType,
    pub message: String,
}

impl AppException {
    #[must_use]
    pub fn new(kind: AppExceptionType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unknown_method(message: impl Into<String>) -> Self {
        Self::new(AppExceptionType::UnknownMethod, message)
    }

    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(AppExceptionType::InternalError, message)
    }
}
