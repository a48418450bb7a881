//! Two error families, deliberately not unified into one enum.
//!
//! [`HandlerError`] is user-facing: its `Display` text becomes the
//! `feedback` string a client reads over the wire, so it's written by hand
//! the way the reference server's `CommandError` is, one variant per failure
//! reason. Everything below the handler layer — codec and persistence
//! failures that are never shown to a client and are propagated with `?` —
//! uses `thiserror` instead.

use std::fmt;

#[derive(Debug)]
pub enum HandlerError {
    UserNotFound,
    UserAlreadyExists,
    WrongPassword,
    ChatNotFound,
    ChatAlreadyExists,
    NotAMember,
    SessionInvalid,
    InvalidRequest,
    /// Not a failure — the redirect signal carried in a `Failure`-tagged reply.
    Redirect(String),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserNotFound => write!(f, "User does not exist"),
            Self::UserAlreadyExists => write!(f, "Username already taken"),
            Self::WrongPassword => write!(f, "Password is incorrect"),
            Self::ChatNotFound => write!(f, "Chat does not exist"),
            Self::ChatAlreadyExists => write!(f, "Chat name already taken"),
            Self::NotAMember => write!(f, "User is not a member of this chat"),
            Self::SessionInvalid => write!(f, "Session is not logged in"),
            Self::InvalidRequest => write!(f, "Invalid request"),
            Self::Redirect(_) => write!(f, "Redirect client"),
        }
    }
}

impl std::error::Error for HandlerError {}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame decryption failed")]
    Decrypt,
    #[error("frame was not valid utf-8")]
    Utf8,
    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame exceeded max size")]
    FrameTooLarge,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreIoError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot (de)serialization error: {0}")]
    Bincode(#[from] bincode::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("base key is not a valid url-safe base64 encoding of 32 bytes")]
    InvalidBaseKey,
}
