use thiserror::Error;
use uuid::Uuid;

/// Library result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when operating the gateway core.
#[derive(Error, Debug)]
pub enum Error {
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("client: {0}")]
    Client(#[from] ClientError),

    #[error("webhook: {0}")]
    Webhook(#[from] DispatchError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Persistence (session/device/log) errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(String),

    #[error("save failed: {0}")]
    Save(String),

    #[error("load failed: {0}")]
    Load(String),

    #[error("device has no identity")]
    DeviceNotPaired,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// WA client port errors.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("media download failed: {0}")]
    Download(String),

    #[error("qr channel unavailable: {0}")]
    QrChannel(String),
}

/// Webhook dispatch errors. The final error after retries carries the
/// attempt count and the last observed HTTP status, when any response came
/// back at all.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("webhook failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_status: Option<u16>,
        last_error: String,
    },
}

impl DispatchError {
    /// HTTP status of the last failed attempt, if one was observed.
    pub fn last_status(&self) -> Option<u16> {
        match self {
            Self::RetriesExhausted { last_status, .. } => *last_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_error_reports_attempts_and_status() {
        let err = DispatchError::RetriesExhausted {
            attempts: 3,
            last_status: Some(500),
            last_error: "server error".into(),
        };
        assert_eq!(err.last_status(), Some(500));
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("server error"));
    }

    #[test]
    fn errors_wrap_into_library_error() {
        let e: Error = StoreError::Load("missing".into()).into();
        assert!(matches!(e, Error::Store(_)));
        let e: Error = ClientError::NotConnected.into();
        assert!(e.to_string().contains("not connected"));
    }
}
