use thiserror::Error;

/// All failure modes the core can surface to a caller or to the status callback.
///
/// `connect`/`publish`/`subscribe`/`unsubscribe` return `Result<_, ClientError>`;
/// the synchronous `false` results described for `connect` in the component
/// design map to `Err(ClientError::Configuration(_))`.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Configuration(&'static str),

    #[error("connect() called while a connection attempt is already in progress")]
    AlreadyConnecting,

    #[error("operation attempted after disconnect() was issued")]
    AlreadyDisconnected,

    #[error("operation attempted before connect() was issued")]
    NotConnected,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("failed to fetch credentials: {0}")]
    CredentialsFetch(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("SigV4 signing error: {0}")]
    Signing(String),

    #[error("mqtt session error: {0}")]
    Session(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
