use crate::error::{ClientError, Result};

/// A set of AWS credentials sufficient to sign the IoT Core WebSocket URL.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

/// External collaborator (§6): yields credentials on demand. The lifecycle
/// controller calls this once per `SignedWebSocket` connect attempt, off the
/// event-loop thread, and treats a late-arriving result as stale if
/// `disconnect()` has already been issued (§5, "Cancellation").
///
/// Implementations typically wrap an STS `AssumeRole` call, an IoT Core
/// credentials-provider endpoint, or (as here, for local testing) plain
/// environment variables.
pub trait CredentialsProvider: Send + Sync {
    fn fetch(&self) -> Result<Credentials>;
}

/// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and optionally
/// `AWS_SESSION_TOKEN` from the process environment. Suitable for local
/// development against a real IoT Core endpoint; production deployments
/// should supply their own provider (STS, instance metadata, a vended
/// per-device credentials broker, ...).
#[derive(Default)]
pub struct EnvCredentialsProvider;

impl CredentialsProvider for EnvCredentialsProvider {
    fn fetch(&self) -> Result<Credentials> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| ClientError::CredentialsFetch("AWS_ACCESS_KEY_ID not set".into()))?;
        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| ClientError::CredentialsFetch("AWS_SECRET_ACCESS_KEY not set".into()))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Credentials {
            access_key,
            secret_key,
            session_token,
        })
    }
}
