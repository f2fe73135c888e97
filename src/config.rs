use serde::{Deserialize, Serialize};

/// MQTT quality of service. QoS 2 is a declared Non-goal (§1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
}

impl QoS {
    pub fn from_u8(value: u8) -> Option<QoS> {
        match value {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            _ => None,
        }
    }
}

/// A broker-delivered last-will-and-testament message, published by the
/// broker on the client's behalf if it disconnects ungracefully.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Static CONNECT-time configuration (§3). Immutable once the first
/// `connect()` call has been issued.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    pub last_will: Option<LastWill>,
    pub metrics_enabled: bool,
    pub base_reconnect_secs: f64,
    pub minimum_reconnect_secs: f64,
    pub maximum_reconnect_secs: f64,
    pub auto_resubscribe: bool,
    /// Minimum spacing, in seconds, the session layer should leave between
    /// automatic QoS-1 retransmissions of an unacknowledged PUBLISH.
    pub publish_retry_throttle_secs: f64,
}

impl ClientConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        ClientConfig {
            client_id: client_id.into(),
            keep_alive_secs: 30,
            clean_session: true,
            last_will: None,
            metrics_enabled: true,
            base_reconnect_secs: 1.0,
            minimum_reconnect_secs: 20.0,
            maximum_reconnect_secs: 128.0,
            auto_resubscribe: true,
            publish_retry_throttle_secs: 1.0,
        }
    }
}

/// The CONNECT username carries an optional metrics suffix (§6):
/// `?SDK=<platform>&Version=<sdk_version>`; an empty string when metrics
/// reporting is disabled.
pub fn build_username(config: &ClientConfig, sdk_platform: &str, sdk_version: &str) -> String {
    if !config.metrics_enabled {
        return String::new();
    }
    format!("?SDK={}&Version={}", sdk_platform, sdk_version)
}

/// A reference to an already-loaded X.509 client identity (certificate
/// chain + private key, PEM-decoded). Loading these bytes from a keychain
/// or filesystem is a deployment concern outside this core (§1).
#[derive(Clone)]
pub struct ClientIdentity {
    pub certificate_chain_der: Vec<Vec<u8>>,
    pub private_key_der: Vec<u8>,
}

/// The two transports this core supports (§3).
#[derive(Clone)]
pub enum TransportSpec {
    DirectTls {
        host: String,
        port: u16,
        client_identity: Option<ClientIdentity>,
    },
    SignedWebSocket {
        endpoint_host: String,
        region: String,
        credentials_provider: std::sync::Arc<dyn crate::credentials::CredentialsProvider>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_disabled_yields_empty_username() {
        let mut cfg = ClientConfig::new("thing-1");
        cfg.metrics_enabled = false;
        assert_eq!(build_username(&cfg, "rust", "1.0.0"), "");
    }

    #[test]
    fn metrics_enabled_yields_query_string() {
        let cfg = ClientConfig::new("thing-1");
        assert_eq!(build_username(&cfg, "rust", "1.0.0"), "?SDK=rust&Version=1.0.0");
    }

    #[test]
    fn default_reconnect_tunables_match_spec() {
        let cfg = ClientConfig::new("thing-1");
        assert_eq!(cfg.base_reconnect_secs, 1.0);
        assert_eq!(cfg.minimum_reconnect_secs, 20.0);
        assert_eq!(cfg.maximum_reconnect_secs, 128.0);
        assert!(cfg.auto_resubscribe);
    }
}
