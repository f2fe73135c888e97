/// The connection lifecycle's observable state (§3), delivered to the
/// caller's status callback on the background work pool (§5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// The broker rejected the CONNECT. Per §9's preserved open question,
    /// no automatic reconnect follows this state — the caller decides
    /// whether and how to retry (e.g. after refreshing credentials).
    ConnectionRefused,
    ConnectionError,
    ProtocolError,
    Disconnected,
}
