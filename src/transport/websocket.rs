use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use tungstenite::{stream::MaybeTlsStream, Message, WebSocket};

use crate::clock::SkewCorrectedClock;
use crate::credentials::CredentialsProvider;
use crate::error::{ClientError, Result};
use crate::signature::{mqtt_over_websockets_request, SignRequest};

use super::{bound_pipe, DuplexByteChannel, TransportAdapter, WriteOnlySink, PIPE_CAPACITY_BYTES};

/// SigV4-signed WebSocket transport (§3, §4.1, §4.2): connects to the IoT
/// Core MQTT-over-WebSocket endpoint over TLS, negotiating the `mqttv3.1`
/// subprotocol. Inbound binary frames are bridged into a bound pipe the
/// session reads as a byte stream; outbound session bytes are wrapped one
/// WebSocket binary message per `write()` call.
pub struct SignedWebSocketAdapter {
    endpoint_host: String,
    region: String,
    credentials_provider: Arc<dyn CredentialsProvider>,
    clock: SkewCorrectedClock,
}

impl SignedWebSocketAdapter {
    pub fn new(
        endpoint_host: impl Into<String>,
        region: impl Into<String>,
        credentials_provider: Arc<dyn CredentialsProvider>,
        clock: SkewCorrectedClock,
    ) -> Self {
        SignedWebSocketAdapter {
            endpoint_host: endpoint_host.into(),
            region: region.into(),
            credentials_provider,
            clock,
        }
    }
}

impl TransportAdapter for SignedWebSocketAdapter {
    fn connect(&self) -> Result<DuplexByteChannel> {
        let credentials = self.credentials_provider.fetch()?;
        let sign_request = SignRequest {
            endpoint_host: &self.endpoint_host,
            region: &self.region,
            credentials: &credentials,
            clock: &self.clock,
        };
        let request = mqtt_over_websockets_request(&sign_request)?;

        let (socket, _response) =
            tungstenite::connect(request).map_err(|e| ClientError::Transport(e.to_string()))?;

        set_read_timeout(&socket, Some(READ_POLL_INTERVAL))
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let socket = Arc::new(std::sync::Mutex::new(socket));

        let (pipe_writer, pipe_reader) = bound_pipe(PIPE_CAPACITY_BYTES);

        let reader_socket = socket.clone();
        let reader_pipe = pipe_writer;
        std::thread::spawn(move || pump_inbound(reader_socket, reader_pipe));

        let shutdown_socket = socket.clone();
        let writer_socket = socket;

        Ok(DuplexByteChannel {
            reader: Box::new(pipe_reader),
            writer: Box::new(WriteOnlySink::new(move |buf: &[u8]| {
                writer_socket
                    .lock()
                    .unwrap()
                    .send(Message::Binary(buf.to_vec()))
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::BrokenPipe, e.to_string()))
            })),
            shutdown: Box::new(move || {
                let _ = shutdown_socket.lock().unwrap().close(None);
            }),
        })
    }
}

type SharedSocket = Arc<std::sync::Mutex<WebSocket<MaybeTlsStream<TcpStream>>>>;

/// How long a single inbound read blocks for before giving the outbound
/// side a turn at the socket mutex (see `pump_inbound`).
const READ_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Puts a read timeout on the raw socket underneath the (possibly
/// TLS-wrapped) WebSocket stream, so a blocking `read()` call gives up
/// periodically instead of parking forever while the socket mutex is held.
fn set_read_timeout(
    socket: &WebSocket<MaybeTlsStream<TcpStream>>,
    timeout: Option<Duration>,
) -> std::io::Result<()> {
    match socket.get_ref() {
        MaybeTlsStream::Plain(tcp) => tcp.set_read_timeout(timeout),
        MaybeTlsStream::Rustls(tls) => tls.get_ref().set_read_timeout(timeout),
        _ => Ok(()),
    }
}

/// Drains inbound WebSocket frames into the bound pipe until the socket
/// closes or errors. Non-binary frames (ping/pong/text/close) are handled
/// by tungstenite internally or discarded; only binary frames carry MQTT
/// bytes (§4.2). The socket has a read timeout (`READ_POLL_INTERVAL`), so
/// this loop reacquires and releases the socket mutex periodically rather
/// than holding it across an indefinite blocking read — otherwise an idle
/// connection would starve an outbound SUBSCRIBE/PUBLISH of the same lock.
fn pump_inbound(socket: SharedSocket, pipe: super::PipeWriter) {
    loop {
        let message = {
            let mut guard = socket.lock().unwrap();
            guard.read()
        };
        match message {
            Ok(Message::Binary(data)) => {
                if pipe.write_message(&data).is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!("websocket transport closed by peer");
                break;
            }
            Ok(other) => {
                warn!("discarding non-binary websocket frame: {:?}", other);
            }
            Err(tungstenite::Error::Io(e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                // Read timeout elapsed with nothing to report; loop back
                // around so a pending write can get the lock.
            }
            Err(e) => {
                warn!("websocket read error: {}", e);
                break;
            }
        }
    }
    pipe.close();
}
