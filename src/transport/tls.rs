use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig as RustlsClientConfig, ClientConnection, Error as TlsError, PrivateKey, ServerName};

use crate::config::ClientIdentity;
use crate::error::{ClientError, Result};

use super::{DuplexByteChannel, TransportAdapter};

/// Accepts any server certificate without validation (§3, "DirectTLS" when
/// no peer verification is configured). Exists for bring-up against a
/// broker whose certificate chain the device does not yet trust, never for
/// production use — callers opt into it explicitly via
/// `DirectTlsAdapter::new`'s `verify_peer` flag.
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }
}

/// Mutually-authenticated TLS transport (§3, §4.2): connects a raw TCP
/// socket, then layers rustls on top, presenting the device's client
/// certificate when one is configured.
pub struct DirectTlsAdapter {
    host: String,
    port: u16,
    client_identity: Option<ClientIdentity>,
    verify_peer: bool,
}

impl DirectTlsAdapter {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        client_identity: Option<ClientIdentity>,
        verify_peer: bool,
    ) -> Self {
        DirectTlsAdapter {
            host: host.into(),
            port,
            client_identity,
            verify_peer,
        }
    }

    fn build_rustls_config(&self) -> Result<RustlsClientConfig> {
        let builder = RustlsClientConfig::builder().with_safe_defaults();

        if self.verify_peer {
            let mut roots = rustls::RootCertStore::empty();
            roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
                rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                    ta.subject,
                    ta.spki,
                    ta.name_constraints,
                )
            }));
            let builder = builder.with_root_certificates(roots);
            match self.client_identity_cert_key() {
                Some((certs, key)) => builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| ClientError::Transport(format!("invalid client certificate: {e}"))),
                None => Ok(builder.with_no_client_auth()),
            }
        } else {
            let builder = builder.with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert));
            match self.client_identity_cert_key() {
                Some((certs, key)) => builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| ClientError::Transport(format!("invalid client certificate: {e}"))),
                None => Ok(builder.with_no_client_auth()),
            }
        }
    }

    fn client_identity_cert_key(&self) -> Option<(Vec<Certificate>, PrivateKey)> {
        let identity = self.client_identity.as_ref()?;
        let certs = identity
            .certificate_chain_der
            .iter()
            .cloned()
            .map(Certificate)
            .collect();
        let key = PrivateKey(identity.private_key_der.clone());
        Some((certs, key))
    }
}

impl TransportAdapter for DirectTlsAdapter {
    fn connect(&self) -> Result<DuplexByteChannel> {
        let config = Arc::new(self.build_rustls_config()?);
        let server_name = ServerName::try_from(self.host.as_str())
            .map_err(|_| ClientError::Transport(format!("invalid host: {}", self.host)))?;

        let connection = ClientConnection::new(config, server_name)
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let socket = TcpStream::connect((self.host.as_str(), self.port))
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        socket
            .set_nodelay(true)
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let write_socket = socket
            .try_clone()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let shutdown_socket = socket
            .try_clone()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        // The rustls session state is shared between the two directions, but
        // the socket reads/writes that feed it are not: each half keeps its
        // own `TcpStream` handle so the reader's blocking `recv` never holds
        // the session lock across the wait for the broker's next packet.
        let session = Arc::new(Mutex::new(connection));

        Ok(DuplexByteChannel {
            reader: Box::new(TlsReader {
                session: session.clone(),
                socket,
            }),
            writer: Box::new(TlsWriter {
                session,
                socket: write_socket,
            }),
            shutdown: Box::new(move || {
                let _ = shutdown_socket.shutdown(std::net::Shutdown::Both);
            }),
        })
    }
}

type SharedSession = Arc<Mutex<ClientConnection>>;

struct TlsReader {
    session: SharedSession,
    socket: TcpStream,
}

impl Read for TlsReader {
    /// Drains plaintext already buffered in the session first; only blocks
    /// on the socket (with the session lock released) once the session has
    /// nothing left to hand back, so a concurrent writer can still encrypt
    /// and send while this side is parked waiting on the broker.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.session.lock().unwrap().reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            let mut ciphertext = [0u8; 16 * 1024];
            let n = self.socket.read(&mut ciphertext)?;
            if n == 0 {
                return Ok(0);
            }

            let mut session = self.session.lock().unwrap();
            session
                .read_tls(&mut &ciphertext[..n])
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            session
                .process_new_packets()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

            // Processing an inbound handshake flight can make previously
            // queued output ready to send (the client's Finished message, or
            // application data written before the handshake completed). The
            // socket clone is full-duplex, so this side can flush it without
            // waiting for the writer to make another call.
            while session.wants_write() {
                session.write_tls(&mut self.socket)?;
            }
        }
    }
}

struct TlsWriter {
    session: SharedSession,
    socket: TcpStream,
}

impl Write for TlsWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut session = self.session.lock().unwrap();
        let n = session.writer().write(buf)?;
        while session.wants_write() {
            session.write_tls(&mut self.socket)?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut session = self.session.lock().unwrap();
        while session.wants_write() {
            session.write_tls(&mut self.socket)?;
        }
        self.socket.flush()
    }
}
