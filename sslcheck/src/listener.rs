use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::{DigitallySignedStruct, Error, SignatureScheme, pki_types};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::Instrument as _;

use crate::bundle::{ServerIdentity, build_server_config, crypto_provider};

pub const DEFAULT_PORT: u16 = 4300;

/// Sent to every client completing the handshake.
pub const GREETING: &[u8] = b"hello world\n";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Returns `preferred` when it can be bound on loopback right now, otherwise a free port.
pub fn probe_port(preferred: u16) -> anyhow::Result<u16> {
    if preferred != 0 && std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, preferred)).is_ok() {
        return Ok(preferred);
    }

    let port = portpicker::pick_unused_port().context("no free TCP port available")?;

    debug!(preferred, port, "Picked a free port");

    Ok(port)
}

enum State {
    Bound(TcpListener),
    Serving(JoinHandle<()>),
    Closed,
}

/// TLS listener bound on loopback.
///
/// The port is released on `close` or when dropped.
pub struct EphemeralListener {
    local_addr: SocketAddr,
    acceptor: TlsAcceptor,
    leaf: pki_types::CertificateDer<'static>,
    state: State,
}

impl EphemeralListener {
    pub async fn bind(port: u16, identity: ServerIdentity) -> anyhow::Result<Self> {
        let leaf = identity.leaf().cloned().context("empty certificate chain")?;

        let config = build_server_config(identity)?;
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .with_context(|| format!("couldn't bind listener to port {port}"))?;

        let local_addr = listener.local_addr().context("listener address")?;

        Ok(Self {
            local_addr,
            acceptor,
            leaf,
            state: State::Bound(listener),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections, answering each one with [`GREETING`].
    pub fn serve(&mut self) {
        let State::Bound(listener) = std::mem::replace(&mut self.state, State::Closed) else {
            return;
        };

        let acceptor = self.acceptor.clone();

        let task = tokio::spawn(
            accept_loop(listener, acceptor).instrument(info_span!("serve", addr = %self.local_addr)),
        );

        self.state = State::Serving(task);
    }

    /// Connects to the listener over TLS and reads the greeting.
    ///
    /// The client checks that the served certificate is the expected leaf and that the
    /// handshake signature was produced by its key.
    pub async fn probe_handshake(&mut self) -> anyhow::Result<()> {
        self.serve();

        let provider = crypto_provider();

        let verifier = PinnedLeafVerifier {
            leaf: self.leaf.clone(),
            algorithms: provider.signature_verification_algorithms,
        };

        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .context("couldn't set supported TLS protocol versions")?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();

        let connector = TlsConnector::from(Arc::new(config));
        let server_name = pki_types::ServerName::try_from("localhost").context("invalid DNS name")?;

        let greeting = tokio::time::timeout(PROBE_TIMEOUT, async {
            let stream = TcpStream::connect(self.local_addr)
                .await
                .context("failed to connect to the listener")?;

            let mut stream = connector
                .connect(server_name, stream)
                .await
                .context("TLS handshake failed")?;

            let mut greeting = Vec::new();
            stream.read_to_end(&mut greeting).await.context("read greeting")?;

            anyhow::Ok(greeting)
        })
        .await
        .context("TLS probe timed out")??;

        anyhow::ensure!(
            greeting == GREETING,
            "unexpected greeting: {}",
            String::from_utf8_lossy(&greeting)
        );

        debug!("TLS handshake probe succeeded");

        Ok(())
    }

    /// Releases the port; returns once the socket is closed.
    pub async fn close(mut self) {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Bound(listener) => drop(listener),
            State::Serving(task) => {
                task.abort();
                let _ = task.await;
            }
            State::Closed => {}
        }

        debug!(addr = %self.local_addr, "Listener closed");
    }
}

impl Drop for EphemeralListener {
    fn drop(&mut self) {
        if let State::Serving(task) = &self.state {
            task.abort();
        }
    }
}

async fn accept_loop(listener: TcpListener, acceptor: TlsAcceptor) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                if let Err(error) = greet(&acceptor, stream).await {
                    debug!(%peer_addr, error = format!("{error:#}"), "Connection failed");
                }
            }
            Err(error) => {
                error!(%error, "Couldn't accept next TCP stream");
                break;
            }
        }
    }
}

async fn greet(acceptor: &TlsAcceptor, stream: TcpStream) -> anyhow::Result<()> {
    let mut stream = tokio::time::timeout(PROBE_TIMEOUT, acceptor.accept(stream))
        .await
        .context("TLS accept timed out")?
        .context("TLS accept failed")?;

    stream.write_all(GREETING).await.context("write greeting")?;
    stream.shutdown().await.context("shutdown")?;

    Ok(())
}

/// Binds, optionally probes, then closes a listener for `identity`.
pub async fn bind_check(port: u16, identity: ServerIdentity, handshake: bool) -> anyhow::Result<()> {
    let mut listener = EphemeralListener::bind(port, identity).await?;

    info!(addr = %listener.local_addr(), "Listening");

    if handshake {
        listener.probe_handshake().await?;
    }

    listener.close().await;

    Ok(())
}

/// Accepts only the expected leaf, but verifies handshake signatures for real.
#[derive(Debug)]
struct PinnedLeafVerifier {
    leaf: pki_types::CertificateDer<'static>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for PinnedLeafVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &pki_types::CertificateDer<'_>,
        _: &[pki_types::CertificateDer<'_>],
        _: &pki_types::ServerName<'_>,
        _: &[u8],
        _: pki_types::UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        if end_entity.as_ref() == self.leaf.as_ref() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(Error::General("served certificate is not the configured one".to_owned()))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &pki_types::CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &pki_types::CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
