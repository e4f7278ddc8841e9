//! Transport to the IRC server: plain TCP or TLS over TCP.
//!
//! A [`Connection`] is split into a [`ConnectionReader`], owned by the receive
//! loop, and a [`ConnectionWriter`], which lives behind the session's send
//! lock.

use crate::error::ConnectionError;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, trace, warn};

const READ_CHUNK: usize = 4096;

/// Any bidirectional byte stream the engine can speak IRC over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

/// Outcome of a bounded read.
#[derive(Debug, PartialEq, Eq)]
pub enum Incoming {
    Data(Vec<u8>),
    /// The timeout elapsed without data. Not an error.
    Timeout,
    /// The peer closed the connection.
    Closed,
}

pub struct Connection {
    stream: Box<dyn Transport>,
}

impl Connection {
    /// Open a connection to `host:port`, upgrading to TLS when `tls` is set.
    pub async fn connect(
        host: &str,
        port: u16,
        tls: bool,
        accept_invalid_certs: bool,
    ) -> Result<Self, ConnectionError> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|source| ConnectionError::Connect {
                host: host.to_string(),
                port,
                source,
            })?;
        debug!("Created socket: {:?}", tcp.local_addr());

        let stream: Box<dyn Transport> = if tls {
            Box::new(upgrade_to_tls(tcp, host, accept_invalid_certs).await?)
        } else {
            Box::new(tcp)
        };
        info!("Connected to {}:{} (tls: {})", host, port, tls);
        Ok(Self { stream })
    }

    /// Wrap an already established stream.
    pub fn from_stream<S: Transport + 'static>(stream: S) -> Self {
        Self {
            stream: Box::new(stream),
        }
    }

    pub fn split(self) -> (ConnectionReader, ConnectionWriter) {
        let (reader, writer) = tokio::io::split(self.stream);
        (ConnectionReader { reader }, ConnectionWriter { writer })
    }
}

pub struct ConnectionReader {
    reader: ReadHalf<Box<dyn Transport>>,
}

impl ConnectionReader {
    /// Wait up to `timeout` for data.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Incoming, ConnectionError> {
        let mut buf = vec![0u8; READ_CHUNK];
        match tokio::time::timeout(timeout, self.reader.read(&mut buf)).await {
            Err(_) => Ok(Incoming::Timeout),
            Ok(Ok(0)) => Ok(Incoming::Closed),
            Ok(Ok(n)) => {
                buf.truncate(n);
                trace!("Received data: {:?}", String::from_utf8_lossy(&buf));
                Ok(Incoming::Data(buf))
            }
            Ok(Err(e)) => Err(ConnectionError::Receive(e)),
        }
    }
}

pub struct ConnectionWriter {
    writer: WriteHalf<Box<dyn Transport>>,
}

impl ConnectionWriter {
    /// Write some of `bytes`, returning how many the socket accepted.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<usize, ConnectionError> {
        let n = self.writer.write(bytes).await.map_err(ConnectionError::Send)?;
        if n == 0 && !bytes.is_empty() {
            return Err(ConnectionError::Send(std::io::ErrorKind::WriteZero.into()));
        }
        self.writer.flush().await.map_err(ConnectionError::Send)?;
        Ok(n)
    }

    pub async fn shutdown(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("Socket shutdown failed: {}", e);
        }
    }
}

async fn upgrade_to_tls(
    tcp: TcpStream,
    host: &str,
    accept_invalid_certs: bool,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, ConnectionError> {
    let config = if accept_invalid_certs {
        warn!("Certificate verification disabled for {}", host);
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
            .with_no_client_auth()
    } else {
        ClientConfig::builder()
            .with_root_certificates(native_roots())
            .with_no_client_auth()
    };

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| ConnectionError::InvalidServerName(host.to_string()))?;
    let connector = TlsConnector::from(Arc::new(config));
    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|source| ConnectionError::Tls {
            host: host.to_string(),
            source,
        })?;
    debug!("Wrapped socket in TLS for {}", host);
    Ok(stream)
}

fn native_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    for cert in loaded.certs {
        if let Err(e) = roots.add(cert) {
            warn!("Failed to add root cert: {}", e);
        }
    }
    for e in &loaded.errors {
        warn!("Error loading native certs: {}", e);
    }
    roots
}

#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_timeout_data_and_close() {
        let (client, mut server) = tokio::io::duplex(64);
        let (mut reader, mut writer) = Connection::from_stream(client).split();

        let got = reader.receive(Duration::from_millis(20)).await.unwrap();
        assert_eq!(got, Incoming::Timeout);

        server.write_all(b"PING :x\r\n").await.unwrap();
        let got = reader.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got, Incoming::Data(b"PING :x\r\n".to_vec()));

        let n = writer.send(b"PONG :x\r\n").await.unwrap();
        assert_eq!(n, 9);
        let mut buf = [0u8; 9];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"PONG :x\r\n");

        drop(server);
        let got = reader.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(got, Incoming::Closed);
    }
}
