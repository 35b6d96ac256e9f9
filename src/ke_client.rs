// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTS-KE client: one key-establishment exchange over TLS.
//!
//! Connects to the NTS-KE server (default port 4460), verifies the `ntske/1`
//! ALPN, sends the negotiation request, and collects cookies plus the
//! exporter-derived session keys from the response. The whole exchange is
//! bounded by a 2 second timeout.
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> std::io::Result<()> {
//! use ntskit::ke_client::{establish, KeClientConfig};
//!
//! let config = KeClientConfig::new("time.example.com");
//! let est = establish(&config).await?;
//! println!("got {} cookies for {}:{}", est.cookies.len(), est.ntp_server, est.ntp_port);
//! # Ok(())
//! # }
//! ```

use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use rustls_pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::KeError;
use crate::ke_io::{receive_message, send_message};
use crate::ke_machine::{advance_expect, KeEvent, KeMachine, KeState};
use crate::ke_proto::{
    alpn_matches, build_client_request, export_session_keys, process_response, ALPN_NTSKE,
    NTP_PORT, NTS_KE_PORT, SESSION_KEY_LENGTH,
};
use crate::record::KeMessage;

/// Time allowed for a complete key-establishment exchange.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for NTS-KE client connections.
#[derive(Clone, Debug)]
pub struct KeClientConfig {
    /// NTS-KE server hostname, used for DNS, SNI, and certificate
    /// verification.
    pub server_name: String,
    /// NTS-KE server port (default 4460).
    pub port: u16,
    /// Extra PEM trust anchors added to the system roots, e.g. a private CA
    /// bundle.
    pub ca_pem: Option<Vec<u8>>,
}

impl KeClientConfig {
    /// Configuration for the given server with the default port and trust
    /// roots.
    pub fn new(server_name: impl Into<String>) -> Self {
        KeClientConfig {
            server_name: server_name.into(),
            port: NTS_KE_PORT,
            ca_pem: None,
        }
    }
}

/// Result of a successful key establishment.
#[derive(Clone)]
pub struct KeEstablishment {
    /// Cookies for NTP requests, in arrival order. Each is used once.
    pub cookies: Vec<Vec<u8>>,
    /// Client-to-server AEAD key.
    pub c2s_key: [u8; SESSION_KEY_LENGTH],
    /// Server-to-client AEAD key.
    pub s2c_key: [u8; SESSION_KEY_LENGTH],
    /// NTP server to use (the NTS-KE server name unless overridden).
    pub ntp_server: String,
    /// NTP port to use (123 unless overridden).
    pub ntp_port: u16,
}

impl std::fmt::Debug for KeEstablishment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Session keys stay out of debug output.
        f.debug_struct("KeEstablishment")
            .field("cookies", &self.cookies.len())
            .field("ntp_server", &self.ntp_server)
            .field("ntp_port", &self.ntp_port)
            .finish_non_exhaustive()
    }
}

/// Build the client TLS configuration: system roots plus any extra PEM
/// anchors, offering the `ntske/1` ALPN.
pub(crate) fn client_tls_config(ca_pem: Option<&[u8]>) -> io::Result<Arc<rustls::ClientConfig>> {
    let mut root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(pem) = ca_pem {
        for cert in CertificateDer::pem_slice_iter(pem) {
            let cert = cert.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            root_store
                .add(cert)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        }
    }

    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config.alpn_protocols = vec![ALPN_NTSKE.to_vec()];
    Ok(Arc::new(config))
}

/// Mark the connection closed after a fatal error, passing the error on.
fn close_on(machine: &mut KeMachine, err: io::Error) -> io::Error {
    machine.advance(KeEvent::Fatal);
    err
}

/// Perform one NTS-KE exchange with the configured server.
///
/// Returns the cookies and session keys, plus the NTP server address and
/// port to use (taking any server/port negotiation records into account).
///
/// # Errors
///
/// Fails on connect/TLS errors, ALPN mismatch, a malformed or error
/// response, a response without cookies, or when the exchange exceeds the
/// 2 second limit.
pub async fn establish(config: &KeClientConfig) -> io::Result<KeEstablishment> {
    tokio::time::timeout(CLIENT_TIMEOUT, establish_inner(config))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "NTS-KE exchange timed out"))?
}

async fn establish_inner(config: &KeClientConfig) -> io::Result<KeEstablishment> {
    let mut machine = KeMachine::client();

    debug!("NTS-KE connecting to {}:{}", config.server_name, config.port);
    let tcp = match TcpStream::connect((config.server_name.as_str(), config.port)).await {
        Ok(tcp) => tcp,
        Err(e) => return Err(close_on(&mut machine, e)),
    };
    advance_expect(&mut machine, KeEvent::ConnectFinished, KeState::Handshake)?;

    let connector = TlsConnector::from(client_tls_config(config.ca_pem.as_deref())?);
    let server_name = ServerName::try_from(config.server_name.clone())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut tls = match connector.connect(server_name, tcp).await {
        Ok(tls) => tls,
        Err(e) => return Err(close_on(&mut machine, e)),
    };

    let alpn_ok = {
        let (_, conn) = tls.get_ref();
        alpn_matches(conn.alpn_protocol())
    };
    if machine.advance(KeEvent::HandshakeFinished { alpn_ok }) == KeState::Closed {
        return Err(KeError::AlpnMismatch.into());
    }
    debug!("NTS-KE handshake completed");

    let mut message = KeMessage::new();
    build_client_request(&mut message)?;
    if let Err(e) = send_message(&mut tls, &mut message).await {
        return Err(close_on(&mut machine, e));
    }
    advance_expect(&mut machine, KeEvent::MessageSent, KeState::Receive)?;

    message.reset();
    if let Err(e) = receive_message(&mut tls, &mut message).await {
        return Err(close_on(&mut machine, e));
    }
    advance_expect(&mut machine, KeEvent::MessageComplete, KeState::Shutdown)?;

    // Export session keys before the TLS session winds down.
    let (c2s_key, s2c_key) = {
        let (_, conn) = tls.get_ref();
        export_session_keys(conn)?
    };

    let data = process_response(&mut message)?;
    if data.cookies.is_empty() {
        return Err(KeError::NoCookies.into());
    }

    use tokio::io::AsyncWriteExt;
    let _ = tls.shutdown().await;
    machine.advance(KeEvent::ShutdownFinished);

    debug!(
        "NTS-KE complete: {} cookies, server={:?} port={:?}",
        data.cookies.len(),
        data.ntp_server,
        data.ntp_port
    );

    Ok(KeEstablishment {
        cookies: data.cookies,
        c2s_key,
        s2c_key,
        ntp_server: data
            .ntp_server
            .unwrap_or_else(|| config.server_name.clone()),
        ntp_port: data.ntp_port.unwrap_or(NTP_PORT),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = KeClientConfig::new("time.example.com");
        assert_eq!(config.server_name, "time.example.com");
        assert_eq!(config.port, NTS_KE_PORT);
        assert!(config.ca_pem.is_none());
    }

    #[test]
    fn test_tls_config_with_extra_roots() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let pem = cert.cert.pem().into_bytes();
        let config = client_tls_config(Some(&pem)).unwrap();
        assert_eq!(config.alpn_protocols, vec![ALPN_NTSKE.to_vec()]);
    }

    #[test]
    fn test_tls_config_rejects_garbage_pem() {
        // Bytes that look like a PEM block but do not parse.
        let garbage = b"-----BEGIN CERTIFICATE-----\nnot base64!!\n-----END CERTIFICATE-----\n";
        assert!(client_tls_config(Some(garbage)).is_err());
    }

    #[tokio::test]
    async fn test_establish_refused() {
        // Nothing listens on this port; connect must fail, not hang.
        let config = KeClientConfig {
            server_name: "127.0.0.1".to_string(),
            port: 9,
            ca_pem: None,
        };
        assert!(establish(&config).await.is_err());
    }

    #[test]
    fn test_establishment_debug_hides_keys() {
        let est = KeEstablishment {
            cookies: vec![vec![0u8; 100]],
            c2s_key: [0xAA; SESSION_KEY_LENGTH],
            s2c_key: [0xBB; SESSION_KEY_LENGTH],
            ntp_server: "time.example.com".to_string(),
            ntp_port: 123,
        };
        let debug = format!("{est:?}");
        assert!(!debug.contains("170")); // 0xAA
        assert!(debug.contains("time.example.com"));
    }
}
