// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTS-KE server: TLS listener issuing cookies to NTS clients.
//!
//! Binds the NTS-KE port on both address families (`0.0.0.0` and `::` with
//! `IPV6_V6ONLY`), accepts TLS 1.3 connections, and answers each client's
//! negotiation request with cookies sealed under the current server key.
//! At most [`MAX_SERVER_CONNECTIONS`] exchanges run at once; connections
//! beyond that, or rejected by the access filter, are closed immediately.
//! Each accepted exchange is bounded by a 2 second timeout.
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> std::io::Result<()> {
//! use std::sync::{Arc, RwLock};
//! use ntskit::ke_server::{NtsKeServer, NtsKeServerConfig};
//! use ntskit::keyring::ServerKeyRing;
//!
//! let cert_pem = std::fs::read("server.crt")?;
//! let key_pem = std::fs::read("server.key")?;
//! let config = NtsKeServerConfig::from_pem(&cert_pem, &key_pem)?;
//!
//! let key_ring = Arc::new(RwLock::new(ServerKeyRing::new()));
//! let server = NtsKeServer::bind(config, key_ring)?;
//! server.run().await
//! # }
//! ```

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::debug;
use rustls_pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

use crate::error::KeError;
use crate::ke_io::{receive_message, send_message};
use crate::ke_machine::{advance_expect, KeEvent, KeMachine, KeState};
use crate::ke_proto::{
    alpn_matches, build_server_response, export_session_keys, process_request, ALPN_NTSKE,
    MAX_COOKIES, NTP_PORT, NTS_KE_PORT,
};
use crate::keyring::{ServerKeyRing, KEY_ROTATION_INTERVAL};
use crate::record::KeMessage;

/// Maximum number of simultaneous key-establishment exchanges.
pub const MAX_SERVER_CONNECTIONS: usize = 10;

/// Time allowed for one accepted exchange.
const SERVER_TIMEOUT: Duration = Duration::from_secs(2);

/// Access-control predicate applied to each accepted connection's source
/// address before any TLS work is done.
pub type AccessFilter = Arc<dyn Fn(IpAddr) -> bool + Send + Sync>;

/// Configuration for an NTS-KE server.
pub struct NtsKeServerConfig {
    /// TLS certificate chain (DER encoded).
    pub cert_chain: Vec<CertificateDer<'static>>,
    /// Private key corresponding to the certificate (DER encoded).
    pub private_key: PrivateKeyDer<'static>,
    /// Listen addresses (default: `0.0.0.0:4460` and `[::]:4460`).
    pub listen_addrs: Vec<SocketAddr>,
    /// NTP port to advertise; a Port record is sent only when this differs
    /// from 123.
    pub ntp_port: u16,
    /// Number of cookies issued per session (default 8).
    pub cookies_per_session: usize,
    /// Optional source-address filter; connections it rejects are closed.
    pub access_filter: Option<AccessFilter>,
}

impl NtsKeServerConfig {
    /// Create a config from PEM-encoded certificate and private key bytes.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> io::Result<Self> {
        let cert_chain: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(cert_pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let private_key = PrivateKeyDer::from_pem_slice(key_pem)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok(NtsKeServerConfig {
            cert_chain,
            private_key,
            listen_addrs: vec![
                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), NTS_KE_PORT),
                SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), NTS_KE_PORT),
            ],
            ntp_port: NTP_PORT,
            cookies_per_session: MAX_COOKIES,
            access_filter: None,
        })
    }
}

/// Per-process server state shared by the accept loops and connection tasks.
struct ServerShared {
    acceptor: TlsAcceptor,
    key_ring: Arc<RwLock<ServerKeyRing>>,
    ntp_port: u16,
    cookies_per_session: usize,
    access_filter: Option<AccessFilter>,
    slots: Semaphore,
}

/// An NTS-KE server bound to its listen addresses.
pub struct NtsKeServer {
    listeners: Vec<TcpListener>,
    shared: Arc<ServerShared>,
}

/// Build a TLS 1.3 server configuration offering the `ntske/1` ALPN.
fn server_tls_config(
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
) -> io::Result<rustls::ServerConfig> {
    let mut config = rustls::ServerConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS13,
    ])
    .with_no_client_auth()
    .with_single_cert(cert_chain, private_key)
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("TLS config error: {e}")))?;
    config.alpn_protocols = vec![ALPN_NTSKE.to_vec()];
    Ok(config)
}

/// Create a non-blocking listener with `SO_REUSEADDR`, and `IPV6_V6ONLY`
/// for IPv6 addresses so the v4 and v6 listeners coexist.
fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(MAX_SERVER_CONNECTIONS as i32)?;
    TcpListener::from_std(socket.into())
}

impl NtsKeServer {
    /// Bind the configured listen addresses.
    ///
    /// Addresses that fail to bind are skipped with a log message (a host
    /// without IPv6 still serves IPv4); binding fails only when no address
    /// could be bound. Must be called within a tokio runtime.
    pub fn bind(
        config: NtsKeServerConfig,
        key_ring: Arc<RwLock<ServerKeyRing>>,
    ) -> io::Result<Self> {
        let tls_config = server_tls_config(config.cert_chain, config.private_key)?;

        let mut listeners = Vec::new();
        let mut last_err = None;
        for addr in &config.listen_addrs {
            match bind_listener(*addr) {
                Ok(listener) => {
                    debug!("NTS-KE server listening on {addr}");
                    listeners.push(listener);
                }
                Err(e) => {
                    debug!("could not bind {addr}: {e}");
                    last_err = Some(e);
                }
            }
        }
        if listeners.is_empty() {
            return Err(last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no listen addresses")));
        }

        Ok(NtsKeServer {
            listeners,
            shared: Arc::new(ServerShared {
                acceptor: TlsAcceptor::from(Arc::new(tls_config)),
                key_ring,
                ntp_port: config.ntp_port,
                cookies_per_session: config.cookies_per_session,
                access_filter: config.access_filter,
                slots: Semaphore::new(MAX_SERVER_CONNECTIONS),
            }),
        })
    }

    /// Addresses actually bound, with any ephemeral ports resolved.
    pub fn local_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        self.listeners.iter().map(|l| l.local_addr()).collect()
    }

    /// Run the accept loops and the key-rotation timer indefinitely.
    pub async fn run(self) -> io::Result<()> {
        let mut tasks = JoinSet::new();

        let key_ring = self.shared.key_ring.clone();
        tasks.spawn(async move {
            rotate_keys(key_ring).await;
            Ok(())
        });

        for listener in self.listeners {
            let shared = self.shared.clone();
            tasks.spawn(accept_loop(listener, shared));
        }

        while let Some(result) = tasks.join_next().await {
            result.map_err(io::Error::other)??;
        }
        Ok(())
    }
}

/// Rotate the server key ring every [`KEY_ROTATION_INTERVAL`].
async fn rotate_keys(key_ring: Arc<RwLock<ServerKeyRing>>) {
    let start = tokio::time::Instant::now() + KEY_ROTATION_INTERVAL;
    let mut timer = tokio::time::interval_at(start, KEY_ROTATION_INTERVAL);
    loop {
        timer.tick().await;
        if let Ok(mut ring) = key_ring.write() {
            ring.rotate();
        }
    }
}

/// Accept connections on one listener, applying access control and the
/// connection cap, and spawn a bounded handler per accepted connection.
async fn accept_loop(listener: TcpListener, shared: Arc<ServerShared>) -> io::Result<()> {
    loop {
        let (tcp, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                debug!("accept failed: {e}");
                continue;
            }
        };

        if let Some(filter) = &shared.access_filter {
            if !filter(peer.ip()) {
                debug!("rejected connection from {peer} (access denied)");
                continue;
            }
        }

        // The slot is given back by the handler task when it finishes.
        match shared.slots.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(_) => {
                debug!("rejected connection from {peer} (too many connections)");
                continue;
            }
        }

        debug!("accepted NTS-KE connection from {peer}");
        let shared = shared.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(SERVER_TIMEOUT, handle_connection(tcp, &shared)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("NTS-KE error from {peer}: {e}"),
                Err(_) => debug!("NTS-KE connection from {peer} timed out"),
            }
            shared.slots.add_permits(1);
        });
    }
}

/// Mark the connection closed after a fatal error, passing the error on.
fn close_on(machine: &mut KeMachine, err: io::Error) -> io::Error {
    machine.advance(KeEvent::Fatal);
    err
}

/// Drive one accepted connection through handshake, request, response, and
/// shutdown.
async fn handle_connection(tcp: TcpStream, shared: &ServerShared) -> io::Result<()> {
    let mut machine = KeMachine::server();

    let mut tls = match shared.acceptor.accept(tcp).await {
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

    let mut message = KeMessage::new();
    if let Err(e) = receive_message(&mut tls, &mut message).await {
        return Err(close_on(&mut machine, e));
    }

    let outcome = process_request(&mut message);
    advance_expect(&mut machine, KeEvent::MessageComplete, KeState::Send)?;

    // Seal cookies over the exporter-derived session keys.
    let cookies = if outcome.is_ok() {
        let (c2s, s2c) = {
            let (_, conn) = tls.get_ref();
            export_session_keys(conn)?
        };
        let ring = shared
            .key_ring
            .read()
            .map_err(|_| KeError::KeyRingPoisoned)?;
        (0..shared.cookies_per_session)
            .map(|_| ring.seal_cookie(&c2s, &s2c))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        Vec::new()
    };

    build_server_response(&mut message, outcome, shared.ntp_port, &cookies)?;
    if let Err(e) = send_message(&mut tls, &mut message).await {
        return Err(close_on(&mut machine, e));
    }
    advance_expect(&mut machine, KeEvent::MessageSent, KeState::Shutdown)?;

    debug!("NTS-KE: sent {} cookies", cookies.len());

    use tokio::io::AsyncWriteExt;
    let _ = tls.shutdown().await;
    machine.advance(KeEvent::ShutdownFinished);

    Ok(())
}
