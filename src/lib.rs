/*!
Network Time Security (NTS) for NTPv4 (RFC 8915).

This crate implements the two-phase machinery that bootstraps authenticated
time synchronization:

1. **NTS-KE (Key Establishment)**: a TLS 1.3 record protocol on port 4460
   that negotiates the next protocol and AEAD algorithm, derives the
   C2S/S2C session keys from the TLS exporter, and hands the client a batch
   of opaque cookies.

2. **NTS-NTP extension fields**: per-packet authentication with
   AES-SIV-CMAC-256 — a unique identifier for replay binding, one cookie
   per request, placeholders to refill the pool, and an authenticator over
   everything that precedes it.

The surrounding NTP daemon keeps ownership of packet transport, polling,
and clock discipline; this crate only produces and validates bytes.

# Client example

```no_run
# async fn example() -> std::io::Result<()> {
use ntskit::{KeClientConfig, NtsClient};

let mut client = NtsClient::new(KeClientConfig::new("time.example.com"));

// Runs NTS-KE when the cookie pool is empty.
client.prepare_for_auth().await?;

let mut request = vec![0u8; 48];
request[0] = (4 << 3) | 3; // NTPv4, client mode
client.generate_request_auth(&mut request)?;

// ... send `request` over UDP, receive `response` ...
# let response = vec![];
client.check_response_auth(&response)?;
# Ok(())
# }
```

# Server example

```no_run
# async fn example() -> std::io::Result<()> {
use std::sync::{Arc, RwLock};
use ntskit::{NtsKeServer, NtsKeServerConfig, ServerKeyRing};

let cert_pem = std::fs::read("server.crt")?;
let key_pem = std::fs::read("server.key")?;
let config = NtsKeServerConfig::from_pem(&cert_pem, &key_pem)?;

// Shared with the NTP packet path for cookie decryption.
let key_ring = Arc::new(RwLock::new(ServerKeyRing::new()));

let server = NtsKeServer::bind(config, key_ring.clone())?;
server.run().await
# }
```
*/

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Custom error types; public APIs return `io::Result` with these inside.
pub mod error;

/// NTS-KE record codec and the fixed-capacity message buffer.
pub mod record;

/// NTP extension field codec and NTS field types (RFC 7822 / RFC 8915).
pub mod extension;

/// AES-SIV-CMAC-256 AEAD adapter.
pub mod aead;

/// Rotating server master keys and cookie seal/open.
pub mod keyring;

/// Minimal NTPv4 header view (length, version, mode).
pub mod packet;

/// NTS-KE per-connection state machine.
pub mod ke_machine;

/// NTS-KE negotiation: request/response logic and exporter key derivation.
pub mod ke_proto;

/// NTS-KE client driver.
pub mod ke_client;

/// NTS-KE server: listener, access control, and per-connection driver.
pub mod ke_server;

/// NTS-NTP client: cookie pool, request authentication, response validation.
pub mod client;

/// NTS-NTP server: request validation and authenticated responses.
pub mod server;

mod ke_io;

pub use client::NtsClient;
pub use ke_client::{establish, KeClientConfig, KeEstablishment};
pub use ke_server::{NtsKeServer, NtsKeServerConfig};
pub use keyring::ServerKeyRing;
pub use server::{check_request_auth, generate_response_auth, NtsRequestContext};
