// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTS-KE request/response logic and TLS exporter key derivation.
//!
//! The client offers NTPv4 and AEAD_AES_SIV_CMAC_256; the server selects
//! from the offered lists and answers with the negotiated parameters plus a
//! batch of cookies, or with a critical Error record. Both sides derive the
//! C2S/S2C session keys from the TLS exporter (RFC 5705) so the keys are
//! bound to the TLS session that negotiated them.

use log::debug;

use crate::error::{KeError, RecordError};
use crate::record::{
    KeMessage, RECORD_AEAD_ALGORITHM, RECORD_COOKIE, RECORD_END_OF_MESSAGE, RECORD_ERROR,
    RECORD_NEXT_PROTOCOL, RECORD_NTPV4_PORT, RECORD_NTPV4_SERVER, RECORD_WARNING,
};

/// ALPN protocol name for NTS-KE (RFC 8915 Section 4).
pub const ALPN_NTSKE: &[u8] = b"ntske/1";

/// Default NTS-KE port.
pub const NTS_KE_PORT: u16 = 4460;

/// Default NTP port; the server advertises a Port record only when its
/// configured port differs.
pub const NTP_PORT: u16 = 123;

/// NTPv4 protocol identifier for Next Protocol Negotiation.
pub const NEXT_PROTOCOL_NTPV4: u16 = 0;

/// AEAD_AES_SIV_CMAC_256 algorithm identifier (RFC 5297 / IANA).
pub const AEAD_AES_SIV_CMAC_256: u16 = 15;

/// Exported session key length in bytes.
pub const SESSION_KEY_LENGTH: usize = 32;

/// Maximum number of cookies a client holds and a server issues per session.
pub const MAX_COOKIES: usize = 8;

/// Maximum accepted cookie length in bytes.
pub const MAX_COOKIE_LENGTH: usize = 256;

/// Largest record body the server inspects; longer bodies are scanned only
/// up to this bound.
pub const MAX_RECORD_BODY_LENGTH: usize = 256;

/// Error code sent when a request carries an unrecognized critical record.
pub const ERROR_UNRECOGNIZED_CRITICAL_RECORD: u16 = 0;

/// Error code sent when a request is malformed or offers nothing usable.
pub const ERROR_BAD_REQUEST: u16 = 1;

/// TLS exporter label (RFC 8915 Section 4.3).
const EXPORTER_LABEL: &[u8] = b"EXPORTER-network-time-security/1";

/// Exporter context for the client-to-server key.
const EXPORTER_CONTEXT_C2S: &[u8] = &[0x00, 0x00, 0x00, 0x0f, 0x00];

/// Exporter context for the server-to-client key.
const EXPORTER_CONTEXT_S2C: &[u8] = &[0x00, 0x00, 0x00, 0x0f, 0x01];

/// Whether the negotiated ALPN protocol is `ntske/1`.
pub(crate) fn alpn_matches(negotiated: Option<&[u8]>) -> bool {
    negotiated == Some(ALPN_NTSKE)
}

/// Build the client request: critical Next Protocol (NTPv4), critical AEAD
/// Algorithm (AES-SIV-CMAC-256), critical End of Message.
pub(crate) fn build_client_request(message: &mut KeMessage) -> Result<(), RecordError> {
    message.reset();
    message.add_record(
        true,
        RECORD_NEXT_PROTOCOL,
        &NEXT_PROTOCOL_NTPV4.to_be_bytes(),
    )?;
    message.add_record(
        true,
        RECORD_AEAD_ALGORITHM,
        &AEAD_AES_SIV_CMAC_256.to_be_bytes(),
    )?;
    message.add_record(true, RECORD_END_OF_MESSAGE, &[])
}

/// Scan a list-of-u16 record body for `wanted`, looking at no more than
/// [`MAX_RECORD_BODY_LENGTH`] bytes.
fn body_offers(body: &[u8], wanted: u16) -> bool {
    let scan = &body[..body.len().min(MAX_RECORD_BODY_LENGTH)];
    scan.chunks_exact(2)
        .any(|pair| u16::from_be_bytes([pair[0], pair[1]]) == wanted)
}

/// Process a validated client request message.
///
/// Returns `Ok(())` when NTPv4 and AES-SIV-CMAC-256 were both offered
/// acceptably, or the NTS-KE error code to send back. The first problem
/// encountered wins.
pub(crate) fn process_request(message: &mut KeMessage) -> Result<(), u16> {
    let mut next_protocol_ok = false;
    let mut has_next_protocol = false;
    let mut aead_ok = false;

    message.reset_parsing();
    while let Some(record) = message.next_record() {
        match record.record_type {
            RECORD_NEXT_PROTOCOL => {
                if !record.critical || record.body.len() < 2 || record.body.len() % 2 != 0 {
                    return Err(ERROR_BAD_REQUEST);
                }
                if body_offers(record.body, NEXT_PROTOCOL_NTPV4) {
                    next_protocol_ok = true;
                }
                has_next_protocol = true;
            }
            RECORD_AEAD_ALGORITHM => {
                if record.body.len() < 2 || record.body.len() % 2 != 0 {
                    return Err(ERROR_BAD_REQUEST);
                }
                if body_offers(record.body, AEAD_AES_SIV_CMAC_256) {
                    aead_ok = true;
                }
            }
            RECORD_ERROR | RECORD_WARNING | RECORD_COOKIE => {
                // None of these belong in a request.
                return Err(ERROR_BAD_REQUEST);
            }
            RECORD_END_OF_MESSAGE => {}
            _ => {
                if record.critical {
                    return Err(ERROR_UNRECOGNIZED_CRITICAL_RECORD);
                }
                debug!(
                    "ignoring unknown record type={} length={}",
                    record.record_type,
                    record.body.len()
                );
            }
        }
    }

    if !has_next_protocol || !next_protocol_ok || !aead_ok {
        return Err(ERROR_BAD_REQUEST);
    }

    Ok(())
}

/// Build the server response.
///
/// On error, a single critical Error record carrying the code. On success,
/// the negotiated protocol and algorithm, a Port record when `ntp_port`
/// differs from 123, and the sealed cookies. Always terminated by a
/// critical End of Message.
pub(crate) fn build_server_response(
    message: &mut KeMessage,
    outcome: Result<(), u16>,
    ntp_port: u16,
    cookies: &[Vec<u8>],
) -> Result<(), RecordError> {
    message.reset();

    match outcome {
        Err(code) => {
            debug!("NTS-KE response: error={code}");
            message.add_record(true, RECORD_ERROR, &code.to_be_bytes())?;
        }
        Ok(()) => {
            message.add_record(
                true,
                RECORD_NEXT_PROTOCOL,
                &NEXT_PROTOCOL_NTPV4.to_be_bytes(),
            )?;
            message.add_record(
                true,
                RECORD_AEAD_ALGORITHM,
                &AEAD_AES_SIV_CMAC_256.to_be_bytes(),
            )?;
            if ntp_port != NTP_PORT {
                message.add_record(true, RECORD_NTPV4_PORT, &ntp_port.to_be_bytes())?;
            }
            for cookie in cookies {
                message.add_record(false, RECORD_COOKIE, cookie)?;
            }
        }
    }

    message.add_record(true, RECORD_END_OF_MESSAGE, &[])
}

/// Negotiated data extracted from a server response.
#[derive(Debug, Default)]
pub struct KeResponseData {
    /// Cookies in arrival order, at most [`MAX_COOKIES`].
    pub cookies: Vec<Vec<u8>>,
    /// NTP server name or address override, when present.
    pub ntp_server: Option<String>,
    /// NTP port override, when present.
    pub ntp_port: Option<u16>,
}

/// Process a validated server response message.
///
/// Requires exactly one acceptable Next Protocol record and exactly one
/// acceptable AEAD Algorithm record; an Error or Warning record or any
/// unrecognized critical record invalidates the response.
pub(crate) fn process_response(message: &mut KeMessage) -> Result<KeResponseData, KeError> {
    let mut next_protocols = 0usize;
    let mut aead_algorithms = 0usize;
    let mut data = KeResponseData::default();

    message.reset_parsing();
    while let Some(record) = message.next_record() {
        match record.record_type {
            RECORD_NEXT_PROTOCOL => {
                if !record.critical
                    || record.body.len() != 2
                    || u16::from_be_bytes([record.body[0], record.body[1]])
                        != NEXT_PROTOCOL_NTPV4
                {
                    return Err(KeError::BadResponse {
                        detail: "unexpected next protocol",
                    });
                }
                next_protocols += 1;
            }
            RECORD_AEAD_ALGORITHM => {
                if record.body.len() != 2
                    || u16::from_be_bytes([record.body[0], record.body[1]])
                        != AEAD_AES_SIV_CMAC_256
                {
                    return Err(KeError::BadResponse {
                        detail: "unexpected AEAD algorithm",
                    });
                }
                aead_algorithms += 1;
            }
            RECORD_ERROR => {
                let code = if record.body.len() >= 2 {
                    u16::from_be_bytes([record.body[0], record.body[1]])
                } else {
                    0
                };
                return Err(KeError::ServerError { code });
            }
            RECORD_WARNING => {
                if record.body.len() >= 2 {
                    debug!(
                        "NTS-KE warning {}",
                        u16::from_be_bytes([record.body[0], record.body[1]])
                    );
                }
                return Err(KeError::BadResponse {
                    detail: "server sent a warning",
                });
            }
            RECORD_COOKIE => {
                if record.body.len() <= MAX_COOKIE_LENGTH && data.cookies.len() < MAX_COOKIES {
                    data.cookies.push(record.body.to_vec());
                } else {
                    debug!("dropping cookie of length {}", record.body.len());
                }
            }
            RECORD_NTPV4_SERVER => {
                if record.body.len() < 2 || record.body.len() > MAX_RECORD_BODY_LENGTH {
                    return Err(KeError::BadResponse {
                        detail: "bad server negotiation record",
                    });
                }
                let name = String::from_utf8(record.body.to_vec()).map_err(|_| {
                    KeError::BadResponse {
                        detail: "server name is not valid UTF-8",
                    }
                })?;
                data.ntp_server = Some(name);
            }
            RECORD_NTPV4_PORT => {
                if record.body.len() != 2 {
                    return Err(KeError::BadResponse {
                        detail: "bad port negotiation record",
                    });
                }
                data.ntp_port = Some(u16::from_be_bytes([record.body[0], record.body[1]]));
            }
            RECORD_END_OF_MESSAGE => {}
            _ => {
                if record.critical {
                    return Err(KeError::BadResponse {
                        detail: "unrecognized critical record",
                    });
                }
                debug!(
                    "ignoring unknown record type={} length={}",
                    record.record_type,
                    record.body.len()
                );
            }
        }
    }

    if next_protocols != 1 {
        return Err(KeError::BadResponse {
            detail: "expected exactly one next protocol record",
        });
    }
    if aead_algorithms != 1 {
        return Err(KeError::BadResponse {
            detail: "expected exactly one AEAD algorithm record",
        });
    }

    Ok(data)
}

/// Derive the C2S and S2C session keys from the TLS exporter (RFC 5705).
pub(crate) fn export_session_keys<Data>(
    conn: &rustls::ConnectionCommon<Data>,
) -> Result<([u8; SESSION_KEY_LENGTH], [u8; SESSION_KEY_LENGTH]), KeError> {
    let c2s = conn
        .export_keying_material(
            [0u8; SESSION_KEY_LENGTH],
            EXPORTER_LABEL,
            Some(EXPORTER_CONTEXT_C2S),
        )
        .map_err(|e| KeError::KeyExportFailed {
            detail: e.to_string(),
        })?;
    let s2c = conn
        .export_keying_material(
            [0u8; SESSION_KEY_LENGTH],
            EXPORTER_LABEL,
            Some(EXPORTER_CONTEXT_S2C),
        )
        .map_err(|e| KeError::KeyExportFailed {
            detail: e.to_string(),
        })?;
    Ok((c2s, s2c))
}
