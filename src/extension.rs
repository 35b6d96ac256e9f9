// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTP extension field codec and NTS extension field types.
//!
//! Extension fields follow the NTPv4 format defined in RFC 7822, appended
//! after the 48-byte packet header and padded to 4-byte boundaries. NTS
//! (RFC 8915 Section 5) defines the field types used for authenticated NTP.
//!
//! Parsing is slice-based: every parsed field is a bounds-checked view into
//! the packet, carrying the byte offset where the field starts so callers
//! can reconstruct AEAD associated data without re-walking the packet.

use byteorder::{ByteOrder, BE};

use crate::error::ExtensionError;
use crate::packet::HEADER_LENGTH;

// NTS extension field type codes (RFC 8915 Section 7.6).

/// Unique Identifier extension field type.
pub const EF_UNIQUE_IDENTIFIER: u16 = 0x0104;

/// NTS Cookie extension field type.
pub const EF_NTS_COOKIE: u16 = 0x0204;

/// NTS Cookie Placeholder extension field type.
pub const EF_NTS_COOKIE_PLACEHOLDER: u16 = 0x0304;

/// NTS Authenticator and Encrypted Extension Fields extension field type.
pub const EF_NTS_AUTH_AND_EEF: u16 = 0x0404;

/// Size of an extension field header: 2-byte type, 2-byte length.
const EF_HEADER_LENGTH: usize = 4;

/// Round a length up to the next 4-byte boundary.
pub fn padded_len(length: usize) -> usize {
    length + (4 - length % 4) % 4
}

/// An extension field parsed from a packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParsedField<'a> {
    /// The extension field type code.
    pub field_type: u16,
    /// The field body (excluding the 4-byte header and trailing padding).
    pub body: &'a [u8],
    /// Byte offset of the field header within the packet.
    pub offset: usize,
}

/// Parse all extension fields following the 48-byte NTP header.
///
/// Stops when fewer than four bytes remain. The declared field length must
/// cover the header and fit within the packet; fields are skipped to the
/// next 4-byte boundary.
pub fn parse_extension_fields(packet: &[u8]) -> Result<Vec<ParsedField<'_>>, ExtensionError> {
    let mut fields = Vec::new();
    let mut offset = HEADER_LENGTH;

    while offset + EF_HEADER_LENGTH <= packet.len() {
        let field_type = BE::read_u16(&packet[offset..]);
        let field_length = BE::read_u16(&packet[offset + 2..]);

        // Field length includes the 4-byte header.
        if (field_length as usize) < EF_HEADER_LENGTH {
            return Err(ExtensionError::FieldTooShort {
                length: field_length,
            });
        }

        let body_start = offset + EF_HEADER_LENGTH;
        let body_end = offset + field_length as usize;
        if body_end > packet.len() {
            return Err(ExtensionError::Truncated);
        }

        fields.push(ParsedField {
            field_type,
            body: &packet[body_start..body_end],
            offset,
        });

        offset += padded_len(field_length as usize);
    }

    Ok(fields)
}

/// Append an extension field to a packet, padding the body to a 4-byte
/// boundary with zero bytes.
pub fn append_extension_field(packet: &mut Vec<u8>, field_type: u16, body: &[u8]) {
    let field_length = EF_HEADER_LENGTH + body.len();
    let mut header = [0u8; EF_HEADER_LENGTH];
    BE::write_u16(&mut header[..2], field_type);
    BE::write_u16(&mut header[2..], field_length as u16);
    packet.extend_from_slice(&header);
    packet.extend_from_slice(body);
    packet.resize(packet.len() + padded_len(field_length) - field_length, 0);
}

/// The nonce and ciphertext carried by an NTS Authenticator and Encrypted
/// Extension Fields body (RFC 8915 Section 5.6).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AuthenticatorFields<'a> {
    /// The AEAD nonce.
    pub nonce: &'a [u8],
    /// The AEAD ciphertext (encrypted extensions plus the SIV tag).
    pub ciphertext: &'a [u8],
}

/// Parse an authenticator extension field body.
///
/// The body layout is:
///
/// ```text
/// nonce_length: u16 BE | ciphertext_length: u16 BE |
/// nonce (padded to 4)  | ciphertext (padded to 4)
/// ```
///
/// The padded nonce and ciphertext lengths must fit within the body.
pub fn parse_authenticator(body: &[u8]) -> Result<AuthenticatorFields<'_>, ExtensionError> {
    if body.len() < 4 {
        return Err(ExtensionError::AuthenticatorMalformed);
    }

    let nonce_length = BE::read_u16(&body[..2]) as usize;
    let ciphertext_length = BE::read_u16(&body[2..4]) as usize;

    if padded_len(nonce_length) + padded_len(ciphertext_length) > body.len() {
        return Err(ExtensionError::AuthenticatorMalformed);
    }

    let nonce_start = 4;
    let ciphertext_start = nonce_start + padded_len(nonce_length);
    if ciphertext_start + ciphertext_length > body.len() {
        return Err(ExtensionError::AuthenticatorMalformed);
    }

    Ok(AuthenticatorFields {
        nonce: &body[nonce_start..nonce_start + nonce_length],
        ciphertext: &body[ciphertext_start..ciphertext_start + ciphertext_length],
    })
}

/// Encode an authenticator extension field body from a nonce and ciphertext.
pub fn encode_authenticator(nonce: &[u8], ciphertext: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + padded_len(nonce.len()) + padded_len(ciphertext.len()));
    let mut lengths = [0u8; 4];
    BE::write_u16(&mut lengths[..2], nonce.len() as u16);
    BE::write_u16(&mut lengths[2..], ciphertext.len() as u16);
    body.extend_from_slice(&lengths);
    body.extend_from_slice(nonce);
    body.resize(4 + padded_len(nonce.len()), 0);
    body.extend_from_slice(ciphertext);
    body.resize(body.len() + padded_len(ciphertext.len()) - ciphertext.len(), 0);
    body
}
