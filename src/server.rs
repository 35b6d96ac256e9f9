// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTS-NTP server: request authentication and response generation.
//!
//! The server keeps no per-client state. Each authenticated request carries
//! exactly one cookie, which [`check_request_auth`] opens with the key ring
//! to recover the session keys; the request's authenticator is then
//! verified under the C2S key. [`generate_response_auth`] echoes the unique
//! identifier, attaches one fresh cookie per cookie or placeholder seen in
//! the request, and seals the response under the S2C key.
//!
//! Packets that fail any check are dropped silently by the caller; no NTP
//! response is owed to an unauthenticated sender.

use std::io;

use log::debug;

use crate::aead::{SivCmac256, SIV_NONCE_LENGTH};
use crate::error::AuthError;
use crate::extension::{
    append_extension_field, encode_authenticator, parse_authenticator, parse_extension_fields,
    EF_NTS_AUTH_AND_EEF, EF_NTS_COOKIE, EF_NTS_COOKIE_PLACEHOLDER, EF_UNIQUE_IDENTIFIER,
};
use crate::ke_proto::{MAX_COOKIES, SESSION_KEY_LENGTH};
use crate::keyring::ServerKeyRing;
use crate::packet::{self, Mode};

/// Context recovered from an authenticated request, consumed when building
/// the response.
#[derive(Debug)]
pub struct NtsRequestContext {
    uniq_id: Vec<u8>,
    c2s: [u8; SESSION_KEY_LENGTH],
    s2c: [u8; SESSION_KEY_LENGTH],
    cookies_wanted: usize,
}

impl NtsRequestContext {
    /// The unique identifier to echo into the response.
    pub fn unique_id(&self) -> &[u8] {
        &self.uniq_id
    }

    /// Number of fresh cookies the response will carry.
    pub fn cookies_wanted(&self) -> usize {
        self.cookies_wanted
    }
}

/// Authenticate an incoming NTS request.
///
/// Requires client mode, exactly one cookie extension, and an authenticator
/// that verifies under the C2S key recovered from the cookie, over the
/// packet bytes preceding the authenticator field.
pub fn check_request_auth(
    request: &[u8],
    key_ring: &ServerKeyRing,
) -> io::Result<NtsRequestContext> {
    if packet::mode(request) != Some(Mode::Client) {
        return Err(AuthError::UnexpectedMode.into());
    }

    let fields = parse_extension_fields(request)?;
    if fields.is_empty() {
        return Err(AuthError::NoExtensionFields.into());
    }

    let mut uniq_id = None;
    let mut cookie = None;
    let mut placeholder_count = 0usize;
    let mut auth_field = None;

    for field in &fields {
        match field.field_type {
            EF_UNIQUE_IDENTIFIER => {
                if uniq_id.is_none() {
                    uniq_id = Some(field.body.to_vec());
                }
            }
            EF_NTS_COOKIE => {
                // Exactly one cookie is expected.
                if cookie.is_some() {
                    return Err(AuthError::DuplicateCookie.into());
                }
                cookie = Some(field.body);
            }
            EF_NTS_COOKIE_PLACEHOLDER => placeholder_count += 1,
            EF_NTS_AUTH_AND_EEF => {
                if auth_field.is_none() {
                    auth_field = Some(*field);
                }
            }
            _ => {}
        }
    }

    let uniq_id = uniq_id.ok_or(AuthError::MissingField {
        field: "Unique Identifier",
    })?;
    let cookie = cookie.ok_or(AuthError::MissingField { field: "NTS Cookie" })?;
    let auth_field = auth_field.ok_or(AuthError::MissingField {
        field: "NTS Authenticator",
    })?;
    let auth = parse_authenticator(auth_field.body)?;

    let (c2s, s2c) = key_ring.open_cookie(cookie)?;

    let siv = SivCmac256::from_key(&c2s);
    siv.decrypt(auth.nonce, &request[..auth_field.offset], auth.ciphertext)?;

    // One replacement for the consumed cookie plus one per placeholder,
    // bounded by the client pool size.
    let cookies_wanted = (1 + placeholder_count).min(MAX_COOKIES);

    debug!("authenticated NTS request, {cookies_wanted} cookies wanted");

    Ok(NtsRequestContext {
        uniq_id,
        c2s,
        s2c,
        cookies_wanted,
    })
}

/// Append the NTS extension fields authenticating a response.
///
/// The response packet must already carry its server-mode header. Appends
/// the echoed unique identifier, the fresh cookies (sealed under the
/// current server key over the request's session keys), and an
/// authenticator with a fresh nonce and empty plaintext under the S2C key.
pub fn generate_response_auth(
    response: &mut Vec<u8>,
    ctx: &NtsRequestContext,
    key_ring: &ServerKeyRing,
) -> io::Result<()> {
    if packet::mode(response) != Some(Mode::Server) {
        return Err(AuthError::UnexpectedMode.into());
    }

    append_extension_field(response, EF_UNIQUE_IDENTIFIER, &ctx.uniq_id);

    for _ in 0..ctx.cookies_wanted {
        let cookie = key_ring.seal_cookie(&ctx.c2s, &ctx.s2c)?;
        append_extension_field(response, EF_NTS_COOKIE, &cookie);
    }

    let mut nonce = [0u8; SIV_NONCE_LENGTH];
    rand::fill(&mut nonce);

    let siv = SivCmac256::from_key(&ctx.s2c);
    let ciphertext = siv.encrypt(&nonce, response, &[])?;
    let body = encode_authenticator(&nonce, &ciphertext);
    append_extension_field(response, EF_NTS_AUTH_AND_EEF, &body);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{encode_lvm, HEADER_LENGTH};

    const C2S: [u8; SESSION_KEY_LENGTH] = [0x11; SESSION_KEY_LENGTH];
    const S2C: [u8; SESSION_KEY_LENGTH] = [0x22; SESSION_KEY_LENGTH];

    fn header(mode: Mode) -> Vec<u8> {
        let mut packet = vec![0u8; HEADER_LENGTH];
        packet[0] = encode_lvm(mode);
        packet
    }

    /// Build an authenticated client request with the given cookie and
    /// placeholder count.
    fn build_request(cookie: &[u8], placeholders: usize) -> Vec<u8> {
        let mut request = header(Mode::Client);
        append_extension_field(&mut request, EF_UNIQUE_IDENTIFIER, &[0xAB; 32]);
        append_extension_field(&mut request, EF_NTS_COOKIE, cookie);
        for _ in 0..placeholders {
            append_extension_field(
                &mut request,
                EF_NTS_COOKIE_PLACEHOLDER,
                &vec![0u8; cookie.len()],
            );
        }
        let c2s = SivCmac256::new(&C2S).unwrap();
        let nonce = [0x77u8; SIV_NONCE_LENGTH];
        let ciphertext = c2s.encrypt(&nonce, &request, &[]).unwrap();
        let body = encode_authenticator(&nonce, &ciphertext);
        append_extension_field(&mut request, EF_NTS_AUTH_AND_EEF, &body);
        request
    }

    #[test]
    fn test_request_roundtrip() {
        let ring = ServerKeyRing::new();
        let cookie = ring.seal_cookie(&C2S, &S2C).unwrap();
        let request = build_request(&cookie, 1);

        let ctx = check_request_auth(&request, &ring).unwrap();
        assert_eq!(ctx.unique_id(), &[0xAB; 32]);
        // One consumed cookie plus one placeholder.
        assert_eq!(ctx.cookies_wanted(), 2);
    }

    #[test]
    fn test_request_wrong_mode() {
        let ring = ServerKeyRing::new();
        let cookie = ring.seal_cookie(&C2S, &S2C).unwrap();
        let mut request = build_request(&cookie, 0);
        request[0] = encode_lvm(Mode::Server);
        assert!(check_request_auth(&request, &ring).is_err());
    }

    #[test]
    fn test_request_no_extensions() {
        let ring = ServerKeyRing::new();
        assert!(check_request_auth(&header(Mode::Client), &ring).is_err());
    }

    #[test]
    fn test_request_two_cookies_rejected() {
        let ring = ServerKeyRing::new();
        let cookie = ring.seal_cookie(&C2S, &S2C).unwrap();

        let mut request = header(Mode::Client);
        append_extension_field(&mut request, EF_UNIQUE_IDENTIFIER, &[0xAB; 32]);
        append_extension_field(&mut request, EF_NTS_COOKIE, &cookie);
        append_extension_field(&mut request, EF_NTS_COOKIE, &cookie);
        let c2s = SivCmac256::new(&C2S).unwrap();
        let nonce = [0x77u8; SIV_NONCE_LENGTH];
        let ciphertext = c2s.encrypt(&nonce, &request, &[]).unwrap();
        let body = encode_authenticator(&nonce, &ciphertext);
        append_extension_field(&mut request, EF_NTS_AUTH_AND_EEF, &body);

        let err = check_request_auth(&request, &ring).unwrap_err();
        assert!(err.to_string().contains("more than one cookie"));
    }

    #[test]
    fn test_request_tampered_header_rejected() {
        let ring = ServerKeyRing::new();
        let cookie = ring.seal_cookie(&C2S, &S2C).unwrap();
        let mut request = build_request(&cookie, 0);
        request[2] ^= 0x01;
        assert!(check_request_auth(&request, &ring).is_err());
    }

    #[test]
    fn test_request_foreign_cookie_rejected() {
        let ring = ServerKeyRing::new();
        let other_ring = ServerKeyRing::new();
        let cookie = other_ring.seal_cookie(&C2S, &S2C).unwrap();
        let request = build_request(&cookie, 0);
        assert!(check_request_auth(&request, &ring).is_err());
    }

    #[test]
    fn test_request_wrong_c2s_key_rejected() {
        let ring = ServerKeyRing::new();
        // Cookie carries different keys than the ones used to authenticate.
        let cookie = ring.seal_cookie(&[0x55; 32], &S2C).unwrap();
        let request = build_request(&cookie, 0);
        assert!(check_request_auth(&request, &ring).is_err());
    }

    #[test]
    fn test_response_generation_and_client_verification() {
        let ring = ServerKeyRing::new();
        let cookie = ring.seal_cookie(&C2S, &S2C).unwrap();
        let request = build_request(&cookie, 2);
        let ctx = check_request_auth(&request, &ring).unwrap();

        let mut response = header(Mode::Server);
        generate_response_auth(&mut response, &ctx, &ring).unwrap();

        let fields = parse_extension_fields(&response).unwrap();
        assert_eq!(fields[0].field_type, EF_UNIQUE_IDENTIFIER);
        assert_eq!(fields[0].body, &[0xAB; 32][..]);

        let cookies: Vec<_> = fields
            .iter()
            .filter(|f| f.field_type == EF_NTS_COOKIE)
            .collect();
        assert_eq!(cookies.len(), 3);
        // Fresh cookies open to the same session keys.
        for c in &cookies {
            let (c2s, s2c) = ring.open_cookie(c.body).unwrap();
            assert_eq!(c2s, C2S);
            assert_eq!(s2c, S2C);
        }

        // The authenticator verifies under S2C over the preceding bytes.
        let auth_field = fields.last().unwrap();
        assert_eq!(auth_field.field_type, EF_NTS_AUTH_AND_EEF);
        let auth = parse_authenticator(auth_field.body).unwrap();
        let s2c = SivCmac256::new(&S2C).unwrap();
        s2c.decrypt(auth.nonce, &response[..auth_field.offset], auth.ciphertext)
            .unwrap();
    }

    #[test]
    fn test_response_requires_server_mode() {
        let ring = ServerKeyRing::new();
        let cookie = ring.seal_cookie(&C2S, &S2C).unwrap();
        let request = build_request(&cookie, 0);
        let ctx = check_request_auth(&request, &ring).unwrap();

        let mut response = header(Mode::Client);
        assert!(generate_response_auth(&mut response, &ctx, &ring).is_err());
    }

    #[test]
    fn test_cookies_wanted_capped() {
        let ring = ServerKeyRing::new();
        let cookie = ring.seal_cookie(&C2S, &S2C).unwrap();
        let request = build_request(&cookie, 20);
        let ctx = check_request_auth(&request, &ring).unwrap();
        assert_eq!(ctx.cookies_wanted(), MAX_COOKIES);
    }
}
