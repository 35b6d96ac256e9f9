// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTS-NTP client: authenticated request generation and response validation.
//!
//! An [`NtsClient`] owns the cookie pool and session keys for one server
//! association. When the pool runs dry, [`prepare_for_auth`] runs a
//! key-establishment round (RFC 8915 Section 4) to refill it; each request
//! then consumes one cookie and asks for replacements via placeholders, so
//! a lossless exchange keeps the pool full.
//!
//! The surrounding daemon owns the NTP packet and its transport; this layer
//! only appends and validates extension fields.
//!
//! [`prepare_for_auth`]: NtsClient::prepare_for_auth

use std::collections::VecDeque;
use std::io;

use log::debug;

use crate::aead::{SivCmac256, SIV_NONCE_LENGTH};
use crate::error::AuthError;
use crate::extension::{
    append_extension_field, encode_authenticator, parse_authenticator, parse_extension_fields,
    EF_NTS_AUTH_AND_EEF, EF_NTS_COOKIE, EF_NTS_COOKIE_PLACEHOLDER, EF_UNIQUE_IDENTIFIER,
};
use crate::ke_client::{establish, KeClientConfig, KeEstablishment};
use crate::ke_proto::{MAX_COOKIES, MAX_COOKIE_LENGTH, NTP_PORT};
use crate::packet::{self, Mode, HEADER_LENGTH};

/// Length of the Unique Identifier extension field body.
pub const UNIQUE_ID_LENGTH: usize = 32;

/// An NTS client association with one server.
///
/// Create with [`NtsClient::new`], then for each NTP request call
/// [`prepare_for_auth`](NtsClient::prepare_for_auth),
/// [`generate_request_auth`](NtsClient::generate_request_auth), and
/// [`check_response_auth`](NtsClient::check_response_auth) on the reply.
pub struct NtsClient {
    config: KeClientConfig,
    ntp_server: String,
    ntp_port: u16,
    cookies: VecDeque<Vec<u8>>,
    c2s: Option<SivCmac256>,
    s2c: Option<SivCmac256>,
    uniq_id: [u8; UNIQUE_ID_LENGTH],
    nonce: [u8; SIV_NONCE_LENGTH],
}

impl NtsClient {
    /// Create a client for the given NTS-KE server. No network activity
    /// happens until [`prepare_for_auth`](NtsClient::prepare_for_auth).
    pub fn new(config: KeClientConfig) -> Self {
        let ntp_server = config.server_name.clone();
        NtsClient {
            config,
            ntp_server,
            ntp_port: NTP_PORT,
            cookies: VecDeque::with_capacity(MAX_COOKIES),
            c2s: None,
            s2c: None,
            uniq_id: [0u8; UNIQUE_ID_LENGTH],
            nonce: [0u8; SIV_NONCE_LENGTH],
        }
    }

    /// Number of cookies remaining in the pool.
    pub fn cookie_count(&self) -> usize {
        self.cookies.len()
    }

    /// The NTP server and port to send authenticated requests to, taking
    /// any NTS-KE server/port negotiation into account.
    pub fn ntp_server(&self) -> (&str, u16) {
        (&self.ntp_server, self.ntp_port)
    }

    /// Install the results of a key-establishment round.
    fn install_session(&mut self, est: KeEstablishment) {
        self.c2s = Some(SivCmac256::from_key(&est.c2s_key));
        self.s2c = Some(SivCmac256::from_key(&est.s2c_key));
        self.cookies = est.cookies.into_iter().take(MAX_COOKIES).collect();
        self.ntp_server = est.ntp_server;
        self.ntp_port = est.ntp_port;
    }

    /// Make the client ready to authenticate one request.
    ///
    /// Runs a key-establishment round when the cookie pool is empty, then
    /// draws a fresh unique identifier and AEAD nonce. Succeeds only when
    /// at least one cookie is available afterwards; on failure the caller
    /// skips this request and retries later.
    pub async fn prepare_for_auth(&mut self) -> io::Result<()> {
        if self.cookies.is_empty() {
            let est = establish(&self.config).await?;
            debug!(
                "key establishment yielded {} cookies for {}:{}",
                est.cookies.len(),
                est.ntp_server,
                est.ntp_port
            );
            self.install_session(est);
        }
        if self.cookies.is_empty() {
            return Err(AuthError::NoCookiesAvailable.into());
        }

        rand::fill(&mut self.uniq_id);
        rand::fill(&mut self.nonce);
        Ok(())
    }

    /// Append the NTS extension fields authenticating a request.
    ///
    /// Appends the Unique Identifier, one cookie, enough placeholders to
    /// refill the pool, and the authenticator (empty plaintext, so the
    /// ciphertext is a pure 16-byte tag over everything before it).
    /// Consumes the cookie.
    pub fn generate_request_auth(&mut self, request: &mut Vec<u8>) -> io::Result<()> {
        if request.len() < HEADER_LENGTH {
            return Err(AuthError::UnexpectedMode.into());
        }
        let c2s = self.c2s.as_ref().ok_or(AuthError::NotReady)?;
        let cookie = self
            .cookies
            .front()
            .ok_or(AuthError::NoCookiesAvailable)?
            .clone();

        append_extension_field(request, EF_UNIQUE_IDENTIFIER, &self.uniq_id);
        append_extension_field(request, EF_NTS_COOKIE, &cookie);

        // One placeholder per missing cookie; the server answers each with
        // a fresh cookie. Placeholder bodies must match the cookie length.
        let placeholders = MAX_COOKIES - self.cookies.len();
        let placeholder_body = vec![0u8; cookie.len()];
        for _ in 0..placeholders {
            append_extension_field(request, EF_NTS_COOKIE_PLACEHOLDER, &placeholder_body);
        }

        let ciphertext = c2s.encrypt(&self.nonce, request, &[])?;
        let auth_body = encode_authenticator(&self.nonce, &ciphertext);
        append_extension_field(request, EF_NTS_AUTH_AND_EEF, &auth_body);

        self.cookies.pop_front();
        Ok(())
    }

    /// Validate an authenticated server response.
    ///
    /// Requires server mode, the echoed unique identifier, and a verifying
    /// authenticator over the packet bytes that precede it. Cookies from
    /// the response refill the pool only after verification.
    pub fn check_response_auth(&mut self, response: &[u8]) -> io::Result<()> {
        if packet::mode(response) != Some(Mode::Server) {
            return Err(AuthError::UnexpectedMode.into());
        }

        let fields = parse_extension_fields(response)?;
        if fields.is_empty() {
            return Err(AuthError::NoExtensionFields.into());
        }

        let uid = fields
            .iter()
            .find(|f| f.field_type == EF_UNIQUE_IDENTIFIER)
            .ok_or(AuthError::MissingField {
                field: "Unique Identifier",
            })?;
        if uid.body != self.uniq_id {
            return Err(AuthError::UniqueIdMismatch.into());
        }

        let auth_field = fields
            .iter()
            .find(|f| f.field_type == EF_NTS_AUTH_AND_EEF)
            .ok_or(AuthError::MissingField {
                field: "NTS Authenticator",
            })?;
        let auth = parse_authenticator(auth_field.body)?;

        let s2c = self.s2c.as_ref().ok_or(AuthError::NotReady)?;
        s2c.decrypt(auth.nonce, &response[..auth_field.offset], auth.ciphertext)?;

        // Authenticated response; absorb replacement cookies.
        for field in &fields {
            if field.field_type == EF_NTS_COOKIE
                && field.body.len() <= MAX_COOKIE_LENGTH
                && self.cookies.len() < MAX_COOKIES
            {
                self.cookies.push_back(field.body.to_vec());
            }
        }

        debug!("authenticated response, {} cookies in pool", self.cookies.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aead::SIV_TAG_LENGTH;
    use crate::packet::encode_lvm;

    fn test_client(cookies: usize) -> NtsClient {
        let mut client = NtsClient::new(KeClientConfig::new("time.example.com"));
        client.install_session(KeEstablishment {
            cookies: (0..cookies).map(|i| vec![i as u8; 100]).collect(),
            c2s_key: [0x42; 32],
            s2c_key: [0x43; 32],
            ntp_server: "time.example.com".to_string(),
            ntp_port: 123,
        });
        rand::fill(&mut client.uniq_id);
        rand::fill(&mut client.nonce);
        client
    }

    fn client_header() -> Vec<u8> {
        let mut packet = vec![0u8; HEADER_LENGTH];
        packet[0] = encode_lvm(Mode::Client);
        packet
    }

    fn server_header() -> Vec<u8> {
        let mut packet = vec![0u8; HEADER_LENGTH];
        packet[0] = encode_lvm(Mode::Server);
        packet
    }

    /// Build a server response the way `generate_response_auth` would,
    /// using the client's own S2C key.
    fn fake_response(client: &NtsClient, cookies: usize) -> Vec<u8> {
        let mut response = server_header();
        append_extension_field(&mut response, EF_UNIQUE_IDENTIFIER, &client.uniq_id);
        for _ in 0..cookies {
            append_extension_field(&mut response, EF_NTS_COOKIE, &[0xEE; 100]);
        }
        let s2c = SivCmac256::new(&[0x43; 32]).unwrap();
        let nonce = [0x99u8; SIV_NONCE_LENGTH];
        let ciphertext = s2c.encrypt(&nonce, &response, &[]).unwrap();
        let body = encode_authenticator(&nonce, &ciphertext);
        append_extension_field(&mut response, EF_NTS_AUTH_AND_EEF, &body);
        response
    }

    #[test]
    fn test_request_layout_full_pool() {
        let mut client = test_client(8);
        let mut request = client_header();
        client.generate_request_auth(&mut request).unwrap();

        let fields = parse_extension_fields(&request).unwrap();
        // Full pool: uid, cookie, no placeholders, authenticator.
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].field_type, EF_UNIQUE_IDENTIFIER);
        assert_eq!(fields[0].body.len(), UNIQUE_ID_LENGTH);
        assert_eq!(fields[1].field_type, EF_NTS_COOKIE);
        assert_eq!(fields[2].field_type, EF_NTS_AUTH_AND_EEF);
        assert_eq!(client.cookie_count(), 7);

        let auth = parse_authenticator(fields[2].body).unwrap();
        assert_eq!(auth.nonce.len(), SIV_NONCE_LENGTH);
        assert_eq!(auth.ciphertext.len(), SIV_TAG_LENGTH);
    }

    #[test]
    fn test_request_placeholders_match_missing_cookies() {
        let mut client = test_client(2);
        let mut request = client_header();
        client.generate_request_auth(&mut request).unwrap();

        let fields = parse_extension_fields(&request).unwrap();
        let placeholders: Vec<_> = fields
            .iter()
            .filter(|f| f.field_type == EF_NTS_COOKIE_PLACEHOLDER)
            .collect();
        assert_eq!(placeholders.len(), 6);
        // Placeholder bodies are zero-filled and cookie-sized.
        for p in placeholders {
            assert_eq!(p.body.len(), 100);
            assert!(p.body.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_request_authenticator_verifies_with_c2s() {
        let mut client = test_client(8);
        let mut request = client_header();
        client.generate_request_auth(&mut request).unwrap();

        let fields = parse_extension_fields(&request).unwrap();
        let auth_field = fields.last().unwrap();
        let auth = parse_authenticator(auth_field.body).unwrap();

        let c2s = SivCmac256::new(&[0x42; 32]).unwrap();
        c2s.decrypt(auth.nonce, &request[..auth_field.offset], auth.ciphertext)
            .unwrap();
    }

    #[test]
    fn test_request_without_cookies_fails() {
        let mut client = test_client(0);
        let mut request = client_header();
        assert!(client.generate_request_auth(&mut request).is_err());
    }

    #[test]
    fn test_response_roundtrip_refills_pool() {
        let mut client = test_client(8);
        let mut request = client_header();
        client.generate_request_auth(&mut request).unwrap();
        assert_eq!(client.cookie_count(), 7);

        let response = fake_response(&client, 1);
        client.check_response_auth(&response).unwrap();
        assert_eq!(client.cookie_count(), 8);
    }

    #[test]
    fn test_response_pool_capped() {
        let mut client = test_client(8);
        let response = fake_response(&client, 8);
        client.check_response_auth(&response).unwrap();
        assert_eq!(client.cookie_count(), MAX_COOKIES);
    }

    #[test]
    fn test_response_wrong_mode_rejected() {
        let mut client = test_client(8);
        let mut response = fake_response(&client, 1);
        response[0] = encode_lvm(Mode::Client);
        assert!(client.check_response_auth(&response).is_err());
    }

    #[test]
    fn test_response_without_extensions_rejected() {
        let mut client = test_client(8);
        assert!(client.check_response_auth(&server_header()).is_err());
    }

    #[test]
    fn test_response_unique_id_mismatch_rejected() {
        let mut client = test_client(8);
        let mut response = fake_response(&client, 1);
        // First unique identifier byte lives right after the field header.
        response[HEADER_LENGTH + 4] ^= 0xFF;
        assert!(client.check_response_auth(&response).is_err());
    }

    #[test]
    fn test_response_tampered_header_rejected() {
        let mut client = test_client(8);
        let mut response = fake_response(&client, 1);
        // Stratum byte is covered by the associated data.
        response[1] ^= 0x01;
        let before = client.cookie_count();
        assert!(client.check_response_auth(&response).is_err());
        // Cookies from an unauthenticated response are not absorbed.
        assert_eq!(client.cookie_count(), before);
    }

    #[test]
    fn test_response_wrong_key_rejected() {
        let mut client = test_client(8);
        let mut response = server_header();
        append_extension_field(&mut response, EF_UNIQUE_IDENTIFIER, &client.uniq_id);
        let wrong = SivCmac256::new(&[0x44; 32]).unwrap();
        let nonce = [0x99u8; SIV_NONCE_LENGTH];
        let ciphertext = wrong.encrypt(&nonce, &response, &[]).unwrap();
        let body = encode_authenticator(&nonce, &ciphertext);
        append_extension_field(&mut response, EF_NTS_AUTH_AND_EEF, &body);
        assert!(client.check_response_auth(&response).is_err());
    }
}
