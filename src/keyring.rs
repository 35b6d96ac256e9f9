// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Rotating server master keys and NTS cookie seal/open.
//!
//! The server encodes each client's session keys into an opaque cookie so it
//! keeps no per-client state (RFC 8915 Section 6). Cookies are sealed with a
//! master key drawn from a fixed ring of four slots; the low two bits of a
//! key identifier select the slot, the high bits are random so a recycled
//! slot invalidates old cookies.
//!
//! # Cookie format
//!
//! ```text
//! [key_id: 4 bytes BE][nonce: 16 bytes][ciphertext: 80 bytes]
//! ```
//!
//! The ciphertext seals `C2S || S2C` (64 bytes) with empty associated data,
//! leaving a 16-byte SIV tag.

use std::time::Duration;

use log::debug;

use crate::aead::{SivCmac256, SIV_KEY_LENGTH, SIV_NONCE_LENGTH, SIV_TAG_LENGTH};
use crate::error::CookieError;
use crate::ke_proto::SESSION_KEY_LENGTH;

/// Number of key-identifier bits used as a ring index.
pub const KEY_ID_INDEX_BITS: u32 = 2;

/// Number of slots in the key ring.
pub const MAX_SERVER_KEYS: usize = 1 << KEY_ID_INDEX_BITS;

/// Interval between master key rotations.
pub const KEY_ROTATION_INTERVAL: Duration = Duration::from_secs(3600);

/// Nonce length within a cookie.
const COOKIE_NONCE_LENGTH: usize = SIV_NONCE_LENGTH;

/// Sealed ciphertext length: both session keys plus the SIV tag.
const COOKIE_CIPHERTEXT_LENGTH: usize = 2 * SESSION_KEY_LENGTH + SIV_TAG_LENGTH;

/// Canonical length of a cookie issued by this server.
pub const COOKIE_LENGTH: usize = 4 + COOKIE_NONCE_LENGTH + COOKIE_CIPHERTEXT_LENGTH;

struct ServerKey {
    id: u32,
    siv: SivCmac256,
}

impl ServerKey {
    fn generate(slot: usize) -> ServerKey {
        let mut key = [0u8; SIV_KEY_LENGTH];
        rand::fill(&mut key);

        let mut id: u32 = rand::random();
        id &= u32::MAX << KEY_ID_INDEX_BITS;
        id |= slot as u32;

        debug!("generated server key {:#010x}", id);

        ServerKey {
            id,
            siv: SivCmac256::from_key(&key),
        }
    }
}

/// Fixed ring of server master keys with one active slot.
///
/// All four slots are seeded with random keys at construction so a forged
/// key identifier can never select an unkeyed context. [`rotate`] advances
/// the active slot and regenerates it; after four rotations every cookie
/// sealed before the first of them fails to open.
///
/// The ring is process-wide state: wrap it in `Arc<RwLock<ServerKeyRing>>`
/// to share it between the NTS-KE listener and the NTP packet path, with
/// the rotation timer as the only writer.
///
/// [`rotate`]: ServerKeyRing::rotate
pub struct ServerKeyRing {
    keys: [ServerKey; MAX_SERVER_KEYS],
    current: usize,
}

impl ServerKeyRing {
    /// Create a ring with freshly generated keys in every slot.
    pub fn new() -> Self {
        ServerKeyRing {
            keys: std::array::from_fn(ServerKey::generate),
            current: 0,
        }
    }

    /// Rotate to the next slot, installing a fresh key there.
    pub fn rotate(&mut self) {
        self.current = (self.current + 1) % MAX_SERVER_KEYS;
        self.keys[self.current] = ServerKey::generate(self.current);
    }

    /// Identifier of the key currently used for sealing.
    pub fn current_key_id(&self) -> u32 {
        self.keys[self.current].id
    }

    /// Seal a `(C2S, S2C)` key pair into an opaque cookie under the current
    /// master key.
    pub fn seal_cookie(
        &self,
        c2s: &[u8; SESSION_KEY_LENGTH],
        s2c: &[u8; SESSION_KEY_LENGTH],
    ) -> Result<Vec<u8>, CookieError> {
        let key = &self.keys[self.current];

        let mut nonce = [0u8; COOKIE_NONCE_LENGTH];
        rand::fill(&mut nonce);

        let mut plaintext = [0u8; 2 * SESSION_KEY_LENGTH];
        plaintext[..SESSION_KEY_LENGTH].copy_from_slice(c2s);
        plaintext[SESSION_KEY_LENGTH..].copy_from_slice(s2c);

        let ciphertext = key
            .siv
            .encrypt(&nonce, &[], &plaintext)
            .map_err(|_| CookieError::VerifyFailed)?;
        debug_assert_eq!(ciphertext.len(), COOKIE_CIPHERTEXT_LENGTH);

        let mut cookie = Vec::with_capacity(COOKIE_LENGTH);
        cookie.extend_from_slice(&key.id.to_be_bytes());
        cookie.extend_from_slice(&nonce);
        cookie.extend_from_slice(&ciphertext);
        Ok(cookie)
    }

    /// Open a cookie, recovering the `(C2S, S2C)` key pair.
    ///
    /// Fails when the length is not canonical, the key identifier does not
    /// match any ring slot, or the SIV tag does not verify.
    pub fn open_cookie(
        &self,
        cookie: &[u8],
    ) -> Result<([u8; SESSION_KEY_LENGTH], [u8; SESSION_KEY_LENGTH]), CookieError> {
        if cookie.len() != COOKIE_LENGTH {
            return Err(CookieError::BadLength {
                length: cookie.len(),
            });
        }

        let key_id = u32::from_be_bytes([cookie[0], cookie[1], cookie[2], cookie[3]]);
        let nonce = &cookie[4..4 + COOKIE_NONCE_LENGTH];
        let ciphertext = &cookie[4 + COOKIE_NONCE_LENGTH..];

        let key = &self.keys[(key_id as usize) % MAX_SERVER_KEYS];
        if key.id != key_id {
            debug!("unknown cookie key {:#010x}", key_id);
            return Err(CookieError::UnknownKey { key_id });
        }

        let plaintext = key
            .siv
            .decrypt(nonce, &[], ciphertext)
            .map_err(|_| CookieError::VerifyFailed)?;
        debug_assert_eq!(plaintext.len(), 2 * SESSION_KEY_LENGTH);

        let mut c2s = [0u8; SESSION_KEY_LENGTH];
        let mut s2c = [0u8; SESSION_KEY_LENGTH];
        c2s.copy_from_slice(&plaintext[..SESSION_KEY_LENGTH]);
        s2c.copy_from_slice(&plaintext[SESSION_KEY_LENGTH..]);
        Ok((c2s, s2c))
    }
}

impl Default for ServerKeyRing {
    fn default() -> Self {
        ServerKeyRing::new()
    }
}
