// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! AES-SIV-CMAC-256 AEAD adapter (RFC 5297).
//!
//! NTS uses AEAD_AES_SIV_CMAC_256 (IANA algorithm 15): a 256-bit key split
//! into two AES-128 halves, a 16-byte synthetic IV acting as the
//! authentication tag, and deterministic encryption bound to the nonce and
//! associated data.

use aes_siv::aead::{Aead, KeyInit, Payload};
use aes_siv::{Aes128SivAead, Nonce};

use crate::error::AeadError;

/// AES-SIV-CMAC-256 key length in bytes (two AES-128 keys).
pub const SIV_KEY_LENGTH: usize = 32;

/// Nonce length used throughout NTS.
pub const SIV_NONCE_LENGTH: usize = 16;

/// SIV authentication tag length; ciphertext is plaintext length plus this.
pub const SIV_TAG_LENGTH: usize = 16;

/// An AES-SIV-CMAC-256 context keyed for one direction of traffic.
pub struct SivCmac256 {
    cipher: Aes128SivAead,
}

impl SivCmac256 {
    /// Create a context from 32 bytes of key material.
    pub fn new(key: &[u8]) -> Result<Self, AeadError> {
        if key.len() != SIV_KEY_LENGTH {
            return Err(AeadError::KeyInit);
        }
        let cipher = Aes128SivAead::new_from_slice(key).map_err(|_| AeadError::KeyInit)?;
        Ok(SivCmac256 { cipher })
    }

    /// Create a context from a fixed-size key.
    pub fn from_key(key: &[u8; SIV_KEY_LENGTH]) -> Self {
        SivCmac256 {
            cipher: Aes128SivAead::new(key.into()),
        }
    }

    /// Encrypt `plaintext` bound to `associated_data`.
    ///
    /// The returned ciphertext is `plaintext.len() + SIV_TAG_LENGTH` bytes.
    pub fn encrypt(
        &self,
        nonce: &[u8],
        associated_data: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, AeadError> {
        if nonce.len() != SIV_NONCE_LENGTH {
            return Err(AeadError::BadNonce);
        }
        self.cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|_| AeadError::EncryptFailed)
    }

    /// Decrypt and verify `ciphertext` bound to `associated_data`.
    pub fn decrypt(
        &self,
        nonce: &[u8],
        associated_data: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, AeadError> {
        if nonce.len() != SIV_NONCE_LENGTH {
            return Err(AeadError::BadNonce);
        }
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: associated_data,
                },
            )
            .map_err(|_| AeadError::DecryptFailed)
    }
}

impl std::fmt::Debug for SivCmac256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SivCmac256").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> SivCmac256 {
        SivCmac256::new(&[0x42u8; SIV_KEY_LENGTH]).unwrap()
    }

    #[test]
    fn test_key_length_enforced() {
        assert!(SivCmac256::new(&[0u8; 16]).is_err());
        assert!(SivCmac256::new(&[0u8; 64]).is_err());
        assert!(SivCmac256::new(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_roundtrip() {
        let siv = context();
        let nonce = [0x11u8; SIV_NONCE_LENGTH];
        let ciphertext = siv.encrypt(&nonce, b"header bytes", b"secret").unwrap();
        assert_eq!(ciphertext.len(), 6 + SIV_TAG_LENGTH);
        let plaintext = siv.decrypt(&nonce, b"header bytes", &ciphertext).unwrap();
        assert_eq!(plaintext, b"secret");
    }

    #[test]
    fn test_empty_plaintext_is_pure_authenticator() {
        let siv = context();
        let nonce = [0x11u8; SIV_NONCE_LENGTH];
        let ciphertext = siv.encrypt(&nonce, b"associated data", &[]).unwrap();
        assert_eq!(ciphertext.len(), SIV_TAG_LENGTH);
        let plaintext = siv.decrypt(&nonce, b"associated data", &ciphertext).unwrap();
        assert!(plaintext.is_empty());
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let siv = context();
        let nonce = [0x11u8; SIV_NONCE_LENGTH];
        let mut ciphertext = siv.encrypt(&nonce, b"aad", b"secret").unwrap();
        ciphertext[0] ^= 0xFF;
        assert!(matches!(
            siv.decrypt(&nonce, b"aad", &ciphertext),
            Err(AeadError::DecryptFailed)
        ));
    }

    #[test]
    fn test_wrong_associated_data_rejected() {
        let siv = context();
        let nonce = [0x11u8; SIV_NONCE_LENGTH];
        let ciphertext = siv.encrypt(&nonce, b"correct aad", b"secret").unwrap();
        assert!(siv.decrypt(&nonce, b"wrong aad", &ciphertext).is_err());
    }

    #[test]
    fn test_wrong_nonce_length() {
        let siv = context();
        assert!(matches!(
            siv.encrypt(&[0u8; 12], b"", b""),
            Err(AeadError::BadNonce)
        ));
    }
}
