// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Custom error types for NTS key establishment and packet authentication.
//!
//! Public APIs return `io::Result<T>`. Internally, errors are constructed as
//! [`NtsError`] variants and converted via `From<NtsError> for io::Error`.
//! Users who want programmatic matching can downcast through
//! `io::Error::get_ref()`:
//!
//! ```no_run
//! use ntskit::error::NtsError;
//!
//! # fn example(result: std::io::Result<()>) {
//! if let Err(e) = result {
//!     if let Some(nts_err) = e.get_ref()
//!         .and_then(|inner| inner.downcast_ref::<NtsError>())
//!     {
//!         eprintln!("NTS error: {nts_err}");
//!     }
//! }
//! # }
//! ```

use std::fmt;
use std::io;

/// Errors that can occur in the NTS core.
#[derive(Debug)]
pub enum NtsError {
    /// NTS-KE record or message framing failure.
    Record(RecordError),
    /// NTP extension field parsing or serialization failure.
    Extension(ExtensionError),
    /// AEAD operation failure.
    Aead(AeadError),
    /// Server cookie seal/open failure.
    Cookie(CookieError),
    /// NTS-KE protocol failure (negotiation, TLS, state machine).
    Ke(KeError),
    /// NTS-NTP packet authentication failure.
    Auth(AuthError),
    /// Underlying I/O error.
    Io(io::Error),
}

/// NTS-KE record codec errors.
#[derive(Clone, Debug)]
pub enum RecordError {
    /// Record body exceeds the 16-bit length field.
    BodyTooLong {
        /// The offending body length.
        length: usize,
    },
    /// The message buffer cannot hold another record.
    MessageFull,
}

/// NTP extension field errors.
#[derive(Clone, Debug)]
pub enum ExtensionError {
    /// Declared field length below the 4-byte header minimum.
    FieldTooShort {
        /// The declared length.
        length: u16,
    },
    /// Field value extends beyond the packet.
    Truncated,
    /// Authenticator body violates the nonce/ciphertext length invariant.
    AuthenticatorMalformed,
}

/// AEAD adapter errors.
#[derive(Clone, Debug)]
pub enum AeadError {
    /// Key initialization failed (wrong key length).
    KeyInit,
    /// Nonce has the wrong length.
    BadNonce,
    /// Encryption failed.
    EncryptFailed,
    /// Decryption or tag verification failed.
    DecryptFailed,
}

/// Server cookie errors.
#[derive(Clone, Debug)]
pub enum CookieError {
    /// Cookie length differs from the canonical size.
    BadLength {
        /// The received length.
        length: usize,
    },
    /// No key in the ring matches the cookie's key identifier.
    UnknownKey {
        /// The unmatched key identifier.
        key_id: u32,
    },
    /// SIV tag verification failed.
    VerifyFailed,
}

/// NTS-KE protocol errors.
#[derive(Clone, Debug)]
pub enum KeError {
    /// Negotiated ALPN protocol is not `ntske/1`.
    AlpnMismatch,
    /// Peer sent a message that failed record-level validation.
    MalformedMessage,
    /// Server response is unacceptable.
    BadResponse {
        /// Description of what failed.
        detail: &'static str,
    },
    /// Server reported an error code in its response.
    ServerError {
        /// The NTS-KE error code.
        code: u16,
    },
    /// Server provided no cookies.
    NoCookies,
    /// TLS keying material export failed.
    KeyExportFailed {
        /// Detail about the failure.
        detail: String,
    },
    /// The connection state machine refused an event.
    UnexpectedState,
    /// Server key ring lock poisoned.
    KeyRingPoisoned,
}

/// NTS-NTP packet authentication errors.
#[derive(Clone, Debug)]
pub enum AuthError {
    /// Packet mode is not the expected one for this path.
    UnexpectedMode,
    /// Packet carries no extension fields.
    NoExtensionFields,
    /// A required NTS extension field is missing.
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },
    /// More than one cookie extension in a request.
    DuplicateCookie,
    /// Response unique identifier does not match the request.
    UniqueIdMismatch,
    /// No cookies remain in the client pool.
    NoCookiesAvailable,
    /// AEAD contexts are not initialized (key establishment not run).
    NotReady,
}

// ── Display implementations ─────────────────────────────────────────

impl fmt::Display for NtsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NtsError::Record(e) => write!(f, "NTS-KE record error: {e}"),
            NtsError::Extension(e) => write!(f, "NTP extension field error: {e}"),
            NtsError::Aead(e) => write!(f, "AEAD error: {e}"),
            NtsError::Cookie(e) => write!(f, "NTS cookie error: {e}"),
            NtsError::Ke(e) => write!(f, "NTS-KE error: {e}"),
            NtsError::Auth(e) => write!(f, "NTS authentication error: {e}"),
            NtsError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::BodyTooLong { length } => {
                write!(f, "record body too long ({length} bytes)")
            }
            RecordError::MessageFull => write!(f, "message buffer full"),
        }
    }
}

impl fmt::Display for ExtensionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionError::FieldTooShort { length } => {
                write!(f, "extension field length {length} below minimum")
            }
            ExtensionError::Truncated => {
                write!(f, "extension field extends beyond packet")
            }
            ExtensionError::AuthenticatorMalformed => {
                write!(f, "authenticator nonce/ciphertext lengths exceed field body")
            }
        }
    }
}

impl fmt::Display for AeadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AeadError::KeyInit => write!(f, "AEAD key initialization failed"),
            AeadError::BadNonce => write!(f, "AEAD nonce has wrong length"),
            AeadError::EncryptFailed => write!(f, "AEAD encryption failed"),
            AeadError::DecryptFailed => write!(f, "AEAD authentication failed"),
        }
    }
}

impl fmt::Display for CookieError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CookieError::BadLength { length } => {
                write!(f, "cookie has unexpected length {length}")
            }
            CookieError::UnknownKey { key_id } => {
                write!(f, "unknown cookie key {key_id:#010x}")
            }
            CookieError::VerifyFailed => write!(f, "cookie decryption failed"),
        }
    }
}

impl fmt::Display for KeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeError::AlpnMismatch => write!(f, "ALPN mismatch (expected ntske/1)"),
            KeError::MalformedMessage => write!(f, "malformed NTS-KE message"),
            KeError::BadResponse { detail } => write!(f, "bad NTS-KE response: {detail}"),
            KeError::ServerError { code } => write!(f, "NTS-KE server error code {code}"),
            KeError::NoCookies => write!(f, "NTS-KE server provided no cookies"),
            KeError::KeyExportFailed { detail } => {
                write!(f, "TLS key export failed: {detail}")
            }
            KeError::UnexpectedState => {
                write!(f, "NTS-KE connection in unexpected state")
            }
            KeError::KeyRingPoisoned => write!(f, "server key ring lock poisoned"),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::UnexpectedMode => write!(f, "unexpected NTP packet mode"),
            AuthError::NoExtensionFields => write!(f, "packet has no extension fields"),
            AuthError::MissingField { field } => {
                write!(f, "missing NTS extension field: {field}")
            }
            AuthError::DuplicateCookie => {
                write!(f, "more than one cookie extension in request")
            }
            AuthError::UniqueIdMismatch => write!(f, "unique identifier mismatch"),
            AuthError::NoCookiesAvailable => write!(f, "no NTS cookies available"),
            AuthError::NotReady => write!(f, "NTS session keys not established"),
        }
    }
}

// ── Error trait implementations ─────────────────────────────────────

impl std::error::Error for NtsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NtsError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for RecordError {}
impl std::error::Error for ExtensionError {}
impl std::error::Error for AeadError {}
impl std::error::Error for CookieError {}
impl std::error::Error for KeError {}
impl std::error::Error for AuthError {}

// ── From conversions ────────────────────────────────────────────────

impl From<NtsError> for io::Error {
    fn from(err: NtsError) -> io::Error {
        let kind = match &err {
            NtsError::Record(_) => io::ErrorKind::InvalidData,
            NtsError::Extension(_) => io::ErrorKind::InvalidData,
            NtsError::Aead(_) => io::ErrorKind::InvalidData,
            NtsError::Cookie(_) => io::ErrorKind::InvalidData,
            NtsError::Ke(KeError::KeyExportFailed { .. }) => io::ErrorKind::Other,
            NtsError::Ke(KeError::KeyRingPoisoned) => io::ErrorKind::Other,
            NtsError::Ke(KeError::ServerError { .. }) => io::ErrorKind::ConnectionRefused,
            NtsError::Ke(_) => io::ErrorKind::InvalidData,
            NtsError::Auth(_) => io::ErrorKind::InvalidData,
            NtsError::Io(e) => e.kind(),
        };
        if let NtsError::Io(e) = err {
            return e;
        }
        io::Error::new(kind, err)
    }
}

impl From<io::Error> for NtsError {
    fn from(err: io::Error) -> NtsError {
        NtsError::Io(err)
    }
}

impl From<RecordError> for NtsError {
    fn from(err: RecordError) -> NtsError {
        NtsError::Record(err)
    }
}

impl From<ExtensionError> for NtsError {
    fn from(err: ExtensionError) -> NtsError {
        NtsError::Extension(err)
    }
}

impl From<AeadError> for NtsError {
    fn from(err: AeadError) -> NtsError {
        NtsError::Aead(err)
    }
}

impl From<CookieError> for NtsError {
    fn from(err: CookieError) -> NtsError {
        NtsError::Cookie(err)
    }
}

impl From<KeError> for NtsError {
    fn from(err: KeError) -> NtsError {
        NtsError::Ke(err)
    }
}

impl From<AuthError> for NtsError {
    fn from(err: AuthError) -> NtsError {
        NtsError::Auth(err)
    }
}

// Convenience conversions so module code can use `?` straight into io::Result.

impl From<RecordError> for io::Error {
    fn from(err: RecordError) -> io::Error {
        NtsError::Record(err).into()
    }
}

impl From<ExtensionError> for io::Error {
    fn from(err: ExtensionError) -> io::Error {
        NtsError::Extension(err).into()
    }
}

impl From<AeadError> for io::Error {
    fn from(err: AeadError) -> io::Error {
        NtsError::Aead(err).into()
    }
}

impl From<CookieError> for io::Error {
    fn from(err: CookieError) -> io::Error {
        NtsError::Cookie(err).into()
    }
}

impl From<KeError> for io::Error {
    fn from(err: KeError) -> io::Error {
        NtsError::Ke(err).into()
    }
}

impl From<AuthError> for io::Error {
    fn from(err: AuthError) -> io::Error {
        NtsError::Auth(err).into()
    }
}

// ── Tests ───────────────────────────────────────────────────────────
