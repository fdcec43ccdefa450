//! Fixed limits and the per-session negotiation policy.

use crate::*;
use feedback::CipherType;
use mech::{AuthPair, MechanismId, PrincipalName};
use tnnames::*;

/// Largest subnegotiation payload accepted or sent.
///
/// Kerberos v5 AP-REQ messages with PAC data are the largest tokens seen,
/// usually well under this.
pub const MAX_SUBNEG: usize = 2048;

/// User and principal names
pub const MAX_NAME: usize = 64;

/// Reject reasons are truncated to this length before being echoed
pub const MAX_REASON: usize = 64;

pub const MAX_KEYID: usize = 16;

/// Entries in an authentication `SEND` list
pub const MAX_PAIRS: usize = 8;

/// Entries in an encryption `SUPPORT` list
pub const MAX_CIPHERS: usize = 4;

/// Entries accepted from a peer's `SUPPORT` list, known or not
pub const MAX_SUPPORT: usize = 16;

/// Undelivered events. The oldest is dropped once full.
pub const MAX_EVENTS: usize = 16;

/// Wrong SRA passwords allowed before the server rejects outright
pub const MAX_SRA_ATTEMPTS: usize = 3;

/// SRA and encrypted password plaintext, before DES padding and hex encoding
pub const MAX_PASSWORD: usize = 128;

const DEFAULT_AUTH_PAIRS: &[(MechanismId, u8)] = &[
    (MechanismId::Kerberos5, AUTH_WHO_CLIENT | AUTH_HOW_MUTUAL | INI_CRED_FWD_ON),
    (MechanismId::Kerberos5, AUTH_WHO_CLIENT | AUTH_HOW_MUTUAL),
    (MechanismId::Kerberos5, AUTH_WHO_CLIENT | AUTH_HOW_ONE_WAY),
    (MechanismId::Kerberos4, AUTH_WHO_CLIENT | AUTH_HOW_MUTUAL),
    (MechanismId::Kerberos4, AUTH_WHO_CLIENT | AUTH_HOW_ONE_WAY),
    (MechanismId::Sra, AUTH_WHO_CLIENT | AUTH_HOW_ONE_WAY),
    (MechanismId::EncPwd, AUTH_WHO_CLIENT | AUTH_HOW_MUTUAL),
];

/// Negotiation policy for one [`Session`].
///
/// The server advertises `auth_pairs` in order, the client accepts the
/// first pair from the server's list that also appears in its own `auth_pairs`.
#[derive(Debug, Clone)]
pub struct Policy {
    pub auth_pairs: heapless::Vec<AuthPair, MAX_PAIRS>,
    /// Cipher types we can use in either direction, in preference order
    pub ciphers: heapless::Vec<CipherType, MAX_CIPHERS>,
    /// Client tries the next acceptable mechanism after a rejection
    pub fallback: bool,
    /// Client forwards Kerberos v5 credentials when the server offers it
    pub forward_credentials: bool,
    /// Client sends `NAME` with this user before authenticating
    pub remote_user: Option<PrincipalName>,
    /// Start encrypting output as soon as a type and session key exist
    pub auto_encrypt: bool,
}

impl Default for Policy {
    fn default() -> Self {
        let mut auth_pairs = heapless::Vec::new();
        for (mech, modifier) in DEFAULT_AUTH_PAIRS {
            // OK unwrap: static array is < MAX_PAIRS
            auth_pairs.push(AuthPair::new(*mech, *modifier)).unwrap();
        }
        let mut ciphers = heapless::Vec::new();
        // OK unwrap: less than MAX_CIPHERS
        ciphers.push(CipherType::DesCfb64).unwrap();
        ciphers.push(CipherType::DesOfb64).unwrap();
        Policy {
            auth_pairs,
            ciphers,
            fallback: true,
            forward_credentials: false,
            remote_user: None,
            auto_encrypt: true,
        }
    }
}

impl Policy {
    /// Replaces the authentication pairs
    pub fn with_auth_pairs(mut self, pairs: &[AuthPair]) -> Result<Self> {
        self.auth_pairs = heapless::Vec::from_slice(pairs).map_err(|_| Error::NoRoom)?;
        Ok(self)
    }

    /// Replaces the cipher list
    pub fn with_ciphers(mut self, ciphers: &[CipherType]) -> Result<Self> {
        self.ciphers = heapless::Vec::from_slice(ciphers).map_err(|_| Error::NoRoom)?;
        Ok(self)
    }

    pub(crate) fn allows_pair(&self, pair: &AuthPair) -> bool {
        self.auth_pairs.contains(pair)
    }
}
