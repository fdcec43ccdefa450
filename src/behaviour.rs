//! Application supplied credentials.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use alloc::string::String;
use alloc::vec::Vec;

use snafu::prelude::*;
use zeroize::Zeroizing;

use crate::*;
use block::{Block, SessionKey};
use mech::{MechanismId, PrincipalName};

pub type CredResult<T> = core::result::Result<T, CredError>;

/// Failure from a [`CredentialProvider`]
///
/// Either is reported to the peer as a rejection, the connection continues.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
#[snafu(visibility(pub))]
pub enum CredError {
    /// No ticket, key or password is available
    Unavailable,
    /// The credential was checked and refused
    #[snafu(display("{reason}"))]
    Refused { reason: &'static str },
}

/// The initiator's first token for a mechanism, from a ticket cache or similar.
pub struct InitialToken {
    /// Opaque ticket (eg a Kerberos AP-REQ)
    pub token: Vec<u8>,
    /// Key shared with the responder once it decrypts `token`
    pub session_key: SessionKey,
    /// Nonce the responder proves knowledge of in mutual mode
    pub nonce: Block,
}

/// A token accepted by [`CredentialProvider::validate_token`]
pub struct Validated {
    pub principal: PrincipalName,
    pub session_key: SessionKey,
    /// The nonce carried in the token, used for the mutual proof
    pub nonce: Block,
}

/// A user name and password for the password based mechanisms
pub struct Login {
    pub user: PrincipalName,
    pub password: Zeroizing<String>,
}

/// Provides credentials for authentication mechanisms.
///
/// Calls are synchronous. An application that needs to prompt or fetch
/// a ticket may block here, no other part of the session does.
///
/// Initiators implement the `acquire_initial_token`, `login` and
/// `forward_credentials` methods, responders implement `validate_token`,
/// `check_password` and `accept_forwarded`. Defaults refuse.
pub trait CredentialProvider {
    /// Initiator: obtain a ticket for a Kerberos mechanism
    fn acquire_initial_token(&mut self, mech: MechanismId) -> CredResult<InitialToken> {
        let _ = mech;
        Err(CredError::Unavailable)
    }

    /// Responder: check a ticket from the initiator.
    ///
    /// `remote_user` is the name from an authentication `NAME` message, if any.
    fn validate_token(&mut self, mech: MechanismId, token: &[u8],
        remote_user: Option<&str>) -> CredResult<Validated> {
        let _ = (mech, token, remote_user);
        Err(CredError::Unavailable)
    }

    /// Compute the mutual authentication proof for `nonce`.
    ///
    /// Both sides call this, the initiator compares the result with the
    /// responder's. The default decrypts the nonce, increments it and
    /// encrypts it again under `key`.
    fn derive_mutual_proof(&mut self, key: &SessionKey, nonce: &Block) -> CredResult<Block> {
        Ok(krb::mutual_proof(key, nonce))
    }

    /// Initiator: user name and password for SRA or the encrypted password
    /// exchange. `retry` is set after the responder refused a previous password.
    fn login(&mut self, mech: MechanismId, retry: bool) -> CredResult<Login> {
        let _ = (mech, retry);
        Err(CredError::Unavailable)
    }

    /// Responder: check a password
    fn check_password(&mut self, user: &str, password: &str) -> bool {
        let _ = (user, password);
        false
    }

    /// Initiator: a forwardable credential blob, already encrypted under `key`
    fn forward_credentials(&mut self, key: &SessionKey) -> CredResult<Vec<u8>> {
        let _ = key;
        Err(CredError::Unavailable)
    }

    /// Responder: store forwarded credentials for `principal`.
    /// Returns whether they were accepted.
    fn accept_forwarded(&mut self, principal: &str, blob: &[u8]) -> bool {
        let _ = (principal, blob);
        false
    }
}

/// A provider with no credentials at all. Every mechanism rejects.
#[derive(Debug, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {}
