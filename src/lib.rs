//! TELNET AUTHENTICATION and ENCRYPT option negotiation.
//!
//! A [`Session`] sits between a TELNET transport and the terminal layer.
//! It negotiates an authentication mechanism (Kerberos v4/v5, SRA or an
//! encrypted password exchange), takes the resulting session key, and
//! drives DES CFB64/OFB64 stream encryption independently for each direction.
//!
//! The crate does no IO. Credentials come from a [`CredentialProvider`]
//! supplied by the application.

// Tests use std as it's easier
#![cfg_attr(not(any(feature = "std", test)), no_std)]

#![forbid(unsafe_code)]

// avoids headscratching
#![deny(unused_must_use)]

extern crate alloc;

pub mod tnnames;
pub mod config;
// exported so that error variants can be created with .fail().
pub mod error;
pub mod random;
pub mod frame;
pub mod packets;
pub mod block;
pub mod feedback;
pub mod behaviour;
pub mod event;

mod tnlog;
mod mech;
mod krb;
mod sra;
mod encpwd;
mod auth;
mod encrypt;
mod traffic;
mod session;
mod test;

// Application API
pub use error::{Error, Result};
pub use config::Policy;
pub use block::{Block, SessionKey};
pub use feedback::{CipherInstance, CipherType, Mode};
pub use behaviour::{
    CredError, CredResult, CredentialProvider, InitialToken, Login, Validated,
};
pub use mech::{AuthPair, MechanismId, Modifier, PrincipalName, Reason, Role};
pub use auth::AuthOutcome;
pub use encrypt::{Direction, Phase};
pub use event::Event;
pub use frame::{decode_subnegotiation, encode_subnegotiation, Decoded};
pub use session::Session;
