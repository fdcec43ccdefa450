#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use core::fmt::Arguments;
use core::str::Utf8Error;

use snafu::prelude::*;

use crate::behaviour::CredError;

/// The tnsec error type.
///
/// Wire level problems (framing, mechanism tokens, negotiation order) are
/// recovered inside [`Session`](crate::Session) and reported as
/// [`Event`](crate::Event)s. They only escape as an `Error` from lower level
/// APIs such as [`decode_subnegotiation`](crate::frame::decode_subnegotiation).
#[non_exhaustive]
#[derive(Snafu, Debug)]
#[snafu(context(suffix(false)))]
#[snafu(visibility(pub))]
pub enum Error {
    /// Output buffer ran out of room
    NoRoom,

    /// Input buffer ran out
    RanOut,

    /// Not a UTF-8 string
    BadString,

    /// Malformed IAC escaping or subnegotiation framing
    BadFraming,

    #[snafu(display("Unknown {kind} command {number}"))]
    UnknownCommand { kind: &'static str, number: u8 },

    /// A mechanism token had the wrong shape or arrived at the wrong step
    #[snafu(display("Bad token: {msg}"))]
    BadToken { msg: &'static str },

    #[snafu(display("Unsupported authentication type {id}"))]
    UnsupportedMechanism { id: u8 },

    /// No ticket, key or password is available
    CredentialUnavailable,

    /// Credentials were refused by the provider
    #[snafu(display("{reason}"))]
    CredentialRefused { reason: &'static str },

    #[snafu(display("Unsupported cipher type {id}"))]
    UnsupportedCipher { id: u8 },

    /// Peer sent a message out of order, or something it never advertised.
    #[snafu(display("Negotiation error: {msg}"))]
    NegotiationProtocol { msg: &'static str },

    #[snafu(display("{msg}"))]
    Custom { msg: &'static str },

    // This state should not be reached, previous logic should have prevented it.
    // Create this using [`Error::bug()`] or [`.trap()`](TrapBug::trap).
    /// Program bug
    Bug,
}

impl Error {
    pub fn msg(m: &'static str) -> Error {
        Error::Custom { msg: m }
    }

    #[cold]
    #[track_caller]
    /// Panics in debug builds, returns [`Error::Bug`] in release.
    pub fn bug() -> Error {
        // Easier to track the source of errors in development,
        // but release builds shouldn't panic.
        if cfg!(debug_assertions) {
            panic!("Hit a bug");
        } else {
            Error::Bug
        }
    }

    /// Like [`bug()`](Error::bug) but with a message
    ///
    /// The message can be used instead of a code comment, is logged at `debug` level.
    #[cold]
    pub fn bug_fmt(args: Arguments) -> Error {
        if cfg!(debug_assertions) {
            panic!("Hit a bug: {args}");
        } else {
            debug!("Hit a bug: {args}");
            Error::Bug
        }
    }

    #[cold]
    pub fn bug_msg<T>(msg: &str) -> Result<T, Error> {
        Err(Self::bug_fmt(format_args!("{}", msg)))
    }

    /// Whether the error came from the wire (and so is recovered locally)
    /// rather than from local misuse.
    pub fn is_wire(&self) -> bool {
        !matches!(self, Error::Bug | Error::Custom { .. })
    }
}

/// A tnsec-specific Result type.
pub type Result<T, E = Error> = core::result::Result<T, E>;

pub trait TrapBug<T> {
    /// `.trap()` should be used like `.unwrap()`, in situations
    /// never expected to fail. Instead it calls [`Error::bug()`].
    /// (or debug builds may panic)
    fn trap(self) -> Result<T, Error>;

    /// Like `trap()` but with a message, calls [`Error::bug_msg()`]
    /// The message can be used instead of a comment.
    fn trap_msg(self, args: Arguments) -> Result<T, Error>;
}

impl<T, E> TrapBug<T> for Result<T, E> {
    fn trap(self) -> Result<T, Error> {
        // call directly so that Location::caller() works
        if let Ok(i) = self {
            Ok(i)
        } else {
            Err(Error::bug())
        }
    }
    fn trap_msg(self, args: Arguments) -> Result<T, Error> {
        if let Ok(i) = self {
            Ok(i)
        } else {
            Err(Error::bug_fmt(args))
        }
    }
}

impl<T> TrapBug<T> for Option<T> {
    #[track_caller]
    fn trap(self) -> Result<T, Error> {
        if let Some(i) = self {
            Ok(i)
        } else {
            Err(Error::bug())
        }
    }
    fn trap_msg(self, args: Arguments) -> Result<T, Error> {
        if let Some(i) = self {
            Ok(i)
        } else {
            Err(Error::bug_fmt(args))
        }
    }
}

impl From<Utf8Error> for Error {
    fn from(_e: Utf8Error) -> Error {
        Error::BadString
    }
}

impl From<CredError> for Error {
    fn from(e: CredError) -> Error {
        match e {
            CredError::Unavailable => Error::CredentialUnavailable,
            CredError::Refused { reason } => Error::CredentialRefused { reason },
        }
    }
}
