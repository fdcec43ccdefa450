//! AUTHENTICATION and ENCRYPT option messages.
//!
//! A [`AuthMessage`] or [`EncryptMessage`] is parsed from, or encoded to,
//! the payload of a subnegotiation with the `IAC SB option` and `IAC SE`
//! framing already removed (see [`frame`](crate::frame)).
//!
//! Formats are described in [RFC2941](https://tools.ietf.org/html/rfc2941)
//! and [RFC2946](https://tools.ietf.org/html/rfc2946).

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use alloc::vec::Vec;
use core::fmt;

use pretty_hex::PrettyHex;

use crate::*;
use config::{MAX_KEYID, MAX_PAIRS, MAX_SUBNEG, MAX_SUPPORT};
use mech::{AuthPair, MechanismId, Modifier};
use tnnames::*;

/// Reads a payload front to back
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn u8(&mut self) -> Result<u8> {
        let (b, rest) = self.buf.split_first().ok_or(Error::RanOut)?;
        self.buf = rest;
        Ok(*b)
    }

    fn rest(&mut self) -> &'a [u8] {
        core::mem::take(&mut self.buf)
    }

    fn pair(&mut self) -> Result<AuthPair> {
        let mech = MechanismId::from_wire(self.u8()?);
        let modifier = Modifier(self.u8()?);
        Ok(AuthPair { mech, modifier })
    }

    fn keyid(&mut self) -> Result<&'a [u8]> {
        let k = self.rest();
        if k.len() > MAX_KEYID {
            return error::NoRoom.fail();
        }
        Ok(k)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum AuthMessage<'a> {
    /// Responder's acceptable pairs, in preference order
    Send(heapless::Vec<AuthPair, MAX_PAIRS>),
    /// Initiator's token. `step` is 0 for the `NULL` type, which carries none.
    Is { pair: AuthPair, step: u8, data: &'a [u8] },
    /// Responder's token
    Reply { pair: AuthPair, step: u8, data: &'a [u8] },
    /// Remote user name
    Name(&'a str),
}

impl<'a> AuthMessage<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        let cmd = r.u8()?;
        let m = match cmd {
            AUTH_SEND => {
                let mut pairs = heapless::Vec::new();
                while !r.buf.is_empty() {
                    let p = r.pair()?;
                    pairs.push(p).map_err(|_| Error::NoRoom)?;
                }
                Self::Send(pairs)
            }
            AUTH_IS | AUTH_REPLY => {
                let pair = r.pair()?;
                let step = if pair.mech == MechanismId::Null && r.buf.is_empty() {
                    0
                } else {
                    r.u8()?
                };
                let data = r.rest();
                if cmd == AUTH_IS {
                    Self::Is { pair, step, data }
                } else {
                    Self::Reply { pair, step, data }
                }
            }
            AUTH_NAME => Self::Name(core::str::from_utf8(r.rest())?),
            number => return error::UnknownCommand { kind: "authentication", number }.fail(),
        };
        Ok(m)
    }

    /// Appends the payload to `out`
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::Send(pairs) => {
                out.push(AUTH_SEND);
                for p in pairs {
                    out.extend_from_slice(&[p.mech.wire(), p.modifier.0]);
                }
            }
            Self::Is { pair, step, data } | Self::Reply { pair, step, data } => {
                let cmd = if matches!(self, Self::Is { .. }) { AUTH_IS } else { AUTH_REPLY };
                out.extend_from_slice(&[cmd, pair.mech.wire(), pair.modifier.0]);
                if pair.mech != MechanismId::Null || *step != 0 || !data.is_empty() {
                    out.push(*step);
                }
                out.extend_from_slice(data);
            }
            Self::Name(n) => {
                out.push(AUTH_NAME);
                out.extend_from_slice(n.as_bytes());
            }
        }
        if out.len() > MAX_SUBNEG {
            return error::NoRoom.fail();
        }
        Ok(())
    }
}

impl fmt::Debug for AuthMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send(pairs) => f.debug_tuple("Send").field(pairs).finish(),
            Self::Is { pair, step, data } => {
                write!(f, "Is {{ {pair}, step {step}, {} bytes }}", data.len())
            }
            Self::Reply { pair, step, data } => {
                write!(f, "Reply {{ {pair}, step {step}, {} bytes }}", data.len())
            }
            Self::Name(n) => f.debug_tuple("Name").field(n).finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptMessage<'a> {
    /// Encrypting side's chosen type and its option data
    Is { kind: u8, data: &'a [u8] },
    /// Types the sender can encrypt with
    Support(heapless::Vec<u8, MAX_SUPPORT>),
    /// Decrypting side's answer to `Is`
    Reply { kind: u8, data: &'a [u8] },
    Start(&'a [u8]),
    End,
    RequestStart(&'a [u8]),
    RequestEnd,
    EncKeyId(&'a [u8]),
    DecKeyId(&'a [u8]),
}

impl<'a> EncryptMessage<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        let m = match r.u8()? {
            ENCRYPT_IS => Self::Is { kind: r.u8()?, data: r.rest() },
            ENCRYPT_SUPPORT => {
                let s = heapless::Vec::from_slice(r.rest()).map_err(|_| Error::NoRoom)?;
                Self::Support(s)
            }
            ENCRYPT_REPLY => Self::Reply { kind: r.u8()?, data: r.rest() },
            ENCRYPT_START => Self::Start(r.keyid()?),
            ENCRYPT_END => Self::End,
            ENCRYPT_REQUEST_START => Self::RequestStart(r.keyid()?),
            ENCRYPT_REQUEST_END => Self::RequestEnd,
            ENCRYPT_ENC_KEYID => Self::EncKeyId(r.keyid()?),
            ENCRYPT_DEC_KEYID => Self::DecKeyId(r.keyid()?),
            number => return error::UnknownCommand { kind: "encryption", number }.fail(),
        };
        Ok(m)
    }

    /// Appends the payload to `out`
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::Is { kind, data } => {
                out.extend_from_slice(&[ENCRYPT_IS, *kind]);
                out.extend_from_slice(data);
            }
            Self::Support(types) => {
                out.push(ENCRYPT_SUPPORT);
                out.extend_from_slice(types);
            }
            Self::Reply { kind, data } => {
                out.extend_from_slice(&[ENCRYPT_REPLY, *kind]);
                out.extend_from_slice(data);
            }
            Self::Start(k) => Self::with_keyid(out, ENCRYPT_START, k)?,
            Self::End => out.push(ENCRYPT_END),
            Self::RequestStart(k) => Self::with_keyid(out, ENCRYPT_REQUEST_START, k)?,
            Self::RequestEnd => out.push(ENCRYPT_REQUEST_END),
            Self::EncKeyId(k) => Self::with_keyid(out, ENCRYPT_ENC_KEYID, k)?,
            Self::DecKeyId(k) => Self::with_keyid(out, ENCRYPT_DEC_KEYID, k)?,
        }
        Ok(())
    }

    fn with_keyid(out: &mut Vec<u8>, cmd: u8, keyid: &[u8]) -> Result<()> {
        if keyid.len() > MAX_KEYID {
            return error::NoRoom.fail();
        }
        out.push(cmd);
        out.extend_from_slice(keyid);
        Ok(())
    }
}

/// Logs a payload hex dump at trace level
pub(crate) fn trace_payload(what: &str, payload: &[u8]) {
    trace!("{what}\n{:?}", payload.hex_dump());
}
