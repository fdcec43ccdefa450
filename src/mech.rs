//! The common mechanism abstraction.
//!
//! Each mechanism implements [`Exchange`]. [`Mechanism`] is the closed set
//! selected by the negotiated authentication type.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use alloc::vec::Vec;
use core::fmt;
use core::fmt::Write;

use crate::*;
use behaviour::CredentialProvider;
use block::SessionKey;
use config::{MAX_NAME, MAX_REASON};
use encpwd::EncPwd;
use krb::Krb;
use sra::Sra;
use tnnames::*;

/// Which end of the authentication exchange we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The TELNET client. Proves its identity and sends `IS`.
    Initiator,
    /// The TELNET server. Sends `SEND` and validates.
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MechanismId {
    Null,
    Kerberos4,
    Kerberos5,
    Sra,
    EncPwd,
    Unknown(u8),
}

impl MechanismId {
    pub fn from_wire(id: u8) -> Self {
        match id {
            AUTHTYPE_NULL => Self::Null,
            AUTHTYPE_KERBEROS_V4 => Self::Kerberos4,
            AUTHTYPE_KERBEROS_V5 => Self::Kerberos5,
            AUTHTYPE_SRA => Self::Sra,
            AUTHTYPE_RSA_ENCPWD => Self::EncPwd,
            u => Self::Unknown(u),
        }
    }

    pub fn wire(&self) -> u8 {
        match self {
            Self::Null => AUTHTYPE_NULL,
            Self::Kerberos4 => AUTHTYPE_KERBEROS_V4,
            Self::Kerberos5 => AUTHTYPE_KERBEROS_V5,
            Self::Sra => AUTHTYPE_SRA,
            Self::EncPwd => AUTHTYPE_RSA_ENCPWD,
            Self::Unknown(u) => *u,
        }
    }
}

impl fmt::Display for MechanismId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Kerberos4 => f.write_str("KERBEROS_V4"),
            Self::Kerberos5 => f.write_str("KERBEROS_V5"),
            Self::Sra => f.write_str("SRA"),
            Self::EncPwd => f.write_str("ENCPWD"),
            Self::Unknown(u) => write!(f, "unknown({u})"),
        }
    }
}

/// Authentication type modifier bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modifier(pub u8);

impl Modifier {
    pub fn is_mutual(&self) -> bool {
        self.0 & AUTH_HOW_MASK == AUTH_HOW_MUTUAL
    }

    pub fn server_to_client(&self) -> bool {
        self.0 & AUTH_WHO_MASK == AUTH_WHO_SERVER
    }

    pub fn cred_forward(&self) -> bool {
        self.0 & INI_CRED_FWD_MASK == INI_CRED_FWD_ON
    }
}

/// An authentication type and its modifier, as listed in `SEND`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPair {
    pub mech: MechanismId,
    pub modifier: Modifier,
}

impl AuthPair {
    pub fn new(mech: MechanismId, modifier: u8) -> Self {
        Self { mech, modifier: Modifier(modifier) }
    }

    pub fn null() -> Self {
        Self::new(MechanismId::Null, 0)
    }
}

impl fmt::Display for AuthPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let how = if self.modifier.is_mutual() { "mutual" } else { "one-way" };
        write!(f, "{} {how}", self.mech)?;
        if self.modifier.cred_forward() {
            f.write_str(" fwd")?;
        }
        Ok(())
    }
}

pub type PrincipalName = heapless::String<MAX_NAME>;

/// A principal or user name from the wire.
pub(crate) fn name_from_bytes(b: &[u8]) -> Result<PrincipalName> {
    let s = core::str::from_utf8(b)?;
    s.try_into().map_err(|_| Error::BadToken { msg: "name too long" })
}

/// A rejection reason, truncated to [`MAX_REASON`] bytes.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Reason(heapless::String<MAX_REASON>);

impl Reason {
    pub fn new(s: &str) -> Self {
        let mut r = Self::default();
        let _ = r.write_str(s);
        r
    }

    /// Formats `d`, dropping whatever doesn't fit
    pub fn from_display(d: &dyn fmt::Display) -> Self {
        let mut r = Self::default();
        let _ = write!(r, "{d}");
        r
    }

    /// A reason received from the peer. Invalid UTF-8 is cut off.
    pub fn from_wire(b: &[u8]) -> Self {
        let s = match core::str::from_utf8(b) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&b[..e.valid_up_to()]).unwrap_or_default(),
        };
        Self::new(s)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Write for Reason {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            // truncate silently
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

/// A mechanism step and its data, the payload after the authentication pair
#[derive(Debug, Clone, Copy)]
pub(crate) struct Token<'a> {
    pub step: u8,
    pub data: &'a [u8],
}

/// A token to send to the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutToken {
    pub step: u8,
    pub data: Vec<u8>,
}

impl OutToken {
    pub fn new(step: u8, data: &[u8]) -> Self {
        Self { step, data: data.to_vec() }
    }
}

#[derive(Debug)]
pub(crate) enum MechanismResult {
    /// The exchange succeeded
    Accept { principal: PrincipalName, key: SessionKey },
    /// The exchange failed
    Reject { reason: Reason },
    /// Waiting for the peer to send `expect`
    NeedMore { expect: u8 },
    /// Credential forwarding finished, after an earlier `Accept`
    Forwarded { accepted: bool },
}

impl MechanismResult {
    pub fn reject(reason: &str) -> Self {
        Self::Reject { reason: Reason::new(reason) }
    }
}

/// State shared with a mechanism for one call
pub(crate) struct MechCtx<'a> {
    pub creds: &'a mut dyn CredentialProvider,
    /// Name from `NAME` (responder) or policy (initiator)
    pub remote_user: Option<&'a str>,
    /// Initiator policy allows forwarding credentials
    pub forward: bool,
    /// Tokens to send, in order
    pub out: &'a mut Vec<OutToken>,
}

impl MechCtx<'_> {
    pub fn send(&mut self, step: u8, data: &[u8]) {
        self.out.push(OutToken::new(step, data))
    }
}

/// One authentication mechanism's token exchange
pub(crate) trait Exchange {
    /// Initiator's first token(s)
    fn offer(&mut self, ctx: &mut MechCtx) -> Result<MechanismResult>;

    /// Responder handling of an `IS` token
    fn accept(&mut self, tok: Token, ctx: &mut MechCtx) -> Result<MechanismResult>;

    /// Initiator handling of a `REPLY` token, including checking the
    /// responder's mutual proof
    fn finish_mutual(&mut self, tok: Token, ctx: &mut MechCtx) -> Result<MechanismResult>;

    /// The mechanism's REJECT step, carrying a reason string
    fn reject_step(&self) -> u8;
}

/// One negotiation attempt. Discarded once the session has the key.
pub(crate) enum Mechanism {
    Kerberos(Krb),
    Sra(Sra),
    EncPwd(EncPwd),
}

impl Mechanism {
    /// Fails with [`Error::UnsupportedMechanism`] for `NULL` and unknown types
    pub fn new(pair: &AuthPair, role: Role) -> Result<Self> {
        let m = match pair.mech {
            MechanismId::Kerberos4 | MechanismId::Kerberos5 => {
                Self::Kerberos(Krb::new(pair.mech, pair.modifier, role))
            }
            MechanismId::Sra => Self::Sra(Sra::new(role)),
            MechanismId::EncPwd => Self::EncPwd(EncPwd::new(pair.modifier, role)),
            other => return error::UnsupportedMechanism { id: other.wire() }.fail(),
        };
        Ok(m)
    }

    fn ex(&mut self) -> &mut dyn Exchange {
        match self {
            Self::Kerberos(k) => k,
            Self::Sra(s) => s,
            Self::EncPwd(e) => e,
        }
    }

    pub fn offer(&mut self, ctx: &mut MechCtx) -> MechanismResult {
        let r = self.ex().offer(ctx);
        Self::local(r)
    }

    /// Failures are reported to the initiator with the mechanism's REJECT
    pub fn accept(&mut self, tok: Token, ctx: &mut MechCtx) -> MechanismResult {
        let ex = self.ex();
        match ex.accept(tok, ctx) {
            Ok(r) => r,
            Err(e) => {
                let reason = Reason::from_display(&e);
                debug!("Rejecting: {reason}");
                ctx.send(ex.reject_step(), reason.as_str().as_bytes());
                MechanismResult::Reject { reason }
            }
        }
    }

    pub fn finish_mutual(&mut self, tok: Token, ctx: &mut MechCtx) -> MechanismResult {
        let r = self.ex().finish_mutual(tok, ctx);
        Self::local(r)
    }

    pub fn reject_step(&mut self) -> u8 {
        self.ex().reject_step()
    }

    fn local(r: Result<MechanismResult>) -> MechanismResult {
        r.unwrap_or_else(|e| {
            debug!("Mechanism failed: {e}");
            MechanismResult::Reject { reason: Reason::from_display(&e) }
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::mech::*;
    use crate::tnlog::init_test_log;

    #[test]
    fn reason_truncates() {
        init_test_log();
        let long = "x".repeat(MAX_REASON * 2);
        let r = Reason::new(&long);
        assert_eq!(r.as_str().len(), MAX_REASON);

        // multi-byte chars are never split
        let r = Reason::new(&"é".repeat(MAX_REASON));
        assert!(r.as_str().len() <= MAX_REASON);
        assert!(r.as_str().chars().all(|c| c == 'é'));

        let r = Reason::from_wire(b"bad \xff password");
        assert_eq!(r.as_str(), "bad ");
    }

    #[test]
    fn modifiers() {
        let p = AuthPair::new(MechanismId::Kerberos5, AUTH_HOW_MUTUAL | INI_CRED_FWD_ON);
        assert!(p.modifier.is_mutual());
        assert!(p.modifier.cred_forward());
        assert!(!p.modifier.server_to_client());
        assert_eq!(alloc::format!("{p}"), "KERBEROS_V5 mutual fwd");
        assert_eq!(MechanismId::from_wire(2), MechanismId::Kerberos5);
        assert_eq!(MechanismId::from_wire(99).wire(), 99);
    }

    #[test]
    fn null_is_not_a_mechanism() {
        assert!(matches!(
            Mechanism::new(&AuthPair::null(), Role::Initiator),
            Err(Error::UnsupportedMechanism { id: 0 })
        ));
    }

    #[test]
    fn names() {
        assert_eq!(name_from_bytes(b"alice").unwrap(), "alice");
        assert!(name_from_bytes(&[b'a'; MAX_NAME + 1]).is_err());
        assert!(name_from_bytes(b"\xc3").is_err());
    }
}
