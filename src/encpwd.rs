//! Encrypted password exchange.
//!
//! The initiator sends `ACK`. In mutual mode the responder answers with a
//! `CHALLENGE` nonce, otherwise the nonce is all zero. The initiator then
//! sends `AUTH` with `user NUL password` under a key derived from the nonce.
//! The session key is derived from the nonce and the password, so only a peer
//! that knows the password ends up with it.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use alloc::string::String;
use alloc::vec::Vec;

use digest::Digest;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::*;
use block::{cbc_decrypt, cbc_encrypt, set_odd_parity, Block, SessionKey, BLOCK_SIZE};
use config::{MAX_NAME, MAX_PASSWORD};
use mech::{
    name_from_bytes, Exchange, MechCtx, MechanismId, MechanismResult, Modifier,
    PrincipalName, Reason, Role, Token,
};
use random::random_block;
use tnnames::*;

const WRAP_LABEL: &[u8] = b"tnsec encpwd wrap";
const SESSION_LABEL: &[u8] = b"tnsec encpwd session";

/// First 8 bytes of SHA-256 over `label` and `parts`, with DES parity
fn derive(label: &[u8], parts: &[&[u8]]) -> SessionKey {
    let mut h = Sha256::new();
    h.update(label);
    for p in parts {
        h.update((p.len() as u32).to_be_bytes());
        h.update(p);
    }
    let d = h.finalize();
    let mut k: Block = [0u8; BLOCK_SIZE];
    k.copy_from_slice(&d[..BLOCK_SIZE]);
    set_odd_parity(&mut k);
    SessionKey::new(k)
}

fn session_key(nonce: &Block, password: &str) -> SessionKey {
    derive(SESSION_LABEL, &[&nonce[..], password.as_bytes()])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PwState {
    Start,
    /// Initiator waiting for CHALLENGE
    AckSent,
    /// Initiator waiting for ACCEPT
    AuthSent,
    /// Responder waiting for AUTH
    AwaitAuth,
    Done,
    Failed,
}

pub(crate) struct EncPwd {
    modifier: Modifier,
    role: Role,
    state: PwState,
    nonce: Block,
    user: PrincipalName,
    password: Option<Zeroizing<String>>,
}

impl EncPwd {
    pub fn new(modifier: Modifier, role: Role) -> Self {
        Self {
            modifier,
            role,
            state: PwState::Start,
            nonce: [0u8; BLOCK_SIZE],
            user: PrincipalName::new(),
            password: None,
        }
    }

    fn wrong_step(&mut self, step: u8) -> Result<MechanismResult> {
        debug!("ENCPWD step {step} unexpected in {:?}", self.state);
        self.state = PwState::Failed;
        error::BadToken { msg: "unexpected step" }.fail()
    }

    fn send_auth(&mut self, ctx: &mut MechCtx) -> Result<MechanismResult> {
        let login = ctx.creds.login(MechanismId::EncPwd, false)?;
        if login.password.len() > MAX_PASSWORD {
            return error::NoRoom.fail();
        }
        let len = login.user.len() + 1 + login.password.len();
        let mut buf = Zeroizing::new(alloc::vec![0u8; len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE]);
        buf[..login.user.len()].copy_from_slice(login.user.as_bytes());
        buf[login.user.len() + 1..len].copy_from_slice(login.password.as_bytes());
        cbc_encrypt(&derive(WRAP_LABEL, &[&self.nonce[..]]), &mut buf)?;

        ctx.send(ENCPWD_AUTH, &buf);
        self.user = login.user;
        self.password = Some(login.password);
        self.state = PwState::AuthSent;
        Ok(MechanismResult::NeedMore { expect: ENCPWD_ACCEPT })
    }
}

impl Exchange for EncPwd {
    fn offer(&mut self, ctx: &mut MechCtx) -> Result<MechanismResult> {
        debug_assert_eq!(self.role, Role::Initiator);
        ctx.send(ENCPWD_ACK, &[]);
        if self.modifier.is_mutual() {
            self.state = PwState::AckSent;
            Ok(MechanismResult::NeedMore { expect: ENCPWD_CHALLENGE })
        } else {
            self.send_auth(ctx)
        }
    }

    fn accept(&mut self, tok: Token, ctx: &mut MechCtx) -> Result<MechanismResult> {
        match (self.state, tok.step) {
            (PwState::Start, ENCPWD_ACK) => {
                if self.modifier.is_mutual() {
                    self.nonce = random_block()?;
                    ctx.send(ENCPWD_CHALLENGE, &self.nonce);
                }
                self.state = PwState::AwaitAuth;
                Ok(MechanismResult::NeedMore { expect: ENCPWD_AUTH })
            }

            (PwState::AwaitAuth, ENCPWD_AUTH) => {
                if tok.data.len() > MAX_NAME + MAX_PASSWORD + BLOCK_SIZE {
                    return error::BadToken { msg: "oversized password" }.fail();
                }
                let mut buf = Zeroizing::new(tok.data.to_vec());
                cbc_decrypt(&derive(WRAP_LABEL, &[&self.nonce[..]]), &mut buf)?;

                let mut parts = buf.split(|b| *b == 0);
                let user = name_from_bytes(parts.next().unwrap_or_default())?;
                let pw = core::str::from_utf8(parts.next().unwrap_or_default())?;

                if ctx.remote_user.is_some_and(|n| n != user.as_str()) {
                    debug!("AUTH user {user} differs from NAME");
                }
                if ctx.creds.check_password(&user, pw) {
                    ctx.send(ENCPWD_ACCEPT, &[]);
                    self.state = PwState::Done;
                    let key = session_key(&self.nonce, pw);
                    Ok(MechanismResult::Accept { principal: user, key })
                } else {
                    let reason = "Bad password";
                    ctx.send(ENCPWD_REJECT, reason.as_bytes());
                    self.state = PwState::Failed;
                    Ok(MechanismResult::reject(reason))
                }
            }

            (_, step) => self.wrong_step(step),
        }
    }

    fn finish_mutual(&mut self, tok: Token, ctx: &mut MechCtx) -> Result<MechanismResult> {
        match (self.state, tok.step) {
            (_, ENCPWD_REJECT) => {
                self.state = PwState::Failed;
                Ok(MechanismResult::Reject { reason: Reason::from_wire(tok.data) })
            }

            (PwState::AckSent, ENCPWD_CHALLENGE) => {
                self.nonce = tok
                    .data
                    .try_into()
                    .map_err(|_| Error::BadToken { msg: "challenge length" })?;
                self.send_auth(ctx)
            }

            (PwState::AuthSent, ENCPWD_ACCEPT) => {
                let pw = self.password.take().trap()?;
                self.state = PwState::Done;
                let key = session_key(&self.nonce, &pw);
                Ok(MechanismResult::Accept { principal: self.user.clone(), key })
            }

            (_, step) => self.wrong_step(step),
        }
    }

    fn reject_step(&self) -> u8 {
        ENCPWD_REJECT
    }
}
