//! Kerberos v4 and v5 token exchanges.
//!
//! Tickets are opaque, created and checked by the
//! [`CredentialProvider`](crate::CredentialProvider). This module sequences
//! `AUTH`, `ACCEPT`/`REJECT`, the mutual proof, and v5 credential forwarding.
//!
//! Kerberos v4 mutual mode has the initiator pick a fresh random key `r` and
//! send `CHALLENGE` with `E_k(r)`. The responder answers with `RESPONSE`
//! carrying `E_k(D_k(c) + 1)` and both sides switch to `r` as the session key.
//! Kerberos v5 mutual mode has the responder send `RESPONSE` with the proof
//! for the ticket's nonce before `ACCEPT`.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use subtle::ConstantTimeEq;

use crate::*;
use block::{ecb_decrypt, ecb_encrypt, set_odd_parity, Block, SessionKey, BLOCK_SIZE};
use mech::{
    name_from_bytes, Exchange, MechCtx, MechanismId, MechanismResult, Modifier,
    PrincipalName, Reason, Role, Token,
};
use random::random_block;
use tnnames::*;

/// Adds one to a big-endian 64 bit counter, carrying across bytes.
/// Wraps to zero on overflow.
pub(crate) fn increment_challenge(b: &mut Block) {
    for x in b.iter_mut().rev() {
        let (n, carry) = x.overflowing_add(1);
        *x = n;
        if !carry {
            break;
        }
    }
}

/// `E_k(D_k(nonce) + 1)`, the proof that the responder holds `key`
pub fn mutual_proof(key: &SessionKey, nonce: &Block) -> Block {
    let mut c = *nonce;
    ecb_decrypt(key, &mut c);
    increment_challenge(&mut c);
    ecb_encrypt(key, &mut c);
    c
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KrbState {
    Start,
    /// Initiator sent AUTH
    AuthSent,
    /// v4 initiator sent CHALLENGE
    ChallengeSent,
    /// v5 initiator checked RESPONSE, waiting for ACCEPT
    ProofOk,
    /// v4 responder accepted the ticket, waiting for CHALLENGE
    AwaitChallenge,
    /// Authentication finished, forwarding may follow
    Done,
    /// Initiator sent FORWARD
    ForwardSent,
    Failed,
}

pub(crate) struct Krb {
    version: MechanismId,
    modifier: Modifier,
    role: Role,
    state: KrbState,
    key: Option<SessionKey>,
    nonce: Block,
    /// v4 initiator's expected RESPONSE
    expect: Block,
    /// v4 key that replaces the ticket key after the challenge
    next_key: Option<SessionKey>,
    principal: PrincipalName,
}

impl Krb {
    pub fn new(version: MechanismId, modifier: Modifier, role: Role) -> Self {
        Self {
            version,
            modifier,
            role,
            state: KrbState::Start,
            key: None,
            nonce: [0; BLOCK_SIZE],
            expect: [0; BLOCK_SIZE],
            next_key: None,
            principal: PrincipalName::new(),
        }
    }

    fn v5(&self) -> bool {
        self.version == MechanismId::Kerberos5
    }

    fn key(&self) -> Result<&SessionKey> {
        self.key.as_ref().trap()
    }

    fn wrong_step(&mut self, step: u8) -> Result<MechanismResult> {
        debug!("{} step {step} unexpected in {:?}", self.version, self.state);
        self.state = KrbState::Failed;
        error::BadToken { msg: "unexpected step" }.fail()
    }

    fn accepted(&mut self, key: SessionKey) -> MechanismResult {
        self.state = KrbState::Done;
        MechanismResult::Accept { principal: self.principal.clone(), key }
    }

    // Initiator, ACCEPT received
    fn init_accept(&mut self, data: &[u8], ctx: &mut MechCtx) -> Result<MechanismResult> {
        if !data.is_empty() {
            self.principal = name_from_bytes(data)?;
        } else if let Some(u) = ctx.remote_user {
            self.principal = name_from_bytes(u.as_bytes())?;
        }
        let key = self.key()?.clone();

        if self.v5() {
            if self.modifier.is_mutual() && self.state != KrbState::ProofOk {
                return error::BadToken { msg: "missing mutual proof" }.fail();
            }
            let r = self.accepted(key.clone());
            if self.modifier.cred_forward() && ctx.forward {
                match ctx.creds.forward_credentials(&key) {
                    Ok(blob) => {
                        ctx.send(KRB5_FORWARD, &blob);
                        self.state = KrbState::ForwardSent;
                    }
                    Err(e) => debug!("Not forwarding credentials: {e}"),
                }
            }
            return Ok(r);
        }

        if self.modifier.is_mutual() {
            let r = random_block()?;
            let mut c = r;
            ecb_encrypt(&key, &mut c);
            self.expect = ctx.creds.derive_mutual_proof(&key, &c)?;
            let mut nk = r;
            set_odd_parity(&mut nk);
            self.next_key = Some(SessionKey::new(nk));
            ctx.send(KRB4_CHALLENGE, &c);
            self.state = KrbState::ChallengeSent;
            Ok(MechanismResult::NeedMore { expect: KRB4_RESPONSE })
        } else {
            Ok(self.accepted(key))
        }
    }

    fn check_proof(&self, expect: &Block, data: &[u8]) -> Result<()> {
        let ok: bool = data.len() == BLOCK_SIZE && bool::from(expect[..].ct_eq(data));
        if !ok {
            return error::BadToken { msg: "mutual proof mismatch" }.fail();
        }
        Ok(())
    }
}

impl Exchange for Krb {
    fn offer(&mut self, ctx: &mut MechCtx) -> Result<MechanismResult> {
        debug_assert_eq!(self.role, Role::Initiator);
        let t = ctx.creds.acquire_initial_token(self.version)?;
        trace!("{} ticket {} bytes", self.version, t.token.len());
        ctx.send(KRB5_AUTH, &t.token);
        self.key = Some(t.session_key);
        self.nonce = t.nonce;
        self.state = KrbState::AuthSent;
        let expect = if self.v5() && self.modifier.is_mutual() {
            KRB5_RESPONSE
        } else {
            KRB5_ACCEPT
        };
        Ok(MechanismResult::NeedMore { expect })
    }

    fn accept(&mut self, tok: Token, ctx: &mut MechCtx) -> Result<MechanismResult> {
        match (self.state, tok.step) {
            (KrbState::Start, KRB5_AUTH) => {
                let v = ctx.creds.validate_token(self.version, tok.data, ctx.remote_user)?;
                self.principal = v.principal;
                self.nonce = v.nonce;
                let key = v.session_key;
                debug!("{} ticket for {}", self.version, self.principal);

                if self.v5() {
                    if self.modifier.is_mutual() {
                        let proof = ctx.creds.derive_mutual_proof(&key, &self.nonce)?;
                        ctx.send(KRB5_RESPONSE, &proof);
                    }
                    ctx.send(KRB5_ACCEPT, self.principal.as_bytes());
                    self.key = Some(key.clone());
                    Ok(self.accepted(key))
                } else {
                    ctx.send(KRB4_ACCEPT, self.principal.as_bytes());
                    self.key = Some(key.clone());
                    if self.modifier.is_mutual() {
                        self.state = KrbState::AwaitChallenge;
                        Ok(MechanismResult::NeedMore { expect: KRB4_CHALLENGE })
                    } else {
                        Ok(self.accepted(key))
                    }
                }
            }

            (KrbState::AwaitChallenge, KRB4_CHALLENGE) if !self.v5() => {
                let c: Block = tok
                    .data
                    .try_into()
                    .map_err(|_| Error::BadToken { msg: "challenge length" })?;
                let key = self.key()?.clone();
                let proof = ctx.creds.derive_mutual_proof(&key, &c)?;
                let mut r = c;
                ecb_decrypt(&key, &mut r);
                set_odd_parity(&mut r);
                ctx.send(KRB4_RESPONSE, &proof);
                Ok(self.accepted(SessionKey::new(r)))
            }

            (KrbState::Done, KRB5_FORWARD) if self.v5() && self.modifier.cred_forward() => {
                let accepted = ctx.creds.accept_forwarded(&self.principal, tok.data);
                let step = if accepted { KRB5_FORWARD_ACCEPT } else { KRB5_FORWARD_REJECT };
                ctx.send(step, &[]);
                Ok(MechanismResult::Forwarded { accepted })
            }

            (_, step) => self.wrong_step(step),
        }
    }

    fn finish_mutual(&mut self, tok: Token, ctx: &mut MechCtx) -> Result<MechanismResult> {
        // REJECT and ACCEPT share numbers across both versions
        match (self.state, tok.step) {
            (KrbState::AuthSent | KrbState::ProofOk | KrbState::ChallengeSent, KRB5_REJECT) => {
                self.state = KrbState::Failed;
                Ok(MechanismResult::Reject { reason: Reason::from_wire(tok.data) })
            }

            (KrbState::AuthSent | KrbState::ProofOk, KRB5_ACCEPT) => {
                self.init_accept(tok.data, ctx)
            }

            (KrbState::AuthSent, KRB5_RESPONSE) if self.v5() => {
                let key = self.key()?.clone();
                let expect = ctx.creds.derive_mutual_proof(&key, &self.nonce)?;
                self.check_proof(&expect, tok.data)?;
                trace!("mutual proof ok");
                self.state = KrbState::ProofOk;
                Ok(MechanismResult::NeedMore { expect: KRB5_ACCEPT })
            }

            (KrbState::ChallengeSent, KRB4_RESPONSE) if !self.v5() => {
                self.check_proof(&self.expect, tok.data)?;
                let key = self.next_key.take().trap()?;
                Ok(self.accepted(key))
            }

            (KrbState::ForwardSent, KRB5_FORWARD_ACCEPT | KRB5_FORWARD_REJECT) if self.v5() => {
                self.state = KrbState::Done;
                Ok(MechanismResult::Forwarded { accepted: tok.step == KRB5_FORWARD_ACCEPT })
            }

            (_, step) => self.wrong_step(step),
        }
    }

    fn reject_step(&self) -> u8 {
        KRB5_REJECT
    }
}
