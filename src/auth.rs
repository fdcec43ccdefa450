//! AUTHENTICATION option negotiation.
//!
//! The responder lists acceptable pairs with `SEND`. The initiator picks the
//! first one it also allows and runs that mechanism's exchange with `IS`,
//! the responder answering with `REPLY`. A successful exchange hands the
//! session key to the [`Session`](crate::Session), the only way a key is
//! made available for encryption.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use alloc::vec::Vec;

use crate::*;
use behaviour::CredentialProvider;
use block::SessionKey;
use config::{Policy, MAX_PAIRS};
use event::{Event, EventQueue};
use mech::{
    name_from_bytes, AuthPair, MechCtx, Mechanism, MechanismId, MechanismResult, OutToken,
    PrincipalName, Reason, Role, Token,
};
use packets::AuthMessage;
use tnnames::*;
use traffic::TrafSend;

/// The authentication result as seen by the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Not started
    None,
    InProgress,
    Authenticated { principal: PrincipalName },
    Rejected { reason: Reason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthState {
    Idle,
    /// `SEND` sent (responder) or first `IS` sent (initiator)
    TypeSent,
    /// A mechanism exchange is part way through
    AwaitingToken,
    Authenticated,
    Rejected,
}

pub(crate) struct AuthNegotiator {
    role: Role,
    state: AuthState,
    /// Pair of the exchange in flight, or the one that succeeded
    pair: Option<AuthPair>,
    mech: Option<Mechanism>,
    /// Responder's `SEND` list, initiator only
    offered: heapless::Vec<AuthPair, MAX_PAIRS>,
    /// Pairs already attempted. A mechanism is never tried twice,
    /// whatever its modifiers.
    tried: heapless::Vec<AuthPair, MAX_PAIRS>,
    /// From `NAME`, responder only
    remote_user: Option<PrincipalName>,
    outcome: AuthOutcome,
}

impl AuthNegotiator {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: AuthState::Idle,
            pair: None,
            mech: None,
            offered: heapless::Vec::new(),
            tried: heapless::Vec::new(),
            remote_user: None,
            outcome: AuthOutcome::None,
        }
    }

    pub fn outcome(&self) -> &AuthOutcome {
        &self.outcome
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::Authenticated
    }

    /// Responder: the peer agreed to `WILL AUTHENTICATION`, send our list.
    pub fn send_types(&mut self, policy: &Policy, s: &mut TrafSend) -> Result<()> {
        if self.role != Role::Responder || self.state != AuthState::Idle {
            trace!("not sending SEND in {:?}", self.state);
            return Ok(());
        }
        s.send_auth(&AuthMessage::Send(policy.auth_pairs.clone()))?;
        self.state = AuthState::TypeSent;
        self.outcome = AuthOutcome::InProgress;
        Ok(())
    }

    /// Handles an AUTHENTICATION message.
    ///
    /// Returns the session key when authentication has just succeeded.
    pub fn handle(
        &mut self,
        msg: AuthMessage,
        policy: &Policy,
        creds: &mut dyn CredentialProvider,
        s: &mut TrafSend,
        ev: &mut EventQueue,
    ) -> Result<Option<SessionKey>> {
        trace!("auth {:?} got {msg:?}", self.role);
        match (self.role, msg) {
            (Role::Initiator, AuthMessage::Send(pairs)) => {
                self.handle_send(pairs, policy, creds, s, ev)
            }
            (Role::Initiator, AuthMessage::Reply { pair, step, data }) => {
                self.handle_reply(pair, Token { step, data }, policy, creds, s, ev)
            }
            (Role::Responder, AuthMessage::Is { pair, step, data }) => {
                self.handle_is(pair, Token { step, data }, policy, creds, s, ev)
            }
            (Role::Responder, AuthMessage::Name(n)) => {
                match name_from_bytes(n.as_bytes()) {
                    Ok(n) => {
                        debug!("Remote user {n}");
                        self.remote_user = Some(n);
                    }
                    Err(e) => debug!("Ignoring NAME: {e}"),
                }
                Ok(None)
            }
            (role, m) => {
                debug!("Unexpected {m:?} for {role:?}");
                Ok(None)
            }
        }
    }

    fn handle_send(
        &mut self,
        pairs: heapless::Vec<AuthPair, MAX_PAIRS>,
        policy: &Policy,
        creds: &mut dyn CredentialProvider,
        s: &mut TrafSend,
        ev: &mut EventQueue,
    ) -> Result<Option<SessionKey>> {
        if matches!(self.state, AuthState::Authenticated | AuthState::AwaitingToken) {
            debug!("Ignoring SEND in {:?}", self.state);
            return Ok(None);
        }
        self.offered = pairs;
        self.tried.clear();
        self.outcome = AuthOutcome::InProgress;
        self.try_next(None, policy, creds, s, ev)
    }

    /// Initiator: starts the next acceptable pair, or gives up with `IS NULL`
    fn try_next(
        &mut self,
        mut last_reason: Option<Reason>,
        policy: &Policy,
        creds: &mut dyn CredentialProvider,
        s: &mut TrafSend,
        ev: &mut EventQueue,
    ) -> Result<Option<SessionKey>> {
        self.mech = None;
        self.pair = None;

        loop {
            let next = self.offered.iter().find(|p| {
                p.mech != MechanismId::Null && policy.allows_pair(p) && !self.was_tried(p.mech)
            });
            let Some(pair) = next.copied() else {
                break;
            };
            // tried is no larger than offered
            self.tried.push(pair).trap()?;

            let Ok(mut mech) = Mechanism::new(&pair, Role::Initiator) else {
                continue;
            };
            debug!("Trying {pair}");

            let mut out = Vec::new();
            let mut ctx = MechCtx {
                creds: &mut *creds,
                remote_user: policy.remote_user.as_deref(),
                forward: policy.forward_credentials,
                out: &mut out,
            };
            let r = mech.offer(&mut ctx);

            if !out.is_empty() {
                if let Some(ref u) = policy.remote_user {
                    s.send_auth(&AuthMessage::Name(u.as_str()))?;
                }
            }
            Self::send_tokens(s, pair, out, true)?;

            match r {
                MechanismResult::Reject { reason } => {
                    debug!("{pair} unavailable: {reason}");
                    last_reason = Some(reason);
                    if !policy.fallback {
                        break;
                    }
                }
                r => {
                    self.state = AuthState::TypeSent;
                    self.pair = Some(pair);
                    self.mech = Some(mech);
                    return self.progress(r, ev);
                }
            }
        }

        debug!("No acceptable authentication type");
        s.send_auth(&AuthMessage::Is { pair: AuthPair::null(), step: 0, data: &[] })?;
        let reason = last_reason.unwrap_or_else(|| Reason::new("No acceptable authentication type"));
        self.fail(reason, ev);
        Ok(None)
    }

    fn handle_reply(
        &mut self,
        pair: AuthPair,
        tok: Token,
        policy: &Policy,
        creds: &mut dyn CredentialProvider,
        s: &mut TrafSend,
        ev: &mut EventQueue,
    ) -> Result<Option<SessionKey>> {
        if self.pair != Some(pair) {
            debug!("REPLY for {pair} not in progress");
            return Ok(None);
        }
        let Some(mech) = self.mech.as_mut() else {
            debug!("REPLY for {pair} after completion");
            return Ok(None);
        };

        let mut out = Vec::new();
        let mut ctx = MechCtx {
            creds: &mut *creds,
            remote_user: policy.remote_user.as_deref(),
            forward: policy.forward_credentials,
            out: &mut out,
        };
        let r = mech.finish_mutual(tok, &mut ctx);
        Self::send_tokens(s, pair, out, true)?;

        match r {
            MechanismResult::Reject { reason } if policy.fallback => {
                debug!("{pair} rejected: {reason}, trying others");
                self.try_next(Some(reason), policy, creds, s, ev)
            }
            r => self.progress(r, ev),
        }
    }

    fn handle_is(
        &mut self,
        pair: AuthPair,
        tok: Token,
        policy: &Policy,
        creds: &mut dyn CredentialProvider,
        s: &mut TrafSend,
        ev: &mut EventQueue,
    ) -> Result<Option<SessionKey>> {
        if pair.mech == MechanismId::Null {
            if !matches!(self.state, AuthState::Authenticated | AuthState::Rejected) {
                self.mech = None;
                self.fail(Reason::new("Peer declined authentication"), ev);
            }
            return Ok(None);
        }

        let current = self.pair == Some(pair) && self.mech.is_some();
        if !current {
            match self.state {
                AuthState::TypeSent | AuthState::Rejected => (),
                AuthState::AwaitingToken => {
                    debug!("Ignoring IS {pair} while another exchange is in progress");
                    return Ok(None);
                }
                AuthState::Idle | AuthState::Authenticated => {
                    debug!("Ignoring IS {pair} in {:?}", self.state);
                    return Ok(None);
                }
            }

            if !policy.allows_pair(&pair) || self.was_tried(pair.mech) {
                debug!("Refusing {pair}");
                let step = Mechanism::new(&pair, Role::Responder)
                    .map(|mut m| m.reject_step())
                    .unwrap_or(KRB5_REJECT);
                let data = b"Unsupported authentication type";
                s.send_auth(&AuthMessage::Reply { pair, step, data })?;
                return Ok(None);
            }
            // allows_pair limits the number of distinct pairs
            self.tried.push(pair).trap()?;
            self.mech = Some(Mechanism::new(&pair, Role::Responder)?);
            self.pair = Some(pair);
            self.state = AuthState::AwaitingToken;
            self.outcome = AuthOutcome::InProgress;
        }

        let mech = self.mech.as_mut().trap()?;
        let mut out = Vec::new();
        let mut ctx = MechCtx {
            creds: &mut *creds,
            remote_user: self.remote_user.as_deref(),
            forward: false,
            out: &mut out,
        };
        let r = mech.accept(tok, &mut ctx);
        Self::send_tokens(s, pair, out, false)?;
        self.progress(r, ev)
    }

    fn was_tried(&self, mech: MechanismId) -> bool {
        self.tried.iter().any(|t| t.mech == mech)
    }

    /// Sends mechanism tokens as `IS` (initiator) or `REPLY`
    fn send_tokens(s: &mut TrafSend, pair: AuthPair, out: Vec<OutToken>, is: bool) -> Result<()> {
        for t in out {
            let (step, data) = (t.step, &t.data[..]);
            let m = if is {
                AuthMessage::Is { pair, step, data }
            } else {
                AuthMessage::Reply { pair, step, data }
            };
            s.send_auth(&m)?;
        }
        Ok(())
    }

    /// Applies a mechanism result to the negotiation state
    fn progress(&mut self, r: MechanismResult, ev: &mut EventQueue) -> Result<Option<SessionKey>> {
        match r {
            MechanismResult::Accept { principal, key } => {
                if self.state == AuthState::Authenticated {
                    debug!("Ignoring repeated accept");
                    return Ok(None);
                }
                let pair = self.pair.trap()?;
                info!("Authenticated {principal} with {pair}");
                // only credential forwarding follows success
                if !(pair.mech == MechanismId::Kerberos5 && pair.modifier.cred_forward()) {
                    self.mech = None;
                }
                self.state = AuthState::Authenticated;
                self.outcome = AuthOutcome::Authenticated { principal: principal.clone() };
                ev.push(Event::Authenticated { principal });
                Ok(Some(key))
            }
            MechanismResult::Reject { reason } => {
                self.mech = None;
                self.fail(reason, ev);
                Ok(None)
            }
            MechanismResult::NeedMore { expect } => {
                trace!("awaiting step {expect}");
                if self.state != AuthState::Authenticated {
                    self.state = AuthState::AwaitingToken;
                }
                Ok(None)
            }
            MechanismResult::Forwarded { accepted } => {
                self.mech = None;
                ev.push(Event::CredentialsForwarded { accepted });
                Ok(None)
            }
        }
    }

    fn fail(&mut self, reason: Reason, ev: &mut EventQueue) {
        info!("Authentication rejected: {reason}");
        self.state = AuthState::Rejected;
        self.outcome = AuthOutcome::Rejected { reason: reason.clone() };
        ev.push(Event::Rejected { reason });
    }
}
