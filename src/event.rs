//! Notifications for the application about negotiation progress
//!
//! These report authentication results and changes to each direction's
//! encryption, for display or logging.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use heapless::Deque;

use crate::*;
use config::MAX_EVENTS;
use encrypt::Direction;
use feedback::CipherType;
use mech::{PrincipalName, Reason};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Authentication succeeded, a session key is available
    Authenticated { principal: PrincipalName },
    /// Authentication failed. Every acceptable mechanism has been tried.
    Rejected { reason: Reason },
    /// Bytes in `dir` are now encrypted with `kind`
    EncryptionStarted { dir: Direction, kind: CipherType },
    /// Bytes in `dir` are clear text again
    EncryptionEnded { dir: Direction },
    /// Kerberos v5 credential forwarding finished
    CredentialsForwarded { accepted: bool },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authenticated { principal } => write!(f, "Authenticated as {principal}"),
            Self::Rejected { reason } => write!(f, "Authentication rejected: {reason}"),
            Self::EncryptionStarted { dir, kind } => write!(f, "{dir} encryption started, {kind}"),
            Self::EncryptionEnded { dir } => write!(f, "{dir} encryption ended"),
            Self::CredentialsForwarded { accepted: true } => f.write_str("Credentials forwarded"),
            Self::CredentialsForwarded { accepted: false } => {
                f.write_str("Credential forwarding refused")
            }
        }
    }
}

/// Undelivered events, oldest first
#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    q: Deque<Event, MAX_EVENTS>,
}

impl EventQueue {
    pub fn push(&mut self, ev: Event) {
        debug!("{ev}");
        if self.q.is_full() {
            if let Some(old) = self.q.pop_front() {
                warn!("Event queue full, dropped {old:?}");
            }
        }
        // can't fail, space was made above
        let _ = self.q.push_back(ev);
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.q.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }
}
