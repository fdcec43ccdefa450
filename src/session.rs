//! One TELNET connection's authentication and encryption state.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use alloc::vec::Vec;

use crate::*;
use auth::{AuthNegotiator, AuthOutcome};
use behaviour::CredentialProvider;
use config::Policy;
use encrypt::{Direction, EncryptNegotiator, Phase};
use event::{Event, EventQueue};
use frame::{command_into, encode_subnegotiation_into, escape_into, Deframer, Step};
use mech::Role;
use packets::{trace_payload, AuthMessage, EncryptMessage};
use tnnames::*;
use traffic::TrafSend;

/// Option state for one side of an option, a reduced RFC 1143 Q method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Q {
    #[default]
    No,
    WantYes,
    Yes,
}

#[derive(Debug, Default)]
struct OptState {
    /// We `WILL`
    local: Q,
    /// The peer `WILL`
    remote: Q,
}

/// Applies a received `WILL`/`WONT` (for `remote`) or `DO`/`DONT` (for
/// `local`), replying as needed.
///
/// Returns `Some(enabled)` when the option changed state.
fn negotiate(q: &mut Q, got_yes: bool, accept: bool, (yes, no): (u8, u8), option: u8,
    s: &mut TrafSend) -> Option<bool> {
    match (*q, got_yes) {
        (Q::No, true) => {
            if accept {
                s.command(yes, option);
                *q = Q::Yes;
                Some(true)
            } else {
                s.command(no, option);
                None
            }
        }
        (Q::WantYes, true) => {
            *q = Q::Yes;
            Some(true)
        }
        (Q::Yes, false) => {
            s.command(no, option);
            *q = Q::No;
            Some(false)
        }
        (Q::WantYes, false) => {
            debug!("Peer refused option {option}");
            *q = Q::No;
            None
        }
        (Q::Yes, true) | (Q::No, false) => None,
    }
}

/// A TELNET session's AUTHENTICATION and ENCRYPT handling.
///
/// The session does no IO. Bytes read from the transport are passed to
/// [`feed_input`](Self::feed_input), which returns the remaining TELNET
/// stream (decrypted, still IAC escaped) for the terminal layer. Bytes for the
/// transport come from [`wrap_output`](Self::wrap_output) or
/// [`take_output`](Self::take_output).
pub struct Session {
    role: Role,
    policy: Policy,
    deframer: Deframer,
    auth: AuthNegotiator,
    enc: EncryptNegotiator,
    events: EventQueue,
    /// Bytes for the transport, already encrypted where required
    pending: Vec<u8>,
    auth_opt: OptState,
    enc_opt: OptState,
    started: bool,
}

impl Session {
    /// `Role::Initiator` is the TELNET client.
    pub fn new(role: Role, policy: Policy) -> Self {
        Self {
            role,
            policy,
            deframer: Deframer::new(),
            auth: AuthNegotiator::new(role),
            enc: EncryptNegotiator::new(),
            events: EventQueue::default(),
            pending: Vec::new(),
            auth_opt: OptState::default(),
            enc_opt: OptState::default(),
            started: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Queues the initial option requests.
    ///
    /// A responder asks for `AUTHENTICATION`. Both ends offer `ENCRYPT`
    /// in both directions when they have any ciphers.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        let mut s = TrafSend::new(&mut self.pending, None);
        if self.role == Role::Responder && !self.policy.auth_pairs.is_empty() {
            s.command(DO, TELOPT_AUTHENTICATION);
            self.auth_opt.remote = Q::WantYes;
        }
        if !self.policy.ciphers.is_empty() {
            s.command(WILL, TELOPT_ENCRYPT);
            self.enc_opt.local = Q::WantYes;
            s.command(DO, TELOPT_ENCRYPT);
            self.enc_opt.remote = Q::WantYes;
        }
        Ok(())
    }

    /// Processes bytes from the transport.
    ///
    /// Returns the TELNET stream left for the terminal layer: data and
    /// commands for other options, decrypted and still IAC escaped.
    /// Malformed negotiation is logged and dropped, only internal bugs
    /// return an error.
    pub fn feed_input(&mut self, input: &[u8], creds: &mut dyn CredentialProvider)
        -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(input.len());
        let mut i = 0;
        while let Some(&c) = input.get(i) {
            let b = match self.enc.input_cipher() {
                Some(cipher) => cipher.transform_byte(c),
                None => c,
            };

            match self.deframer.push(b) {
                Step::None => (),
                Step::Data(d) => escape_into(&mut data, &[d]),
                Step::Other(cmd) => data.extend_from_slice(&[IAC, cmd]),
                Step::Command { verb, option } => match option {
                    TELOPT_AUTHENTICATION | TELOPT_ENCRYPT => {
                        let r = self.handle_command(verb, option);
                        self.recover(r)?;
                    }
                    _ => command_into(&mut data, verb, option),
                },
                Step::Subneg(option) => {
                    let payload = self.deframer.take_payload();
                    match option {
                        TELOPT_AUTHENTICATION => {
                            let r = self.handle_auth(&payload, creds);
                            self.recover(r)?;
                        }
                        TELOPT_ENCRYPT => {
                            let r = self.handle_encrypt(&payload);
                            self.recover(r)?;
                        }
                        _ => encode_subnegotiation_into(&mut data, option, &payload)?,
                    }
                }
                Step::Framing => debug!("Discarded malformed subnegotiation"),
                Step::Reprocess => {
                    // decrypt the same byte again in the new state
                    if let Some(cipher) = self.enc.input_cipher() {
                        cipher.unget_one_byte();
                    }
                    continue;
                }
            }
            i += 1;
        }
        Ok(data)
    }

    /// Passes wire errors through as logged, returns bugs
    fn recover(&self, r: Result<()>) -> Result<()> {
        match r {
            Err(e) if e.is_wire() => {
                warn!("Negotiation error: {e}");
                Ok(())
            }
            r => r,
        }
    }

    fn handle_command(&mut self, verb: u8, option: u8) -> Result<()> {
        trace!("got {verb} {option}");
        let (st, accept) = match option {
            TELOPT_AUTHENTICATION => {
                let have = !self.policy.auth_pairs.is_empty();
                // the client authenticates to the server
                let accept = match verb {
                    WILL | WONT => have && self.role == Role::Responder,
                    _ => have && self.role == Role::Initiator,
                };
                (&mut self.auth_opt, accept)
            }
            _ => (&mut self.enc_opt, !self.policy.ciphers.is_empty()),
        };

        let mut s = TrafSend::new(&mut self.pending, self.enc.output_cipher());
        let (changed, dir) = match verb {
            WILL => (negotiate(&mut st.remote, true, accept, (DO, DONT), option, &mut s), Direction::In),
            WONT => (negotiate(&mut st.remote, false, accept, (DO, DONT), option, &mut s), Direction::In),
            DO => (negotiate(&mut st.local, true, accept, (WILL, WONT), option, &mut s), Direction::Out),
            DONT => (negotiate(&mut st.local, false, accept, (WILL, WONT), option, &mut s), Direction::Out),
            _ => return Err(Error::bug()),
        };
        let Some(enabled) = changed else {
            return Ok(());
        };
        debug!("Option {option} {dir} {}", if enabled { "enabled" } else { "disabled" });

        match (option, dir, enabled) {
            // the client agreed to authenticate
            (TELOPT_AUTHENTICATION, Direction::In, true) => {
                self.auth.send_types(&self.policy, &mut s)?;
            }
            // the peer will encrypt to us
            (TELOPT_ENCRYPT, Direction::In, true) => {
                self.enc.send_support(&self.policy, &mut self.pending)?;
            }
            (TELOPT_ENCRYPT, dir, false) => self.enc.disable(dir, &mut self.events),
            _ => (),
        }
        Ok(())
    }

    fn handle_auth(&mut self, payload: &[u8], creds: &mut dyn CredentialProvider) -> Result<()> {
        trace_payload("auth payload", payload);
        let msg = AuthMessage::parse(payload)?;
        let mut s = TrafSend::new(&mut self.pending, self.enc.output_cipher());
        let key = self.auth.handle(msg, &self.policy, creds, &mut s, &mut self.events)?;
        if let Some(key) = key {
            self.enc.key_available(key, &self.policy, &mut self.pending, &mut self.events)?;
        }
        Ok(())
    }

    fn handle_encrypt(&mut self, payload: &[u8]) -> Result<()> {
        trace_payload("encrypt payload", payload);
        let msg = EncryptMessage::parse(payload)?;
        self.enc.handle(msg, &self.policy, &mut self.pending, &mut self.events)
    }

    /// Prepares bytes for the transport.
    ///
    /// `data` is a TELNET stream, already IAC escaped. It is returned after
    /// any pending negotiation, encrypted when output encryption is active.
    pub fn wrap_output(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = core::mem::take(&mut self.pending);
        let start = out.len();
        out.extend_from_slice(data);
        if self.enc.is_active(Direction::Out) {
            self.enc.transform(Direction::Out, &mut out[start..])?;
        }
        Ok(out)
    }

    /// Negotiation bytes waiting for the transport
    pub fn take_output(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.pending)
    }

    pub fn has_output(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drains undelivered events.
    ///
    /// The iterator ends when no events remain, later calls return
    /// anything new.
    pub fn events(&mut self) -> impl Iterator<Item = Event> + '_ {
        core::iter::from_fn(|| self.events.pop())
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop()
    }

    pub fn auth_outcome(&self) -> &AuthOutcome {
        self.auth.outcome()
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    /// Our output is encrypted
    pub fn is_encrypting(&self) -> bool {
        self.enc.is_active(Direction::Out)
    }

    /// The peer's output is decrypted
    pub fn is_decrypting(&self) -> bool {
        self.enc.is_active(Direction::In)
    }

    pub fn encryption_phase(&self, dir: Direction) -> Phase {
        self.enc.phase(dir)
    }

    /// Asks the peer to encrypt its output
    pub fn request_start(&mut self) -> Result<()> {
        if self.enc_opt.remote != Q::Yes {
            return error::NegotiationProtocol { msg: "peer won't encrypt" }.fail();
        }
        self.enc.request_start(&mut self.pending)
    }

    /// Asks the peer to stop encrypting its output
    pub fn request_end(&mut self) -> Result<()> {
        if self.enc_opt.remote != Q::Yes {
            return error::NegotiationProtocol { msg: "peer won't encrypt" }.fail();
        }
        self.enc.request_end(&mut self.pending)
    }

    /// Encrypts our output as soon as the type, key ids and session key are
    /// agreed.
    pub fn start_output(&mut self) -> Result<()> {
        self.enc.start_output(&mut self.pending, &mut self.events)
    }

    /// Stops encrypting our output
    pub fn end_output(&mut self) -> Result<()> {
        self.enc.end_output(&mut self.pending, &mut self.events)
    }
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("auth", self.auth.outcome())
            .field("out", &self.enc.phase(Direction::Out))
            .field("in", &self.enc.phase(Direction::In))
            .field("mid_frame", &!self.deframer.idle())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::behaviour::NoCredentials;
    use crate::session::*;
    use crate::tnlog::init_test_log;

    #[test]
    fn start_requests_options() {
        init_test_log();
        let mut srv = Session::new(Role::Responder, Policy::default());
        srv.start().unwrap();
        srv.start().unwrap();
        assert_eq!(
            srv.take_output(),
            [IAC, DO, TELOPT_AUTHENTICATION, IAC, WILL, TELOPT_ENCRYPT, IAC, DO, TELOPT_ENCRYPT]
        );

        let mut cli = Session::new(Role::Initiator, Policy::default());
        cli.start().unwrap();
        assert_eq!(cli.take_output(), [IAC, WILL, TELOPT_ENCRYPT, IAC, DO, TELOPT_ENCRYPT]);
    }

    #[test]
    fn other_options_pass_through() {
        init_test_log();
        let mut s = Session::new(Role::Initiator, Policy::default());
        let input = [
            b'a', IAC, IAC, b'b', IAC, DO, 24, IAC, SB, 24, 1, IAC, IAC, IAC, SE, IAC, NOP,
        ];
        let out = s.feed_input(&input, &mut NoCredentials).unwrap();
        assert_eq!(out, input);
        assert!(!s.has_output());
    }

    #[test]
    fn client_accepts_do_auth() {
        init_test_log();
        let mut cli = Session::new(Role::Initiator, Policy::default());
        let out = cli.feed_input(&[IAC, DO, TELOPT_AUTHENTICATION], &mut NoCredentials).unwrap();
        assert!(out.is_empty());
        assert_eq!(cli.take_output(), [IAC, WILL, TELOPT_AUTHENTICATION]);
        // no reply loop
        cli.feed_input(&[IAC, DO, TELOPT_AUTHENTICATION], &mut NoCredentials).unwrap();
        assert!(!cli.has_output());

        // a client never validates
        cli.feed_input(&[IAC, WILL, TELOPT_AUTHENTICATION], &mut NoCredentials).unwrap();
        assert_eq!(cli.take_output(), [IAC, DONT, TELOPT_AUTHENTICATION]);
    }

    #[test]
    fn split_subnegotiation() {
        init_test_log();
        let mut srv = Session::new(Role::Responder, Policy::default());
        srv.start().unwrap();
        srv.take_output();
        srv.feed_input(&[IAC, WILL, TELOPT_AUTHENTICATION], &mut NoCredentials).unwrap();
        let send = srv.take_output();
        assert_eq!(send[..4], [IAC, SB, TELOPT_AUTHENTICATION, AUTH_SEND]);

        // IS NULL in two reads
        let is_null = [IAC, SB, TELOPT_AUTHENTICATION, AUTH_IS, AUTHTYPE_NULL, 0, IAC, SE];
        srv.feed_input(&is_null[..5], &mut NoCredentials).unwrap();
        assert!(srv.poll_event().is_none());
        assert!(format!("{srv:?}").contains("mid_frame: true"));
        srv.feed_input(&is_null[5..], &mut NoCredentials).unwrap();
        assert!(format!("{srv:?}").contains("mid_frame: false"));
        assert!(matches!(srv.poll_event(), Some(Event::Rejected { .. })));
        assert!(matches!(srv.auth_outcome(), AuthOutcome::Rejected { .. }));
    }

    #[test]
    fn garbage_is_recovered() {
        init_test_log();
        let mut srv = Session::new(Role::Responder, Policy::default());
        // unknown auth command, then a stray IAC inside an encrypt subnegotiation
        let input = [
            IAC, SB, TELOPT_AUTHENTICATION, 9, IAC, SE,
            IAC, SB, TELOPT_ENCRYPT, 3, IAC, DO, 1,
            b'x',
        ];
        let out = srv.feed_input(&input, &mut NoCredentials).unwrap();
        assert_eq!(out, [IAC, DO, 1, b'x']);
    }

    #[test]
    fn wrap_output_without_encryption() {
        let mut s = Session::new(Role::Initiator, Policy::default());
        s.start().unwrap();
        let out = s.wrap_output(b"ls\r\n").unwrap();
        assert_eq!(out, [IAC, WILL, TELOPT_ENCRYPT, IAC, DO, TELOPT_ENCRYPT, b'l', b's', b'\r', b'\n']);
        assert!(!s.is_encrypting());
        assert!(s.request_start().is_err());
    }
}
