//! ENCRYPT option negotiation.
//!
//! Each direction is negotiated on its own. The decrypting side lists the
//! types it accepts with `SUPPORT`. The encrypting side picks one and sends
//! `IS type FB64_IV iv`, the decrypting side answers `REPLY type FB64_IV_OK`.
//! Key ids are exchanged with `ENC_KEYID`/`DEC_KEYID`, then `START` is sent in
//! the clear and every following byte in that direction is ciphertext until
//! the (encrypted) `END`.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use alloc::vec::Vec;
use core::fmt;

use crate::*;
use block::{Block, SessionKey, BLOCK_SIZE};
use config::{Policy, MAX_KEYID, MAX_SUPPORT};
use event::{Event, EventQueue};
use feedback::{CipherInstance, CipherType, Mode};
use packets::EncryptMessage;
use random::random_block;
use tnnames::*;
use traffic::TrafSend;

/// Key id sent in `ENC_KEYID`, the single default key
const DEFAULT_KEYID: &[u8] = &[0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Bytes we send
    Out,
    /// Bytes we receive
    In,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Out => f.write_str("output"),
            Self::In => f.write_str("input"),
        }
    }
}

/// Negotiation phase of one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// `IS` sent (output) or `SUPPORT` sent (input)
    TypeRequested,
    /// IV agreed
    TypeAccepted,
    /// Key ids agreed
    KeyExchanged,
    Active,
    Failed,
    Ended,
}

pub(crate) struct DirectionState {
    dir: Direction,
    phase: Phase,
    cipher_type: Option<CipherType>,
    key_id: heapless::Vec<u8, MAX_KEYID>,
    iv: Block,
    /// Present only while `Active`
    cipher: Option<CipherInstance>,
    /// A start is waiting for the session key
    start_queued: bool,
    /// Output only, the peer or the application asked for encryption
    start_wanted: bool,
}

impl DirectionState {
    fn new(dir: Direction) -> Self {
        Self {
            dir,
            phase: Phase::Idle,
            cipher_type: None,
            key_id: heapless::Vec::new(),
            iv: [0u8; BLOCK_SIZE],
            cipher: None,
            start_queued: false,
            start_wanted: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    /// Clears negotiated state ready for a fresh `IS`
    fn reset(&mut self) {
        self.cipher = None;
        self.cipher_type = None;
        self.key_id.clear();
        self.start_queued = false;
    }

    fn activate(&mut self, key: &SessionKey, ev: &mut EventQueue) -> Result<()> {
        let kind = self.cipher_type.trap()?;
        let mode = match self.dir {
            Direction::Out => Mode::Encrypt,
            Direction::In => Mode::Decrypt,
        };
        self.cipher = Some(CipherInstance::new(kind, mode, key, &self.iv));
        self.phase = Phase::Active;
        self.start_queued = false;
        info!("Encrypting {} with {kind}", self.dir);
        ev.push(Event::EncryptionStarted { dir: self.dir, kind });
        Ok(())
    }

    /// Stops encrypting, reporting it if we were
    fn end(&mut self, phase: Phase, ev: &mut EventQueue) {
        let was_active = self.is_active();
        self.reset();
        self.phase = phase;
        if was_active {
            info!("{} encryption ended", self.dir);
            ev.push(Event::EncryptionEnded { dir: self.dir });
        }
    }
}

/// Writes an ENCRYPT message, sealed when output is being encrypted
fn send(wire: &mut Vec<u8>, seal: &mut Option<CipherInstance>, m: &EncryptMessage) -> Result<()> {
    TrafSend::new(wire, seal.as_mut()).send_encrypt(m)
}

fn fb64_iv(data: &[u8]) -> Option<Block> {
    match data {
        [FB64_IV, iv @ ..] => iv.try_into().ok(),
        _ => None,
    }
}

pub(crate) struct EncryptNegotiator {
    out: DirectionState,
    inp: DirectionState,
    key: Option<SessionKey>,
}

impl EncryptNegotiator {
    pub fn new() -> Self {
        Self {
            out: DirectionState::new(Direction::Out),
            inp: DirectionState::new(Direction::In),
            key: None,
        }
    }

    pub fn phase(&self, dir: Direction) -> Phase {
        match dir {
            Direction::Out => self.out.phase(),
            Direction::In => self.inp.phase(),
        }
    }

    pub fn is_active(&self, dir: Direction) -> bool {
        self.phase(dir) == Phase::Active
    }

    /// The output cipher, while output is encrypted
    pub fn output_cipher(&mut self) -> Option<&mut CipherInstance> {
        self.out.cipher.as_mut()
    }

    /// The input cipher, while input is decrypted
    pub fn input_cipher(&mut self) -> Option<&mut CipherInstance> {
        self.inp.cipher.as_mut()
    }

    /// Transforms `buf` in place with `dir`'s cipher.
    ///
    /// Calling this for a direction that isn't active is a bug.
    pub fn transform(&mut self, dir: Direction, buf: &mut [u8]) -> Result<()> {
        let c = match dir {
            Direction::Out => self.out.cipher.as_mut(),
            Direction::In => self.inp.cipher.as_mut(),
        };
        match c {
            Some(c) => {
                c.apply(buf);
                Ok(())
            }
            None => Error::bug_msg("transform on inactive direction"),
        }
    }

    /// We are the decrypting side, list the types we accept
    pub fn send_support(&mut self, policy: &Policy, wire: &mut Vec<u8>) -> Result<()> {
        let mut types = heapless::Vec::<u8, MAX_SUPPORT>::new();
        for c in policy.ciphers.iter() {
            types.push(c.wire()).map_err(|_| Error::NoRoom)?;
        }
        if types.is_empty() {
            debug!("No ciphers to support");
            return Ok(());
        }
        send(wire, &mut self.out.cipher, &EncryptMessage::Support(types))?;
        if self.inp.phase == Phase::Idle {
            self.inp.phase = Phase::TypeRequested;
        }
        Ok(())
    }

    /// Authentication has produced a session key.
    ///
    /// Starts queued at the time are retried once.
    pub fn key_available(&mut self, key: SessionKey, policy: &Policy, wire: &mut Vec<u8>,
        ev: &mut EventQueue) -> Result<()> {
        self.key = Some(key);

        if core::mem::take(&mut self.inp.start_queued) {
            debug!("Retrying queued input START");
            if matches!(self.inp.phase, Phase::TypeAccepted | Phase::KeyExchanged) {
                let key = self.key.as_ref().trap()?;
                self.inp.activate(key, ev)?;
            }
        }

        if policy.auto_encrypt {
            self.out.start_wanted = true;
        }
        if core::mem::take(&mut self.out.start_queued) || self.out.start_wanted {
            self.try_start_output(wire, ev)?;
        }
        Ok(())
    }

    pub fn handle(&mut self, msg: EncryptMessage, policy: &Policy, wire: &mut Vec<u8>,
        ev: &mut EventQueue) -> Result<()> {
        trace!("encrypt got {msg:?}");
        match msg {
            // Messages for our output
            EncryptMessage::Support(types) => self.handle_support(&types, policy, wire, ev),
            EncryptMessage::Reply { kind, data } => self.handle_reply(kind, data, wire, ev),
            EncryptMessage::DecKeyId(k) => self.handle_dec_keyid(k, wire, ev),
            EncryptMessage::RequestStart(_) => {
                self.out.start_wanted = true;
                self.try_start_output(wire, ev)
            }
            EncryptMessage::RequestEnd => self.end_output(wire, ev),

            // Messages for our input
            EncryptMessage::Is { kind, data } => self.handle_is(kind, data, policy, wire, ev),
            EncryptMessage::EncKeyId(k) => self.handle_enc_keyid(k, wire),
            EncryptMessage::Start(k) => self.handle_start(k, ev),
            EncryptMessage::End => {
                debug!("Peer ended encryption");
                self.inp.end(Phase::Ended, ev);
                Ok(())
            }
        }
    }

    fn handle_support(&mut self, types: &[u8], policy: &Policy, wire: &mut Vec<u8>,
        ev: &mut EventQueue) -> Result<()> {
        if self.out.is_active() {
            debug!("Ignoring SUPPORT while encrypting");
            return Ok(());
        }

        // first of the peer's types that we also have
        let kind = types
            .iter()
            .filter_map(|t| CipherType::from_wire(*t))
            .find(|t| policy.ciphers.contains(t));

        let Some(kind) = kind else {
            debug!("No common cipher in {types:?}");
            self.out.end(Phase::Failed, ev);
            return Ok(());
        };

        self.offer_type(kind, wire)
    }

    /// Sends `IS` for `kind` with a fresh IV
    fn offer_type(&mut self, kind: CipherType, wire: &mut Vec<u8>) -> Result<()> {
        self.out.reset();
        self.out.iv = random_block()?;
        self.out.cipher_type = Some(kind);
        self.out.phase = Phase::TypeRequested;
        debug!("Offering {kind}");

        let mut data = [0u8; 1 + BLOCK_SIZE];
        data[0] = FB64_IV;
        data[1..].copy_from_slice(&self.out.iv);
        send(wire, &mut self.out.cipher, &EncryptMessage::Is { kind: kind.wire(), data: &data })
    }

    fn handle_reply(&mut self, kind: u8, data: &[u8], wire: &mut Vec<u8>,
        ev: &mut EventQueue) -> Result<()> {
        if self.out.phase != Phase::TypeRequested
            || self.out.cipher_type.map(|c| c.wire()) != Some(kind)
        {
            debug!("Unexpected REPLY type {kind} in {:?}", self.out.phase);
            return Ok(());
        }

        match data.first() {
            Some(&FB64_IV_OK) => {
                self.out.phase = Phase::TypeAccepted;
                send(wire, &mut self.out.cipher, &EncryptMessage::EncKeyId(DEFAULT_KEYID))
            }
            _ => {
                debug!("Peer refused IV for type {kind}");
                self.out.end(Phase::Failed, ev);
                Ok(())
            }
        }
    }

    fn handle_dec_keyid(&mut self, keyid: &[u8], wire: &mut Vec<u8>,
        ev: &mut EventQueue) -> Result<()> {
        if !matches!(self.out.phase, Phase::TypeAccepted | Phase::KeyExchanged) {
            debug!("Unexpected DEC_KEYID in {:?}", self.out.phase);
            return Ok(());
        }
        // empty means the default key
        self.out.key_id = heapless::Vec::from_slice(keyid).map_err(|_| Error::NoRoom)?;
        self.out.phase = Phase::KeyExchanged;
        if self.out.start_wanted {
            self.try_start_output(wire, ev)?;
        }
        Ok(())
    }

    /// Starts encrypting output once key ids are agreed and a key exists,
    /// otherwise waits for those.
    fn try_start_output(&mut self, wire: &mut Vec<u8>, ev: &mut EventQueue) -> Result<()> {
        self.out.start_wanted = true;
        match self.out.phase {
            Phase::Active => Ok(()),
            // ended by us earlier, a restart never reuses the IV
            Phase::Ended if self.out.cipher_type.is_some() => {
                let kind = self.out.cipher_type.trap()?;
                self.offer_type(kind, wire)
            }
            Phase::KeyExchanged => {
                let Some(key) = self.key.as_ref() else {
                    debug!("Output START waits for a session key");
                    self.out.start_queued = true;
                    return Ok(());
                };
                let keyid = self.out.key_id.clone();
                send(wire, &mut self.out.cipher, &EncryptMessage::Start(&keyid))?;
                self.out.activate(key, ev)
            }
            p => {
                trace!("Output START deferred in {p:?}");
                Ok(())
            }
        }
    }

    fn handle_is(&mut self, kind: u8, data: &[u8], policy: &Policy, wire: &mut Vec<u8>,
        ev: &mut EventQueue) -> Result<()> {
        let ct = CipherType::from_wire(kind).filter(|c| policy.ciphers.contains(c));
        let Some(ct) = ct else {
            debug!("Peer chose unsupported type {kind}");
            self.inp.end(Phase::Ended, ev);
            let m = EncryptMessage::Reply { kind: ENCTYPE_NULL, data: &[] };
            return send(wire, &mut self.out.cipher, &m);
        };

        // a fresh IS restarts this direction
        self.inp.end(Phase::Idle, ev);

        match fb64_iv(data) {
            Some(iv) => {
                self.inp.iv = iv;
                self.inp.cipher_type = Some(ct);
                self.inp.phase = Phase::TypeAccepted;
                let m = EncryptMessage::Reply { kind, data: &[FB64_IV_OK] };
                send(wire, &mut self.out.cipher, &m)
            }
            None => {
                debug!("Bad IV option for {ct}");
                self.inp.phase = Phase::Failed;
                let m = EncryptMessage::Reply { kind, data: &[FB64_IV_BAD] };
                send(wire, &mut self.out.cipher, &m)
            }
        }
    }

    fn handle_enc_keyid(&mut self, keyid: &[u8], wire: &mut Vec<u8>) -> Result<()> {
        if !matches!(self.inp.phase, Phase::TypeAccepted | Phase::KeyExchanged | Phase::Active) {
            debug!("Unexpected ENC_KEYID in {:?}", self.inp.phase);
            return Ok(());
        }
        self.inp.key_id = heapless::Vec::from_slice(keyid).map_err(|_| Error::NoRoom)?;
        if self.inp.phase == Phase::TypeAccepted {
            self.inp.phase = Phase::KeyExchanged;
        }
        // only the default key exists, echo it
        let echo = self.inp.key_id.clone();
        send(wire, &mut self.out.cipher, &EncryptMessage::DecKeyId(&echo))
    }

    fn handle_start(&mut self, keyid: &[u8], ev: &mut EventQueue) -> Result<()> {
        match self.inp.phase {
            Phase::Active => {
                trace!("Duplicate START");
                Ok(())
            }
            Phase::TypeAccepted | Phase::KeyExchanged => {
                if !keyid.is_empty() && keyid != &self.inp.key_id[..] {
                    debug!("START with unknown key id {keyid:?}");
                }
                match self.key.as_ref() {
                    Some(key) => self.inp.activate(key, ev),
                    None => {
                        debug!("Input START waits for a session key");
                        self.inp.start_queued = true;
                        Ok(())
                    }
                }
            }
            p => {
                let e = Error::NegotiationProtocol { msg: "START without an agreed type" };
                warn!("{e} in {p:?}");
                self.inp.end(Phase::Ended, ev);
                Ok(())
            }
        }
    }

    /// Asks the peer to start encrypting its output
    pub fn request_start(&mut self, wire: &mut Vec<u8>) -> Result<()> {
        send(wire, &mut self.out.cipher, &EncryptMessage::RequestStart(&[]))
    }

    /// Asks the peer to stop encrypting its output
    pub fn request_end(&mut self, wire: &mut Vec<u8>) -> Result<()> {
        send(wire, &mut self.out.cipher, &EncryptMessage::RequestEnd)
    }

    /// Starts encrypting our output when possible
    pub fn start_output(&mut self, wire: &mut Vec<u8>, ev: &mut EventQueue) -> Result<()> {
        self.try_start_output(wire, ev)
    }

    /// Sends `END`, still encrypted, then sends clear text.
    pub fn end_output(&mut self, wire: &mut Vec<u8>, ev: &mut EventQueue) -> Result<()> {
        self.out.start_wanted = false;
        self.out.start_queued = false;
        if !self.out.is_active() {
            trace!("Output not encrypted");
            return Ok(());
        }
        send(wire, &mut self.out.cipher, &EncryptMessage::End)?;
        // kept for a later restart
        let kind = self.out.cipher_type;
        self.out.end(Phase::Ended, ev);
        self.out.cipher_type = kind;
        Ok(())
    }

    /// The peer refused or withdrew `ENCRYPT` for `dir`
    pub fn disable(&mut self, dir: Direction, ev: &mut EventQueue) {
        match dir {
            Direction::Out => self.out.end(Phase::Ended, ev),
            Direction::In => self.inp.end(Phase::Ended, ev),
        }
    }
}
