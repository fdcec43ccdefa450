//! Outbound negotiation traffic.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use alloc::vec::Vec;

use crate::*;
use feedback::CipherInstance;
use frame::{command_into, encode_subnegotiation_into};
use packets::{trace_payload, AuthMessage, EncryptMessage};
use tnnames::*;

/// Writes framed negotiation messages to the pending output.
///
/// Bytes are sealed with the output cipher in effect at the time they are
/// written, so a message is encrypted exactly when the peer will be
/// decrypting at that point in the stream.
pub(crate) struct TrafSend<'s> {
    out: &'s mut Vec<u8>,
    seal: Option<&'s mut CipherInstance>,
}

impl<'s> TrafSend<'s> {
    pub fn new(out: &'s mut Vec<u8>, seal: Option<&'s mut CipherInstance>) -> Self {
        Self { out, seal }
    }

    pub fn send_auth(&mut self, m: &AuthMessage) -> Result<()> {
        trace!("send {m:?}");
        let mut p = Vec::new();
        m.encode(&mut p)?;
        self.subneg(TELOPT_AUTHENTICATION, &p)
    }

    pub fn send_encrypt(&mut self, m: &EncryptMessage) -> Result<()> {
        trace!("send {m:?}");
        let mut p = Vec::new();
        m.encode(&mut p)?;
        self.subneg(TELOPT_ENCRYPT, &p)
    }

    /// `IAC verb option`
    pub fn command(&mut self, verb: u8, option: u8) {
        let start = self.out.len();
        command_into(self.out, verb, option);
        self.seal_from(start);
    }

    fn subneg(&mut self, option: u8, payload: &[u8]) -> Result<()> {
        trace_payload("payload", payload);
        let start = self.out.len();
        encode_subnegotiation_into(self.out, option, payload)?;
        self.seal_from(start);
        Ok(())
    }

    fn seal_from(&mut self, start: usize) {
        if let Some(c) = self.seal.as_mut() {
            c.apply(&mut self.out[start..]);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::block::SessionKey;
    use crate::feedback::*;
    use crate::traffic::*;

    #[test]
    fn sealed_when_cipher_given() {
        let mut plain = Vec::new();
        TrafSend::new(&mut plain, None).send_encrypt(&EncryptMessage::End).unwrap();
        assert_eq!(plain, [IAC, SB, TELOPT_ENCRYPT, ENCRYPT_END, IAC, SE]);

        let key = SessionKey::new([0x23; 8]);
        let kind = CipherType::DesOfb64;
        let mut e: CipherInstance = CipherInstance::new(kind, Mode::Encrypt, &key, &[0; 8]);
        let mut d: CipherInstance = CipherInstance::new(kind, Mode::Decrypt, &key, &[0; 8]);
        let mut sealed = Vec::new();
        TrafSend::new(&mut sealed, Some(&mut e)).send_encrypt(&EncryptMessage::End).unwrap();
        assert_ne!(sealed, plain);
        assert_eq!(d.transform(&sealed), plain);
    }
}
