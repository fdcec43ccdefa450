//! CFB64 and OFB64 feedback mode stream transforms.
//!
//! Both modes keep a one block feedback register and a separate keystream
//! register, refreshed whenever `index` reaches the block size. Keeping the
//! keystream separate from the feedback lets [`CipherInstance::unget_one_byte`]
//! replay the last byte exactly.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use alloc::vec::Vec;
use core::fmt;

use zeroize::Zeroize;

use crate::block::{Block, BlockPrimitive, SessionKey, BLOCK_SIZE};
use crate::tnnames::*;

/// A negotiated encryption type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherType {
    DesCfb64,
    DesOfb64,
}

impl CipherType {
    /// Returns `None` for `ENCTYPE_NULL` and unknown types
    pub fn from_wire(id: u8) -> Option<Self> {
        match id {
            ENCTYPE_DES_CFB64 => Some(Self::DesCfb64),
            ENCTYPE_DES_OFB64 => Some(Self::DesOfb64),
            _ => None,
        }
    }

    pub fn wire(&self) -> u8 {
        match self {
            Self::DesCfb64 => ENCTYPE_DES_CFB64,
            Self::DesOfb64 => ENCTYPE_DES_OFB64,
        }
    }
}

impl fmt::Display for CipherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            Self::DesCfb64 => "DES_CFB64",
            Self::DesOfb64 => "DES_OFB64",
        };
        f.write_str(n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Encrypt,
    Decrypt,
}

/// One direction's keyed feedback state.
///
/// Owned by a single direction, never cloned.
pub struct CipherInstance<P: BlockPrimitive = des::Des> {
    kind: CipherType,
    mode: Mode,
    prim: P,
    feedback: Block,
    keystream: Block,
    // position within keystream, BLOCK_SIZE means exhausted
    index: usize,
    // keystream has been generated at least once
    primed: bool,
}

impl<P: BlockPrimitive> CipherInstance<P> {
    /// `iv` is the initial feedback register exchanged in `FB64_IV`.
    pub fn new(kind: CipherType, mode: Mode, key: &SessionKey, iv: &Block) -> Self {
        trace!("new {kind} {mode:?} instance");
        Self {
            kind,
            mode,
            prim: P::key_schedule(key),
            feedback: *iv,
            keystream: [0u8; BLOCK_SIZE],
            index: BLOCK_SIZE,
            primed: false,
        }
    }

    pub fn kind(&self) -> CipherType {
        self.kind
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Position within the current feedback block, `0..=BLOCK_SIZE`.
    /// `BLOCK_SIZE` when the next byte starts a fresh keystream block.
    pub fn byte_index(&self) -> usize {
        self.index
    }

    fn refresh(&mut self) {
        self.keystream = self.feedback;
        self.prim.encrypt_block(&mut self.keystream);
        if self.kind == CipherType::DesOfb64 {
            self.feedback = self.keystream;
        }
        self.index = 0;
        self.primed = true;
    }

    pub fn transform_byte(&mut self, b: u8) -> u8 {
        if self.index == BLOCK_SIZE {
            self.refresh();
        }
        let i = self.index;
        let out = b ^ self.keystream[i];
        if self.kind == CipherType::DesCfb64 {
            // ciphertext feeds back
            self.feedback[i] = match self.mode {
                Mode::Encrypt => out,
                Mode::Decrypt => b,
            };
        }
        self.index += 1;
        out
    }

    /// Transforms `buf` in place
    pub fn apply(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b = self.transform_byte(*b);
        }
    }

    /// Returns a same length transformed copy of `input`
    pub fn transform(&mut self, input: &[u8]) -> Vec<u8> {
        let mut v = input.to_vec();
        self.apply(&mut v);
        v
    }

    /// Steps back over the last byte so it can be transformed again.
    ///
    /// Only a single byte may be rolled back. Does nothing before the
    /// first byte has been transformed.
    pub fn unget_one_byte(&mut self) {
        if self.primed && self.index > 0 {
            self.index -= 1;
        }
    }
}

impl<P: BlockPrimitive> Drop for CipherInstance<P> {
    fn drop(&mut self) {
        self.feedback.zeroize();
        self.keystream.zeroize();
    }
}

impl<P: BlockPrimitive> fmt::Debug for CipherInstance<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherInstance")
            .field("kind", &self.kind)
            .field("mode", &self.mode)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::block::*;
    use crate::feedback::*;
    use crate::tnlog::init_test_log;
    use proptest::prelude::*;

    fn pair(kind: CipherType, key: &SessionKey, iv: &Block) -> (CipherInstance, CipherInstance) {
        (
            CipherInstance::new(kind, Mode::Encrypt, key, iv),
            CipherInstance::new(kind, Mode::Decrypt, key, iv),
        )
    }

    /// Encrypts every block from the IV alone, without feedback
    fn naive(key: &SessionKey, iv: &Block, input: &[u8]) -> Vec<u8> {
        let mut ks = *iv;
        ecb_encrypt(key, &mut ks);
        input.iter().enumerate().map(|(i, b)| b ^ ks[i % BLOCK_SIZE]).collect()
    }

    #[test]
    fn cfb_first_block_is_keystream() {
        init_test_log();
        let key = SessionKey::new(*b"01234567");
        let iv = [3u8; 8];
        let (mut e, _) = pair(CipherType::DesCfb64, &key, &iv);
        let z = e.transform(&[0u8; 8]);
        let mut ks = iv;
        ecb_encrypt(&key, &mut ks);
        assert_eq!(z, ks);
    }

    #[test]
    fn wraparound_refreshes() {
        init_test_log();
        let key = SessionKey::new(*b"wrapwrap");
        let iv = [0x5au8; 8];
        let input = [0x41u8; 2 * BLOCK_SIZE + 3];
        for kind in [CipherType::DesCfb64, CipherType::DesOfb64] {
            let (mut e, mut d) = pair(kind, &key, &iv);
            let c = e.transform(&input);
            assert_eq!(e.byte_index(), 3);
            let n = naive(&key, &iv, &input);
            assert_eq!(c[..BLOCK_SIZE], n[..BLOCK_SIZE]);
            assert_ne!(c[BLOCK_SIZE..2 * BLOCK_SIZE], n[BLOCK_SIZE..2 * BLOCK_SIZE]);
            assert_eq!(d.transform(&c), input);
            assert_eq!(d.byte_index(), 3);
        }
    }

    #[test]
    fn unget_replays_last_byte() {
        init_test_log();
        let key = SessionKey::new(*b"ungetkey");
        let iv = [1, 2, 3, 4, 5, 6, 7, 8];
        for kind in [CipherType::DesCfb64, CipherType::DesOfb64] {
            // land on each position, including block boundaries
            for n in 1..=(2 * BLOCK_SIZE + 1) {
                let (mut e, mut d) = pair(kind, &key, &iv);
                let c = e.transform(&alloc::vec![0xffu8; n]);
                let p1 = d.transform(&c);
                d.unget_one_byte();
                let again = d.transform_byte(c[n - 1]);
                assert_eq!(again, p1[n - 1], "{kind} n={n}");
                // stream stays in sync afterwards
                let tail = e.transform(b"after");
                assert_eq!(d.transform(&tail), b"after");
            }
        }
    }

    #[test]
    fn unget_at_start_is_harmless() {
        let key = SessionKey::new([7; 8]);
        let (mut e, mut d) = pair(CipherType::DesOfb64, &key, &[0; 8]);
        d.unget_one_byte();
        assert_eq!(d.byte_index(), BLOCK_SIZE);
        let c = e.transform(b"x");
        assert_eq!(d.transform(&c), b"x");
    }

    #[test]
    fn wire_ids() {
        assert_eq!(CipherType::from_wire(1), Some(CipherType::DesCfb64));
        assert_eq!(CipherType::from_wire(2), Some(CipherType::DesOfb64));
        assert_eq!(CipherType::from_wire(0), None);
        assert_eq!(CipherType::DesOfb64.wire(), 2);
    }

    proptest! {
        #[test]
        fn round_trip(key: [u8; 8], iv: [u8; 8], ofb: bool,
            data in proptest::collection::vec(any::<u8>(), 0..200),
            split in 0usize..200) {
            let kind = if ofb { CipherType::DesOfb64 } else { CipherType::DesCfb64 };
            let key = SessionKey::new(key);
            let (mut e, mut d) = pair(kind, &key, &iv);
            let c = e.transform(&data);
            prop_assert_eq!(c.len(), data.len());
            // decrypt in two arbitrary pieces
            let s = split.min(c.len());
            let mut p = d.transform(&c[..s]);
            p.extend(d.transform(&c[s..]));
            prop_assert_eq!(p, data);
        }
    }
}
