//! DES block primitive and session key material.
//!
//! The feedback modes only ever run the block cipher forwards, so
//! [`BlockPrimitive`] has no decrypt. The mechanisms that need DES
//! decryption (Kerberos v4 challenge, SRA and encrypted password
//! obfuscation) use the ECB/CBC helpers here.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use core::fmt;

use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use des::Des;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const BLOCK_SIZE: usize = 8;

/// One 64-bit cipher block
pub type Block = [u8; BLOCK_SIZE];

/// Symmetric key established by authentication, used to key the stream cipher.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; BLOCK_SIZE]);

impl SessionKey {
    pub fn new(key: Block) -> Self {
        Self(key)
    }

    /// Fails with [`Error::BadToken`] unless `key` is exactly 8 bytes.
    pub fn from_slice(key: &[u8]) -> Result<Self> {
        let k: Block = key.try_into().map_err(|_| Error::BadToken { msg: "key length" })?;
        Ok(Self(k))
    }

    pub fn as_bytes(&self) -> &Block {
        &self.0
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl Eq for SessionKey {}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// The block cipher consumed by [`CipherInstance`](crate::CipherInstance).
pub trait BlockPrimitive {
    /// Derive the key schedule
    fn key_schedule(key: &SessionKey) -> Self
    where
        Self: Sized;

    /// Encrypt a single block in place
    fn encrypt_block(&self, block: &mut Block);
}

impl BlockPrimitive for Des {
    fn key_schedule(key: &SessionKey) -> Self {
        Des::new(GenericArray::from_slice(key.as_bytes()))
    }

    fn encrypt_block(&self, block: &mut Block) {
        BlockEncrypt::encrypt_block(self, GenericArray::from_mut_slice(block))
    }
}

pub(crate) fn ecb_encrypt(key: &SessionKey, block: &mut Block) {
    let d = Des::key_schedule(key);
    BlockPrimitive::encrypt_block(&d, block)
}

pub(crate) fn ecb_decrypt(key: &SessionKey, block: &mut Block) {
    let d = Des::key_schedule(key);
    d.decrypt_block(GenericArray::from_mut_slice(block))
}

/// DES-CBC with a zero IV, in place. `buf` must be a whole number of blocks.
pub(crate) fn cbc_encrypt(key: &SessionKey, buf: &mut [u8]) -> Result<()> {
    if buf.len() % BLOCK_SIZE != 0 {
        return Err(Error::bug());
    }
    let d = Des::key_schedule(key);
    let mut chain = [0u8; BLOCK_SIZE];
    for b in buf.chunks_exact_mut(BLOCK_SIZE) {
        for (x, c) in b.iter_mut().zip(chain.iter()) {
            *x ^= c;
        }
        BlockEncrypt::encrypt_block(&d, GenericArray::from_mut_slice(b));
        chain.copy_from_slice(b);
    }
    Ok(())
}

/// Inverse of [`cbc_encrypt`]. Fails on a partial block.
pub(crate) fn cbc_decrypt(key: &SessionKey, buf: &mut [u8]) -> Result<()> {
    if buf.len() % BLOCK_SIZE != 0 {
        return Err(Error::BadToken { msg: "not a whole number of blocks" });
    }
    let d = Des::key_schedule(key);
    let mut chain = [0u8; BLOCK_SIZE];
    for b in buf.chunks_exact_mut(BLOCK_SIZE) {
        let mut next = [0u8; BLOCK_SIZE];
        next.copy_from_slice(b);
        d.decrypt_block(GenericArray::from_mut_slice(b));
        for (x, c) in b.iter_mut().zip(chain.iter()) {
            *x ^= c;
        }
        chain = next;
    }
    Ok(())
}

/// Sets the low bit of each byte so that every byte has odd parity.
pub(crate) fn set_odd_parity(key: &mut Block) {
    for b in key.iter_mut() {
        let high = *b & 0xfe;
        *b = high | ((high.count_ones() as u8 & 1) ^ 1);
    }
}
