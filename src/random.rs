#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

pub fn fill_random(buf: &mut [u8]) -> Result<(), Error> {
    getrandom::getrandom(buf)
    .map_err(|_| {
        Error::msg("RNG failed")
    })
}

/// A random block, used for feedback IVs and challenge nonces.
pub fn random_block() -> Result<crate::block::Block, Error> {
    let mut b = crate::block::Block::default();
    fill_random(&mut b)?;
    Ok(b)
}
