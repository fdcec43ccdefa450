#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use std::io::ErrorKind;
use std::panic::RefUnwindSafe;
use std::path::Path;

use tnsec::*;

/// Fuzzer bytes split into the TELNET stream and control bytes that drive
/// the harness's own choices.
///
/// Encoded as a big-endian `u16` control length, the control bytes, then data.
pub struct FuzzInput<'p> {
    pub data: &'p [u8],
    pub control: &'p [u8],
}

impl<'p> FuzzInput<'p> {
    pub fn new(input: &'p [u8]) -> Result<Self> {
        let (len, rest) = input.split_at_checked(2).ok_or(error::RanOut.build())?;
        let len = u16::from_be_bytes([len[0], len[1]]) as usize;
        let (control, data) = rest.split_at_checked(len).ok_or(error::RanOut.build())?;
        Ok(Self { data, control })
    }

    pub fn from_parts(data: &'p [u8], control: &'p [u8]) -> Self {
        Self { data, control }
    }

    /// Takes up to `len` data bytes
    pub fn take_data(&mut self, len: usize) -> &'p [u8] {
        let (d, rest) = self.data.split_at(len.min(self.data.len()));
        self.data = rest;
        d
    }

    pub fn control_u32(&mut self) -> Result<u32> {
        self.control
            .split_at_checked(core::mem::size_of::<u32>())
            .map(|(v, rest)| {
                let val = u32::from_be_bytes([v[0], v[1], v[2], v[3]]);
                self.control = rest;
                val
            })
            .ok_or(error::RanOut.build())
    }

    /// Returns `Err` when input runs out.
    pub fn chance(&mut self, chance: f32) -> Result<bool> {
        self.control_u32().map(|v| (v as f32 / u32::MAX as f32) < chance)
    }
}

fn each_arg<F>(f: F)
where
    F: Fn(&Path, &[u8]),
{
    for arg in std::env::args().skip(1) {
        let mut paths = vec![];
        match std::fs::read_dir(&arg) {
            Ok(dir) => {
                for ent in dir {
                    match &ent {
                        Ok(e) => {
                            paths.push(e.path());
                        }
                        Err(e) => warn!("Problem with {ent:?}: {e:?}"),
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::NotADirectory => {
                paths.push(arg.into());
            }
            Err(e) => warn!("Bad path {arg:?}: {e:?}"),
        }
        for s in paths {
            let data = match std::fs::read(&s) {
                Ok(data) => data,
                Err(e) if e.kind() == ErrorKind::IsADirectory => continue,
                Err(e) => {
                    warn!("Failed {s:?}: {e:?}");
                    continue;
                }
            };
            f(&s, &data);
        }
    }
}

fn check_error(r: Result<()>) {
    if let Err(e) = r {
        match e {
            // Errors that should not occur.
            // May indicate a bug in this fuzz harness.
            Error::Custom { .. } | Error::Bug => panic!("Unexpected error {e:#?}"),
            _ => (),
        }
    }
}

pub fn run_main<F, CTX>(ctx: &CTX, run: F)
where
    // afl uses catch_unwind so needs unwindsafe
    F: Fn(Option<&Path>, &CTX, &[u8]) -> Result<()> + RefUnwindSafe,
    CTX: RefUnwindSafe,
{
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("debug"),
    )
    .init();

    #[cfg(feature = "honggfuzz")]
    {
        loop {
            honggfuzz::fuzz!(|data: &[u8]| {
                let e = run(None, ctx, data);
                check_error(e);
            })
        }
    }

    #[cfg(feature = "afl")]
    {
        afl::fuzz!(|data: &[u8]| {
            let e = run(None, ctx, data);
            check_error(e);
        });
    }

    #[cfg(feature = "nofuzz")]
    {
        each_arg(|filename, data| {
            info!("running {filename:?}");
            match run(Some(filename), ctx, data) {
                Err(Error::RanOut) => info!("{filename:?} ran out of input"),
                Err(e) => {
                    warn!("Exited with error: {e:#?}");
                    check_error(Err(e));
                }
                Ok(_) => info!("{filename:?} done"),
            }
        });
    }
}

#[cfg(test)]
mod test {
    use crate::*;

    #[test]
    fn test_inp() {
        let mut v = vec![0, 4, 1, 2, 3, 4];
        v.extend_from_slice(b"data");
        let mut x = FuzzInput::new(&v).unwrap();
        assert_eq!(x.control_u32().unwrap(), 0x01020304);
        assert!(x.control_u32().is_err());
        assert_eq!(x.take_data(2), b"da");
        assert_eq!(x.take_data(10), b"ta");

        assert!(FuzzInput::new(&[0, 9, 1]).is_err());
    }
}
