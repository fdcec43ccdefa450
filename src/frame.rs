//! TELNET IAC framing.
//!
//! [`Deframer`] consumes the inbound stream a byte at a time, so split reads
//! and a per byte decrypt can be layered in front of it. The pure
//! [`decode_subnegotiation`] and [`encode_subnegotiation`] functions are
//! built on the same code.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use alloc::vec::Vec;

use crate::*;
use config::MAX_SUBNEG;
use tnnames::*;

/// Result of [`decode_subnegotiation`]
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Complete {
        option: u8,
        /// Payload with `IAC IAC` undoubled
        payload: Vec<u8>,
        /// Input bytes used, including the trailing `IAC SE`
        consumed: usize,
    },
    /// The terminating `IAC SE` hasn't arrived yet
    NeedMoreData,
}

/// Decodes one subnegotiation starting at `IAC SB`.
///
/// Fails with [`Error::BadFraming`] for input not starting with `IAC SB`,
/// an `IAC` followed by anything but `IAC` or `SE` inside the payload,
/// or a payload longer than [`MAX_SUBNEG`].
pub fn decode_subnegotiation(bytes: &[u8]) -> Result<Decoded> {
    match bytes {
        [] | [IAC] => return Ok(Decoded::NeedMoreData),
        [IAC, SB, ..] => (),
        _ => return error::BadFraming.fail(),
    }

    let mut d = Deframer::new();
    for (i, b) in bytes.iter().enumerate() {
        match d.push(*b) {
            Step::Subneg(option) => {
                return Ok(Decoded::Complete {
                    option,
                    payload: d.take_payload(),
                    consumed: i + 1,
                })
            }
            Step::Framing | Step::Reprocess => return error::BadFraming.fail(),
            Step::None => (),
            // not reachable once inside SB
            _ => return Err(Error::bug()),
        }
    }
    Ok(Decoded::NeedMoreData)
}

/// Frames `payload` as `IAC SB option ... IAC SE`, doubling any `IAC`.
pub fn encode_subnegotiation(option: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let mut v = Vec::with_capacity(payload.len() + 6);
    encode_subnegotiation_into(&mut v, option, payload)?;
    Ok(v)
}

/// Appends the framed subnegotiation to `out`
pub fn encode_subnegotiation_into(out: &mut Vec<u8>, option: u8, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_SUBNEG {
        return error::NoRoom.fail();
    }
    out.extend_from_slice(&[IAC, SB, option]);
    escape_into(out, payload);
    out.extend_from_slice(&[IAC, SE]);
    Ok(())
}

/// Appends data bytes to `out`, doubling `IAC`
pub fn escape_into(out: &mut Vec<u8>, data: &[u8]) {
    for &b in data {
        out.push(b);
        if b == IAC {
            out.push(IAC);
        }
    }
}

/// Appends `IAC verb option`
pub fn command_into(out: &mut Vec<u8>, verb: u8, option: u8) {
    out.extend_from_slice(&[IAC, verb, option]);
}

/// Output of [`Deframer::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Byte consumed, nothing to report yet
    None,
    /// A data byte, already unescaped
    Data(u8),
    /// `IAC WILL/WONT/DO/DONT option`
    Command { verb: u8, option: u8 },
    /// Any other two byte `IAC` command
    Other(u8),
    /// A complete subnegotiation for `option`, fetch it with
    /// [`Deframer::take_payload`]
    Subneg(u8),
    /// The partial subnegotiation was discarded
    Framing,
    /// The partial subnegotiation was discarded at a stray `IAC`. The same
    /// byte must be pushed again.
    Reprocess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    Iac,
    Verb(u8),
    SbOption,
    SbData,
    SbIac,
    SbDiscard,
    SbDiscardIac,
}

/// Incremental parser for the inbound TELNET stream
#[derive(Debug)]
pub struct Deframer {
    state: State,
    option: u8,
    payload: heapless::Vec<u8, MAX_SUBNEG>,
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deframer {
    pub fn new() -> Self {
        Self { state: State::Data, option: 0, payload: heapless::Vec::new() }
    }

    /// Whether the parser is between commands, outside any subnegotiation
    pub fn idle(&self) -> bool {
        self.state == State::Data
    }

    pub fn push(&mut self, b: u8) -> Step {
        match self.state {
            State::Data => {
                if b == IAC {
                    self.state = State::Iac;
                    Step::None
                } else {
                    Step::Data(b)
                }
            }

            State::Iac => match b {
                IAC => {
                    self.state = State::Data;
                    Step::Data(IAC)
                }
                WILL | WONT | DO | DONT => {
                    self.state = State::Verb(b);
                    Step::None
                }
                SB => {
                    self.state = State::SbOption;
                    Step::None
                }
                _ => {
                    self.state = State::Data;
                    Step::Other(b)
                }
            },

            State::Verb(verb) => {
                self.state = State::Data;
                Step::Command { verb, option: b }
            }

            State::SbOption => {
                self.option = b;
                self.payload.clear();
                self.state = State::SbData;
                Step::None
            }

            State::SbData => {
                if b == IAC {
                    self.state = State::SbIac;
                    Step::None
                } else {
                    self.append(b)
                }
            }

            State::SbIac => match b {
                IAC => {
                    self.state = State::SbData;
                    self.append(IAC)
                }
                SE => {
                    self.state = State::Data;
                    Step::Subneg(self.option)
                }
                _ => {
                    debug!("IAC {b} inside subnegotiation of option {}", self.option);
                    self.payload.clear();
                    self.state = State::Iac;
                    Step::Reprocess
                }
            },

            State::SbDiscard => {
                if b == IAC {
                    self.state = State::SbDiscardIac;
                }
                Step::None
            }

            State::SbDiscardIac => match b {
                SE => {
                    self.state = State::Data;
                    Step::None
                }
                IAC => {
                    self.state = State::SbDiscard;
                    Step::None
                }
                _ => {
                    self.state = State::Iac;
                    Step::Reprocess
                }
            },
        }
    }

    fn append(&mut self, b: u8) -> Step {
        if self.payload.push(b).is_err() {
            debug!("Oversized subnegotiation for option {}", self.option);
            self.payload.clear();
            self.state = State::SbDiscard;
            return Step::Framing;
        }
        Step::None
    }

    /// Takes the payload of the subnegotiation just reported by
    /// [`Step::Subneg`]
    pub fn take_payload(&mut self) -> Vec<u8> {
        let p = self.payload.to_vec();
        self.payload.clear();
        p
    }
}

#[cfg(test)]
mod tests {
    use crate::frame::*;
    use crate::tnlog::init_test_log;
    use proptest::prelude::*;

    fn run(d: &mut Deframer, input: &[u8]) -> Vec<Step> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < input.len() {
            let s = d.push(input[i]);
            if s != Step::Reprocess {
                i += 1;
            }
            if s != Step::None {
                out.push(s);
            }
        }
        out
    }

    #[test]
    fn decode_simple() {
        init_test_log();
        let b = [IAC, SB, TELOPT_ENCRYPT, ENCRYPT_END, IAC, SE, b'x'];
        let d = decode_subnegotiation(&b).unwrap();
        assert_eq!(
            d,
            Decoded::Complete { option: TELOPT_ENCRYPT, payload: alloc::vec![ENCRYPT_END], consumed: 6 }
        );
    }

    #[test]
    fn decode_partial() {
        let b = [IAC, SB, TELOPT_AUTHENTICATION, AUTH_SEND, 2, 2, IAC];
        for i in 0..b.len() {
            assert_eq!(decode_subnegotiation(&b[..i]).unwrap(), Decoded::NeedMoreData);
        }
    }

    #[test]
    fn decode_malformed() {
        init_test_log();
        // not a subnegotiation
        assert!(decode_subnegotiation(&[1, 2, 3]).is_err());
        assert!(decode_subnegotiation(&[IAC, WILL, 37]).is_err());
        // stray IAC inside the payload
        let b = [IAC, SB, TELOPT_ENCRYPT, 1, IAC, 3, IAC, SE];
        assert!(matches!(decode_subnegotiation(&b), Err(Error::BadFraming)));

        let mut long = alloc::vec![IAC, SB, TELOPT_AUTHENTICATION];
        long.extend(core::iter::repeat(7u8).take(MAX_SUBNEG + 1));
        long.extend([IAC, SE]);
        assert!(decode_subnegotiation(&long).is_err());
    }

    #[test]
    fn encode_doubles_iac() {
        let e = encode_subnegotiation(38, &[0, 0xff, 1]).unwrap();
        assert_eq!(e, [IAC, SB, 38, 0, IAC, IAC, 1, IAC, SE]);
        let big = alloc::vec![0u8; MAX_SUBNEG + 1];
        assert!(matches!(encode_subnegotiation(38, &big), Err(Error::NoRoom)));
    }

    #[test]
    fn deframer_mixed_stream() {
        init_test_log();
        let mut d = Deframer::new();
        let input = [
            b'a', IAC, IAC, IAC, DO, 37, IAC, 241, IAC, SB, 24, 1, IAC, SE, b'z',
        ];
        let steps = run(&mut d, &input);
        assert_eq!(
            steps,
            [
                Step::Data(b'a'),
                Step::Data(IAC),
                Step::Command { verb: DO, option: 37 },
                Step::Other(241),
                Step::Subneg(24),
                Step::Data(b'z'),
            ]
        );
        assert!(d.idle());
    }

    #[test]
    fn deframer_split_and_take() {
        let mut d = Deframer::new();
        let input = [IAC, SB, 38, 7, IAC, IAC, 9, IAC, SE];
        for b in &input[..5] {
            assert_eq!(d.push(*b), Step::None);
        }
        for b in &input[5..8] {
            assert_eq!(d.push(*b), Step::None);
        }
        assert_eq!(d.push(SE), Step::Subneg(38));
        assert_eq!(d.take_payload(), [7, IAC, 9]);
    }

    #[test]
    fn deframer_resyncs_at_stray_iac() {
        init_test_log();
        let mut d = Deframer::new();
        // IAC WILL inside SB abandons the SB and is processed as a command
        let input = [IAC, SB, 37, 1, 2, IAC, WILL, 38, b'q'];
        let steps = run(&mut d, &input);
        assert_eq!(
            steps,
            [Step::Reprocess, Step::Command { verb: WILL, option: 38 }, Step::Data(b'q')]
        );
    }

    #[test]
    fn deframer_discards_oversize() {
        let mut d = Deframer::new();
        let mut input = alloc::vec![IAC, SB, 37];
        input.extend(core::iter::repeat(1u8).take(MAX_SUBNEG + 10));
        input.extend([IAC, SE, b'k']);
        let steps = run(&mut d, &input);
        assert_eq!(steps, [Step::Framing, Step::Data(b'k')]);
    }

    proptest! {
        #[test]
        fn encode_decode(option: u8, payload in proptest::collection::vec(any::<u8>(), 0..300)) {
            let e = encode_subnegotiation(option, &payload).unwrap();
            let d = decode_subnegotiation(&e).unwrap();
            prop_assert_eq!(d, Decoded::Complete { option, payload, consumed: e.len() });
        }

        #[test]
        fn deframer_never_panics(input in proptest::collection::vec(any::<u8>(), 0..500)) {
            let mut d = Deframer::new();
            run(&mut d, &input);
        }
    }
}
