//! SRA, the Secure RPC style authenticated password exchange.
//!
//! Both ends send `KEY` with a Diffie-Hellman public value in hex. The shared
//! value gives a DES key, used both to hide the `USER` and `PASS` messages and
//! as the session key.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

use alloc::string::String;
use alloc::vec::Vec;

use num_bigint::BigUint;
use zeroize::Zeroizing;

use crate::*;
use block::{cbc_decrypt, cbc_encrypt, set_odd_parity, Block, SessionKey, BLOCK_SIZE};
use config::{MAX_PASSWORD, MAX_SRA_ATTEMPTS};
use mech::{
    name_from_bytes, Exchange, MechCtx, MechanismId, MechanismResult, PrincipalName, Reason,
    Role, Token,
};
use random::fill_random;
use tnnames::*;

const HEXMODULUS: &str = "d4a0ba0250b6fd2ec626e7efd637df76c716e22d0944b88b";
const PROOT: u32 = 3;
/// Length of a public key on the wire
pub(crate) const HEXKEYBYTES: usize = 48;
const KEYBYTES: usize = 24;

fn modulus() -> BigUint {
    // OK unwrap: constant
    BigUint::parse_bytes(HEXMODULUS.as_bytes(), 16).unwrap()
}

/// An ephemeral key pair
struct KeyPair {
    secret: Zeroizing<Vec<u8>>,
    public: [u8; HEXKEYBYTES],
}

impl KeyPair {
    fn generate() -> Result<Self> {
        let mut secret = Zeroizing::new(alloc::vec![0u8; KEYBYTES]);
        fill_random(&mut secret)?;
        let p = modulus();
        let s = BigUint::from_bytes_be(&secret) % &p;
        let y = BigUint::from(PROOT).modpow(&s, &p);

        let mut be = [0u8; KEYBYTES];
        let yb = y.to_bytes_be();
        let off = KEYBYTES.checked_sub(yb.len()).trap()?;
        be[off..].copy_from_slice(&yb);
        let mut public = [0u8; HEXKEYBYTES];
        hex::encode_to_slice(be, &mut public).trap()?;
        Ok(Self { secret, public })
    }

    /// Derives the DES key shared with the owner of `peer`.
    ///
    /// A public value shorter than [`HEXKEYBYTES`] is refused before
    /// any arithmetic.
    fn common_key(&self, peer: &[u8]) -> Result<SessionKey> {
        if peer.len() < HEXKEYBYTES {
            debug!("SRA public key {} bytes", peer.len());
            return error::BadToken { msg: "short public key" }.fail();
        }
        let mut raw = [0u8; KEYBYTES];
        hex::decode_to_slice(&peer[..HEXKEYBYTES], &mut raw)
            .map_err(|_| Error::BadToken { msg: "public key not hex" })?;

        let p = modulus();
        let y = BigUint::from_bytes_be(&raw);
        let one = BigUint::from(1u32);
        if y <= one || y >= &p - &one {
            return error::BadToken { msg: "public key out of range" }.fail();
        }
        let s = BigUint::from_bytes_be(&self.secret) % &p;
        let z = y.modpow(&s, &p);

        let mut le = Zeroizing::new(z.to_bytes_le());
        le.resize(KEYBYTES, 0);
        let mut k: Block = [0u8; BLOCK_SIZE];
        k.copy_from_slice(&le[8..16]);
        set_odd_parity(&mut k);
        Ok(SessionKey::new(k))
    }
}

/// DES-CBC encrypts `s` and hex encodes it
fn pk_encode(s: &str, key: &SessionKey) -> Result<Vec<u8>> {
    if s.len() > MAX_PASSWORD {
        return error::NoRoom.fail();
    }
    let padded = s.len().div_ceil(BLOCK_SIZE).max(1) * BLOCK_SIZE;
    let mut buf = Zeroizing::new(alloc::vec![0u8; padded]);
    buf[..s.len()].copy_from_slice(s.as_bytes());
    cbc_encrypt(key, &mut buf)?;
    Ok(hex::encode(&*buf).into_bytes())
}

/// Inverse of [`pk_encode`], cut at the first NUL
fn pk_decode(data: &[u8], key: &SessionKey) -> Result<Zeroizing<String>> {
    if data.len() > 2 * (MAX_PASSWORD + BLOCK_SIZE) {
        return error::NoRoom.fail();
    }
    let mut buf = Zeroizing::new(
        hex::decode(data).map_err(|_| Error::BadToken { msg: "not hex" })?,
    );
    cbc_decrypt(key, &mut buf)?;
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    let s = core::str::from_utf8(&buf[..end])?;
    Ok(Zeroizing::new(String::from(s)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SraState {
    Start,
    /// Our KEY sent, waiting for the peer's (initiator) or USER (responder)
    KeySent,
    UserSent,
    PassSent,
    AwaitPass,
    Done,
    Failed,
}

pub(crate) struct Sra {
    role: Role,
    state: SraState,
    keys: Option<KeyPair>,
    key: Option<SessionKey>,
    user: PrincipalName,
    password: Option<Zeroizing<String>>,
    attempts: usize,
}

impl Sra {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: SraState::Start,
            keys: None,
            key: None,
            user: PrincipalName::new(),
            password: None,
            attempts: 0,
        }
    }

    fn key(&self) -> Result<&SessionKey> {
        self.key.as_ref().trap()
    }

    fn wrong_step(&mut self, step: u8) -> Result<MechanismResult> {
        debug!("SRA step {step} unexpected in {:?}", self.state);
        self.state = SraState::Failed;
        error::BadToken { msg: "unexpected step" }.fail()
    }

    fn send_user(&mut self, ctx: &mut MechCtx, retry: bool) -> Result<MechanismResult> {
        let login = ctx.creds.login(MechanismId::Sra, retry)?;
        let enc = pk_encode(&login.user, self.key()?)?;
        ctx.send(SRA_USER, &enc);
        self.user = login.user;
        self.password = Some(login.password);
        self.state = SraState::UserSent;
        Ok(MechanismResult::NeedMore { expect: SRA_CONTINUE })
    }
}

impl Exchange for Sra {
    fn offer(&mut self, ctx: &mut MechCtx) -> Result<MechanismResult> {
        debug_assert_eq!(self.role, Role::Initiator);
        let kp = KeyPair::generate()?;
        ctx.send(SRA_KEY, &kp.public);
        self.keys = Some(kp);
        self.state = SraState::KeySent;
        Ok(MechanismResult::NeedMore { expect: SRA_KEY })
    }

    fn accept(&mut self, tok: Token, ctx: &mut MechCtx) -> Result<MechanismResult> {
        match (self.state, tok.step) {
            (SraState::Start, SRA_KEY) => {
                if tok.data.len() < HEXKEYBYTES {
                    self.state = SraState::Failed;
                    return error::BadToken { msg: "short public key" }.fail();
                }
                let kp = KeyPair::generate()?;
                self.key = Some(kp.common_key(tok.data)?);
                ctx.send(SRA_KEY, &kp.public);
                self.keys = Some(kp);
                self.state = SraState::KeySent;
                Ok(MechanismResult::NeedMore { expect: SRA_USER })
            }

            (SraState::KeySent, SRA_USER) => {
                let u = pk_decode(tok.data, self.key()?)?;
                self.user = name_from_bytes(u.as_bytes())?;
                trace!("SRA user {}", self.user);
                ctx.send(SRA_CONTINUE, &[]);
                self.state = SraState::AwaitPass;
                Ok(MechanismResult::NeedMore { expect: SRA_PASS })
            }

            (SraState::AwaitPass, SRA_PASS) => {
                let key = self.key()?.clone();
                let pw = pk_decode(tok.data, &key)?;
                if ctx.creds.check_password(&self.user, &pw) {
                    ctx.send(SRA_ACCEPT, &[]);
                    self.state = SraState::Done;
                    return Ok(MechanismResult::Accept { principal: self.user.clone(), key });
                }

                self.attempts += 1;
                info!("SRA password failure {} for {}", self.attempts, self.user);
                if self.attempts >= MAX_SRA_ATTEMPTS {
                    let reason = "Too many password failures";
                    ctx.send(SRA_REJECT, reason.as_bytes());
                    self.state = SraState::Failed;
                    Ok(MechanismResult::reject(reason))
                } else {
                    ctx.send(SRA_CONTINUE, &[]);
                    self.state = SraState::KeySent;
                    Ok(MechanismResult::NeedMore { expect: SRA_USER })
                }
            }

            (_, step) => self.wrong_step(step),
        }
    }

    fn finish_mutual(&mut self, tok: Token, ctx: &mut MechCtx) -> Result<MechanismResult> {
        match (self.state, tok.step) {
            (_, SRA_REJECT) => {
                self.state = SraState::Failed;
                Ok(MechanismResult::Reject { reason: Reason::from_wire(tok.data) })
            }

            (SraState::KeySent, SRA_KEY) => {
                let kp = self.keys.as_ref().trap()?;
                self.key = Some(kp.common_key(tok.data)?);
                self.send_user(ctx, false)
            }

            (SraState::UserSent, SRA_CONTINUE) => {
                let pw = self.password.as_ref().trap()?;
                let enc = pk_encode(pw, self.key()?)?;
                ctx.send(SRA_PASS, &enc);
                self.state = SraState::PassSent;
                Ok(MechanismResult::NeedMore { expect: SRA_ACCEPT })
            }

            // password refused, try again
            (SraState::PassSent, SRA_CONTINUE) => self.send_user(ctx, true),

            (SraState::PassSent, SRA_ACCEPT) => {
                self.state = SraState::Done;
                self.password = None;
                let key = self.key()?.clone();
                Ok(MechanismResult::Accept { principal: self.user.clone(), key })
            }

            (_, step) => self.wrong_step(step),
        }
    }

    fn reject_step(&self) -> u8 {
        SRA_REJECT
    }
}

#[cfg(test)]
mod tests {
    use crate::behaviour::*;
    use crate::mech::{AuthPair, Mechanism, OutToken};
    use crate::sra::*;
    use crate::tnlog::init_test_log;

    #[test]
    fn shared_key_agrees() {
        init_test_log();
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        assert!(a.public.iter().all(|c| c.is_ascii_hexdigit()));
        let ka = a.common_key(&b.public).unwrap();
        let kb = b.common_key(&a.public).unwrap();
        assert_eq!(ka, kb);
    }

    #[test]
    fn bad_public_keys() {
        let a = KeyPair::generate().unwrap();
        assert!(a.common_key(&a.public[..10]).is_err());
        assert!(a.common_key(&[b'z'; HEXKEYBYTES]).is_err());
        let one = alloc::format!("{:0>48}", "1");
        assert!(a.common_key(one.as_bytes()).is_err());
        assert!(a.common_key(HEXMODULUS.as_bytes()).is_err());
    }

    #[test]
    fn pk_round_trip() {
        let k = SessionKey::new(*b"sra key!");
        let e = pk_encode("hunter2", &k).unwrap();
        assert_eq!(e.len(), 16);
        assert_eq!(pk_decode(&e, &k).unwrap().as_str(), "hunter2");
        let e = pk_encode("exactly8", &k).unwrap();
        assert_eq!(pk_decode(&e, &k).unwrap().as_str(), "exactly8");
        assert!(pk_decode(b"abc", &k).is_err());
    }

    /// Accepts "open sesame" after the given number of wrong passwords
    struct Users {
        wrong: usize,
        logins: usize,
    }

    impl CredentialProvider for Users {
        fn login(&mut self, mech: MechanismId, retry: bool) -> CredResult<Login> {
            assert_eq!(mech, MechanismId::Sra);
            assert_eq!(retry, self.logins > 0);
            self.logins += 1;
            let pw = if self.logins > self.wrong { "open sesame" } else { "guess" };
            Ok(Login {
                user: "dave".try_into().unwrap(),
                password: Zeroizing::new(pw.into()),
            })
        }

        fn check_password(&mut self, user: &str, password: &str) -> bool {
            user == "dave" && password == "open sesame"
        }
    }

    fn run(wrong: usize) -> (MechanismResult, MechanismResult, Vec<u8>) {
        let pair = AuthPair::new(MechanismId::Sra, AUTH_HOW_ONE_WAY);
        let mut creds = Users { wrong, logins: 0 };
        let mut cli = Mechanism::new(&pair, Role::Initiator).unwrap();
        let mut srv = Mechanism::new(&pair, Role::Responder).unwrap();
        let mut to_srv: Vec<OutToken> = Vec::new();
        let mut to_cli: Vec<OutToken> = Vec::new();
        let mut steps = Vec::new();
        let mut ctx = MechCtx { creds: &mut creds, remote_user: None, forward: false, out: &mut to_srv };
        let mut c = cli.offer(&mut ctx);
        let mut s = MechanismResult::NeedMore { expect: 0 };
        while !to_srv.is_empty() || !to_cli.is_empty() {
            for t in core::mem::take(&mut to_srv) {
                steps.push(t.step);
                let mut ctx = MechCtx { creds: &mut creds, remote_user: None, forward: false, out: &mut to_cli };
                s = srv.accept(Token { step: t.step, data: &t.data }, &mut ctx);
            }
            for t in core::mem::take(&mut to_cli) {
                steps.push(t.step);
                let mut ctx = MechCtx { creds: &mut creds, remote_user: None, forward: false, out: &mut to_srv };
                c = cli.finish_mutual(Token { step: t.step, data: &t.data }, &mut ctx);
            }
        }
        (c, s, steps)
    }

    #[test]
    fn sra_success() {
        init_test_log();
        let (c, s, steps) = run(0);
        assert_eq!(steps, [SRA_KEY, SRA_KEY, SRA_USER, SRA_CONTINUE, SRA_PASS, SRA_ACCEPT]);
        let MechanismResult::Accept { principal, key: ck } = c else { panic!("initiator failed") };
        let MechanismResult::Accept { key: sk, .. } = s else { panic!("responder failed") };
        assert_eq!(principal, "dave");
        assert_eq!(ck, sk);
    }

    #[test]
    fn sra_retry_then_success() {
        init_test_log();
        let (c, s, _) = run(MAX_SRA_ATTEMPTS - 1);
        assert!(matches!(c, MechanismResult::Accept { .. }));
        assert!(matches!(s, MechanismResult::Accept { .. }));
    }

    #[test]
    fn sra_too_many_failures() {
        init_test_log();
        let (c, s, steps) = run(MAX_SRA_ATTEMPTS);
        assert!(matches!(c, MechanismResult::Reject { .. }));
        assert!(matches!(s, MechanismResult::Reject { .. }));
        assert_eq!(steps.last(), Some(&SRA_REJECT));
    }

    #[test]
    fn short_key_rejects_immediately() {
        init_test_log();
        let mut creds = Users { wrong: 0, logins: 0 };
        let mut srv = Sra::new(Role::Responder);
        let mut out = Vec::new();
        let mut ctx = MechCtx { creds: &mut creds, remote_user: None, forward: false, out: &mut out };
        assert!(srv.accept(Token { step: SRA_KEY, data: &[b'a'; 10] }, &mut ctx).is_err());
        assert!(srv.key.is_none());
        assert!(srv.keys.is_none());
    }
}
