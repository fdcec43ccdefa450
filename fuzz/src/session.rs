#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use std::hint::black_box;

use tnsec::*;

use crate::*;

#[derive(Clone)]
pub struct Config {
    pub policy: Policy,
}

impl Default for Config {
    fn default() -> Self {
        Self { policy: Policy { forward_credentials: true, ..Policy::default() } }
    }
}

/// Credentials that accept anything starting with `ok`
struct FuzzCreds {
    have_tickets: bool,
}

impl CredentialProvider for FuzzCreds {
    fn acquire_initial_token(&mut self, _mech: MechanismId) -> CredResult<InitialToken> {
        if !self.have_tickets {
            return Err(CredError::Unavailable);
        }
        Ok(InitialToken {
            token: b"ok ticket".to_vec(),
            session_key: SessionKey::new(*b"fuzzkey1"),
            nonce: [7; 8],
        })
    }

    fn validate_token(&mut self, _mech: MechanismId, token: &[u8],
        _remote_user: Option<&str>) -> CredResult<Validated> {
        if !token.starts_with(b"ok") {
            return Err(CredError::Refused { reason: "bad ticket" });
        }
        Ok(Validated {
            principal: PrincipalName::try_from("fuzz").map_err(|_| CredError::Unavailable)?,
            session_key: SessionKey::new(*b"fuzzkey1"),
            nonce: [7; 8],
        })
    }

    fn login(&mut self, _mech: MechanismId, _retry: bool) -> CredResult<Login> {
        Ok(Login {
            user: PrincipalName::try_from("fuzz").map_err(|_| CredError::Unavailable)?,
            password: String::from("ok password").into(),
        })
    }

    fn check_password(&mut self, _user: &str, password: &str) -> bool {
        password.starts_with("ok")
    }

    fn forward_credentials(&mut self, _key: &SessionKey) -> CredResult<Vec<u8>> {
        Ok(b"ok forwarded".to_vec())
    }

    fn accept_forwarded(&mut self, _principal: &str, blob: &[u8]) -> bool {
        blob.starts_with(b"ok")
    }
}

pub fn run(data: &[u8], conf: &Config) -> Result<()> {
    let mut input = FuzzInput::new(data)?;

    let role = if input.chance(0.5)? { Role::Initiator } else { Role::Responder };
    let mut creds = FuzzCreds { have_tickets: input.chance(0.7)? };
    let mut sess = Session::new(role, conf.policy.clone());
    sess.start()?;

    while !input.data.is_empty() {
        let len = input.control_u32()? as usize % 64 + 1;
        let chunk = input.take_data(len);
        let out = sess.feed_input(chunk, &mut creds)?;
        black_box(out);
        black_box(sess.take_output());
        for ev in sess.events() {
            black_box(ev);
        }

        if input.chance(0.1)? {
            black_box(sess.wrap_output(b"some\xffdata")?);
        }
        if input.chance(0.05)? {
            sess.end_output()?;
        }
        if input.chance(0.05)? {
            sess.start_output()?;
        }
        if input.chance(0.05)? {
            // fails when the peer refused ENCRYPT
            let _ = sess.request_start();
        }
    }
    Ok(())
}
