#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::vec::Vec;

    use zeroize::Zeroizing;

    use crate::behaviour::*;
    use crate::tnlog::init_test_log;
    use crate::tnnames::*;
    use crate::*;

    const TICKET_KEY: [u8; 8] = *b"tktKEY!!";

    /// A ticket cache and password database rolled into one
    #[derive(Default)]
    struct FakeKdc {
        no_tickets: bool,
        refuse_tickets: bool,
        refuse_forwarded: bool,
        password: &'static str,
        forwarded: Option<Vec<u8>>,
    }

    impl FakeKdc {
        fn new() -> Self {
            Self { password: "hunter2", ..Default::default() }
        }
    }

    impl CredentialProvider for FakeKdc {
        fn acquire_initial_token(&mut self, _mech: MechanismId) -> CredResult<InitialToken> {
            if self.no_tickets {
                return Err(CredError::Unavailable);
            }
            Ok(InitialToken {
                token: b"alice@EXAMPLE ticket \xff\xff".to_vec(),
                session_key: SessionKey::new(TICKET_KEY),
                nonce: *b"nonce123",
            })
        }

        fn validate_token(&mut self, _mech: MechanismId, token: &[u8],
            _remote_user: Option<&str>) -> CredResult<Validated> {
            if self.refuse_tickets || !token.starts_with(b"alice@EXAMPLE") {
                return Err(CredError::Refused { reason: "ticket expired" });
            }
            Ok(Validated {
                principal: "alice".try_into().unwrap(),
                session_key: SessionKey::new(TICKET_KEY),
                nonce: *b"nonce123",
            })
        }

        fn login(&mut self, _mech: MechanismId, _retry: bool) -> CredResult<Login> {
            Ok(Login {
                user: "alice".try_into().unwrap(),
                password: Zeroizing::new(String::from(self.password)),
            })
        }

        fn check_password(&mut self, user: &str, password: &str) -> bool {
            user == "alice" && password == "hunter2"
        }

        fn forward_credentials(&mut self, _key: &SessionKey) -> CredResult<Vec<u8>> {
            Ok(b"forwardable tgt".to_vec())
        }

        fn accept_forwarded(&mut self, principal: &str, blob: &[u8]) -> bool {
            assert_eq!(principal, "alice");
            if self.refuse_forwarded {
                return false;
            }
            self.forwarded = Some(blob.to_vec());
            true
        }
    }

    struct Pair {
        cli: Session,
        srv: Session,
        cli_creds: FakeKdc,
        srv_creds: FakeKdc,
    }

    impl Pair {
        fn new(cli_policy: Policy, srv_policy: Policy) -> Self {
            Self {
                cli: Session::new(Role::Initiator, cli_policy),
                srv: Session::new(Role::Responder, srv_policy),
                cli_creds: FakeKdc::new(),
                srv_creds: FakeKdc::new(),
            }
        }

        /// Exchanges negotiation until both sides go quiet
        fn run(&mut self) {
            self.cli.start().unwrap();
            self.srv.start().unwrap();
            for _ in 0..100 {
                let c2s = self.cli.take_output();
                let s2c = self.srv.take_output();
                if c2s.is_empty() && s2c.is_empty() {
                    return;
                }
                let d = self.srv.feed_input(&c2s, &mut self.srv_creds).unwrap();
                assert!(d.is_empty(), "server leaked {d:?}");
                let d = self.cli.feed_input(&s2c, &mut self.cli_creds).unwrap();
                assert!(d.is_empty(), "client leaked {d:?}");
            }
            panic!("negotiation didn't finish");
        }
    }

    fn authenticated(events: &[Event]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Authenticated { principal } => Some(principal.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Sends `data` both ways, checking it is encrypted on the wire
    fn check_encrypted(p: &mut Pair, data: &[u8]) {
        let wire = p.cli.wrap_output(data).unwrap();
        assert_eq!(wire.len(), data.len());
        assert_ne!(wire, data);
        assert_eq!(p.srv.feed_input(&wire, &mut p.srv_creds).unwrap(), data);

        let wire = p.srv.wrap_output(data).unwrap();
        assert_ne!(wire, data);
        assert_eq!(p.cli.feed_input(&wire, &mut p.cli_creds).unwrap(), data);
    }

    #[test]
    fn kerberos5_mutual() {
        init_test_log();
        let mut p = Pair::new(Policy::default(), Policy::default());
        p.run();

        let srv_ev: Vec<Event> = p.srv.events().collect();
        let cli_ev: Vec<Event> = p.cli.events().collect();
        assert_eq!(authenticated(&srv_ev), ["alice"]);
        assert_eq!(authenticated(&cli_ev), ["alice"]);
        assert!(!srv_ev.iter().any(|e| matches!(e, Event::Rejected { .. })));
        // drained
        assert!(p.srv.poll_event().is_none());

        assert!(p.cli.is_encrypting() && p.cli.is_decrypting());
        assert!(p.srv.is_encrypting() && p.srv.is_decrypting());
        assert!(cli_ev.contains(&Event::EncryptionStarted {
            dir: Direction::Out,
            kind: CipherType::DesCfb64
        }));
        check_encrypted(&mut p, b"uname -a\r\n\xff\xff");
        check_encrypted(&mut p, &[0u8; 100]);
    }

    #[test]
    fn kerberos4_mutual() {
        init_test_log();
        let krb4 = [AuthPair::new(MechanismId::Kerberos4, AUTH_WHO_CLIENT | AUTH_HOW_MUTUAL)];
        let policy = Policy::default().with_auth_pairs(&krb4).unwrap();
        let mut p = Pair::new(policy.clone(), policy);
        p.run();
        assert!(p.cli.is_authenticated());
        assert!(p.srv.is_authenticated());
        check_encrypted(&mut p, b"krb4 data");
    }

    #[test]
    fn forwarding() {
        init_test_log();
        let cli_policy = Policy { forward_credentials: true, ..Policy::default() };
        let mut p = Pair::new(cli_policy, Policy::default());
        p.run();
        assert_eq!(p.srv_creds.forwarded.as_deref(), Some(&b"forwardable tgt"[..]));
        let cli_ev: Vec<Event> = p.cli.events().collect();
        assert!(cli_ev.contains(&Event::CredentialsForwarded { accepted: true }));
        assert_eq!(authenticated(&cli_ev), ["alice"]);
        check_encrypted(&mut p, b"after forwarding");
    }

    #[test]
    fn refused_forwarding_keeps_session_key() {
        init_test_log();
        let cli_policy = Policy { forward_credentials: true, ..Policy::default() };
        let mut p = Pair::new(cli_policy, Policy::default());
        p.srv_creds.refuse_forwarded = true;
        p.run();
        assert!(p.srv_creds.forwarded.is_none());
        let cli_ev: Vec<Event> = p.cli.events().collect();
        assert!(cli_ev.contains(&Event::CredentialsForwarded { accepted: false }));
        assert_eq!(authenticated(&cli_ev), ["alice"]);
        assert!(p.cli.is_authenticated() && p.srv.is_authenticated());
        check_encrypted(&mut p, b"forwarding refused");
    }

    #[test]
    fn falls_back_to_sra() {
        init_test_log();
        let mut p = Pair::new(Policy::default(), Policy::default());
        p.cli_creds.no_tickets = true;
        p.run();
        assert!(matches!(p.srv.auth_outcome(), AuthOutcome::Authenticated { principal }
            if principal == "alice"));
        let srv_ev: Vec<Event> = p.srv.events().collect();
        assert_eq!(authenticated(&srv_ev), ["alice"]);
        check_encrypted(&mut p, b"sra data");
    }

    #[test]
    fn refused_tickets_fall_back() {
        init_test_log();
        let mut p = Pair::new(Policy::default(), Policy::default());
        p.srv_creds.refuse_tickets = true;
        p.run();
        assert!(p.cli.is_authenticated());
        let srv_ev: Vec<Event> = p.srv.events().collect();
        // one failure per Kerberos version, whatever the modifiers, then SRA
        let rejected = srv_ev.iter().filter(|e| matches!(e, Event::Rejected { .. })).count();
        assert_eq!(rejected, 2);
        assert_eq!(authenticated(&srv_ev), ["alice"]);
        check_encrypted(&mut p, b"sra after kerberos");
    }

    #[test]
    fn no_fallback() {
        init_test_log();
        let policy = Policy { fallback: false, ..Policy::default() };
        let mut p = Pair::new(policy, Policy::default());
        p.srv_creds.refuse_tickets = true;
        p.run();
        let AuthOutcome::Rejected { reason } = p.cli.auth_outcome() else {
            panic!("client wasn't rejected")
        };
        assert_eq!(reason.as_str(), "ticket expired");
        assert!(!p.cli.is_encrypting());
        assert!(!p.srv.is_decrypting());
    }

    #[test]
    fn sra_wrong_password() {
        init_test_log();
        let sra = [AuthPair::new(MechanismId::Sra, AUTH_WHO_CLIENT | AUTH_HOW_ONE_WAY)];
        let policy = Policy::default().with_auth_pairs(&sra).unwrap();
        let mut p = Pair::new(policy.clone(), policy);
        p.cli_creds.password = "letmein";
        p.run();
        assert!(matches!(p.cli.auth_outcome(), AuthOutcome::Rejected { .. }));
        assert!(matches!(p.srv.auth_outcome(), AuthOutcome::Rejected { .. }));
        // encryption types agreed but never started without a key
        assert_eq!(p.cli.encryption_phase(Direction::Out), Phase::KeyExchanged);
        assert!(!p.cli.is_encrypting());
    }

    #[test]
    fn encrypted_password() {
        init_test_log();
        let pw = [AuthPair::new(MechanismId::EncPwd, AUTH_WHO_CLIENT | AUTH_HOW_MUTUAL)];
        let policy = Policy::default().with_auth_pairs(&pw).unwrap();
        let mut p = Pair::new(policy.clone(), policy);
        p.run();
        assert!(p.srv.is_authenticated());
        check_encrypted(&mut p, b"encpwd");
    }

    #[test]
    fn sra_short_key() {
        init_test_log();
        let mut srv = Session::new(Role::Responder, Policy::default());
        let mut creds = FakeKdc::new();
        srv.start().unwrap();
        srv.feed_input(&[IAC, WILL, TELOPT_AUTHENTICATION], &mut creds).unwrap();
        srv.take_output();

        let mut is = alloc::vec![IAC, SB, TELOPT_AUTHENTICATION, AUTH_IS, AUTHTYPE_SRA, 0, SRA_KEY];
        is.extend_from_slice(b"0123456789");
        is.extend_from_slice(&[IAC, SE]);
        srv.feed_input(&is, &mut creds).unwrap();

        let reply = srv.take_output();
        assert_eq!(reply[..7], [IAC, SB, TELOPT_AUTHENTICATION, AUTH_REPLY, AUTHTYPE_SRA, 0, SRA_REJECT]);
        let ev: Vec<Event> = srv.events().collect();
        assert!(authenticated(&ev).is_empty());
        assert!(matches!(ev[..], [Event::Rejected { .. }]));
        assert!(!srv.is_authenticated());
    }

    #[test]
    fn start_waits_for_authentication() {
        init_test_log();
        let mut cli = Session::new(Role::Initiator, Policy::default());
        let mut creds = FakeKdc::new();
        cli.start().unwrap();
        cli.feed_input(&[IAC, WILL, TELOPT_ENCRYPT, IAC, DO, TELOPT_ENCRYPT], &mut creds).unwrap();
        cli.take_output();

        let mut msgs = alloc::vec![
            IAC, SB, TELOPT_ENCRYPT, ENCRYPT_IS, ENCTYPE_DES_OFB64, FB64_IV,
            1, 2, 3, 4, 5, 6, 7, 8, IAC, SE,
            IAC, SB, TELOPT_ENCRYPT, ENCRYPT_START, IAC, SE,
        ];
        msgs.extend_from_slice(b"in the clear");
        let d = cli.feed_input(&msgs, &mut creds).unwrap();
        assert_eq!(d, b"in the clear");
        assert!(!cli.is_decrypting());
        assert_eq!(cli.encryption_phase(Direction::In), Phase::TypeAccepted);
        assert!(cli.poll_event().is_none());

        // a duplicate START is still only queued once
        cli.feed_input(&[IAC, SB, TELOPT_ENCRYPT, ENCRYPT_START, IAC, SE], &mut creds).unwrap();
        assert!(cli.poll_event().is_none());
    }

    #[test]
    fn end_output_returns_to_clear() {
        init_test_log();
        let mut p = Pair::new(Policy::default(), Policy::default());
        p.run();
        p.cli.events().for_each(drop);
        p.srv.events().for_each(drop);

        p.cli.end_output().unwrap();
        assert!(!p.cli.is_encrypting());
        let wire = p.cli.wrap_output(b"plain").unwrap();
        // END was encrypted, the data after it is not
        assert!(wire.ends_with(b"plain"));
        assert_ne!(wire[..3], [IAC, SB, TELOPT_ENCRYPT]);
        let d = p.srv.feed_input(&wire, &mut p.srv_creds).unwrap();
        assert_eq!(d, b"plain");
        assert!(!p.srv.is_decrypting());
        assert_eq!(p.srv.poll_event(), Some(Event::EncryptionEnded { dir: Direction::In }));
        assert_eq!(p.cli.poll_event(), Some(Event::EncryptionEnded { dir: Direction::Out }));

        // the server still encrypts to us
        assert!(p.srv.is_encrypting());
        let wire = p.srv.wrap_output(b"still secret").unwrap();
        assert_eq!(p.cli.feed_input(&wire, &mut p.cli_creds).unwrap(), b"still secret");

        // and we can ask it to stop
        p.cli.request_end().unwrap();
        p.run();
        assert!(!p.srv.is_encrypting());
        assert!(!p.cli.is_decrypting());

        // then start again
        p.cli.request_start().unwrap();
        p.run();
        assert!(p.srv.is_encrypting());
        assert!(p.cli.is_decrypting());
    }
}
