//! Numbered TELNET commands, options, and sub-message identifiers.
//!
//! This module also serves as an index of the relevant specifications.

/// [RFC854](https://tools.ietf.org/html/rfc854) Interpret As Command
pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
/// Subnegotiation begin
pub const SB: u8 = 250;
/// Subnegotiation end
pub const SE: u8 = 240;
pub const NOP: u8 = 241;

/// [RFC2941](https://tools.ietf.org/html/rfc2941)
pub const TELOPT_AUTHENTICATION: u8 = 37;
/// [RFC2946](https://tools.ietf.org/html/rfc2946)
pub const TELOPT_ENCRYPT: u8 = 38;

// RFC2941 authentication sub-commands
pub const AUTH_IS: u8 = 0;
pub const AUTH_SEND: u8 = 1;
pub const AUTH_REPLY: u8 = 2;
pub const AUTH_NAME: u8 = 3;

// Authentication types
pub const AUTHTYPE_NULL: u8 = 0;
pub const AUTHTYPE_KERBEROS_V4: u8 = 1;
pub const AUTHTYPE_KERBEROS_V5: u8 = 2;
/// SRA as shipped with BSD telnet. Collides with the IANA SRP number.
pub const AUTHTYPE_SRA: u8 = 5;
/// The IANA "RSA" slot, used by the encrypted password exchange.
pub const AUTHTYPE_RSA_ENCPWD: u8 = 6;

// Authentication type modifiers
pub const AUTH_WHO_MASK: u8 = 1;
pub const AUTH_WHO_CLIENT: u8 = 0;
pub const AUTH_WHO_SERVER: u8 = 1;
pub const AUTH_HOW_MASK: u8 = 2;
pub const AUTH_HOW_ONE_WAY: u8 = 0;
pub const AUTH_HOW_MUTUAL: u8 = 2;
pub const AUTH_ENCRYPT_MASK: u8 = 0x14;
pub const AUTH_ENCRYPT_OFF: u8 = 0;
pub const AUTH_ENCRYPT_USING_TELOPT: u8 = 4;
pub const AUTH_ENCRYPT_AFTER_EXCHANGE: u8 = 0x10;
pub const INI_CRED_FWD_MASK: u8 = 8;
pub const INI_CRED_FWD_OFF: u8 = 0;
pub const INI_CRED_FWD_ON: u8 = 8;

/// [RFC1411](https://tools.ietf.org/html/rfc1411) Kerberos version 4
pub const KRB4_AUTH: u8 = 0;
pub const KRB4_REJECT: u8 = 1;
pub const KRB4_ACCEPT: u8 = 2;
pub const KRB4_CHALLENGE: u8 = 3;
pub const KRB4_RESPONSE: u8 = 4;

/// [RFC2942](https://tools.ietf.org/html/rfc2942) Kerberos version 5
pub const KRB5_AUTH: u8 = 0;
pub const KRB5_REJECT: u8 = 1;
pub const KRB5_ACCEPT: u8 = 2;
pub const KRB5_RESPONSE: u8 = 3;
pub const KRB5_FORWARD: u8 = 4;
pub const KRB5_FORWARD_ACCEPT: u8 = 5;
pub const KRB5_FORWARD_REJECT: u8 = 6;

// SRA
pub const SRA_KEY: u8 = 0;
pub const SRA_USER: u8 = 1;
pub const SRA_CONTINUE: u8 = 2;
pub const SRA_PASS: u8 = 3;
pub const SRA_ACCEPT: u8 = 4;
pub const SRA_REJECT: u8 = 5;

// Encrypted password
pub const ENCPWD_AUTH: u8 = 0;
pub const ENCPWD_REJECT: u8 = 1;
pub const ENCPWD_ACCEPT: u8 = 2;
pub const ENCPWD_CHALLENGE: u8 = 3;
pub const ENCPWD_ACK: u8 = 4;

// RFC2946 encryption sub-commands
pub const ENCRYPT_IS: u8 = 0;
pub const ENCRYPT_SUPPORT: u8 = 1;
pub const ENCRYPT_REPLY: u8 = 2;
pub const ENCRYPT_START: u8 = 3;
pub const ENCRYPT_END: u8 = 4;
pub const ENCRYPT_REQUEST_START: u8 = 5;
pub const ENCRYPT_REQUEST_END: u8 = 6;
pub const ENCRYPT_ENC_KEYID: u8 = 7;
pub const ENCRYPT_DEC_KEYID: u8 = 8;

// Encryption types
pub const ENCTYPE_NULL: u8 = 0;
/// [RFC2952](https://tools.ietf.org/html/rfc2952)
pub const ENCTYPE_DES_CFB64: u8 = 1;
/// [RFC2953](https://tools.ietf.org/html/rfc2953)
pub const ENCTYPE_DES_OFB64: u8 = 2;

// Feedback mode option sub-messages, shared by CFB64 and OFB64
pub const FB64_IV: u8 = 1;
pub const FB64_IV_OK: u8 = 2;
pub const FB64_IV_BAD: u8 = 3;
