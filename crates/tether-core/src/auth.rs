//! Digest challenge-response authentication.
//!
//! Peers that require a password reject the first call with a 401 whose error
//! message is a JSON challenge (`realm`, `nonce`, optional `nc`). The reply is
//! an HTTP-digest-style SHA-256 credential attached to the retried frame. The
//! devices hash a fixed `"dummy_method:dummy_uri"` pair into `ha2` instead of
//! the real method and URI; that placeholder is part of the protocol.

use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Devices only know a single account.
pub const AUTH_USERNAME: &str = "admin";

const ALGORITHM: &str = "SHA-256";
const HA2_INPUT: &str = "dummy_method:dummy_uri";

/// Lowercase-hex SHA-256 of the input's UTF-8 bytes.
pub fn hex_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Renders a scalar the way it goes into the hash input: strings unquoted,
/// numbers as decimal text.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A 401 challenge, parsed from the error message payload.
///
/// `nonce` stays a raw JSON value: devices send it as a number and expect the
/// same JSON type echoed back in the credential.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthChallenge {
    pub realm: String,
    pub nonce: Value,
    #[serde(default = "default_nc")]
    pub nc: u64,
}

fn default_nc() -> u64 {
    1
}

impl AuthChallenge {
    /// Parse a challenge out of a 401 error's message string.
    pub fn parse(message: &str) -> Result<Self, crate::RpcError> {
        serde_json::from_str(message)
            .map_err(|err| crate::RpcError::MalformedResponse(format!("bad auth challenge: {err}")))
    }
}

/// A computed credential, ready to attach to an outbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub realm: String,
    pub username: String,
    pub nonce: Value,
    pub cnonce: u64,
    pub response: String,
    pub algorithm: String,
}

impl Credential {
    /// Compute a credential with a fresh random client nonce.
    pub fn from_challenge(challenge: &AuthChallenge, secret: &str) -> Self {
        let cnonce = rand::thread_rng().gen_range(0..100_000_000);
        Self::with_cnonce(challenge, secret, cnonce)
    }

    /// Deterministic core of the computation; same inputs, same credential.
    pub fn with_cnonce(challenge: &AuthChallenge, secret: &str, cnonce: u64) -> Self {
        let ha1 = hex_hash(&format!("{AUTH_USERNAME}:{}:{secret}", challenge.realm));
        let ha2 = hex_hash(HA2_INPUT);
        let nonce = scalar_text(&challenge.nonce);
        let response = hex_hash(&format!(
            "{ha1}:{nonce}:{}:{cnonce}:auth:{ha2}",
            challenge.nc
        ));
        Credential {
            realm: challenge.realm.clone(),
            username: AUTH_USERNAME.to_owned(),
            nonce: challenge.nonce.clone(),
            cnonce,
            response,
            algorithm: ALGORITHM.to_owned(),
        }
    }

    /// The JSON object that rides in a frame's `auth` slot.
    pub fn to_value(&self) -> Value {
        json!({
            "realm": self.realm,
            "username": self.username,
            "nonce": self.nonce,
            "cnonce": self.cnonce,
            "response": self.response,
            "algorithm": self.algorithm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_hash_vectors() {
        assert_eq!(
            hex_hash("admin:r:s"),
            "a675c24c0f175695b5d830aaf3c54d41aa79b1f48f1e493d19574f30ed61d8d2"
        );
        assert_eq!(
            hex_hash("dummy_method:dummy_uri"),
            "6370ec69915103833b5222b368555393393f098bfbfbb59f47e0590af135f062"
        );
    }

    #[test]
    fn credential_is_deterministic_for_fixed_cnonce() {
        let challenge = AuthChallenge {
            realm: "r".into(),
            nonce: json!("n"),
            nc: 1,
        };
        let a = Credential::with_cnonce(&challenge, "s", 12_345_678);
        let b = Credential::with_cnonce(&challenge, "s", 12_345_678);
        assert_eq!(a, b);
        assert_eq!(
            a.response,
            "a12d39635e75f220f27fff36a33c1894622538b5f9583e2d6b3df9f11497bd30"
        );
        assert_eq!(a.username, "admin");
        assert_eq!(a.algorithm, "SHA-256");
    }

    #[test]
    fn numeric_nonce_hashes_as_decimal_and_echoes_as_number() {
        let challenge = AuthChallenge {
            realm: "shellypro4pm-f008d1d8b8b8".into(),
            nonce: json!(1_625_000_000),
            nc: 1,
        };
        let cred = Credential::with_cnonce(&challenge, "kingfisher", 65_535);
        assert_eq!(
            cred.response,
            "7a38555b7f9b31baf145e28d6f72d7fa10fe8b445bd71d418b11f7bd13137667"
        );
        assert_eq!(cred.to_value()["nonce"], json!(1_625_000_000));
    }

    #[test]
    fn parses_challenge_with_defaulted_nc() {
        let challenge =
            AuthChallenge::parse(r#"{"realm": "shellyplus1-a8032ab12345", "nonce": 1625000000}"#)
                .unwrap();
        assert_eq!(challenge.realm, "shellyplus1-a8032ab12345");
        assert_eq!(challenge.nonce, json!(1_625_000_000));
        assert_eq!(challenge.nc, 1);
    }

    #[test]
    fn rejects_non_json_challenge() {
        assert!(AuthChallenge::parse("Unauthorized").is_err());
    }
}
