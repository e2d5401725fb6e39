//! PKCE (Proof Key for Code Exchange) verification.
//!
//! Implements RFC 7636 `S256` and `plain` challenge verification.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Supported `code_challenge_method` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    #[serde(rename = "S256")]
    S256,
    #[serde(rename = "plain")]
    Plain,
}

impl CodeChallengeMethod {
    /// Parse a method name. Absent means `plain` (RFC 7636 §4.3).
    #[must_use]
    pub fn parse(method: Option<&str>) -> Option<Self> {
        match method {
            None | Some("plain") => Some(Self::Plain),
            Some("S256") => Some(Self::S256),
            Some(_) => None,
        }
    }
}

/// Compute the S256 challenge for a verifier: `BASE64URL(SHA256(verifier))`.
#[must_use]
pub fn s256_challenge(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

/// Check verifier syntax: 43–128 characters from `[A-Za-z0-9-._~]`.
#[must_use]
pub fn is_valid_verifier(code_verifier: &str) -> bool {
    (43..=128).contains(&code_verifier.len())
        && code_verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Check challenge syntax. Both methods yield 43–128 unreserved characters.
#[must_use]
pub fn is_valid_challenge(code_challenge: &str) -> bool {
    is_valid_verifier(code_challenge)
}

/// Verify a code verifier against a stored challenge.
///
/// The comparison is constant-time.
#[must_use]
pub fn verify(code_verifier: &str, code_challenge: &str, method: CodeChallengeMethod) -> bool {
    if !is_valid_verifier(code_verifier) {
        return false;
    }

    let computed = match method {
        CodeChallengeMethod::S256 => s256_challenge(code_verifier),
        CodeChallengeMethod::Plain => code_verifier.to_owned(),
    };
    computed.as_bytes().ct_eq(code_challenge.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B test vector
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_s256_valid() {
        assert_eq!(s256_challenge(VERIFIER), CHALLENGE);
        assert!(verify(VERIFIER, CHALLENGE, CodeChallengeMethod::S256));
    }

    #[test]
    fn test_s256_wrong_verifier() {
        let other = "x".repeat(43);
        assert!(!verify(&other, CHALLENGE, CodeChallengeMethod::S256));
    }

    #[test]
    fn test_s256_wrong_challenge() {
        assert!(!verify(VERIFIER, "wrong-challenge", CodeChallengeMethod::S256));
    }

    #[test]
    fn test_plain() {
        assert!(verify(VERIFIER, VERIFIER, CodeChallengeMethod::Plain));
        assert!(!verify(VERIFIER, CHALLENGE, CodeChallengeMethod::Plain));
    }

    #[test]
    fn test_verifier_syntax() {
        assert!(!is_valid_verifier("short"));
        assert!(!is_valid_verifier(&"a".repeat(129)));
        assert!(!is_valid_verifier(&format!("{}!", "a".repeat(42))));
        assert!(is_valid_verifier(&"a~._-".repeat(10)));
    }

    #[test]
    fn test_challenge_syntax() {
        assert!(is_valid_challenge(CHALLENGE));
        assert!(is_valid_challenge(VERIFIER));
        assert!(!is_valid_challenge(""));
        assert!(!is_valid_challenge("abc"));
        assert!(!is_valid_challenge(&format!("{CHALLENGE}=")));
    }

    #[test]
    fn test_method_parse() {
        assert_eq!(CodeChallengeMethod::parse(None), Some(CodeChallengeMethod::Plain));
        assert_eq!(CodeChallengeMethod::parse(Some("S256")), Some(CodeChallengeMethod::S256));
        assert_eq!(CodeChallengeMethod::parse(Some("s256")), None);
    }
}
