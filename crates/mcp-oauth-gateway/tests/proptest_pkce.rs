//! Property-based tests for PKCE verification and redirect URI policy.

use proptest::prelude::*;

use mcp_oauth_gateway::server::oauth::pkce::{self, CodeChallengeMethod};
use mcp_oauth_gateway::server::oauth::registry::validate_redirect_uri;

/// Generate RFC 7636 code verifiers (43-128 unreserved characters).
fn arb_verifier() -> impl Strategy<Value = String> {
    "[A-Za-z0-9._~-]{43,128}"
}

proptest! {
    #[test]
    fn s256_accepts_own_verifier(verifier in arb_verifier()) {
        let challenge = pkce::s256_challenge(&verifier);
        prop_assert!(pkce::verify(&verifier, &challenge, CodeChallengeMethod::S256));
    }

    #[test]
    fn s256_rejects_other_verifier(a in arb_verifier(), b in arb_verifier()) {
        prop_assume!(a != b);
        let challenge = pkce::s256_challenge(&a);
        prop_assert!(!pkce::verify(&b, &challenge, CodeChallengeMethod::S256));
    }

    #[test]
    fn s256_challenge_is_not_a_plain_match(verifier in arb_verifier()) {
        let challenge = pkce::s256_challenge(&verifier);
        prop_assert!(!pkce::verify(&verifier, &challenge, CodeChallengeMethod::Plain));
        prop_assert!(!pkce::verify(&challenge, &challenge, CodeChallengeMethod::S256));
    }

    #[test]
    fn plain_requires_exact_match(a in arb_verifier(), b in arb_verifier()) {
        prop_assert!(pkce::verify(&a, &a, CodeChallengeMethod::Plain));
        prop_assert_eq!(pkce::verify(&a, &b, CodeChallengeMethod::Plain), a == b);
    }

    #[test]
    fn short_or_long_verifiers_rejected(verifier in "[A-Za-z0-9]{1,42}|[A-Za-z0-9]{129,200}") {
        let challenge = pkce::s256_challenge(&verifier);
        prop_assert!(!pkce::verify(&verifier, &challenge, CodeChallengeMethod::S256));
        prop_assert!(!pkce::verify(&verifier, &verifier, CodeChallengeMethod::Plain));
    }

    #[test]
    fn https_redirects_accepted(host in "[a-z]{1,20}\\.[a-z]{2,6}", path in "(/[a-z0-9]{0,10}){0,3}") {
        let uri = format!("https://{host}{path}");
        prop_assert!(validate_redirect_uri(&uri).is_ok(), "{}", uri);
    }

    #[test]
    fn fragments_rejected(host in "[a-z]{1,20}\\.[a-z]{2,6}", fragment in "[a-z0-9]{0,10}") {
        let uri = format!("https://{host}/cb#{fragment}");
        prop_assert!(validate_redirect_uri(&uri).is_err(), "{}", uri);
    }
}
