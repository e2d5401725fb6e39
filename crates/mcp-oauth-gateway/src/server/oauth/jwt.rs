//! Access token signing and verification.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};

use super::types::TokenClaims;

/// Signs and verifies access tokens with a shared HMAC secret.
#[derive(Clone)]
pub struct JwtCodec {
    algorithm: Algorithm,
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtCodec {
    #[must_use]
    pub fn new(secret: &[u8], algorithm: Algorithm, issuer: impl Into<String>) -> Self {
        Self {
            algorithm,
            issuer: issuer.into(),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign claims into a compact JWT.
    pub fn encode(&self, claims: &TokenClaims) -> jsonwebtoken::errors::Result<String> {
        jsonwebtoken::encode(&Header::new(self.algorithm), claims, &self.encoding_key)
    }

    /// Verify signature, issuer and expiry.
    pub fn decode(&self, token: &str) -> jsonwebtoken::errors::Result<TokenClaims> {
        self.decode_with(token, self.validation())
    }

    /// Verify signature and issuer, accepting expired tokens.
    ///
    /// Used by revocation, where an expired token may still have a live record.
    pub fn decode_ignoring_expiry(&self, token: &str) -> jsonwebtoken::errors::Result<TokenClaims> {
        let mut validation = self.validation();
        validation.validate_exp = false;
        self.decode_with(token, validation)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation
    }

    fn decode_with(
        &self,
        token: &str,
        validation: Validation,
    ) -> jsonwebtoken::errors::Result<TokenClaims> {
        jsonwebtoken::decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
    }
}

impl std::fmt::Debug for JwtCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtCodec")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISSUER: &str = "https://auth.example.com";

    fn claims(exp_offset: i64) -> TokenClaims {
        let now = chrono::Utc::now().timestamp();
        TokenClaims {
            sub: "42".into(),
            username: "octocat".into(),
            email: Some("octocat@example.com".into()),
            name: None,
            scope: "openid".into(),
            client_id: "client_1".into(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now,
            exp: now + exp_offset,
            iss: ISSUER.into(),
        }
    }

    #[test]
    fn test_roundtrip() {
        let codec = JwtCodec::new(b"secret", Algorithm::HS256, ISSUER);
        let original = claims(600);
        let token = codec.encode(&original).unwrap();
        assert_eq!(codec.decode(&token).unwrap(), original);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let signer = JwtCodec::new(b"secret", Algorithm::HS256, ISSUER);
        let verifier = JwtCodec::new(b"other", Algorithm::HS256, ISSUER);
        let token = signer.encode(&claims(600)).unwrap();
        assert!(verifier.decode(&token).is_err());
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let codec = JwtCodec::new(b"secret", Algorithm::HS256, ISSUER);
        let mut forged = claims(600);
        forged.iss = "https://evil.example.com".into();
        let token = codec.encode(&forged).unwrap();
        assert!(codec.decode(&token).is_err());
    }

    #[test]
    fn test_expired_token() {
        let codec = JwtCodec::new(b"secret", Algorithm::HS256, ISSUER);
        let token = codec.encode(&claims(-10)).unwrap();
        assert!(codec.decode(&token).is_err());
        assert_eq!(codec.decode_ignoring_expiry(&token).unwrap().sub, "42");
    }

    #[test]
    fn test_garbage_rejected() {
        let codec = JwtCodec::new(b"secret", Algorithm::HS256, ISSUER);
        assert!(codec.decode("not.a.jwt").is_err());
        assert!(codec.decode_ignoring_expiry("opaque-refresh-token").is_err());
    }
}
