//! Signed-token codec
//!
//! Five token purposes share one claims shape but never share a secret, so
//! a token minted for one purpose can never verify under another. All
//! purposes are HS256. Verification applies zero leeway: a token is invalid
//! the second `now > exp`.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// What a token authorizes. Determines the signing secret and default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    /// Session cookie token
    Login,
    /// Passwordless sign-in link
    MagicLink,
    /// Email ownership verification link
    EmailVerify,
    /// Password reset link
    PasswordReset,
    /// Service-to-service call into the email dispatch endpoint
    InternalApi,
}

impl TokenPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::MagicLink => "magic_link",
            Self::EmailVerify => "email_verify",
            Self::PasswordReset => "password_reset",
            Self::InternalApi => "internal_api",
        }
    }
}

/// Token payload. `uuid` is the subject account; InternalApi tokens carry
/// the acting account's uuid so the dispatch endpoint can cross-check it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub uuid: Option<Uuid>,
    pub exp: i64,
}

impl Claims {
    /// Claims for `uuid` expiring `ttl` from now
    pub fn expiring_in(uuid: Option<Uuid>, ttl: Duration) -> Self {
        Self {
            uuid,
            exp: (OffsetDateTime::now_utc() + ttl).unix_timestamp(),
        }
    }

    /// True once the expiry instant has passed (zero leeway)
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc().unix_timestamp() > self.exp
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token has expired")]
    Expired,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token encoding failed: {0}")]
    Encoding(String),
}

/// Per-purpose signing secrets, injected from configuration
#[derive(Clone)]
pub struct TokenSecrets {
    pub login: String,
    pub magic_link: String,
    pub email_verify: String,
    pub password_reset: String,
    pub internal_api: String,
}

/// Per-purpose token lifetimes
#[derive(Debug, Clone, Copy)]
pub struct TokenTtls {
    pub login: Duration,
    pub magic_link: Duration,
    pub email_verify: Duration,
    pub password_reset: Duration,
    pub internal_api: Duration,
}

impl Default for TokenTtls {
    fn default() -> Self {
        Self {
            login: Duration::hours(24),
            magic_link: Duration::minutes(30),
            email_verify: Duration::hours(24),
            password_reset: Duration::hours(1),
            internal_api: Duration::seconds(60),
        }
    }
}

#[derive(Clone)]
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Signs and verifies tokens for every purpose. Cheap to clone; keys are
/// derived once at construction.
#[derive(Clone)]
pub struct TokenCodec {
    login: KeyPair,
    magic_link: KeyPair,
    email_verify: KeyPair,
    password_reset: KeyPair,
    internal_api: KeyPair,
    ttls: TokenTtls,
}

impl TokenCodec {
    pub fn new(secrets: &TokenSecrets, ttls: TokenTtls) -> Self {
        Self {
            login: KeyPair::from_secret(&secrets.login),
            magic_link: KeyPair::from_secret(&secrets.magic_link),
            email_verify: KeyPair::from_secret(&secrets.email_verify),
            password_reset: KeyPair::from_secret(&secrets.password_reset),
            internal_api: KeyPair::from_secret(&secrets.internal_api),
            ttls,
        }
    }

    fn keys(&self, purpose: TokenPurpose) -> &KeyPair {
        match purpose {
            TokenPurpose::Login => &self.login,
            TokenPurpose::MagicLink => &self.magic_link,
            TokenPurpose::EmailVerify => &self.email_verify,
            TokenPurpose::PasswordReset => &self.password_reset,
            TokenPurpose::InternalApi => &self.internal_api,
        }
    }

    /// Configured lifetime for `purpose`
    pub fn ttl(&self, purpose: TokenPurpose) -> Duration {
        match purpose {
            TokenPurpose::Login => self.ttls.login,
            TokenPurpose::MagicLink => self.ttls.magic_link,
            TokenPurpose::EmailVerify => self.ttls.email_verify,
            TokenPurpose::PasswordReset => self.ttls.password_reset,
            TokenPurpose::InternalApi => self.ttls.internal_api,
        }
    }

    /// Sign explicit claims under the purpose's secret
    pub fn sign(&self, purpose: TokenPurpose, claims: &Claims) -> Result<String, TokenError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &self.keys(purpose).encoding,
        )
        .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Sign a fresh token for `uuid` with the purpose's configured TTL.
    /// Returns the token together with its claims so callers can anchor
    /// dependent expiry (session rows) to the same instant.
    pub fn issue(
        &self,
        purpose: TokenPurpose,
        uuid: Option<Uuid>,
    ) -> Result<(String, Claims), TokenError> {
        let claims = Claims::expiring_in(uuid, self.ttl(purpose));
        let token = self.sign(purpose, &claims)?;
        Ok((token, claims))
    }

    /// Verify signature and expiry under the purpose's secret
    pub fn verify(&self, purpose: TokenPurpose, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        decode::<Claims>(token, &self.keys(purpose).decoding, &validation)
            .map(|data| data.claims)
            .map_err(classify_decode_error)
    }

    /// Read claims without verifying the signature or expiry. For inspecting
    /// `exp`/`uuid` before (never instead of) a full `verify`.
    pub fn decode_insecure(token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;

        decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .map_err(classify_decode_error)
    }
}

fn classify_decode_error(err: jsonwebtoken::errors::Error) -> TokenError {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        _ => TokenError::Malformed,
    }
}

/// Structural pre-check run before any cryptographic work: exactly three
/// non-empty dot-separated base64url segments, at least 36 chars in total.
pub fn is_well_formed(token: &str) -> bool {
    if token.len() < 36 {
        return false;
    }
    let mut segments = 0usize;
    for segment in token.split('.') {
        segments += 1;
        if segments > 3 || segment.is_empty() {
            return false;
        }
        let base64url = segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !base64url {
            return false;
        }
    }
    segments == 3
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]  // Allow unwrap() in tests for cleaner test code
mod tests {
    use super::*;

    fn test_codec() -> TokenCodec {
        let secrets = TokenSecrets {
            login: "login-secret-key-at-least-32-chars!!".to_string(),
            magic_link: "magic-secret-key-at-least-32-chars!!".to_string(),
            email_verify: "verify-secret-key-at-least-32-chars!".to_string(),
            password_reset: "reset-secret-key-at-least-32-chars!!".to_string(),
            internal_api: "internal-secret-key-at-least-32-char".to_string(),
        };
        TokenCodec::new(&secrets, TokenTtls::default())
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let codec = test_codec();
        let subject = Uuid::new_v4();

        let (token, claims) = codec.issue(TokenPurpose::Login, Some(subject)).unwrap();
        let verified = codec.verify(TokenPurpose::Login, &token).unwrap();

        assert_eq!(verified.uuid, Some(subject));
        assert_eq!(verified.exp, claims.exp);
    }

    #[test]
    fn test_purposes_do_not_cross_verify() {
        let codec = test_codec();
        let (token, _) = codec
            .issue(TokenPurpose::MagicLink, Some(Uuid::new_v4()))
            .unwrap();

        let err = codec.verify(TokenPurpose::Login, &token).unwrap_err();
        assert!(matches!(err, TokenError::InvalidSignature));
    }

    #[test]
    fn test_wrong_secret_fails_verification() {
        let codec = test_codec();
        let other_secrets = TokenSecrets {
            login: "a-different-secret-at-least-32-chars".to_string(),
            magic_link: "magic-secret-key-at-least-32-chars!!".to_string(),
            email_verify: "verify-secret-key-at-least-32-chars!".to_string(),
            password_reset: "reset-secret-key-at-least-32-chars!!".to_string(),
            internal_api: "internal-secret-key-at-least-32-char".to_string(),
        };
        let other = TokenCodec::new(&other_secrets, TokenTtls::default());

        let (token, _) = codec.issue(TokenPurpose::Login, Some(Uuid::new_v4())).unwrap();
        let err = other.verify(TokenPurpose::Login, &token).unwrap_err();
        assert!(matches!(err, TokenError::InvalidSignature));
    }

    #[test]
    fn test_expired_token_rejected() {
        let codec = test_codec();
        let claims = Claims {
            uuid: Some(Uuid::new_v4()),
            exp: OffsetDateTime::now_utc().unix_timestamp() - 120,
        };
        let token = codec.sign(TokenPurpose::Login, &claims).unwrap();

        let err = codec.verify(TokenPurpose::Login, &token).unwrap_err();
        assert!(matches!(err, TokenError::Expired));
        assert!(claims.is_expired());
    }

    #[test]
    fn test_decode_insecure_reads_expired_claims() {
        let codec = test_codec();
        let subject = Uuid::new_v4();
        let claims = Claims {
            uuid: Some(subject),
            exp: OffsetDateTime::now_utc().unix_timestamp() - 120,
        };
        let token = codec.sign(TokenPurpose::PasswordReset, &claims).unwrap();

        let decoded = TokenCodec::decode_insecure(&token).unwrap();
        assert_eq!(decoded.uuid, Some(subject));
        assert!(decoded.is_expired());
    }

    #[test]
    fn test_garbage_is_malformed() {
        let codec = test_codec();
        let err = codec
            .verify(TokenPurpose::Login, "not-a-token-at-all-but-quite-long-anyway")
            .unwrap_err();
        assert!(matches!(err, TokenError::Malformed));
    }

    #[test]
    fn test_well_formed_accepts_real_tokens() {
        let codec = test_codec();
        let (token, _) = codec.issue(TokenPurpose::Login, Some(Uuid::new_v4())).unwrap();
        assert!(is_well_formed(&token));
    }

    #[test]
    fn test_well_formed_rejects_wrong_segment_counts() {
        assert!(!is_well_formed("aaaaaaaaaaaaaaaaaa.bbbbbbbbbbbbbbbbbbbb"));
        assert!(!is_well_formed("aaaaaaaaaa.bbbbbbbbbb.cccccccccc.dddddddddd"));
    }

    #[test]
    fn test_well_formed_rejects_bad_charset_and_short_input() {
        assert!(!is_well_formed("aaaaaaaaaaaa.bbbb+bbbbbbbbbb.cccccccccccc"));
        assert!(!is_well_formed("aaaaaaaaaaaa.bbbb=bbbbbbbbbb.cccccccccccc"));
        assert!(!is_well_formed("aa.bb.cc"));
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("aaaaaaaaaaaaaaaaa..aaaaaaaaaaaaaaaaaaaaa"));
    }
}
