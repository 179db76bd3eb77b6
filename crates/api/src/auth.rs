use std::num::NonZeroU32;
use std::time::Duration;

use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use fleetline_core::UserRole;
use fleetline_storage::UserRecord;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub const DEFAULT_PASSWORD_ITERATIONS: u32 = 100_000;
const HASH_SCHEME: &str = "pbkdf2_sha256";
const SALT_LEN: usize = 16;
const CREDENTIAL_LEN: usize = 32;

/// Payload of an access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    pub role: UserRole,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies HS256 access tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, user: &UserRecord) -> Result<String, ApiError> {
        let now = Utc::now().timestamp();
        let exp = i64::try_from(self.ttl.as_secs())
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| {
                ApiError::Internal(anyhow::anyhow!(
                    "token ttl of {}s overflows the expiry timestamp",
                    self.ttl.as_secs()
                ))
            })?;
        let claims = Claims {
            user_id: user.user_id.clone(),
            email: user.email.clone(),
            role: user.role,
            iat: now,
            exp,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| ApiError::Internal(anyhow::anyhow!("failed to sign token: {}", err)))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        let validation = Validation::new(Algorithm::HS256);
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| ApiError::Unauthorized("Invalid or expired token".to_string()))
    }
}

/// PBKDF2-HMAC-SHA256 with a random per-password salt.
///
/// Stored form: `pbkdf2_sha256$<iterations>$<salt>$<hash>`, base64 without padding. The
/// iteration count travels with the hash so it can be raised without invalidating old ones.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    iterations: NonZeroU32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_PASSWORD_ITERATIONS)
    }
}

impl PasswordHasher {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: NonZeroU32::new(iterations).unwrap_or(NonZeroU32::MIN),
        }
    }

    pub fn hash(&self, password: &str) -> Result<String, ApiError> {
        let mut salt = [0_u8; SALT_LEN];
        SystemRandom::new()
            .fill(&mut salt)
            .map_err(|_| ApiError::Internal(anyhow::anyhow!("system random source unavailable")))?;

        let mut credential = [0_u8; CREDENTIAL_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            &salt,
            password.as_bytes(),
            &mut credential,
        );

        Ok(format!(
            "{}${}${}${}",
            HASH_SCHEME,
            self.iterations,
            STANDARD_NO_PAD.encode(salt),
            STANDARD_NO_PAD.encode(credential)
        ))
    }

    /// False for a wrong password and for any malformed stored hash.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        let mut parts = stored.split('$');
        let (Some(scheme), Some(iterations), Some(salt), Some(hash), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return false;
        };
        if scheme != HASH_SCHEME {
            return false;
        }
        let Some(iterations) = iterations.parse::<u32>().ok().and_then(NonZeroU32::new) else {
            return false;
        };
        let (Ok(salt), Ok(hash)) = (STANDARD_NO_PAD.decode(salt), STANDARD_NO_PAD.decode(hash))
        else {
            return false;
        };

        pbkdf2::verify(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            &salt,
            password.as_bytes(),
            &hash,
        )
        .is_ok()
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Claims of a valid bearer token, or 401.
pub fn authenticate(tokens: &TokenIssuer, headers: &HeaderMap) -> Result<Claims, ApiError> {
    let token = bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("Access token required".to_string()))?;
    tokens.verify(token)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn user() -> UserRecord {
        UserRecord {
            user_id: "u-1".to_string(),
            email: "hoa@example.com".to_string(),
            phone: None,
            full_name: "Hoa".to_string(),
            password_hash: String::new(),
            role: UserRole::Manager,
            is_active: true,
            created_at: "2025-01-01T00:00:00Z".to_string(),
            updated_at: "2025-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn tokens_carry_identity_and_expire_in_seven_days() {
        let issuer = TokenIssuer::new("secret", Duration::from_secs(7 * 24 * 3600));
        let token = issuer.issue(&user()).unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.user_id, "u-1");
        assert_eq!(claims.email, "hoa@example.com");
        assert_eq!(claims.role, UserRole::Manager);
        assert_eq!(claims.exp - claims.iat, 604_800);
    }

    #[test]
    fn oversized_ttl_is_an_error_not_a_wrapped_expiry() {
        let issuer = TokenIssuer::new("secret", Duration::from_secs(u64::MAX));
        let err = issuer.issue(&user()).unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));

        let issuer = TokenIssuer::new("secret", Duration::from_secs(i64::MAX as u64));
        assert!(matches!(issuer.issue(&user()), Err(ApiError::Internal(_))));
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let token = TokenIssuer::new("old-secret", Duration::from_secs(60))
            .issue(&user())
            .unwrap();
        let err = TokenIssuer::new("new-secret", Duration::from_secs(60))
            .verify(&token)
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[test]
    fn password_hash_round_trip_and_salt_uniqueness() {
        let hasher = PasswordHasher::new(1_000);
        let first = hasher.hash("correct horse").unwrap();
        let second = hasher.hash("correct horse").unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("pbkdf2_sha256$1000$"));
        assert!(hasher.verify("correct horse", &first));
        assert!(!hasher.verify("wrong horse", &first));
        assert!(!hasher.verify("correct horse", "plaintext"));
        // the stored iteration count wins over the hasher's own setting
        assert!(PasswordHasher::new(5).verify("correct horse", &second));
    }

    #[test]
    fn bearer_header_is_required() {
        let issuer = TokenIssuer::new("secret", Duration::from_secs(60));
        let mut headers = HeaderMap::new();
        assert!(matches!(
            authenticate(&issuer, &headers),
            Err(ApiError::Unauthorized(_))
        ));

        let token = issuer.issue(&user()).unwrap();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        assert_eq!(authenticate(&issuer, &headers).unwrap().user_id, "u-1");
    }
}
