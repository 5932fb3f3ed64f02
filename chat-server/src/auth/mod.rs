use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub mod handlers;
pub mod users;

/// Digits in a one-time password.
pub const OTP_LENGTH: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("User with this phone number already exists")]
    PhoneTaken,

    #[error("User not found")]
    UserNotFound,

    #[error("Invalid or expired OTP")]
    InvalidOtp,

    #[error("Invalid authentication credentials: {0}")]
    InvalidToken(String),

    #[error("Failed to sign token: {0}")]
    Signing(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// JWT claims. `sub` carries the phone number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    /// Makes two tokens issued in the same second distinct.
    pub jti: String,
}

/// Issues and verifies HS256 access tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    pub fn issue(&self, phone: &str) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: phone.to_string(),
            iat: now,
            exp: now.saturating_add(ttl),
            jti: format!("{:016x}", rand::rng().random::<u64>()),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::InvalidToken("missing subject".to_string()));
        }
        Ok(data.claims)
    }
}

/// Generate a zero-padded numeric one-time password.
pub fn generate_otp() -> String {
    let code = rand::rng().random_range(0..1_000_000u32);
    format!("{code:0width$}", width = OTP_LENGTH)
}

/// Trim and validate a phone number as submitted by a client.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let phone = raw.trim();
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if digits.len() < 6 || digits.len() > 15 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(phone.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_roundtrip_carries_phone() {
        let issuer = TokenIssuer::new(b"secret", Duration::from_secs(60));
        let token = issuer.issue("+15551234567").unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.sub, "+15551234567");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_tokens_are_unique_per_issue() {
        let issuer = TokenIssuer::new(b"secret", Duration::from_secs(60));
        let a = issuer.issue("+15551234567").unwrap();
        let b = issuer.issue("+15551234567").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let issuer = TokenIssuer::new(b"secret", Duration::from_secs(60));
        let other = TokenIssuer::new(b"other", Duration::from_secs(60));
        let token = other.issue("+15551234567").unwrap();
        assert!(matches!(
            issuer.verify(&token),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(issuer.verify("not.a.token").is_err());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let issuer = TokenIssuer::new(b"secret", Duration::from_secs(0));
        let claims = Claims {
            sub: "+15551234567".to_string(),
            iat: Utc::now().timestamp() - 120,
            exp: Utc::now().timestamp() - 60,
            jti: "x".to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(issuer.verify(&token).is_err());
    }

    #[test]
    fn test_otp_shape() {
        for _ in 0..50 {
            let otp = generate_otp();
            assert_eq!(otp.len(), OTP_LENGTH);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone(" +15551234567 ").as_deref(), Some("+15551234567"));
        assert_eq!(normalize_phone("9876543210").as_deref(), Some("9876543210"));
        assert_eq!(normalize_phone("12ab45"), None);
        assert_eq!(normalize_phone(""), None);
        assert_eq!(normalize_phone("+1"), None);
    }
}
