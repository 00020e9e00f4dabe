use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use gamerlink_types::api::Claims;

/// Resolves a bearer credential to the claims it carries.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<Claims>;
}

/// HS256 keys used to issue and verify access tokens.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: chrono::Duration,
}

impl JwtKeys {
    pub fn new(secret: &str, ttl: chrono::Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, user_id: i64, email: &str) -> anyhow::Result<String> {
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            exp: (chrono::Utc::now() + self.ttl).timestamp() as usize,
        };

        let token = encode(&Header::default(), &claims, &self.encoding)?;
        Ok(token)
    }
}

impl TokenVerifier for JwtKeys {
    fn verify(&self, token: &str) -> Option<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .ok()
            .map(|data| data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify() {
        let keys = JwtKeys::new("test-secret", chrono::Duration::minutes(5));
        let token = keys.issue(7, "alice@example.com").unwrap();

        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.email, "alice@example.com");
    }

    #[test]
    fn foreign_and_expired_tokens_are_rejected() {
        let keys = JwtKeys::new("test-secret", chrono::Duration::minutes(5));
        let other = JwtKeys::new("other-secret", chrono::Duration::minutes(5));
        let expired = JwtKeys::new("test-secret", chrono::Duration::hours(-2));

        assert!(keys.verify(&other.issue(1, "a@x").unwrap()).is_none());
        assert!(keys.verify(&expired.issue(1, "a@x").unwrap()).is_none());
        assert!(keys.verify("not-a-token").is_none());
    }
}
