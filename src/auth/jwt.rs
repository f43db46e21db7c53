use jsonwebtoken::{decode, DecodingKey, TokenData, Validation};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Claims carried by the externally-issued login token. Token issuance
/// and auth policy are out of scope (spec.md §1); the engine only
/// consumes the authenticated identity it decodes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Team id.
    pub sub: String,
    pub species: String,
    pub role: String,
    #[serde(rename = "initialBalance")]
    pub initial_balance: Decimal,
    pub exp: i64,
    pub iat: i64,
}

pub struct JwtManager {
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        Self { decoding_key: DecodingKey::from_secret(secret.as_bytes()) }
    }

    pub fn verify_token(&self, token: &str) -> anyhow::Result<Claims> {
        let token_data: TokenData<Claims> = decode(token, &self.decoding_key, &Validation::default())?;
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn issue(secret: &str, team: &str) -> String {
        let claims = Claims {
            sub: team.into(),
            species: "capybara".into(),
            role: "team".into(),
            initial_balance: Decimal::new(100000, 2),
            exp: chrono::Utc::now().timestamp() + 3600,
            iat: chrono::Utc::now().timestamp(),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn verifies_token_issued_with_the_same_secret() {
        let manager = JwtManager::new("test_secret");
        let token = issue("test_secret", "team-a");
        let claims = manager.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "team-a");
    }

    #[test]
    fn rejects_token_signed_with_a_different_secret() {
        let manager = JwtManager::new("test_secret");
        let token = issue("other_secret", "team-a");
        assert!(manager.verify_token(&token).is_err());
    }
}
