//! Symmetric-signed JWT claims shared between the control plane (issuer)
//! and the agent (holder), per spec §6.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    User,
    Agent,
    Api,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub tenant_id: Uuid,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    pub iss: String,
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
}

impl Claims {
    pub fn for_agent(tenant_id: Uuid, agent_id: String, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            tenant_id,
            token_type: TokenType::Agent,
            agent_id: Some(agent_id.clone()),
            user_id: None,
            scopes: None,
            iss: "meridian-control".to_string(),
            sub: agent_id,
            exp: (issued_at + ttl).timestamp(),
            iat: issued_at.timestamp(),
            nbf: issued_at.timestamp(),
        }
    }
}

/// Encodes and verifies `Claims` with a single shared HMAC secret.
pub struct JwtCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtCodec {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::default();
        validation.validate_nbf = true;
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn sign(&self, claims: &Claims) -> Result<String> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| Error::internal(format!("failed to sign jwt: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| Error::unauthorized(format!("invalid token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_agent_claims() {
        let codec = JwtCodec::new(b"test-secret");
        let claims = Claims::for_agent(Uuid::new_v4(), "agent-1".into(), Utc::now(), Duration::days(30));
        let token = codec.sign(&claims).expect("sign");
        let decoded = codec.verify(&token).expect("verify");
        assert_eq!(decoded.agent_id.as_deref(), Some("agent-1"));
        assert_eq!(decoded.token_type, TokenType::Agent);
    }

    #[test]
    fn rejects_tampered_token() {
        let codec = JwtCodec::new(b"test-secret");
        let other = JwtCodec::new(b"other-secret");
        let claims = Claims::for_agent(Uuid::new_v4(), "agent-1".into(), Utc::now(), Duration::days(30));
        let token = codec.sign(&claims).expect("sign");
        assert!(other.verify(&token).is_err());
    }
}
