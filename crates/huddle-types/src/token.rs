use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Access tokens authenticate every REST request and the WebSocket handshake.
const ACCESS_TOKEN_TTL_HOURS: i64 = 1;
/// Refresh tokens are only good for minting a new access/refresh pair.
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Employee,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Employee => "employee",
        }
    }

    /// Stored role strings come back from the database; anything unrecognized
    /// is treated as a plain employee.
    pub fn from_db(raw: &str) -> Role {
        if raw.eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::Employee
        }
    }
}

/// Authenticated caller identity, extracted once per request or connection.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: Uuid,
    pub role: Role,
    pub email: String,
}

/// Claims carried by short-lived access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub exp: usize,
}

impl AccessClaims {
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.sub,
            role: self.role,
            email: self.email.clone(),
        }
    }
}

/// Claims carried by long-lived refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub exp: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid,
        }
    }
}

/// Signing/verification keys for the two token families. The access and
/// refresh secrets are independent: a token minted with one never verifies
/// under the other.
pub struct TokenKeys {
    access_enc: EncodingKey,
    access_dec: DecodingKey,
    refresh_enc: EncodingKey,
    refresh_dec: DecodingKey,
}

impl TokenKeys {
    pub fn from_secrets(access_secret: &str, refresh_secret: &str) -> Self {
        Self {
            access_enc: EncodingKey::from_secret(access_secret.as_bytes()),
            access_dec: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_enc: EncodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_dec: DecodingKey::from_secret(refresh_secret.as_bytes()),
        }
    }

    pub fn issue_access(&self, identity: &Identity) -> Result<String, TokenError> {
        let claims = AccessClaims {
            sub: identity.id,
            email: identity.email.clone(),
            role: identity.role,
            exp: (Utc::now() + Duration::hours(ACCESS_TOKEN_TTL_HOURS)).timestamp() as usize,
        };
        Ok(encode(&Header::default(), &claims, &self.access_enc)?)
    }

    pub fn issue_refresh(&self, user_id: Uuid) -> Result<String, TokenError> {
        let claims = RefreshClaims {
            sub: user_id,
            exp: (Utc::now() + Duration::days(REFRESH_TOKEN_TTL_DAYS)).timestamp() as usize,
        };
        Ok(encode(&Header::default(), &claims, &self.refresh_enc)?)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let data = decode::<AccessClaims>(token, &self.access_dec, &Validation::default())?;
        Ok(data.claims)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let data = decode::<RefreshClaims>(token, &self.refresh_dec, &Validation::default())?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> TokenKeys {
        TokenKeys::from_secrets("access-secret", "refresh-secret")
    }

    fn identity() -> Identity {
        Identity {
            id: Uuid::new_v4(),
            role: Role::Employee,
            email: "dev@example.com".into(),
        }
    }

    #[test]
    fn access_token_round_trips() {
        let keys = keys();
        let who = identity();
        let token = keys.issue_access(&who).unwrap();

        let claims = keys.verify_access(&token).unwrap();
        assert_eq!(claims.sub, who.id);
        assert_eq!(claims.role, Role::Employee);
        assert_eq!(claims.email, who.email);
    }

    #[test]
    fn refresh_token_round_trips() {
        let keys = keys();
        let user_id = Uuid::new_v4();
        let token = keys.issue_refresh(user_id).unwrap();

        let claims = keys.verify_refresh(&token).unwrap();
        assert_eq!(claims.sub, user_id);
    }

    #[test]
    fn secrets_are_not_interchangeable() {
        let keys = keys();
        let who = identity();

        let access = keys.issue_access(&who).unwrap();
        assert!(matches!(keys.verify_refresh(&access), Err(TokenError::Invalid)));

        let refresh = keys.issue_refresh(who.id).unwrap();
        assert!(matches!(keys.verify_access(&refresh), Err(TokenError::Invalid)));
    }

    #[test]
    fn expired_access_token_is_rejected() {
        let keys = keys();
        let claims = AccessClaims {
            sub: Uuid::new_v4(),
            email: "dev@example.com".into(),
            role: Role::Admin,
            // Well past the default validation leeway.
            exp: (Utc::now() - Duration::hours(2)).timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"access-secret")).unwrap();

        assert!(matches!(keys.verify_access(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn garbage_token_is_invalid() {
        let keys = keys();
        assert!(matches!(keys.verify_access("not-a-jwt"), Err(TokenError::Invalid)));
    }

    #[test]
    fn token_missing_subject_is_invalid() {
        #[derive(Serialize)]
        struct NoSubject {
            exp: usize,
        }
        let keys = keys();
        let claims = NoSubject {
            exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"access-secret")).unwrap();

        assert!(matches!(keys.verify_access(&token), Err(TokenError::Invalid)));
    }
}
