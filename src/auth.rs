// Identity Provider - cookie-carried HS256 session tokens + Argon2id passwords.
// Every other component treats this as "given a request, who is calling?"

use std::fmt;
use std::str::FromStr;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Cookie that carries the session token.
pub const TOKEN_COOKIE: &str = "auth-token";

const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 60 * 60 * 24 * 7; // 7 days

// ============================================================================
// ROLES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "ADMIN")]
    Admin,
    #[serde(rename = "EMPLOYEE")]
    Employee,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Employee => "EMPLOYEE",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "EMPLOYEE" => Ok(Role::Employee),
            other => Err(AppError::validation(format!("Unknown role: {}", other))),
        }
    }
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_lifetime_secs: i64,
}

impl AuthConfig {
    /// Read from CLAIMDESK_JWT_SECRET, with a dev fallback.
    pub fn from_env() -> Self {
        let jwt_secret = std::env::var("CLAIMDESK_JWT_SECRET")
            .unwrap_or_else(|_| "dev-secret-change-me".to_string());
        Self {
            jwt_secret,
            token_lifetime_secs: DEFAULT_TOKEN_LIFETIME_SECS,
        }
    }
}

// ============================================================================
// SESSION TOKENS
// ============================================================================

/// Claims embedded in every session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject - employee id.
    pub sub: String,
    pub email: String,
    pub role: Role,
    /// Issued-at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
}

impl SessionClaims {
    pub fn employee_id(&self) -> &str {
        &self.sub
    }
}

/// Issue a signed HS256 session token.
pub fn sign_token(
    employee_id: &str,
    email: &str,
    role: Role,
    config: &AuthConfig,
) -> AppResult<String> {
    let now = Utc::now().timestamp();
    let claims = SessionClaims {
        sub: employee_id.to_string(),
        email: email.to_string(),
        role,
        iat: now,
        exp: now + config.token_lifetime_secs,
    };

    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("token encode: {}", e)))
}

/// Decode and verify a session token. Invalid, tampered or expired tokens
/// resolve to None - the caller is simply unauthenticated.
pub fn verify_token(token: &str, config: &AuthConfig) -> Option<SessionClaims> {
    jsonwebtoken::decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .ok()
}

/// Resolve the session from a raw Cookie header value, or None.
pub fn session_from_cookie_header(header: &str, config: &AuthConfig) -> Option<SessionClaims> {
    let token = header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == TOKEN_COOKIE).then(|| value.to_string())
    })?;
    verify_token(&token, config)
}

// ============================================================================
// PASSWORDS
// ============================================================================

/// Hash a password with Argon2id (PHC string format).
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("password hash: {}", e)))
}

/// Verify a plaintext password against a stored Argon2id hash.
/// Returns Ok(false) on mismatch; Err only when the stored hash is malformed.
pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    let parsed = argon2::PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("invalid hash format: {}", e)))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AppError::Internal(format!("verify error: {}", e))),
    }
}

// ============================================================================
// LOGIN
// ============================================================================

/// Verify credentials and issue a session token.
/// Unknown email and wrong password fail identically - the response never
/// reveals whether the account exists.
pub fn login(
    conn: &Connection,
    email: &str,
    password: &str,
    config: &AuthConfig,
) -> AppResult<(String, SessionClaims)> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, password_hash, role FROM employees WHERE email = ?1",
            params![email],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let (employee_id, password_hash, role_str) = match row {
        Some(r) => r,
        None => return Err(AppError::Authorization("Invalid credentials".to_string())),
    };

    if !verify_password(password, &password_hash)? {
        return Err(AppError::Authorization("Invalid credentials".to_string()));
    }

    let role: Role = role_str.parse()?;
    let token = sign_token(&employee_id, email, role, config)?;
    let claims = verify_token(&token, config)
        .ok_or_else(|| AppError::Internal("freshly issued token failed to verify".to_string()))?;

    Ok((token, claims))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn test_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".to_string(),
            token_lifetime_secs: 3600,
        }
    }

    #[test]
    fn test_token_round_trip() {
        let config = test_config();
        let token = sign_token("emp-1", "ana@example.com", Role::Employee, &config).unwrap();

        let claims = verify_token(&token, &config).unwrap();
        assert_eq!(claims.sub, "emp-1");
        assert_eq!(claims.email, "ana@example.com");
        assert_eq!(claims.role, Role::Employee);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let config = test_config();
        let token = sign_token("emp-1", "ana@example.com", Role::Employee, &config).unwrap();

        let other = AuthConfig {
            jwt_secret: "different-secret".to_string(),
            token_lifetime_secs: 3600,
        };
        assert!(verify_token(&token, &other).is_none());
        assert!(verify_token("not-a-token", &config).is_none());
    }

    #[test]
    fn test_cookie_header_parsing() {
        let config = test_config();
        let token = sign_token("emp-1", "ana@example.com", Role::Admin, &config).unwrap();

        let header = format!("theme=dark; auth-token={}; lang=en", token);
        let claims = session_from_cookie_header(&header, &config).unwrap();
        assert!(claims.role.is_admin());

        assert!(session_from_cookie_header("theme=dark", &config).is_none());
    }

    #[test]
    fn test_password_hash_and_verify() {
        let hash = hash_password("hunter2").unwrap();
        assert!(verify_password("hunter2", &hash).unwrap());
        assert!(!verify_password("hunter3", &hash).unwrap());
        assert!(verify_password("hunter2", "not-a-phc-string").is_err());
    }

    #[test]
    fn test_login_uniform_failure() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let config = test_config();

        let hash = hash_password("secret123").unwrap();
        conn.execute(
            "INSERT INTO employees (id, email, name, password_hash, role, created_at)
             VALUES ('e1', 'ana@example.com', 'Ana', ?1, 'EMPLOYEE', '2026-01-01T00:00:00Z')",
            params![hash],
        )
        .unwrap();

        // Wrong password and unknown email produce the same message
        let e1 = login(&conn, "ana@example.com", "wrong", &config).unwrap_err();
        let e2 = login(&conn, "nobody@example.com", "wrong", &config).unwrap_err();
        assert_eq!(e1.to_string(), e2.to_string());

        let (token, claims) = login(&conn, "ana@example.com", "secret123", &config).unwrap();
        assert!(!token.is_empty());
        assert_eq!(claims.employee_id(), "e1");
    }
}
