// API users. Keys are handed out once by the CLI; only their SHA-256 digest
// is stored.

use crate::error::{map_unique, Error, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_superuser: bool,
}

/// Who is making a request
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    Anonymous,
    User(User),
}

impl Principal {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Principal::User(_))
    }

    pub fn is_superuser(&self) -> bool {
        matches!(self, Principal::User(u) if u.is_superuser)
    }

    /// Name recorded in the audit trail
    pub fn actor(&self) -> &str {
        match self {
            Principal::Anonymous => "anonymous",
            Principal::User(u) => &u.username,
        }
    }
}

/// Hex SHA-256 digest of an API key
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn new_token() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

/// Create a user and return it with its freshly issued API key
pub fn create(conn: &Connection, username: &str, is_superuser: bool) -> Result<(User, String)> {
    let username = username.trim();
    if username.is_empty() {
        return Err(Error::field("username", crate::schema::BLANK));
    }

    let token = new_token();
    conn.execute(
        "INSERT INTO users (username, token_hash, is_superuser, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![username, hash_token(&token), is_superuser, Utc::now().to_rfc3339()],
    )
    .map_err(|e| map_unique(e, "user", &["username"]))?;

    let user = User {
        id: conn.last_insert_rowid(),
        username: username.to_string(),
        is_superuser,
    };
    Ok((user, token))
}

/// Look up the user owning `token`
pub fn find_by_token(conn: &Connection, token: &str) -> Result<Option<User>> {
    Ok(conn
        .query_row(
            "SELECT id, username, is_superuser FROM users WHERE token_hash = ?1",
            [hash_token(token)],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    is_superuser: row.get(2)?,
                })
            },
        )
        .optional()?)
}
