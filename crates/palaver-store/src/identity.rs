//! Users and bearer tokens.
//!
//! This is the backing table for the relay's identity-provider contract:
//! `validate_token` is the single call that turns a credential into an
//! identity.  Token issuance normally happens in the request tier at login;
//! it lives here so both tiers share one implementation.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rusqlite::{params, OptionalExtension};

use palaver_shared::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{TokenIdentity, UserRow, USER_STATUS_ACTIVE};

impl Database {
    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Insert a new active user and return the full row.
    pub fn create_user(&self, nickname: &str, is_admin: bool) -> Result<UserRow> {
        let created_at = Utc::now();
        self.conn().execute(
            "INSERT INTO users (nickname, status, is_admin, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                nickname,
                USER_STATUS_ACTIVE,
                is_admin as i64,
                created_at.to_rfc3339(),
            ],
        )?;

        Ok(UserRow {
            id: UserId(self.conn().last_insert_rowid()),
            nickname: nickname.to_string(),
            status: USER_STATUS_ACTIVE,
            is_admin,
            created_at,
        })
    }

    /// Update a user's status (1 = active, 2 = suspended).
    pub fn set_user_status(&self, user: UserId, status: i64) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET status = ?1 WHERE id = ?2",
            params![status, user.0],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    /// Issue a fresh opaque bearer token for a user.
    pub fn issue_token(&self, user: UserId, ttl: Duration) -> Result<String> {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = hex::encode(raw);

        let expires_at = Utc::now() + ttl;
        self.conn().execute(
            "INSERT INTO user_tokens (token, user_id, expires_at)
             VALUES (?1, ?2, ?3)",
            params![token, user.0, expires_at.to_rfc3339()],
        )?;

        Ok(token)
    }

    /// Resolve a bearer credential to an identity.
    ///
    /// Returns `None` for unknown or expired tokens.  A resolved identity
    /// with `active == false` (suspended user) must still be rejected by the
    /// caller; reporting it separately lets the relay distinguish "bad
    /// token" from "suspended account" in its close reason.
    pub fn validate_token(&self, token: &str) -> Result<Option<TokenIdentity>> {
        let row = self
            .conn()
            .query_row(
                "SELECT u.id, u.status, u.is_admin, ut.expires_at
                 FROM user_tokens ut
                 JOIN users u ON u.id = ut.user_id
                 WHERE ut.token = ?1",
                params![token],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((user_id, status, is_admin, expires_at)) = row else {
            return Ok(None);
        };

        let expires_at: DateTime<Utc> = expires_at
            .parse()
            .map_err(|_| StoreError::Migration("unparsable expires_at".into()))?;
        if expires_at <= Utc::now() {
            return Ok(None);
        }

        Ok(Some(TokenIdentity {
            user_id: UserId(user_id),
            active: status == USER_STATUS_ACTIVE,
            moderator: is_admin != 0,
        }))
    }

    /// Drop a token (logout).
    pub fn revoke_token(&self, token: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM user_tokens WHERE token = ?1", params![token])?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::USER_STATUS_SUSPENDED;

    #[test]
    fn issue_and_validate() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("alice", false).unwrap();

        let token = db.issue_token(user.id, Duration::hours(1)).unwrap();
        let identity = db.validate_token(&token).unwrap().expect("valid token");

        assert_eq!(identity.user_id, user.id);
        assert!(identity.active);
        assert!(!identity.moderator);
    }

    #[test]
    fn unknown_token_resolves_to_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.validate_token("deadbeef").unwrap().is_none());
    }

    #[test]
    fn expired_token_resolves_to_none() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("bob", false).unwrap();

        let token = db.issue_token(user.id, Duration::seconds(-5)).unwrap();
        assert!(db.validate_token(&token).unwrap().is_none());
    }

    #[test]
    fn suspended_user_is_inactive() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("mallory", false).unwrap();
        let token = db.issue_token(user.id, Duration::hours(1)).unwrap();

        db.set_user_status(user.id, USER_STATUS_SUSPENDED).unwrap();

        let identity = db.validate_token(&token).unwrap().expect("token resolves");
        assert!(!identity.active);
    }

    #[test]
    fn moderator_flag_carries_through() {
        let db = Database::open_in_memory().unwrap();
        let admin = db.create_user("root", true).unwrap();
        let token = db.issue_token(admin.id, Duration::hours(1)).unwrap();

        let identity = db.validate_token(&token).unwrap().unwrap();
        assert!(identity.moderator);
    }

    #[test]
    fn revoked_token_no_longer_validates() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("carol", false).unwrap();
        let token = db.issue_token(user.id, Duration::hours(1)).unwrap();

        assert!(db.revoke_token(&token).unwrap());
        assert!(db.validate_token(&token).unwrap().is_none());
    }
}
