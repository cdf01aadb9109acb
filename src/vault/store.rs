//! Encrypted credential record store backed by SQLite.
//!
//! One row per (user, agent, platform) triple with upsert semantics: a
//! second save for the same triple replaces the encrypted payload rather
//! than creating a duplicate. Disconnect is a soft delete (`is_active=0`);
//! hard deletion is a separate, irreversible operation.

use super::{
    encryption, CredentialSummary, CredentialType, DecryptedCredential, EncryptedBlob, OAuthTokens,
    SimpleCredentials, StoredOAuthCredentials,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Encryption key version stamped on every write. Rotation is not
/// implemented; the column exists so a future rotation can tell old
/// and new ciphertexts apart.
const KEY_VERSION: i64 = 1;

/// Encrypted credential storage.
///
/// # Schema
/// ```sql
/// CREATE TABLE credentials (
///     id INTEGER PRIMARY KEY,
///     user_id TEXT NOT NULL,
///     agent_id TEXT NOT NULL,
///     platform TEXT NOT NULL,
///     credential_type TEXT NOT NULL,
///     secret_ciphertext TEXT NOT NULL,  -- simple: JSON field map; oauth2: access token
///     secret_iv TEXT NOT NULL,
///     secret_tag TEXT NOT NULL,
///     refresh_ciphertext TEXT,          -- oauth2 refresh token (optional)
///     refresh_iv TEXT,
///     refresh_tag TEXT,
///     token_expires_at TEXT,            -- ISO 8601 (oauth2 only)
///     token_scope TEXT,                 -- oauth2 only
///     key_version INTEGER NOT NULL,
///     is_active INTEGER NOT NULL,
///     metadata TEXT,                    -- plaintext JSON, never secret material
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL,
///     UNIQUE(user_id, agent_id, platform)
/// );
/// ```
///
/// # Thread safety
/// The connection is wrapped in a Mutex; every write is a single atomic
/// upsert, so a canceled request can never leave a blob with mismatched
/// IV/tag components.
pub struct CredentialStore {
    conn: Mutex<Connection>,
    encryption_key: Vec<u8>,
}

impl CredentialStore {
    /// Creates or opens a credential store.
    ///
    /// `master_key_hex` must be 64 hex characters (32 bytes). An absent or
    /// malformed key is a fatal configuration error: no credential
    /// operation is possible without a valid key.
    pub fn new<P: AsRef<Path>>(db_path: P, master_key_hex: &str) -> Result<Self> {
        let key_bytes =
            encryption::validate_key(master_key_hex).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open database")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                credential_type TEXT NOT NULL,
                secret_ciphertext TEXT NOT NULL,
                secret_iv TEXT NOT NULL,
                secret_tag TEXT NOT NULL,
                refresh_ciphertext TEXT,
                refresh_iv TEXT,
                refresh_tag TEXT,
                token_expires_at TEXT,
                token_scope TEXT,
                key_version INTEGER NOT NULL DEFAULT 1,
                is_active INTEGER NOT NULL DEFAULT 1,
                metadata TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, agent_id, platform)
            )
            "#,
            [],
        )
        .context("Failed to create credentials table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cred_triple \
             ON credentials(user_id, agent_id, platform)",
            [],
        )
        .context("Failed to create index")?;

        Ok(Self {
            conn: Mutex::new(conn),
            encryption_key: key_bytes,
        })
    }

    /// Stores an API-key / basic-auth / bearer credential set.
    ///
    /// The field map is serialized to JSON and encrypted as one blob.
    /// Field names must already be validated against the platform
    /// definition by the caller; the vault does not re-validate them.
    /// Re-saving the same triple replaces the payload and re-activates
    /// the record.
    pub fn store_simple(
        &self,
        user_id: &str,
        agent_id: &str,
        platform: &str,
        fields: &HashMap<String, String>,
        credential_type: CredentialType,
        metadata: Option<&serde_json::Value>,
    ) -> Result<()> {
        if credential_type == CredentialType::Oauth2 {
            return Err(anyhow!("OAuth2 credentials must go through store_oauth"));
        }

        let payload =
            serde_json::to_string(fields).context("Failed to serialize credential fields")?;
        let blob = encryption::encrypt(&payload, &self.encryption_key)
            .context("Failed to encrypt credential fields")?;

        self.upsert(
            user_id,
            agent_id,
            platform,
            credential_type,
            &blob,
            None,
            None,
            None,
            metadata,
        )
    }

    /// Retrieves and decrypts a simple credential set.
    ///
    /// Returns `Ok(None)` when no active record exists ("not connected").
    /// A decryption failure propagates as an error, never as `None`, so
    /// tampering cannot masquerade as a missing credential.
    pub fn retrieve_simple(
        &self,
        user_id: &str,
        agent_id: &str,
        platform: &str,
    ) -> Result<Option<SimpleCredentials>> {
        let row = match self.fetch_active(user_id, agent_id, platform)? {
            Some(row) => row,
            None => return Ok(None),
        };

        if row.credential_type == CredentialType::Oauth2 {
            return Err(anyhow!(
                "Credential for platform '{}' is oauth2; use retrieve_oauth",
                platform
            ));
        }

        self.decrypt_simple(row).map(Some)
    }

    /// Stores an OAuth2 token set.
    ///
    /// The access and refresh tokens are encrypted independently, each
    /// with its own IV and tag, so one can be rotated without touching
    /// the other. The absolute expiry is computed here as `now +
    /// expires_in`; a client-supplied expiry is never trusted. Passing
    /// `metadata: None` preserves whatever metadata the record already
    /// has (used by the refresh path).
    pub fn store_oauth(
        &self,
        user_id: &str,
        agent_id: &str,
        platform: &str,
        tokens: &OAuthTokens,
        metadata: Option<&serde_json::Value>,
    ) -> Result<()> {
        let access_blob = encryption::encrypt(&tokens.access_token, &self.encryption_key)
            .context("Failed to encrypt access token")?;

        let refresh_blob = match &tokens.refresh_token {
            Some(token) => Some(
                encryption::encrypt(token, &self.encryption_key)
                    .context("Failed to encrypt refresh token")?,
            ),
            None => None,
        };

        let expires_at = tokens
            .expires_in
            .map(|seconds| Utc::now() + Duration::seconds(seconds));

        self.upsert(
            user_id,
            agent_id,
            platform,
            CredentialType::Oauth2,
            &access_blob,
            refresh_blob.as_ref(),
            expires_at,
            tokens.scope.as_deref(),
            metadata,
        )
    }

    /// Retrieves and decrypts an OAuth credential set.
    ///
    /// Same not-found / tamper contract as [`retrieve_simple`](Self::retrieve_simple).
    pub fn retrieve_oauth(
        &self,
        user_id: &str,
        agent_id: &str,
        platform: &str,
    ) -> Result<Option<StoredOAuthCredentials>> {
        let row = match self.fetch_active(user_id, agent_id, platform)? {
            Some(row) => row,
            None => return Ok(None),
        };

        if row.credential_type != CredentialType::Oauth2 {
            return Err(anyhow!(
                "Credential for platform '{}' is {}; use retrieve_simple",
                platform,
                row.credential_type
            ));
        }

        self.decrypt_oauth(row).map(Some)
    }

    /// Retrieves and decrypts every active credential under a (user,
    /// agent) pair, keyed by platform slug. Used by the execution layer
    /// to inject all connected secrets at once.
    pub fn retrieve_all(
        &self,
        user_id: &str,
        agent_id: &str,
    ) -> Result<HashMap<String, DecryptedCredential>> {
        let rows = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn
                .prepare(
                    "SELECT credential_type, \
                            secret_ciphertext, secret_iv, secret_tag, \
                            refresh_ciphertext, refresh_iv, refresh_tag, \
                            token_expires_at, token_scope, metadata, platform \
                     FROM credentials \
                     WHERE user_id = ?1 AND agent_id = ?2 AND is_active = 1",
                )
                .context("Failed to prepare query")?;

            let rows = stmt
                .query_map(params![user_id, agent_id], |row| {
                    Ok((row.get::<_, String>(10)?, RawRow::from_row(row)?))
                })
                .context("Failed to execute query")?
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read results")?;
            rows
        };

        let mut credentials = HashMap::new();
        for (platform, raw) in rows {
            let row = raw.finish()?;
            let decrypted = match row.credential_type {
                CredentialType::Oauth2 => DecryptedCredential::OAuth(self.decrypt_oauth(row)?),
                _ => DecryptedCredential::Simple(self.decrypt_simple(row)?),
            };
            credentials.insert(platform, decrypted);
        }

        Ok(credentials)
    }

    fn decrypt_simple(&self, row: StoredRow) -> Result<SimpleCredentials> {
        let payload = encryption::decrypt(&row.secret, &self.encryption_key)
            .context("Failed to decrypt credential fields")?;
        let fields: HashMap<String, String> =
            serde_json::from_str(&payload).context("Stored credential payload is not valid JSON")?;

        Ok(SimpleCredentials {
            fields,
            metadata: row.metadata,
        })
    }

    fn decrypt_oauth(&self, row: StoredRow) -> Result<StoredOAuthCredentials> {
        let access_token = encryption::decrypt(&row.secret, &self.encryption_key)
            .context("Failed to decrypt access token")?;

        let refresh_token = match &row.refresh {
            Some(blob) => Some(
                encryption::decrypt(blob, &self.encryption_key)
                    .context("Failed to decrypt refresh token")?,
            ),
            None => None,
        };

        Ok(StoredOAuthCredentials {
            access_token,
            refresh_token,
            expires_at: row.token_expires_at,
            scope: row.token_scope,
            metadata: row.metadata,
        })
    }

    /// Deactivates a record (disconnect). The encrypted payload stays in
    /// place; retrieval treats the record as not connected.
    ///
    /// Returns `Ok(false)` if no active record existed.
    pub fn deactivate(&self, user_id: &str, agent_id: &str, platform: &str) -> Result<bool> {
        let rows = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE credentials SET is_active = 0, updated_at = ?4 \
                 WHERE user_id = ?1 AND agent_id = ?2 AND platform = ?3 AND is_active = 1",
                params![user_id, agent_id, platform, Utc::now().to_rfc3339()],
            )
            .context("Failed to deactivate credential")?;

        Ok(rows > 0)
    }

    /// Permanently deletes a record. Irreversible; not part of the normal
    /// disconnect flow.
    pub fn delete(&self, user_id: &str, agent_id: &str, platform: &str) -> Result<bool> {
        let rows = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "DELETE FROM credentials \
                 WHERE user_id = ?1 AND agent_id = ?2 AND platform = ?3",
                params![user_id, agent_id, platform],
            )
            .context("Failed to delete credential")?;

        Ok(rows > 0)
    }

    /// Lists status metadata for every record (active or not) under a
    /// (user, agent) pair. Never attempts decryption.
    pub fn list_summaries(&self, user_id: &str, agent_id: &str) -> Result<Vec<CredentialSummary>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT platform, credential_type, is_active, token_expires_at, \
                        created_at, updated_at \
                 FROM credentials \
                 WHERE user_id = ?1 AND agent_id = ?2 \
                 ORDER BY platform",
            )
            .context("Failed to prepare query")?;

        let summaries = stmt
            .query_map(params![user_id, agent_id], |row| {
                let type_str: String = row.get(1)?;
                let expires: Option<String> = row.get(3)?;
                let created: String = row.get(4)?;
                let updated: String = row.get(5)?;
                Ok((
                    row.get::<_, String>(0)?,
                    type_str,
                    row.get::<_, bool>(2)?,
                    expires,
                    created,
                    updated,
                ))
            })
            .context("Failed to execute query")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read results")?;

        summaries
            .into_iter()
            .map(|(platform, type_str, is_active, expires, created, updated)| {
                Ok(CredentialSummary {
                    platform,
                    credential_type: CredentialType::parse(&type_str)
                        .ok_or_else(|| anyhow!("Unknown credential type '{}'", type_str))?,
                    is_active,
                    token_expires_at: parse_opt_timestamp(expires)?,
                    created_at: parse_timestamp(&created)?,
                    updated_at: parse_timestamp(&updated)?,
                })
            })
            .collect()
    }

    /// Platform slugs with an active credential under a (user, agent)
    /// pair. Feeds the requirement checker.
    pub fn active_platforms(&self, user_id: &str, agent_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT platform FROM credentials \
                 WHERE user_id = ?1 AND agent_id = ?2 AND is_active = 1 \
                 ORDER BY platform",
            )
            .context("Failed to prepare query")?;

        let platforms = stmt
            .query_map(params![user_id, agent_id], |row| row.get(0))
            .context("Failed to execute query")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to read results")?;

        Ok(platforms)
    }

    /// Single atomic upsert against the (user, agent, platform) triple.
    ///
    /// Concurrent saves resolve last-writer-wins via the conflict clause;
    /// `created_at` survives the conflict, `metadata` is preserved when
    /// the new value is NULL.
    #[allow(clippy::too_many_arguments)]
    fn upsert(
        &self,
        user_id: &str,
        agent_id: &str,
        platform: &str,
        credential_type: CredentialType,
        secret: &EncryptedBlob,
        refresh: Option<&EncryptedBlob>,
        token_expires_at: Option<DateTime<Utc>>,
        token_scope: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<()> {
        let metadata_json = metadata
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize metadata")?;
        let now = Utc::now().to_rfc3339();

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO credentials (
                    user_id, agent_id, platform, credential_type,
                    secret_ciphertext, secret_iv, secret_tag,
                    refresh_ciphertext, refresh_iv, refresh_tag,
                    token_expires_at, token_scope,
                    key_version, is_active, metadata, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 1, ?14, ?15, ?15)
                ON CONFLICT(user_id, agent_id, platform) DO UPDATE SET
                    credential_type = excluded.credential_type,
                    secret_ciphertext = excluded.secret_ciphertext,
                    secret_iv = excluded.secret_iv,
                    secret_tag = excluded.secret_tag,
                    refresh_ciphertext = excluded.refresh_ciphertext,
                    refresh_iv = excluded.refresh_iv,
                    refresh_tag = excluded.refresh_tag,
                    token_expires_at = excluded.token_expires_at,
                    token_scope = excluded.token_scope,
                    key_version = excluded.key_version,
                    is_active = 1,
                    metadata = COALESCE(excluded.metadata, credentials.metadata),
                    updated_at = excluded.updated_at
                "#,
                params![
                    user_id,
                    agent_id,
                    platform,
                    credential_type.as_str(),
                    secret.ciphertext,
                    secret.iv,
                    secret.tag,
                    refresh.map(|b| b.ciphertext.as_str()),
                    refresh.map(|b| b.iv.as_str()),
                    refresh.map(|b| b.tag.as_str()),
                    token_expires_at.map(|dt| dt.to_rfc3339()),
                    token_scope,
                    KEY_VERSION,
                    metadata_json,
                    now,
                ],
            )
            .context("Failed to store credential")?;

        Ok(())
    }

    fn fetch_active(
        &self,
        user_id: &str,
        agent_id: &str,
        platform: &str,
    ) -> Result<Option<StoredRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT credential_type, \
                        secret_ciphertext, secret_iv, secret_tag, \
                        refresh_ciphertext, refresh_iv, refresh_tag, \
                        token_expires_at, token_scope, metadata \
                 FROM credentials \
                 WHERE user_id = ?1 AND agent_id = ?2 AND platform = ?3 AND is_active = 1",
            )
            .context("Failed to prepare query")?;

        stmt.query_row(params![user_id, agent_id, platform], RawRow::from_row)
            .optional()
            .context("Failed to execute query")?
            .map(RawRow::finish)
            .transpose()
    }
}

/// Fully parsed active record, ready for decryption.
struct StoredRow {
    credential_type: CredentialType,
    secret: EncryptedBlob,
    refresh: Option<EncryptedBlob>,
    token_expires_at: Option<DateTime<Utc>>,
    token_scope: Option<String>,
    metadata: Option<serde_json::Value>,
}

/// Intermediate tuple carrying unparsed TEXT columns out of the rusqlite
/// closure, where only rusqlite errors are allowed.
struct RawRow {
    type_str: String,
    secret: EncryptedBlob,
    refresh_ciphertext: Option<String>,
    refresh_iv: Option<String>,
    refresh_tag: Option<String>,
    token_expires_at: Option<String>,
    token_scope: Option<String>,
    metadata: Option<String>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
        Ok(RawRow {
            type_str: row.get(0)?,
            secret: EncryptedBlob {
                ciphertext: row.get(1)?,
                iv: row.get(2)?,
                tag: row.get(3)?,
            },
            refresh_ciphertext: row.get(4)?,
            refresh_iv: row.get(5)?,
            refresh_tag: row.get(6)?,
            token_expires_at: row.get(7)?,
            token_scope: row.get(8)?,
            metadata: row.get(9)?,
        })
    }

    fn finish(self) -> Result<StoredRow> {
        let credential_type = CredentialType::parse(&self.type_str)
            .ok_or_else(|| anyhow!("Unknown credential type '{}'", self.type_str))?;

        let refresh = match (self.refresh_ciphertext, self.refresh_iv, self.refresh_tag) {
            (Some(ciphertext), Some(iv), Some(tag)) => Some(EncryptedBlob { ciphertext, iv, tag }),
            (None, None, None) => None,
            _ => {
                return Err(anyhow!(
                    "Stored refresh token blob has mismatched components"
                ))
            }
        };

        let metadata = self
            .metadata
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .context("Stored metadata is not valid JSON")?;

        Ok(StoredRow {
            credential_type,
            secret: self.secret,
            refresh,
            token_expires_at: parse_opt_timestamp(self.token_expires_at)?,
            token_scope: self.token_scope,
            metadata,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .context("Failed to parse stored timestamp")
}

fn parse_opt_timestamp(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_timestamp(&s)).transpose()
}
