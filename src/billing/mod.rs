//! Payment webhook collaborator.
//!
//! The payment gateway calls back with a signed notification once an
//! order settles. The raw request body must verify against an
//! HMAC-SHA256 shared secret before any payload field is trusted, and
//! crediting must be idempotent: a replayed order id is a no-op, never a
//! double credit.

use anyhow::{Context, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::Sha256;
use std::path::Path;
use std::sync::Mutex;

type HmacSha256 = Hmac<Sha256>;

/// Whether a payment notification changed the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// First sighting of the order id; balance credited
    Applied,
    /// Order id already recorded; nothing changed
    Replay,
}

/// Verify an HMAC-SHA256 signature (hex-encoded) over the raw body.
///
/// Constant-time comparison; returns false for any malformed input
/// rather than erroring, so the handler can reject uniformly.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(signature_hex.as_bytes(), expected.as_bytes())
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Credit ledger: one row per settled order, one balance row per user.
pub struct BillingStore {
    conn: Mutex<Connection>,
}

impl BillingStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS payment_orders (
                order_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                credits INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS credit_balances (
                user_id TEXT PRIMARY KEY,
                credits INTEGER NOT NULL
            );
            "#,
        )
        .context("Failed to create billing tables")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Records a settled order and credits the user's balance.
    ///
    /// Both steps run in one transaction keyed on the order id: if the
    /// order was already recorded, the balance is untouched and the call
    /// reports [`PaymentOutcome::Replay`].
    pub fn record_payment(
        &self,
        order_id: &str,
        user_id: &str,
        credits: i64,
    ) -> Result<PaymentOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO payment_orders (order_id, user_id, credits, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![order_id, user_id, credits, Utc::now().to_rfc3339()],
            )
            .context("Failed to record order")?;

        if inserted == 0 {
            // Replay: order id already seen, do not touch the balance
            return Ok(PaymentOutcome::Replay);
        }

        tx.execute(
            "INSERT INTO credit_balances (user_id, credits) VALUES (?1, ?2) \
             ON CONFLICT(user_id) DO UPDATE SET credits = credits + excluded.credits",
            params![user_id, credits],
        )
        .context("Failed to credit balance")?;

        tx.commit().context("Failed to commit payment")?;
        Ok(PaymentOutcome::Applied)
    }

    /// Current credit balance for a user (0 if never credited).
    pub fn balance(&self, user_id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let balance = conn
            .query_row(
                "SELECT credits FROM credit_balances WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read balance")?;
        Ok(balance.unwrap_or(0))
    }
}
