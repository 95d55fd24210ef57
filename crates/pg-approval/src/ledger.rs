use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rusqlite::{OptionalExtension, TransactionBehavior};

use crate::error::LedgerError;
use crate::response::{IdempotencyEntry, TerminalState};

/// Result of trying to claim an auth token for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// This caller now owns the token and must drive it to a terminal state.
    Acquired,
    /// Another delivery holds a live claim.
    InFlight,
    /// The token already has a terminal outcome.
    Resolved(IdempotencyEntry),
}

/// Idempotency ledger keyed by auth token.
///
/// Implementations must be thread-safe and give strict-serializable claim
/// semantics per key. Terminal entries are append-once: once written they
/// are never replaced. Claims are leases so that a crashed owner does not
/// block a token forever.
pub trait Ledger: Send + Sync {
    /// Atomically claim `auth_token` unless it is resolved or already held
    /// by a claim younger than `lease`.
    fn try_claim(&self, auth_token: &str, lease: Duration) -> Result<Claim, LedgerError>;

    /// Terminal entry for `auth_token`, if any.
    fn lookup(&self, auth_token: &str) -> Result<Option<IdempotencyEntry>, LedgerError>;

    /// Whether a claim younger than `lease` exists for `auth_token`.
    fn is_claimed(&self, auth_token: &str, lease: Duration) -> Result<bool, LedgerError>;

    /// Record a terminal entry and drop the claim. If an entry already
    /// exists it is kept and returned instead.
    fn commit(&self, entry: IdempotencyEntry) -> Result<IdempotencyEntry, LedgerError>;

    /// Drop a claim without recording anything, e.g. after a rejected callback.
    fn release(&self, auth_token: &str) -> Result<(), LedgerError>;

    /// Drop claims older than `max_age`. Returns the number removed.
    fn purge_stale_claims(&self, max_age: Duration) -> usize;

    /// Cheap liveness check of the backing store.
    fn health_check(&self) -> Result<(), LedgerError>;
}

enum Slot {
    Claimed(Instant),
    Resolved(IdempotencyEntry),
}

/// In-memory ledger backed by DashMap. Fast but lost on restart.
pub struct InMemoryLedger {
    slots: DashMap<String, Slot>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger for InMemoryLedger {
    fn try_claim(&self, auth_token: &str, lease: Duration) -> Result<Claim, LedgerError> {
        // The entry API holds the shard lock, which makes check-and-claim atomic.
        use dashmap::mapref::entry::Entry;
        match self.slots.entry(auth_token.to_string()) {
            Entry::Occupied(mut o) => {
                match o.get() {
                    Slot::Resolved(entry) => return Ok(Claim::Resolved(entry.clone())),
                    Slot::Claimed(at) if at.elapsed() < lease => return Ok(Claim::InFlight),
                    Slot::Claimed(_) => {}
                }
                tracing::warn!(
                    token = %format!("{:.8}", auth_token),
                    "taking over expired claim"
                );
                o.insert(Slot::Claimed(Instant::now()));
                Ok(Claim::Acquired)
            }
            Entry::Vacant(v) => {
                v.insert(Slot::Claimed(Instant::now()));
                Ok(Claim::Acquired)
            }
        }
    }

    fn lookup(&self, auth_token: &str) -> Result<Option<IdempotencyEntry>, LedgerError> {
        Ok(self.slots.get(auth_token).and_then(|slot| match &*slot {
            Slot::Resolved(entry) => Some(entry.clone()),
            Slot::Claimed(_) => None,
        }))
    }

    fn is_claimed(&self, auth_token: &str, lease: Duration) -> Result<bool, LedgerError> {
        Ok(self
            .slots
            .get(auth_token)
            .map(|slot| matches!(&*slot, Slot::Claimed(at) if at.elapsed() < lease))
            .unwrap_or(false))
    }

    fn commit(&self, entry: IdempotencyEntry) -> Result<IdempotencyEntry, LedgerError> {
        use dashmap::mapref::entry::Entry;
        match self.slots.entry(entry.auth_token.clone()) {
            Entry::Occupied(mut o) => {
                if let Slot::Resolved(existing) = o.get() {
                    return Ok(existing.clone());
                }
                o.insert(Slot::Resolved(entry.clone()));
                Ok(entry)
            }
            Entry::Vacant(v) => {
                v.insert(Slot::Resolved(entry.clone()));
                Ok(entry)
            }
        }
    }

    fn release(&self, auth_token: &str) -> Result<(), LedgerError> {
        self.slots
            .remove_if(auth_token, |_, slot| matches!(slot, Slot::Claimed(_)));
        Ok(())
    }

    fn purge_stale_claims(&self, max_age: Duration) -> usize {
        let mut purged = 0;
        self.slots.retain(|_, slot| match slot {
            Slot::Claimed(at) if at.elapsed() >= max_age => {
                purged += 1;
                false
            }
            _ => true,
        });
        purged
    }

    fn health_check(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// Persistent ledger backed by SQLite. Survives restarts, and the claim is a
/// database-level primary-key upsert, so it also holds across processes
/// sharing the file.
pub struct SqliteLedger {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteLedger {
    /// Open (or create) a ledger database at the given path.
    ///
    /// On Unix the file is restricted to 0600: it holds auth tokens and
    /// order ids.
    pub fn open(path: &str) -> Result<Self, LedgerError> {
        let conn = rusqlite::Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS payment_claims (
                auth_token TEXT PRIMARY KEY,
                claimed_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS payment_outcomes (
                auth_token TEXT PRIMARY KEY,
                order_id TEXT NOT NULL,
                terminal_state TEXT NOT NULL,
                entry_json TEXT NOT NULL,
                resolved_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_outcomes_order_id ON payment_outcomes(order_id);
            CREATE INDEX IF NOT EXISTS idx_claims_claimed_at ON payment_claims(claimed_at);",
        )?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "failed to set ledger database file permissions to 0600"
                );
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        match self.conn.lock() {
            Ok(c) => c,
            Err(poisoned) => {
                tracing::error!("ledger mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn lease_millis(lease: Duration) -> i64 {
    i64::try_from(lease.as_millis()).unwrap_or(i64::MAX)
}

fn parse_entry(auth_token: &str, json: &str) -> Result<IdempotencyEntry, LedgerError> {
    serde_json::from_str(json).map_err(|e| LedgerError::Corrupt {
        auth_token: auth_token.to_string(),
        reason: e.to_string(),
    })
}

fn select_entry(
    conn: &rusqlite::Connection,
    auth_token: &str,
) -> Result<Option<IdempotencyEntry>, LedgerError> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT terminal_state, entry_json FROM payment_outcomes WHERE auth_token = ?1",
            [auth_token],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((state, json)) = row else {
        return Ok(None);
    };

    let corrupt = |reason: String| LedgerError::Corrupt {
        auth_token: auth_token.to_string(),
        reason,
    };
    let state: TerminalState = state.parse().map_err(corrupt)?;
    let entry = parse_entry(auth_token, &json)?;
    if entry.terminal_state != state {
        return Err(corrupt(format!(
            "terminal_state column '{}' disagrees with stored entry '{}'",
            state.as_str(),
            entry.terminal_state.as_str()
        )));
    }
    Ok(Some(entry))
}

impl Ledger for SqliteLedger {
    fn try_claim(&self, auth_token: &str, lease: Duration) -> Result<Claim, LedgerError> {
        let mut conn = self.conn();
        // IMMEDIATE takes the write lock up front so two processes cannot
        // both read "unclaimed" before either inserts.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(entry) = select_entry(&tx, auth_token)? {
            return Ok(Claim::Resolved(entry));
        }

        let now = now_millis();
        let cutoff = now.saturating_sub(lease_millis(lease));
        let changed = tx.execute(
            "INSERT INTO payment_claims (auth_token, claimed_at) VALUES (?1, ?2)
             ON CONFLICT(auth_token) DO UPDATE SET claimed_at = excluded.claimed_at
             WHERE payment_claims.claimed_at < ?3",
            rusqlite::params![auth_token, now, cutoff],
        )?;
        tx.commit()?;

        Ok(if changed == 1 {
            Claim::Acquired
        } else {
            Claim::InFlight
        })
    }

    fn lookup(&self, auth_token: &str) -> Result<Option<IdempotencyEntry>, LedgerError> {
        let conn = self.conn();
        select_entry(&conn, auth_token)
    }

    fn is_claimed(&self, auth_token: &str, lease: Duration) -> Result<bool, LedgerError> {
        let conn = self.conn();
        let cutoff = now_millis().saturating_sub(lease_millis(lease));
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM payment_claims WHERE auth_token = ?1 AND claimed_at >= ?2",
            rusqlite::params![auth_token, cutoff],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn commit(&self, entry: IdempotencyEntry) -> Result<IdempotencyEntry, LedgerError> {
        let json = serde_json::to_string(&entry)
            .map_err(|e| LedgerError::Storage(format!("failed to serialize entry: {e}")))?;

        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT INTO payment_outcomes (auth_token, order_id, terminal_state, entry_json, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(auth_token) DO NOTHING",
            rusqlite::params![
                entry.auth_token,
                entry.order_id,
                entry.terminal_state.as_str(),
                json,
                entry.resolved_at.timestamp_millis(),
            ],
        )?;
        let stored = if inserted == 1 {
            entry
        } else {
            tracing::warn!(
                token = %format!("{:.8}", entry.auth_token),
                "terminal entry already recorded, keeping the original"
            );
            select_entry(&tx, &entry.auth_token)?.ok_or_else(|| {
                LedgerError::Storage("outcome vanished during commit".to_string())
            })?
        };
        tx.execute(
            "DELETE FROM payment_claims WHERE auth_token = ?1",
            [&stored.auth_token],
        )?;
        tx.commit()?;
        Ok(stored)
    }

    fn release(&self, auth_token: &str) -> Result<(), LedgerError> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM payment_claims WHERE auth_token = ?1",
            [auth_token],
        )?;
        Ok(())
    }

    fn purge_stale_claims(&self, max_age: Duration) -> usize {
        let conn = self.conn();
        let cutoff = now_millis().saturating_sub(lease_millis(max_age));
        conn.execute(
            "DELETE FROM payment_claims WHERE claimed_at < ?1",
            rusqlite::params![cutoff],
        )
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to purge stale claims");
            0
        })
    }

    fn health_check(&self) -> Result<(), LedgerError> {
        let conn = self.conn();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}
