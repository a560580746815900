use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tokio::{
    sync::{broadcast, oneshot},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::{error::StoreError, log_debug, log_warn};

use super::{migrations::run_migrations, StateStore, StoreChange, CHANGE_CHANNEL_CAPACITY};

const ENABLE_LOGS: bool = true;

/// How many change rows are kept for slow readers before pruning.
const CHANGE_RETENTION: i64 = 1000;
const FEED_BATCH: i64 = 256;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

#[derive(Clone)]
struct Worker {
    sender: mpsc::Sender<DbCommand>,
}

impl Worker {
    async fn execute<F, T>(&self, task: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        self.sender.send(command).map_err(|err| {
            StoreError::Unavailable(format!("failed to send command to store thread: {err}"))
        })?;

        reply_rx
            .await
            .map_err(|_| StoreError::Unavailable("store thread terminated unexpectedly".into()))?
    }
}

struct StoreInner {
    worker: Worker,
    thread: Mutex<Option<JoinHandle<()>>>,
    changes: broadcast::Sender<StoreChange>,
    feed_cancel: CancellationToken,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.feed_cancel.cancel();

        let mut guard = match self.thread.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.worker.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

/// SQLite-backed store shared between processes on one machine.
///
/// Each write also appends to a `changes` table inside the same transaction.
/// A feed task polls that table and re-broadcasts new rows in revision order,
/// so writes from this process and from other processes reach subscribers
/// through the same path.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<StoreInner>,
    db_path: Arc<PathBuf>,
}

impl SqliteStore {
    /// Opens (and migrates) the store and starts its change feed.
    /// Must be called from inside a Tokio runtime.
    pub fn open(db_path: PathBuf, poll_interval: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("SqliteStore::open must be called inside a Tokio runtime")?;

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create store directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u64>>();
        let path_for_thread = db_path.clone();

        let thread = thread::Builder::new()
            .name("focusdeck-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(
                            anyhow::Error::new(err).context("failed to open SQLite store")
                        ));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.busy_timeout(BUSY_TIMEOUT) {
                    error!("Failed to set busy timeout: {err}");
                }

                let init_result = run_migrations(&mut conn)
                    .context("failed to run store migrations")
                    .and_then(|()| latest_revision(&conn));
                let init_failed = init_result.is_err();
                if ready_tx.send(init_result).is_err() || init_failed {
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Store thread shutting down");
            })
            .context("failed to spawn store worker thread")?;

        let start_revision = ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        info!("State store opened at {}", db_path.display());

        let worker = Worker { sender: command_tx };
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let feed_cancel = CancellationToken::new();

        runtime.spawn(change_feed(
            worker.clone(),
            changes.clone(),
            start_revision,
            poll_interval,
            feed_cancel.clone(),
        ));

        Ok(Self {
            inner: Arc::new(StoreInner {
                worker,
                thread: Mutex::new(Some(thread)),
                changes,
                feed_cancel,
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }
}

fn latest_revision(conn: &Connection) -> Result<u64> {
    let revision: i64 = conn
        .query_row("SELECT COALESCE(MAX(revision), 0) FROM changes", [], |row| {
            row.get(0)
        })
        .context("failed to read latest change revision")?;
    u64::try_from(revision).map_err(|_| anyhow!("change revision {revision} is negative"))
}

fn record_change(conn: &Connection, key: &str, changed_at: &str) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO changes (key, changed_at) VALUES (?1, ?2)",
        params![key, changed_at],
    )?;
    let revision = conn.last_insert_rowid();
    conn.execute(
        "DELETE FROM changes WHERE revision <= ?1",
        params![revision - CHANGE_RETENTION],
    )?;
    Ok(revision)
}

fn upsert_value(
    conn: &Connection,
    key: &str,
    value: &str,
    revision: i64,
    updated_at: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO kv (key, value, revision, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             revision = excluded.revision,
             updated_at = excluded.updated_at",
        params![key, value, revision, updated_at],
    )?;
    Ok(())
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.inner
            .worker
            .execute(move |conn| {
                let value = conn
                    .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                        row.get::<_, String>(0)
                    })
                    .optional()?;
                Ok(value)
            })
            .await
    }

    async fn put(&self, key: &str, value: String) -> Result<u64, StoreError> {
        let key = key.to_string();
        self.inner
            .worker
            .execute(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let now = Utc::now().to_rfc3339();
                let revision = record_change(&tx, &key, &now)?;
                upsert_value(&tx, &key, &value, revision, &now)?;
                tx.commit()?;
                Ok(revision as u64)
            })
            .await
    }

    async fn compare_and_put(
        &self,
        key: &str,
        expected: Option<&str>,
        value: String,
    ) -> Result<bool, StoreError> {
        let key = key.to_string();
        let expected = expected.map(str::to_string);
        self.inner
            .worker
            .execute(move |conn| {
                // IMMEDIATE takes the write lock up front, so no other process
                // can write between the comparison and the update.
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let current = tx
                    .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                        row.get::<_, String>(0)
                    })
                    .optional()?;
                if current != expected {
                    return Ok(false);
                }
                let now = Utc::now().to_rfc3339();
                let revision = record_change(&tx, &key, &now)?;
                upsert_value(&tx, &key, &value, revision, &now)?;
                tx.commit()?;
                Ok(true)
            })
            .await
    }

    async fn append(&self, key: &str, entry_id: &str, value: String) -> Result<bool, StoreError> {
        let key = key.to_string();
        let entry_id = entry_id.to_string();
        self.inner
            .worker
            .execute(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let now = Utc::now().to_rfc3339();
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO kv_log (key, entry_id, value, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![key, entry_id, value, now],
                )?;
                if inserted == 0 {
                    return Ok(false);
                }
                record_change(&tx, &key, &now)?;
                tx.commit()?;
                Ok(true)
            })
            .await
    }

    async fn entries(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let key = key.to_string();
        self.inner
            .worker
            .execute(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT value FROM kv_log WHERE key = ?1 ORDER BY seq")?;
                let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
                let mut values = Vec::new();
                for row in rows {
                    values.push(row?);
                }
                Ok(values)
            })
            .await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes.subscribe()
    }
}

async fn fetch_changes(worker: &Worker, after: u64) -> Result<Vec<StoreChange>, StoreError> {
    worker
        .execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT revision, key FROM changes
                 WHERE revision > ?1
                 ORDER BY revision
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![after as i64, FEED_BATCH], |row| {
                Ok(StoreChange {
                    revision: row.get::<_, i64>(0)? as u64,
                    key: row.get(1)?,
                })
            })?;
            let mut batch = Vec::new();
            for row in rows {
                batch.push(row?);
            }
            Ok(batch)
        })
        .await
}

async fn change_feed(
    worker: Worker,
    changes: broadcast::Sender<StoreChange>,
    mut last_revision: u64,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match fetch_changes(&worker, last_revision).await {
                    Ok(batch) => {
                        for change in batch {
                            log_debug!("store change {} on '{}'", change.revision, change.key);
                            last_revision = change.revision;
                            let _ = changes.send(change);
                        }
                    }
                    Err(err) => log_warn!("change feed poll failed: {err}"),
                }
            }
            _ = cancel.cancelled() => {
                log_debug!("change feed stopped at revision {last_revision}");
                break;
            }
        }
    }
}
