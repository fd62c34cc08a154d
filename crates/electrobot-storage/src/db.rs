use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{error, info};

use crate::store::{Storage, Subscriber};
use electrobot_core::error::ElectroBotError;
use electrobot_core::time::{parse_storage, to_storage};

pub const DB_FILE_NAME: &str = "electrobot.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(60);
const SCHEMA_VERSION_CURRENT: i64 = 3;

pub struct Database {
    conn: Mutex<Connection>,
}

/// Runs a storage closure on the blocking pool so async callers never stall
/// the runtime on SQLite I/O or lock waits.
pub async fn call_blocking<S, T, F>(store: Arc<S>, f: F) -> Result<T, ElectroBotError>
where
    S: ?Sized + Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T, ElectroBotError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| ElectroBotError::Task(format!("DB task join error: {e}")))?
}

/// Subscriber plus the time it was registered.
pub type SubscriberRow = (Subscriber, DateTime<Utc>);

fn get_schema_version(conn: &Connection) -> Result<i64, ElectroBotError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS db_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM db_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw.and_then(|s| s.parse::<i64>().ok()).unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i64) -> Result<(), ElectroBotError> {
    conn.execute(
        "INSERT INTO db_meta(key, value) VALUES('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![version.to_string()],
    )?;
    Ok(())
}

fn apply_schema_migrations(conn: &Connection) -> Result<(), ElectroBotError> {
    let mut version = get_schema_version(conn)?;
    if version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS subscribers (
                identity INTEGER PRIMARY KEY NOT NULL,
                handle TEXT,
                given_name TEXT,
                family_name TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );",
        )?;
        set_schema_version(conn, 1)?;
        version = 1;
    }
    if version < 2 {
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_name_created
             ON events(name, created_at)",
            [],
        )?;
        set_schema_version(conn, 2)?;
        version = 2;
    }
    if version < 3 {
        // `identity` aliases the rowid, so registration order needs its own column.
        conn.execute_batch(
            "ALTER TABLE subscribers ADD COLUMN registered_seq INTEGER;
             UPDATE subscribers SET registered_seq = (
                 SELECT r.seq FROM (
                     SELECT identity, ROW_NUMBER() OVER (ORDER BY created_at, identity) AS seq
                     FROM subscribers
                 ) r
                 WHERE r.identity = subscribers.identity
             );",
        )?;
        set_schema_version(conn, 3)?;
        version = 3;
    }
    if version != SCHEMA_VERSION_CURRENT {
        set_schema_version(conn, SCHEMA_VERSION_CURRENT)?;
    }
    Ok(())
}

impl Database {
    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Opens (creating if needed) `electrobot.db` under `working_dir`.
    pub fn new(working_dir: &str) -> Result<Self, ElectroBotError> {
        let db_path = Path::new(working_dir).join(DB_FILE_NAME);
        info!(db_file = %db_path.display(), "Opening database");
        std::fs::create_dir_all(working_dir)?;

        let conn = Connection::open(&db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, ElectroBotError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, ElectroBotError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        apply_schema_migrations(&conn)?;
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    pub fn insert_subscriber_at(
        &self,
        subscriber: &Subscriber,
        registered_at: DateTime<Utc>,
    ) -> Result<(), ElectroBotError> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO subscribers
                 (identity, handle, given_name, family_name, created_at, registered_seq)
             VALUES (?1, ?2, ?3, ?4, ?5,
                 (SELECT COALESCE(MAX(registered_seq), 0) + 1 FROM subscribers))",
            params![
                subscriber.identity,
                subscriber.handle,
                subscriber.given_name,
                subscriber.family_name,
                to_storage(registered_at),
            ],
        )
        .map_err(|e| {
            ElectroBotError::from_sqlite(
                e,
                format!("subscriber {} is already registered", subscriber.identity),
            )
        })?;
        Ok(())
    }

    pub fn get_subscriber(&self, identity: i64) -> Result<Option<SubscriberRow>, ElectroBotError> {
        let conn = self.lock_conn();
        let row = conn
            .query_row(
                "SELECT identity, handle, given_name, family_name, created_at
                 FROM subscribers WHERE identity = ?1",
                params![identity],
                |row| {
                    Ok((
                        Subscriber {
                            identity: row.get(0)?,
                            handle: row.get(1)?,
                            given_name: row.get(2)?,
                            family_name: row.get(3)?,
                        },
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((subscriber, raw_ts)) = row else {
            return Ok(None);
        };
        let registered_at = parse_storage(&raw_ts).ok_or_else(|| {
            ElectroBotError::InvalidData(format!(
                "subscriber {identity} has unreadable created_at '{raw_ts}'"
            ))
        })?;
        Ok(Some((subscriber, registered_at)))
    }

    pub fn subscriber_count(&self) -> Result<i64, ElectroBotError> {
        let conn = self.lock_conn();
        let count = conn.query_row("SELECT COUNT(*) FROM subscribers", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn record_event_at(
        &self,
        name: &str,
        description: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ElectroBotError> {
        let conn = self.lock_conn();
        let ts = to_storage(at);
        let updated = conn.execute(
            "UPDATE events SET description = ?1, created_at = ?2 WHERE name = ?3",
            params![description, ts, name],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO events (name, description, created_at) VALUES (?1, ?2, ?3)",
                params![name, description, ts],
            )?;
        }
        Ok(())
    }

    pub fn event_count(&self, name: &str) -> Result<i64, ElectroBotError> {
        let conn = self.lock_conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl Storage for Database {
    fn insert_subscriber(&self, subscriber: &Subscriber) -> Result<(), ElectroBotError> {
        self.insert_subscriber_at(subscriber, Utc::now())
    }

    fn subscriber_exists(&self, identity: i64) -> bool {
        let conn = self.lock_conn();
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM subscribers WHERE identity = ?1)",
            params![identity],
            |row| row.get::<_, bool>(0),
        );
        match exists {
            Ok(v) => v,
            Err(e) => {
                error!(identity, "Failed to check if subscriber exists: {e}");
                false
            }
        }
    }

    fn remove_subscriber(&self, identity: i64) -> Result<(), ElectroBotError> {
        let conn = self.lock_conn();
        conn.execute(
            "DELETE FROM subscribers WHERE identity = ?1",
            params![identity],
        )?;
        Ok(())
    }

    fn list_subscribers(&self) -> Result<Vec<i64>, ElectroBotError> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT identity FROM subscribers ORDER BY registered_seq, identity",
        )?;
        let identities = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(identities)
    }

    fn record_event(&self, name: &str, description: &str) -> Result<(), ElectroBotError> {
        self.record_event_at(name, description, Utc::now())
    }

    fn latest_event_time(&self, name: &str) -> Result<DateTime<Utc>, ElectroBotError> {
        let conn = self.lock_conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT created_at FROM events
                 WHERE name = ?1
                 ORDER BY created_at DESC
                 LIMIT 1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        let raw = raw.ok_or_else(|| ElectroBotError::NotFound(format!("event '{name}'")))?;
        parse_storage(&raw).ok_or_else(|| {
            ElectroBotError::InvalidData(format!("event '{name}' has unreadable created_at '{raw}'"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_db() -> (Database, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("electrobot_test_{}", uuid::Uuid::new_v4()));
        let db = Database::new(dir.to_str().unwrap()).unwrap();
        (db, dir)
    }

    fn cleanup(dir: &std::path::Path) {
        let _ = std::fs::remove_dir_all(dir);
    }

    fn subscriber(identity: i64) -> Subscriber {
        Subscriber {
            identity,
            handle: Some("u".into()),
            given_name: Some("g".into()),
            family_name: Some("f".into()),
        }
    }

    #[test]
    fn test_new_database_creates_file_and_tables() {
        let (db, dir) = test_db();
        assert!(dir.join(DB_FILE_NAME).exists());
        assert!(db.list_subscribers().unwrap().is_empty());
        assert_eq!(db.event_count("anything").unwrap(), 0);
        cleanup(&dir);
    }

    #[test]
    fn test_new_database_creates_nested_working_dir() {
        let root = std::env::temp_dir().join(format!("electrobot_test_{}", uuid::Uuid::new_v4()));
        let nested = root.join("a").join("b");
        let db = Database::new(nested.to_str().unwrap()).unwrap();
        assert!(nested.join(DB_FILE_NAME).exists());
        drop(db);
        cleanup(&root);
    }

    #[test]
    fn test_pragmas_applied() {
        let (db, dir) = test_db();
        let conn = db.lock_conn();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        let sync: i64 = conn
            .query_row("PRAGMA synchronous", [], |row| row.get(0))
            .unwrap();
        assert_eq!(sync, 1);
        let timeout: i64 = conn
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 60_000);
        drop(conn);
        cleanup(&dir);
    }

    #[test]
    fn test_schema_version_is_tracked() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.lock_conn();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION_CURRENT);
    }

    #[test]
    fn test_reopen_keeps_data_and_version() {
        let (db, dir) = test_db();
        db.insert_subscriber(&subscriber(1)).unwrap();
        drop(db);

        let db = Database::new(dir.to_str().unwrap()).unwrap();
        assert!(db.subscriber_exists(1));
        let conn = db.lock_conn();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION_CURRENT);
        drop(conn);
        cleanup(&dir);
    }

    #[test]
    fn test_legacy_unversioned_database_is_upgraded() {
        let dir = std::env::temp_dir().join(format!("electrobot_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        {
            let conn = Connection::open(dir.join(DB_FILE_NAME)).unwrap();
            conn.execute_batch(
                "CREATE TABLE subscribers (
                    identity INTEGER PRIMARY KEY NOT NULL,
                    handle TEXT,
                    given_name TEXT,
                    family_name TEXT,
                    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                );
                CREATE TABLE events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    description TEXT,
                    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                );
                INSERT INTO subscribers (identity, created_at) VALUES (9, '2025-01-01 10:00:00');
                INSERT INTO subscribers (identity, created_at) VALUES (5, '2025-01-02 10:00:00');
                INSERT INTO events (name, description) VALUES ('Bot is alive', 'Bot is alive');",
            )
            .unwrap();
        }

        let db = Database::new(dir.to_str().unwrap()).unwrap();
        assert_eq!(db.list_subscribers().unwrap(), vec![9, 5]);
        db.insert_subscriber(&subscriber(1)).unwrap();
        assert_eq!(db.list_subscribers().unwrap(), vec![9, 5, 1]);
        // Rows written by the column default are still readable.
        assert!(db.latest_event_time("Bot is alive").is_ok());
        let conn = db.lock_conn();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION_CURRENT);
        let index_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_events_name_created'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(index_count, 1);
        drop(conn);
        cleanup(&dir);
    }

    #[test]
    fn test_subscriber_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        db.insert_subscriber(&subscriber(42)).unwrap();
        assert!(db.subscriber_exists(42));
        assert!(db.list_subscribers().unwrap().contains(&42));

        db.remove_subscriber(42).unwrap();
        assert!(!db.subscriber_exists(42));
        assert!(!db.list_subscribers().unwrap().contains(&42));
    }

    #[test]
    fn test_insert_subscriber_twice_is_constraint_violation() {
        let db = Database::open_in_memory().unwrap();
        db.insert_subscriber(&subscriber(42)).unwrap();
        let err = db.insert_subscriber(&subscriber(42)).unwrap_err();
        assert!(matches!(err, ElectroBotError::ConstraintViolation(_)));
        assert_eq!(db.subscriber_count().unwrap(), 1);
    }

    #[test]
    fn test_remove_unknown_subscriber_is_ok() {
        let db = Database::open_in_memory().unwrap();
        db.remove_subscriber(404).unwrap();
        db.remove_subscriber(404).unwrap();
    }

    #[test]
    fn test_list_subscribers_in_insertion_order() {
        let db = Database::open_in_memory().unwrap();
        for id in [30, 10, 20] {
            db.insert_subscriber(&Subscriber::new(id)).unwrap();
        }
        assert_eq!(db.list_subscribers().unwrap(), vec![30, 10, 20]);
        assert_eq!(db.subscriber_count().unwrap(), 3);
    }

    #[test]
    fn test_reregistered_subscriber_moves_to_end() {
        let db = Database::open_in_memory().unwrap();
        for id in [3, 1, 2] {
            db.insert_subscriber(&Subscriber::new(id)).unwrap();
        }
        db.remove_subscriber(3).unwrap();
        db.insert_subscriber(&Subscriber::new(3)).unwrap();
        assert_eq!(db.list_subscribers().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_get_subscriber_returns_profile_and_registration_time() {
        let db = Database::open_in_memory().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap();
        db.insert_subscriber_at(&subscriber(7), at).unwrap();

        let (stored, registered_at) = db.get_subscriber(7).unwrap().unwrap();
        assert_eq!(stored, subscriber(7));
        assert_eq!(registered_at, at);
        assert!(db.get_subscriber(8).unwrap().is_none());
    }

    #[test]
    fn test_subscriber_exists_swallows_storage_fault() {
        let db = Database::open_in_memory().unwrap();
        db.lock_conn()
            .execute_batch("DROP TABLE subscribers;")
            .unwrap();
        assert!(!db.subscriber_exists(1));
        assert!(db.list_subscribers().is_err());
    }

    #[test]
    fn test_latest_event_time_returns_most_recent_record() {
        let db = Database::open_in_memory().unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t2 = t1 + chrono::Duration::seconds(5);
        let t3 = t2 + chrono::Duration::milliseconds(1500);
        db.record_event_at("heartbeat", "x", t1).unwrap();
        db.record_event_at("heartbeat", "x", t2).unwrap();
        db.record_event_at("heartbeat", "x", t3).unwrap();

        assert_eq!(db.latest_event_time("heartbeat").unwrap(), t3);
    }

    #[test]
    fn test_record_event_updates_instead_of_accumulating() {
        let db = Database::open_in_memory().unwrap();
        for _ in 0..3 {
            db.record_event("heartbeat", "x").unwrap();
        }
        assert_eq!(db.event_count("heartbeat").unwrap(), 1);

        db.record_event("other", "y").unwrap();
        assert_eq!(db.event_count("other").unwrap(), 1);
        assert_eq!(db.event_count("heartbeat").unwrap(), 1);
    }

    #[test]
    fn test_latest_event_time_unknown_name_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db.latest_event_time("nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_latest_event_time_rejects_garbage_timestamp() {
        let db = Database::open_in_memory().unwrap();
        db.lock_conn()
            .execute(
                "INSERT INTO events (name, description, created_at) VALUES ('bad', '', 'soon')",
                [],
            )
            .unwrap();
        let err = db.latest_event_time("bad").unwrap_err();
        assert!(matches!(err, ElectroBotError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_call_blocking_through_trait_object() {
        let db: Arc<dyn Storage> = Arc::new(Database::open_in_memory().unwrap());
        call_blocking(db.clone(), |s| s.insert_subscriber(&Subscriber::new(3)))
            .await
            .unwrap();
        let ids = call_blocking(db, |s| s.list_subscribers()).await.unwrap();
        assert_eq!(ids, vec![3]);
    }
}
