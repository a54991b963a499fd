//! # Note on database migrations
//!
//! The `user_version` field in the SQLite header tracks the schema
//! version, starting at `0`. Migrations are named after the version
//! they produce, so the first is `1.sql`. See [`migrate`].

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::{fmt, time};

use sqlite as sql;
use thiserror::Error;

/// How long to wait for the database lock before failing a write.
const DB_WRITE_TIMEOUT: time::Duration = time::Duration::from_secs(6);

const MIGRATIONS: &[&str] = &[include_str!("db/migrations/1.sql")];

#[derive(Error, Debug)]
pub enum Error {
    #[error("internal error: {0}")]
    Internal(#[from] sql::Error),
    #[error("no rows returned")]
    NoRows,
}

/// Run `query` inside a transaction. Commits on success, rolls back on
/// error.
pub fn transaction<T>(
    db: &sql::Connection,
    query: impl FnOnce(&sql::Connection) -> Result<T, sql::Error>,
) -> Result<T, sql::Error> {
    db.execute("BEGIN")?;
    match query(db) {
        Ok(result) => {
            db.execute("COMMIT")?;
            Ok(result)
        }
        Err(err) => {
            db.execute("ROLLBACK")?;
            Err(err)
        }
    }
}

/// A file- or memory-backed cache database.
#[derive(Clone)]
pub struct Database {
    pub db: Arc<sql::ConnectionThreadSafe>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database").finish()
    }
}

impl Deref for Database {
    type Target = sql::ConnectionThreadSafe;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

impl Database {
    const PRAGMA: &'static str = "PRAGMA foreign_keys = ON";

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let mut db = sql::Connection::open_thread_safe(path)?;
        db.set_busy_timeout(DB_WRITE_TIMEOUT.as_millis() as usize)?;
        db.execute(Self::PRAGMA)?;
        migrate(&db)?;

        Ok(Self { db: Arc::new(db) })
    }

    pub fn memory() -> Result<Self, Error> {
        let db = sql::Connection::open_thread_safe(":memory:")?;
        db.execute(Self::PRAGMA)?;
        migrate(&db)?;

        Ok(Self { db: Arc::new(db) })
    }

    pub fn version(&self) -> Result<usize, Error> {
        version(&self.db)
    }
}

fn version(db: &sql::Connection) -> Result<usize, Error> {
    let version = db
        .prepare("PRAGMA user_version")?
        .into_iter()
        .next()
        .ok_or(Error::NoRows)??
        .read::<i64, _>(0);

    Ok(version as usize)
}

fn bump(db: &sql::Connection) -> Result<usize, Error> {
    let new = version(db)? + 1;
    db.execute(format!("PRAGMA user_version = {new}"))?;
    Ok(new)
}

fn migrate(db: &sql::Connection) -> Result<usize, Error> {
    let mut version = version(db)?;
    for (i, migration) in MIGRATIONS.iter().enumerate() {
        if i >= version {
            transaction(db, |db| {
                db.execute(*migration)?;
                version = bump(db)?;
                Ok(())
            })?;
        }
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrates_to_latest_version() {
        let db = Database::memory().unwrap();
        assert_eq!(db.version().unwrap(), MIGRATIONS.len());
    }
}
