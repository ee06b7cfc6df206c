//! Route map backed by `sled`
//!
//! A route map translates platform entity IDs to a foreign protocol's IDs and
//! back. Every pair is stored as two records in one tree:
//!
//! ```text
//! <namespace>:<internal_id> -> <foreign_id>
//! <namespace>:<foreign_id>  -> <internal_id>
//! ```
//!
//! Both records are written and deleted inside a single sled transaction, so
//! a reader never observes half a pair written by this type. A half-present
//! pair left by an interrupted foreign writer converges on the next `save` for
//! the same entity, because `save` rewrites both directions and drops stale
//! counterparts.

use std::fmt;

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Tree};
use tracing::debug;

use crate::utils::{Error, Result};

const TREE_NAME: &str = "route_map";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Thing,
    Channel,
    Connection,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Thing => "thing",
            Namespace::Channel => "channel",
            Namespace::Connection => "connection",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bidirectional ID translation store shared by every session and the event
/// synchronizer. Implementations must be safe for concurrent use.
pub trait RouteMapRepository: Send + Sync {
    /// Upserts `internal <-> foreign` in `namespace`.
    fn save(&self, internal: &str, foreign: &str, namespace: Namespace) -> Result<()>;

    /// Returns the counterpart of `id`, whichever side it is on.
    fn get(&self, id: &str, namespace: Namespace) -> Result<String>;

    /// Deletes the pair `internal` belongs to.
    fn remove(&self, internal: &str, namespace: Namespace) -> Result<()>;

    /// IDs in `namespace` starting with `prefix`, in key order.
    fn keys(&self, namespace: Namespace, prefix: &str) -> Result<Vec<String>>;
}

fn key(namespace: Namespace, id: &str) -> String {
    format!("{}:{}", namespace.as_str(), id)
}

fn into_store_error(err: TransactionError<Error>) -> Error {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => Error::Store(e),
    }
}

#[derive(Clone)]
pub struct SledRouteMap {
    db: Db,
    tree: Tree,
}

impl SledRouteMap {
    /// Open or create a sled database at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let db = sled::open(path)?;
        Self::with_db(db)
    }

    pub fn with_db(db: Db) -> Result<Self> {
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self { db, tree })
    }

    /// Flushes dirty pages; called on shutdown.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn tree(&self) -> &Tree {
        &self.tree
    }
}

impl RouteMapRepository for SledRouteMap {
    fn save(&self, internal: &str, foreign: &str, namespace: Namespace) -> Result<()> {
        let internal_key = key(namespace, internal);
        let foreign_key = key(namespace, foreign);

        self.tree
            .transaction(|tx| {
                // drop counterparts left over from a previous pairing
                if let Some(old) = tx.get(internal_key.as_bytes())? {
                    if &old[..] != foreign.as_bytes() {
                        let stale = key(namespace, &String::from_utf8_lossy(&old));
                        tx.remove(stale.as_bytes())?;
                    }
                }
                if let Some(old) = tx.get(foreign_key.as_bytes())? {
                    if &old[..] != internal.as_bytes() {
                        let stale = key(namespace, &String::from_utf8_lossy(&old));
                        tx.remove(stale.as_bytes())?;
                    }
                }

                tx.insert(internal_key.as_bytes(), foreign.as_bytes())?;
                tx.insert(foreign_key.as_bytes(), internal.as_bytes())?;
                Ok::<_, ConflictableTransactionError<Error>>(())
            })
            .map_err(into_store_error)?;

        debug!(%namespace, internal, foreign, "route saved");
        Ok(())
    }

    fn get(&self, id: &str, namespace: Namespace) -> Result<String> {
        match self.tree.get(key(namespace, id).as_bytes())? {
            Some(value) => Ok(String::from_utf8_lossy(&value).into_owned()),
            None => Err(Error::RouteNotFound),
        }
    }

    fn remove(&self, internal: &str, namespace: Namespace) -> Result<()> {
        let internal_key = key(namespace, internal);

        self.tree
            .transaction(|tx| {
                let Some(counterpart) = tx.get(internal_key.as_bytes())? else {
                    return Err(ConflictableTransactionError::Abort(Error::RouteNotFound));
                };
                let foreign_key = key(namespace, &String::from_utf8_lossy(&counterpart));
                tx.remove(internal_key.as_bytes())?;
                tx.remove(foreign_key.as_bytes())?;
                Ok(())
            })
            .map_err(into_store_error)?;

        debug!(%namespace, internal, "route removed");
        Ok(())
    }

    fn keys(&self, namespace: Namespace, prefix: &str) -> Result<Vec<String>> {
        let scan = key(namespace, prefix);
        let strip = namespace.as_str().len() + 1;

        self.tree
            .scan_prefix(scan.as_bytes())
            .keys()
            .map(|k| -> Result<String> {
                let k = k?;
                Ok(String::from_utf8_lossy(&k[strip..]).into_owned())
            })
            .collect()
    }
}

impl fmt::Debug for SledRouteMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SledRouteMap")
            .field("db", &"sled::Db")
            .finish()
    }
}
