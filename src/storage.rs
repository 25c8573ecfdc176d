//! Key-value backend under the ledger.
//!
//! Every ledger record lives in one sled tree. The ledger buffers its writes
//! and hands them over as one atomic [`Batch`] per admitted pack.

use std::collections::BTreeMap;

#[derive(Clone, Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sled: {0}")]
    Io(String),
}

fn io(e: sled::Error) -> StorageError {
    StorageError::Io(e.to_string())
}

/// Pending writes keyed by storage key; `None` deletes the key.
pub type Batch = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// What the ledger needs from a database.
pub trait Storage: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Apply every write in `batch` atomically.
    fn apply_batch(&self, batch: Batch) -> Result<(), StorageError>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    fn flush(&self) -> Result<(), StorageError>;
}

pub struct SledStorage {
    db: sled::Db,
    ledger: sled::Tree,
}

impl SledStorage {
    pub fn open(path: &std::path::Path) -> Result<Self, StorageError> {
        Self::with_db(sled::open(path).map_err(io)?)
    }

    /// A database removed when dropped.
    pub fn open_temporary() -> Result<Self, StorageError> {
        Self::with_db(sled::Config::new().temporary(true).open().map_err(io)?)
    }

    fn with_db(db: sled::Db) -> Result<Self, StorageError> {
        let ledger = db.open_tree("ledger").map_err(io)?;
        Ok(SledStorage { db, ledger })
    }
}

impl Storage for SledStorage {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.ledger.get(key).map_err(io)?.map(|value| value.to_vec()))
    }

    fn apply_batch(&self, batch: Batch) -> Result<(), StorageError> {
        let mut sled_batch = sled::Batch::default();
        for (key, value) in batch {
            match value {
                Some(value) => sled_batch.insert(key, value),
                None => sled_batch.remove(key),
            }
        }
        self.ledger.apply_batch(sled_batch).map_err(io)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        self.ledger
            .scan_prefix(prefix)
            .map(|entry| {
                let (key, value) = entry.map_err(io)?;
                Ok((key.to_vec(), value.to_vec()))
            })
            .collect()
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> SledStorage {
        SledStorage::open_temporary().unwrap()
    }

    #[test]
    fn batch_put_and_get() {
        let storage = storage();
        let mut batch = Batch::new();
        batch.insert(b"alpha".to_vec(), Some(vec![1]));
        batch.insert(b"beta".to_vec(), Some(vec![2]));
        storage.apply_batch(batch).unwrap();

        assert_eq!(storage.get(b"alpha").unwrap(), Some(vec![1]));
        assert_eq!(storage.get(b"beta").unwrap(), Some(vec![2]));
        assert_eq!(storage.get(b"gamma").unwrap(), None);
    }

    #[test]
    fn batch_delete() {
        let storage = storage();
        let mut batch = Batch::new();
        batch.insert(b"alpha".to_vec(), Some(vec![1]));
        storage.apply_batch(batch).unwrap();

        let mut batch = Batch::new();
        batch.insert(b"alpha".to_vec(), None);
        storage.apply_batch(batch).unwrap();
        assert_eq!(storage.get(b"alpha").unwrap(), None);
    }

    #[test]
    fn scan_prefix_is_ordered() {
        let storage = storage();
        let mut batch = Batch::new();
        batch.insert(b"p2".to_vec(), Some(vec![2]));
        batch.insert(b"p1".to_vec(), Some(vec![1]));
        batch.insert(b"t1".to_vec(), Some(vec![3]));
        storage.apply_batch(batch).unwrap();

        let entries = storage.scan_prefix(b"p").unwrap();
        assert_eq!(
            entries,
            vec![(b"p1".to_vec(), vec![1]), (b"p2".to_vec(), vec![2])]
        );
    }

    #[test]
    fn reopen_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = SledStorage::open(dir.path()).unwrap();
            let mut batch = Batch::new();
            batch.insert(b"key".to_vec(), Some(b"value".to_vec()));
            storage.apply_batch(batch).unwrap();
            storage.flush().unwrap();
        }
        let storage = SledStorage::open(dir.path()).unwrap();
        assert_eq!(storage.get(b"key").unwrap(), Some(b"value".to_vec()));
    }
}
