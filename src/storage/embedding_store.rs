use crate::common::{GateError, Result};
use crate::core::index::{validate_embedding, Embedding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

const STORAGE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EnrolledUser {
    pub id: String,
    pub name: String,
    pub embedding: Embedding,
    pub enrolled_at: DateTime<Utc>,
}

/// Snapshot iterator returned by [`EmbeddingStore::all_entries`].
pub type Entries<'a> = Box<dyn Iterator<Item = Result<EnrolledUser>> + Send + 'a>;

/// Durable id -> reference embedding mapping with upsert semantics.
pub trait EmbeddingStore: Send + Sync {
    /// Inserts or replaces the reference embedding for `id`.
    fn enroll(&self, id: &str, name: &str, embedding: Embedding) -> Result<()>;

    /// Lazy, single-pass view of the users enrolled at call time.
    fn all_entries(&self) -> Result<Entries<'_>>;

    fn get(&self, id: &str) -> Result<Option<EnrolledUser>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn validate_user_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(GateError::InvalidUserId(id.to_string()));
    }
    Ok(())
}

#[derive(Serialize, Deserialize)]
struct UserRecord {
    version: u32,
    user: EnrolledUser,
}

/// One bincode file per user, named by the SHA-256 of the id so arbitrary ids
/// are safe as filenames.
pub struct FileEmbeddingStore {
    users_dir: PathBuf,
    dimensions: usize,
    write_lock: Mutex<()>,
}

impl FileEmbeddingStore {
    pub fn open(users_dir: impl Into<PathBuf>, dimensions: usize) -> Result<Self> {
        let users_dir = users_dir.into();
        fs::create_dir_all(&users_dir)?;
        tracing::debug!("Embedding store at {:?}", users_dir);
        Ok(Self {
            users_dir,
            dimensions,
            write_lock: Mutex::new(()),
        })
    }

    fn user_file(&self, id: &str) -> PathBuf {
        let digest = Sha256::digest(id.as_bytes());
        let name: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        self.users_dir.join(format!("{}.bincode", name))
    }

    fn read_record(path: &Path) -> Result<Option<EnrolledUser>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(GateError::Storage(format!("Failed to read {:?}: {}", path, e))),
        };
        let record: UserRecord = bincode::deserialize(&data)
            .map_err(|e| GateError::Storage(format!("Failed to deserialize {:?}: {}", path, e)))?;
        if record.version > STORAGE_VERSION {
            return Err(GateError::Storage(format!(
                "Record {:?} has unsupported version {}", path, record.version
            )));
        }
        Ok(Some(record.user))
    }

    fn record_paths(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.users_dir)
            .map_err(|e| GateError::Storage(format!("Failed to list {:?}: {}", self.users_dir, e)))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "bincode") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

impl EmbeddingStore for FileEmbeddingStore {
    fn enroll(&self, id: &str, name: &str, embedding: Embedding) -> Result<()> {
        validate_user_id(id)?;
        validate_embedding(&embedding, self.dimensions)?;

        let record = UserRecord {
            version: STORAGE_VERSION,
            user: EnrolledUser {
                id: id.to_string(),
                name: name.to_string(),
                embedding,
                enrolled_at: Utc::now(),
            },
        };
        let encoded = bincode::serialize(&record)
            .map_err(|e| GateError::Storage(format!("Failed to serialize: {}", e)))?;

        let path = self.user_file(id);
        let tmp = path.with_extension("tmp");

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| GateError::Storage("store lock poisoned".into()))?;
        fs::write(&tmp, encoded)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| GateError::Storage(format!("Failed to write {:?}: {}", path, e)))?;

        tracing::info!("Enrolled user {} ({})", id, name);
        Ok(())
    }

    fn all_entries(&self) -> Result<Entries<'_>> {
        let paths = self.record_paths()?;
        let iter = paths.into_iter().filter_map(|path| match Self::read_record(&path) {
            Ok(Some(user)) => Some(Ok(user)),
            // removed by a concurrent writer since the listing
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        });
        Ok(Box::new(iter))
    }

    fn get(&self, id: &str) -> Result<Option<EnrolledUser>> {
        Self::read_record(&self.user_file(id))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.record_paths()?.len())
    }
}

/// In-process store, ordered by id.
pub struct MemoryEmbeddingStore {
    users: RwLock<BTreeMap<String, EnrolledUser>>,
    dimensions: usize,
}

impl MemoryEmbeddingStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            users: RwLock::new(BTreeMap::new()),
            dimensions,
        }
    }
}

impl EmbeddingStore for MemoryEmbeddingStore {
    fn enroll(&self, id: &str, name: &str, embedding: Embedding) -> Result<()> {
        validate_user_id(id)?;
        validate_embedding(&embedding, self.dimensions)?;
        let user = EnrolledUser {
            id: id.to_string(),
            name: name.to_string(),
            embedding,
            enrolled_at: Utc::now(),
        };
        self.users
            .write()
            .map_err(|_| GateError::Storage("store lock poisoned".into()))?
            .insert(id.to_string(), user);
        Ok(())
    }

    fn all_entries(&self) -> Result<Entries<'_>> {
        let snapshot: Vec<EnrolledUser> = self
            .users
            .read()
            .map_err(|_| GateError::Storage("store lock poisoned".into()))?
            .values()
            .cloned()
            .collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn get(&self, id: &str) -> Result<Option<EnrolledUser>> {
        Ok(self
            .users
            .read()
            .map_err(|_| GateError::Storage("store lock poisoned".into()))?
            .get(id)
            .cloned())
    }

    fn len(&self) -> Result<usize> {
        Ok(self
            .users
            .read()
            .map_err(|_| GateError::Storage("store lock poisoned".into()))?
            .len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;

    fn vector(value: f32, dims: usize) -> Embedding {
        vec![value; dims]
    }

    #[test]
    fn identical_reenrollment_does_not_grow_store() {
        let dir = scratch_dir("store-idempotent");
        let store = FileEmbeddingStore::open(&dir, 4).unwrap();

        store.enroll("alice", "Alice", vector(0.1, 4)).unwrap();
        store.enroll("alice", "Alice", vector(0.1, 4)).unwrap();

        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn reenrollment_replaces_embedding_and_timestamp() {
        let dir = scratch_dir("store-replace");
        let store = FileEmbeddingStore::open(&dir, 4).unwrap();

        store.enroll("alice", "Alice", vector(0.1, 4)).unwrap();
        let first = store.get("alice").unwrap().unwrap();
        store.enroll("alice", "Alice B.", vector(0.9, 4)).unwrap();
        let second = store.get("alice").unwrap().unwrap();

        assert_eq!(second.embedding, vector(0.9, 4));
        assert_eq!(second.name, "Alice B.");
        assert!(second.enrolled_at >= first.enrolled_at);
        assert_eq!(store.all_entries().unwrap().count(), 1);
    }

    #[test]
    fn records_survive_reopen() {
        let dir = scratch_dir("store-reopen");
        {
            let store = FileEmbeddingStore::open(&dir, 4).unwrap();
            store.enroll("bob", "Bob", vector(0.3, 4)).unwrap();
            store.enroll("../etc/passwd", "Path", vector(0.4, 4)).unwrap();
        }
        let store = FileEmbeddingStore::open(&dir, 4).unwrap();
        let mut ids: Vec<String> = store.all_entries().unwrap().map(|u| u.unwrap().id).collect();
        ids.sort();
        assert_eq!(ids, vec!["../etc/passwd".to_string(), "bob".to_string()]);
    }

    #[test]
    fn rejects_empty_and_wrong_dimension_embeddings() {
        let store = MemoryEmbeddingStore::new(128);
        assert!(matches!(
            store.enroll("alice", "Alice", vec![]),
            Err(GateError::InvalidEmbedding(_))
        ));
        assert!(matches!(
            store.enroll("alice", "Alice", vector(0.1, 64)),
            Err(GateError::InvalidEmbedding(_))
        ));
        assert!(matches!(
            store.enroll("  ", "Nobody", vector(0.1, 128)),
            Err(GateError::InvalidUserId(_))
        ));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn snapshot_is_taken_at_call_time() {
        let store = MemoryEmbeddingStore::new(2);
        store.enroll("a", "A", vec![0.0, 0.0]).unwrap();
        let entries = store.all_entries().unwrap();
        store.enroll("b", "B", vec![1.0, 1.0]).unwrap();
        assert_eq!(entries.count(), 1);
        assert_eq!(store.len().unwrap(), 2);
    }
}
