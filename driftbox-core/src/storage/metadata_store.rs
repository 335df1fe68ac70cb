use crate::error::{DriftError, Result};
use crate::id_generator::IdGenerator;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Metadata kept for one uploaded file. Records are never updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(rename = "uniqueID")]
    pub id: String,
    #[serde(rename = "path")]
    pub storage_path: String,
    #[serde(rename = "name")]
    pub original_name: String,
    /// Seconds since the epoch.
    #[serde(rename = "uploadTime", with = "unix_seconds")]
    pub uploaded_at: i64,
    #[serde(rename = "type")]
    pub content_type: String,
}

/// The whole persisted table, keyed by file id.
pub type FileTable = BTreeMap<String, FileRecord>;

/// Single-file JSON table of [`FileRecord`]s.
///
/// Every mutation reloads the table, applies the change and rewrites the whole
/// file through a temp file + rename, all while holding `mutation_lock`. Readers
/// never take the lock; the rename guarantees they see either the old or the new
/// table in full. The full rewrite keeps this practical only for tables in the
/// low thousands of records.
pub struct MetadataStore {
    path: PathBuf,
    /// Ids handed out by `reserve_id` whose upload has not been inserted yet.
    mutation_lock: Mutex<HashSet<String>>,
}

impl MetadataStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        Ok(Self {
            path,
            mutation_lock: Mutex::new(HashSet::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the full table. A missing table file is created empty.
    pub fn load(&self) -> Result<FileTable> {
        if let Some(table) = self.read_table()? {
            return Ok(table);
        }

        let _guard = self.mutation_lock.lock();
        self.load_for_mutation()
    }

    pub fn lookup(&self, id: &str) -> Result<Option<FileRecord>> {
        Ok(self.load()?.remove(id))
    }

    /// Pick an id that is neither in the table nor reserved by an upload still
    /// in flight. The id stays reserved until the returned guard is dropped.
    pub fn reserve_id(&self, generator: &IdGenerator) -> Result<IdReservation<'_>> {
        let mut reserved = self.mutation_lock.lock();
        let table = self.load_for_mutation()?;

        let id = generator.generate(|candidate| {
            table.contains_key(candidate) || reserved.contains(candidate)
        })?;
        reserved.insert(id.clone());

        Ok(IdReservation { store: self, id })
    }

    /// Add a record. The blob at `record.storage_path` must already be complete.
    pub fn insert(&self, record: FileRecord) -> Result<()> {
        let mut reserved = self.mutation_lock.lock();
        let mut table = self.load_for_mutation()?;

        if table.contains_key(&record.id) {
            return Err(DriftError::DuplicateId(record.id));
        }

        let id = record.id.clone();
        table.insert(id.clone(), record);
        self.persist(&table)?;
        reserved.remove(&id);

        tracing::debug!(id = %id, records = table.len(), "inserted file record");
        Ok(())
    }

    /// Remove `ids` in a single rewrite. Unknown ids are ignored; returns how
    /// many records were removed. Nothing is written when none matched.
    pub fn delete_many(&self, ids: &[String]) -> Result<usize> {
        let _guard = self.mutation_lock.lock();
        let mut table = self.load_for_mutation()?;

        let removed = ids.iter().filter_map(|id| table.remove(id)).count();

        if removed > 0 {
            self.persist(&table)?;
        }

        Ok(removed)
    }

    /// Must be called with `mutation_lock` held.
    fn load_for_mutation(&self) -> Result<FileTable> {
        match self.read_table()? {
            Some(table) => Ok(table),
            None => {
                let table = FileTable::new();
                self.persist(&table)?;
                tracing::info!(path = %self.path.display(), "created empty metadata table");
                Ok(table)
            }
        }
    }

    fn read_table(&self) -> Result<Option<FileTable>> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DriftError::StoreReadFailed(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Some(FileTable::new()));
        }

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| DriftError::StoreReadFailed(format!("{}: {}", self.path.display(), e)))
    }

    /// Must be called with `mutation_lock` held.
    fn persist(&self, table: &FileTable) -> Result<()> {
        let payload = serde_json::to_vec(table).map_err(|e| self.write_failed(e))?;

        let mut temp_path = self.path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        let mut file = std::fs::File::create(&temp_path).map_err(|e| self.write_failed(e))?;
        file.write_all(&payload).map_err(|e| self.write_failed(e))?;
        file.sync_all().map_err(|e| self.write_failed(e))?;
        drop(file);

        std::fs::rename(&temp_path, &self.path).map_err(|e| self.write_failed(e))?;
        Ok(())
    }

    fn write_failed(&self, error: impl std::fmt::Display) -> DriftError {
        DriftError::StoreWriteFailed(format!("{}: {}", self.path.display(), error))
    }
}

/// Holds an id out of circulation while its blob is being written.
pub struct IdReservation<'a> {
    store: &'a MetadataStore,
    id: String,
}

impl IdReservation<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for IdReservation<'_> {
    fn drop(&mut self) {
        self.store.mutation_lock.lock().remove(&self.id);
    }
}

/// `uploadTime` is written as a decimal string and accepted as string or integer.
mod unix_seconds {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(value),
            Raw::Text(text) => text.trim().parse().map_err(de::Error::custom),
        }
    }
}
