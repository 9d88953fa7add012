use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

use crate::error::ModelError;
use crate::forest::RiskForest;
use crate::types::FEATURE_NAMES;

pub const MODEL_FORMAT_VERSION: u32 = 2;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PersistedModel {
    pub format_version: u32,
    pub feature_names: Vec<String>,
    pub trained_at: DateTime<Utc>,
    // Synthetic training set the forest was fitted on
    pub training_rows: usize,
    pub training_seed: u64,
    pub forest: RiskForest,
}

impl PersistedModel {
    pub fn new(forest: RiskForest, training_rows: usize, training_seed: u64) -> Self {
        Self {
            format_version: MODEL_FORMAT_VERSION,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            trained_at: Utc::now(),
            training_rows,
            training_seed,
            forest,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ModelError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        let model: PersistedModel = bincode::deserialize(bytes)?;

        if model.format_version != MODEL_FORMAT_VERSION {
            return Err(ModelError::Corrupt(format!(
                "unsupported format version {}",
                model.format_version
            )));
        }
        if model.feature_names.iter().map(String::as_str).ne(FEATURE_NAMES.iter().copied()) {
            return Err(ModelError::Corrupt(format!(
                "feature layout {:?} does not match {:?}",
                model.feature_names, FEATURE_NAMES
            )));
        }
        model.forest.validate()?;

        Ok(model)
    }
}

pub trait ModelStore: Send + Sync {
    fn load(&self) -> Result<Option<PersistedModel>, ModelError>;
    fn save(&self, model: &PersistedModel) -> Result<(), ModelError>;
    fn describe(&self) -> String;
}

pub struct FileModelStore {
    path: PathBuf,
}

impl FileModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
    }
}

impl ModelStore for FileModelStore {
    fn load(&self) -> Result<Option<PersistedModel>, ModelError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        debug!("Read {} byte model blob from {}", bytes.len(), self.path.display());
        PersistedModel::from_bytes(&bytes).map(Some)
    }

    // Writes to a uniquely named sibling file and renames it over the target,
    // so readers never see a partially written blob.
    fn save(&self, model: &PersistedModel) -> Result<(), ModelError> {
        let bytes = model.to_bytes()?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.temp_path();
        let result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Default)]
pub struct MemoryModelStore {
    blob: Mutex<Option<Vec<u8>>>,
    reject_writes: bool,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            blob: Mutex::new(Some(bytes)),
            reject_writes: false,
        }
    }

    pub fn read_only(bytes: Option<Vec<u8>>) -> Self {
        Self {
            blob: Mutex::new(bytes),
            reject_writes: true,
        }
    }

    pub fn bytes(&self) -> Option<Vec<u8>> {
        self.blob.lock().clone()
    }
}

impl ModelStore for MemoryModelStore {
    fn load(&self) -> Result<Option<PersistedModel>, ModelError> {
        match self.blob.lock().as_deref() {
            Some(bytes) => PersistedModel::from_bytes(bytes).map(Some),
            None => Ok(None),
        }
    }

    fn save(&self, model: &PersistedModel) -> Result<(), ModelError> {
        if self.reject_writes {
            return Err(ModelError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "model store is read-only",
            )));
        }
        let bytes = model.to_bytes()?;
        *self.blob.lock() = Some(bytes);
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}
