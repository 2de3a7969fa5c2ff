//! JSON file snapshot store (atomic temp-file + rename).

use std::fs::{self, File};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::ports::{SnapshotStore, StoreError};

/// JsonFileStore は値を 1 つの JSON ファイルとして保存
///
/// 保存は一時ファイルに書いてから rename するので、読み手からは
/// 「古い全体」か「新しい全体」のどちらかしか見えません。
#[derive(Debug)]
pub struct JsonFileStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("tmp")
    }
}

impl<T> SnapshotStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        let value = serde_json::from_str(&contents)
            .map_err(|e| StoreError::corrupt(self.path.display().to_string(), e))?;
        Ok(Some(value))
    }

    fn save(&self, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let json = serde_json::to_vec_pretty(value)
            .map_err(|e| StoreError::Unavailable(format!("failed to serialize: {e}")))?;

        let temp_path = self.temp_path();
        let mut file = File::create(&temp_path).map_err(|e| StoreError::io(&temp_path, e))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|e| StoreError::io(&temp_path, e))?;

        // Atomic rename
        fs::rename(&temp_path, &self.path).map_err(|e| StoreError::io(&self.path, e))?;
        Ok(())
    }

    fn quarantine(&self) -> Result<Option<String>, StoreError> {
        quarantine_file(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Move a file aside as `<file>.corrupt-<timestamp>`.
pub(crate) fn quarantine_file(path: &Path) -> Result<Option<String>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".corrupt-{stamp}"));
    let aside = PathBuf::from(name);
    fs::rename(path, &aside).map_err(|e| StoreError::io(path, e))?;
    Ok(Some(aside.display().to_string()))
}
