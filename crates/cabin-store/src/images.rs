use crate::layout::StoreLayout;
use crate::{write_atomic, StoreError};
use cabin_schema::EnvName;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// A registered environment: its name and the directory holding `cabin.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRecord {
    pub name: EnvName,
    pub content_dir: PathBuf,
    #[serde(default)]
    pub created_at: String,
}

pub struct ImageRegistry {
    layout: StoreLayout,
}

impl ImageRegistry {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn add(&self, record: &ImageRecord) -> Result<(), StoreError> {
        if self.exists(record.name.as_str()) {
            return Err(StoreError::NameConflict(record.name.to_string()));
        }
        let content = serde_json::to_string_pretty(record)?;
        fs::create_dir_all(self.layout.images_dir())?;
        write_atomic(
            &self.layout.image_record(record.name.as_str()),
            content.as_bytes(),
        )
    }

    pub fn get(&self, name: &str) -> Result<ImageRecord, StoreError> {
        let path = self.layout.image_record(name);
        if !path.exists() {
            return Err(StoreError::ImageNotFound(name.to_owned()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.layout.image_record(name).exists()
    }

    pub fn remove(&self, name: &str) -> Result<(), StoreError> {
        let path = self.layout.image_record(name);
        if !path.exists() {
            return Err(StoreError::ImageNotFound(name.to_owned()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<ImageRecord>, StoreError> {
        let dir = self.layout.images_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.get(name) {
                Ok(record) => results.push(record),
                Err(e) => {
                    tracing::warn!("skipping corrupted image record '{name}': {e}");
                }
            }
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }
}
