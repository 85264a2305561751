//! Persistence of the deployed-diamond info file.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fs::{read_json, write_json_atomic};

use super::info::DeployedDiamondInfo;

/// Load/modify/save access to one network's deployed-diamond info.
#[derive(Debug, Clone)]
pub struct DeploymentInfoStore {
    path: PathBuf,
}

impl DeploymentInfoStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current info, or an empty record when nothing was deployed yet.
    pub fn load(&self) -> Result<DeployedDiamondInfo> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    pub fn save(&self, info: &DeployedDiamondInfo) -> Result<()> {
        write_json_atomic(&self.path, info)
    }

    /// Load, apply `f`, save, and return the updated info.
    pub fn modify<F>(&self, f: F) -> Result<DeployedDiamondInfo>
    where
        F: FnOnce(&mut DeployedDiamondInfo),
    {
        let mut info = self.load()?;
        f(&mut info);
        self.save(&info)?;
        Ok(info)
    }
}
