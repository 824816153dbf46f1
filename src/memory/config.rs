//! Configuration types for shared memory regions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::PAGE_SIZE;

/// Types of shared memory backing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackingType {
    /// File-backed shared memory, openable by peer processes
    FileBacked,
    /// Anonymous memory file descriptor (Linux-specific, single process)
    #[cfg(target_os = "linux")]
    MemFd,
}

impl Default for BackingType {
    fn default() -> Self {
        Self::FileBacked
    }
}

impl BackingType {
    /// Get a human-readable name for the backing type
    pub fn name(&self) -> &'static str {
        match self {
            BackingType::FileBacked => "file-backed",
            #[cfg(target_os = "linux")]
            BackingType::MemFd => "memfd",
        }
    }
}

/// Configuration for creating or opening the fabric region
#[derive(Debug, Clone)]
pub struct RegionConfig {
    /// Name of the region
    pub name: String,
    /// Total size of the region in bytes
    pub size: usize,
    /// Backing type for the shared memory
    pub backing_type: BackingType,
    /// Optional file path for file-backed regions
    pub file_path: Option<PathBuf>,
    /// Whether to create the region (coordinator) or open an existing one
    /// (peers)
    pub create: bool,
    /// Permissions for the region (Unix permissions)
    pub permissions: u32,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            size: 0,
            backing_type: BackingType::default(),
            file_path: None,
            create: true,
            permissions: 0o644,
        }
    }
}

impl RegionConfig {
    /// Create a new region configuration
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            ..Default::default()
        }
    }

    /// Set the backing type
    pub fn with_backing_type(mut self, backing_type: BackingType) -> Self {
        self.backing_type = backing_type;
        self
    }

    /// Set the file path for file-backed regions
    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Set whether to create the region
    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Set the permissions for the region
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        use crate::error::FabricError;

        if self.name.is_empty() {
            return Err(FabricError::invalid_parameter(
                "name",
                "region name cannot be empty",
            ));
        }

        if self.size == 0 {
            return Err(FabricError::invalid_parameter(
                "size",
                "region size must be greater than 0",
            ));
        }

        if self.size & (PAGE_SIZE - 1) != 0 {
            return Err(FabricError::invalid_parameter(
                "size",
                format!("region size must be {} aligned", PAGE_SIZE),
            ));
        }

        #[cfg(target_os = "linux")]
        if self.backing_type == BackingType::MemFd && !self.create {
            return Err(FabricError::invalid_parameter(
                "backing_type",
                "memfd regions cannot be reopened by name",
            ));
        }

        Ok(())
    }

    /// Get the default file path for this region
    pub fn default_file_path(&self) -> PathBuf {
        self.file_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/dev/shm/{}", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = RegionConfig::new("fabric", 1 << 20)
            .with_create(false)
            .with_permissions(0o600);
        assert_eq!(config.name, "fabric");
        assert_eq!(config.size, 1 << 20);
        assert!(!config.create);
        assert_eq!(config.permissions, 0o600);
    }

    #[test]
    fn test_config_validation() {
        assert!(RegionConfig::default().validate().is_err());
        assert!(RegionConfig::new("fabric", 0).validate().is_err());
        assert!(RegionConfig::new("fabric", 4097).validate().is_err());
        assert!(RegionConfig::new("fabric", 1 << 20).validate().is_ok());
    }
}
