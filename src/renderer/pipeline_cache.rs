use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::{vk, Device};

use crate::{RendererError, Result};

/// Reads a previously saved cache blob; a missing or unreadable file yields an empty blob.
pub fn load_cache_blob(path: &Path) -> Vec<u8> {
    if !path.exists() {
        log::debug!("No existing pipeline cache at: {}", path.display());
        return Vec::new();
    }
    match std::fs::read(path) {
        Ok(data) => {
            log::info!(
                "Loaded pipeline cache ({} bytes) from: {}",
                data.len(),
                path.display()
            );
            data
        }
        Err(e) => {
            log::warn!("Failed to load pipeline cache: {e}");
            Vec::new()
        }
    }
}

/// Writes `data` to `path`, creating parent directories as needed.
pub fn store_cache_blob(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

/// Pipeline cache shared by every pipeline build, optionally persisted to disk.
pub struct PipelineCache {
    device: Arc<Device>,
    cache: vk::PipelineCache,
    cache_file: Option<PathBuf>,
}

impl PipelineCache {
    /// Loads `cache_file` if it exists; the cache is written back on drop.
    pub fn with_persistence(device: Arc<Device>, cache_file: Option<PathBuf>) -> Result<Self> {
        let initial_data = cache_file
            .as_deref()
            .map(load_cache_blob)
            .unwrap_or_default();

        let create_info = if initial_data.is_empty() {
            vk::PipelineCacheCreateInfo::default()
        } else {
            vk::PipelineCacheCreateInfo::default().initial_data(&initial_data)
        };

        // Drivers reject blobs from other devices or versions; retry empty.
        let cache = match unsafe { device.create_pipeline_cache(&create_info, None) } {
            Ok(cache) => cache,
            Err(e) if !initial_data.is_empty() => {
                log::warn!("Discarding incompatible pipeline cache: {e}");
                unsafe {
                    device
                        .create_pipeline_cache(&vk::PipelineCacheCreateInfo::default(), None)
                        .map_err(|e| {
                            RendererError::VulkanError(format!(
                                "Failed to create pipeline cache: {e}"
                            ))
                        })?
                }
            }
            Err(e) => {
                return Err(RendererError::VulkanError(format!(
                    "Failed to create pipeline cache: {e}"
                )))
            }
        };

        Ok(Self {
            device,
            cache,
            cache_file,
        })
    }

    pub fn handle(&self) -> vk::PipelineCache {
        self.cache
    }

    pub fn data(&self) -> Result<Vec<u8>> {
        unsafe {
            self.device
                .get_pipeline_cache_data(self.cache)
                .map_err(|e| {
                    RendererError::VulkanError(format!("Failed to read pipeline cache data: {e}"))
                })
        }
    }

    pub fn save(&self) -> Result<()> {
        if let Some(path) = &self.cache_file {
            let data = self.data()?;
            store_cache_blob(path, &data)?;
            log::info!(
                "Saved pipeline cache ({} bytes) to: {}",
                data.len(),
                path.display()
            );
        }
        Ok(())
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        if self.cache_file.is_some() {
            if let Err(e) = self.save() {
                log::warn!("Failed to save pipeline cache on drop: {e}");
            }
        }
        unsafe {
            self.device.destroy_pipeline_cache(self.cache, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_cache_blob(&dir.path().join("absent.cache")).is_empty());
    }

    #[test]
    fn stored_blob_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pipeline.cache");
        store_cache_blob(&path, &[1, 2, 3, 4]).unwrap();
        assert_eq!(load_cache_blob(&path), vec![1, 2, 3, 4]);
    }
}
