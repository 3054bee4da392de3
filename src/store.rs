use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::error::{Result, ShaderError};

/// Repository of shader sources and include fragments.
///
/// Shared by every compilation that uses it and filled lazily as missing
/// sources are fetched. Writes are idempotent: two fetches of the same
/// include store the same text, and the last write wins.
#[derive(Debug, Default)]
pub struct ShaderStore {
    shaders: RwLock<HashMap<String, String>>,
    includes: RwLock<HashMap<String, String>>,
}

impl ShaderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide store.
    pub fn global() -> Arc<ShaderStore> {
        static GLOBAL: OnceLock<Arc<ShaderStore>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ShaderStore::new())).clone()
    }

    pub fn include(&self, name: &str) -> Option<String> {
        let includes = self.includes.read().unwrap_or_else(PoisonError::into_inner);
        includes.get(name).cloned()
    }

    pub fn set_include(&self, name: &str, source: impl Into<String>) {
        let mut includes = self.includes.write().unwrap_or_else(PoisonError::into_inner);
        includes.insert(name.to_string(), source.into());
    }

    /// Look up a stage source by its store key (`<name>VertexShader`).
    pub fn shader(&self, key: &str) -> Option<String> {
        let shaders = self.shaders.read().unwrap_or_else(PoisonError::into_inner);
        shaders.get(key).cloned()
    }

    pub fn set_shader(&self, key: &str, source: impl Into<String>) {
        let mut shaders = self.shaders.write().unwrap_or_else(PoisonError::into_inner);
        shaders.insert(key.to_string(), source.into());
    }

    pub fn include_count(&self) -> usize {
        self.includes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Preload every `*.fx` file of a directory as an include, keyed by
    /// file stem. Returns the number of includes loaded.
    pub fn load_include_dir(&self, dir: &Path) -> Result<usize> {
        let entries = fs::read_dir(dir)
            .map_err(|e| ShaderError::load_failed(&dir.display().to_string(), e))?;

        let mut loaded = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().map(|ext| ext != "fx").unwrap_or(true) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let source = fs::read_to_string(&path)
                .map_err(|e| ShaderError::load_failed(&path.display().to_string(), e))?;
            self.set_include(name, source);
            loaded += 1;
        }

        log::debug!("preloaded {loaded} includes from {}", dir.display());
        Ok(loaded)
    }
}
