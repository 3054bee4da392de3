use std::fs;

use crate::error::{Result, ShaderError};
use crate::expression::SymbolTable;

/// Services the hosting engine provides to the shader processor.
///
/// Only [`load_file`](ShaderEngine::load_file) is required; it is the one
/// place where processing may block on I/O (missing includes and shader
/// sources are fetched through it).
pub trait ShaderEngine {
    fn load_file(&self, url: &str) -> Result<String>;

    fn supports_uniform_buffers(&self) -> bool {
        false
    }

    fn needs_shader_code_inlining(&self) -> bool {
        false
    }

    /// Write engine-wide defines into the symbol table. Runs last, so these
    /// win over any define of the same name.
    fn global_defines(&self, _symbols: &mut SymbolTable) {}

    fn inline_shader_code(&self, code: &str, _is_fragment: bool) -> String {
        code.to_string()
    }
}

/// Engine backed by the local file system. URLs are plain paths.
#[derive(Debug, Clone, Default)]
pub struct FsEngine {
    pub uniform_buffers: bool,
    /// Engine-wide defines as `(name, value)` pairs.
    pub globals: Vec<(String, String)>,
}

impl FsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_uniform_buffers(mut self, enabled: bool) -> Self {
        self.uniform_buffers = enabled;
        self
    }

    pub fn with_global(mut self, name: &str, value: &str) -> Self {
        self.globals.push((name.to_string(), value.to_string()));
        self
    }
}

impl ShaderEngine for FsEngine {
    fn load_file(&self, url: &str) -> Result<String> {
        log::debug!("loading shader file {url}");
        fs::read_to_string(url).map_err(|e| ShaderError::load_failed(url, e))
    }

    fn supports_uniform_buffers(&self) -> bool {
        self.uniform_buffers
    }

    fn global_defines(&self, symbols: &mut SymbolTable) {
        for (name, value) in &self.globals {
            symbols.insert(name.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn missing_file_is_load_error() {
        let engine = FsEngine::new();
        let err = engine
            .load_file("/definitely/not/here/shader.fx")
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::LoadFailed { .. }));
    }

    #[test]
    fn globals_overwrite_symbols() {
        let engine = FsEngine::new().with_global("MAX", "8");
        let mut symbols = SymbolTable::new();
        symbols.insert("MAX".into(), "4".into());
        engine.global_defines(&mut symbols);
        assert_eq!(symbols["MAX"], "8");
    }
}
