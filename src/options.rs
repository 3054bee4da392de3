use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShaderError};
use crate::platform::{LanguageProcessor, ShaderStage};
use crate::store::ShaderStore;

/// Callback run on the source once its includes are resolved.
pub type AfterIncludesHook = Box<dyn Fn(ShaderStage, &str, &[String]) -> String>;

/// Everything one processing run needs.
///
/// The data fields can be loaded from JSON; the runtime fields (processor,
/// store, hooks) are set in code. One options value serves one effect
/// compilation: the uniform-buffer tracking flag is mutated while lines are
/// rendered, so the same value must not drive two renders at once.
#[derive(Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    /// Entries like `NAME`, `NAME VALUE` or `#define NAME VALUE;`.
    pub defines: Vec<String>,
    /// Named upper bounds for `#include<..>[min..NAME]` ranges.
    pub index_parameters: HashMap<String, i64>,
    pub is_fragment: bool,
    pub should_use_high_precision_shader: bool,
    pub supports_uniform_buffers: bool,
    /// Prefix of shader and include URLs (`<repo>ShadersInclude/<name>.fx`).
    pub shaders_repository: String,
    pub version: String,
    pub platform_name: String,
    pub is_ndc_half_z_range: bool,
    pub use_reverse_depth_buffer: bool,

    #[serde(skip)]
    pub processor: Option<Box<dyn LanguageProcessor>>,
    #[serde(skip)]
    pub include_store: Arc<ShaderStore>,
    #[serde(skip)]
    pub process_code_after_includes: Option<AfterIncludesHook>,
    /// Set while the lines of a uniform buffer block are being rendered.
    #[serde(skip)]
    pub look_for_closing_bracket_for_uniform_buffer: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            defines: Vec::new(),
            index_parameters: HashMap::new(),
            is_fragment: false,
            should_use_high_precision_shader: false,
            supports_uniform_buffers: false,
            shaders_repository: String::new(),
            version: "300".to_string(),
            platform_name: "WEBGL2".to_string(),
            is_ndc_half_z_range: false,
            use_reverse_depth_buffer: false,
            processor: None,
            include_store: Arc::new(ShaderStore::new()),
            process_code_after_includes: None,
            look_for_closing_bracket_for_uniform_buffer: false,
        }
    }
}

impl ProcessingOptions {
    /// Load the data fields from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| ShaderError::load_failed(&path.display().to_string(), e))?;
        Self::from_json(&json)
    }

    pub fn with_processor(mut self, processor: impl LanguageProcessor + 'static) -> Self {
        self.processor = Some(Box::new(processor));
        self
    }

    pub fn with_store(mut self, store: Arc<ShaderStore>) -> Self {
        self.include_store = store;
        self
    }

    pub fn with_defines<I, S>(mut self, defines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.defines = defines.into_iter().map(Into::into).collect();
        self
    }

    pub fn stage(&self) -> ShaderStage {
        ShaderStage::from_is_fragment(self.is_fragment)
    }
}

impl fmt::Debug for ProcessingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingOptions")
            .field("defines", &self.defines)
            .field("index_parameters", &self.index_parameters)
            .field("is_fragment", &self.is_fragment)
            .field(
                "should_use_high_precision_shader",
                &self.should_use_high_precision_shader,
            )
            .field("supports_uniform_buffers", &self.supports_uniform_buffers)
            .field("shaders_repository", &self.shaders_repository)
            .field("version", &self.version)
            .field("platform_name", &self.platform_name)
            .field(
                "processor",
                &self.processor.as_ref().map(|p| p.shader_language()),
            )
            .finish_non_exhaustive()
    }
}
