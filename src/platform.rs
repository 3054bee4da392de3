//! Per-platform hooks applied while shader source is rendered.
//!
//! A [`LanguageProcessor`] customizes line-level rewriting (attributes,
//! varyings, uniforms, uniform buffers, textures) and whole-source passes
//! for one target. Every hook is optional: the default implementation
//! returns `None`, meaning "not provided", and the line is left untouched.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::engine::ShaderEngine;
use crate::expression::SymbolTable;

/// Shading language a processor targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderLanguage {
    #[default]
    Glsl,
    Wgsl,
}

impl fmt::Display for ShaderLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderLanguage::Glsl => f.write_str("GLSL"),
            ShaderLanguage::Wgsl => f.write_str("WGSL"),
        }
    }
}

/// Pipeline stage a source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub fn from_is_fragment(is_fragment: bool) -> Self {
        if is_fragment {
            ShaderStage::Fragment
        } else {
            ShaderStage::Vertex
        }
    }

    /// Suffix of the shader store key (`<name>VertexShader`).
    pub fn store_suffix(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "VertexShader",
            ShaderStage::Fragment => "FragmentShader",
            ShaderStage::Compute => "ComputeShader",
        }
    }

    /// File extension in the shader repository (`<name>.vertex.fx`).
    pub fn file_extension(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex.fx",
            ShaderStage::Fragment => "fragment.fx",
            ShaderStage::Compute => "compute.fx",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
            ShaderStage::Compute => f.write_str("compute"),
        }
    }
}

/// Hook set for one target platform/language.
///
/// Processors own their processing context: any state collected while
/// rendering one effect (declared uniforms, binding slots, ...) lives in
/// the implementing type and is available again in
/// [`finalize_shaders`](LanguageProcessor::finalize_shaders).
///
/// The regex accessors double as presence flags: a processor that returns
/// `Some` from [`uniform_regex`](LanguageProcessor::uniform_regex) claims the
/// matching lines for [`uniform_processor`](LanguageProcessor::uniform_processor).
pub trait LanguageProcessor {
    fn shader_language(&self) -> ShaderLanguage;

    /// Skip precision injection entirely.
    fn no_precision(&self) -> bool {
        false
    }

    /// Keep processing GLSL sources already marked `#version 3..`.
    fn parse_gles3(&self) -> bool {
        false
    }

    fn attribute_keyword(&self) -> &str {
        "attribute"
    }

    fn varying_vertex_keyword(&self) -> &str {
        "varying"
    }

    fn varying_fragment_keyword(&self) -> &str {
        "varying"
    }

    fn initialize_shaders(&mut self) {}

    /// Whole-source rewrite before includes are resolved.
    fn pre_process_shader_code(&mut self, _code: &str, _is_fragment: bool) -> Option<String> {
        None
    }

    /// Runs on every line before any other hook.
    fn line_processor(&mut self, _line: &str, _is_fragment: bool) -> Option<String> {
        None
    }

    fn attribute_processor(&mut self, _attribute: &str, _symbols: &SymbolTable) -> Option<String> {
        None
    }

    /// Custom varying detection; `None` falls back to a keyword prefix test.
    fn varying_check(&self, _varying: &str, _is_fragment: bool) -> Option<bool> {
        None
    }

    fn varying_processor(
        &mut self,
        _varying: &str,
        _is_fragment: bool,
        _symbols: &SymbolTable,
    ) -> Option<String> {
        None
    }

    fn uniform_regex(&self) -> Option<&Regex> {
        None
    }

    fn uniform_processor(
        &mut self,
        _uniform: &str,
        _is_fragment: bool,
        _symbols: &SymbolTable,
    ) -> Option<String> {
        None
    }

    fn uniform_buffer_regex(&self) -> Option<&Regex> {
        None
    }

    fn uniform_buffer_processor(&mut self, _uniform_buffer: &str, _is_fragment: bool) -> Option<String> {
        None
    }

    fn end_of_uniform_buffer_processor(&mut self, _closing: &str, _is_fragment: bool) -> Option<String> {
        None
    }

    fn texture_regex(&self) -> Option<&Regex> {
        None
    }

    fn texture_processor(
        &mut self,
        _texture: &str,
        _is_fragment: bool,
        _symbols: &SymbolTable,
    ) -> Option<String> {
        None
    }

    /// Whole-source rewrite right before conditional evaluation.
    fn pre_processor(
        &mut self,
        _code: &str,
        _defines: &[String],
        _symbols: &SymbolTable,
        _is_fragment: bool,
    ) -> Option<String> {
        None
    }

    /// Whole-source rewrite right after conditional evaluation.
    fn post_processor(
        &mut self,
        _code: &str,
        _defines: &[String],
        _is_fragment: bool,
        _engine: Option<&dyn ShaderEngine>,
    ) -> Option<String> {
        None
    }

    /// Joint rewrite of both stages once each has been processed.
    fn finalize_shaders(&mut self, _vertex: &str, _fragment: &str) -> Option<(String, String)> {
        None
    }
}

/// A processor with no hooks: conditionals are evaluated, lines pass
/// through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughProcessor {
    pub language: ShaderLanguage,
}

impl PassthroughProcessor {
    pub fn new(language: ShaderLanguage) -> Self {
        Self { language }
    }
}

impl LanguageProcessor for PassthroughProcessor {
    fn shader_language(&self) -> ShaderLanguage {
        self.language
    }
}
