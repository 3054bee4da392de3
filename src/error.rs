use std::fmt;

use thiserror::Error;

/// All errors produced by the shader processor.
///
/// Malformed `#if` expressions are not errors: they degrade to a best-effort
/// expression tree. Only collaborator failures (missing sources, loader
/// failures, bad replacement patterns) surface here.
#[derive(Debug)]
pub struct ShaderError {
    pub kind: ErrorKind,
    /// Name of the shader or include being processed, when known.
    pub shader: Option<String>,
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    /// An include is neither in the store nor loadable (no engine available).
    #[error("include '{name}' not found (looked for {url})")]
    IncludeNotFound { name: String, url: String },
    /// The engine's file loader failed.
    #[error("cannot load '{url}': {reason}")]
    LoadFailed { url: String, reason: String },
    /// A find/replace pair inside `#include<..>(..)` has an invalid pattern.
    #[error("invalid include replacement pattern '{pattern}': {reason}")]
    InvalidReplacement { pattern: String, reason: String },
    /// Includes kept producing further includes past the nesting limit.
    #[error("include nesting deeper than {0} levels")]
    IncludeDepthExceeded(usize),
    /// A named shader has no source in the store or repository.
    #[error("shader '{0}' not found")]
    ShaderNotFound(String),
    /// Options file could not be decoded.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if let Some(shader) = &self.shader {
            write!(f, " (in {shader})")?;
        }

        Ok(())
    }
}

impl std::error::Error for ShaderError {}

impl From<ErrorKind> for ShaderError {
    fn from(kind: ErrorKind) -> Self {
        Self { kind, shader: None }
    }
}

impl From<serde_json::Error> for ShaderError {
    fn from(e: serde_json::Error) -> Self {
        ErrorKind::Config(e.to_string()).into()
    }
}

pub type Result<T> = std::result::Result<T, ShaderError>;

/// Shorthand constructors.
impl ShaderError {
    pub fn include_not_found(name: &str, url: &str) -> Self {
        Self {
            kind: ErrorKind::IncludeNotFound {
                name: name.to_string(),
                url: url.to_string(),
            },
            shader: None,
        }
    }

    pub fn load_failed(url: &str, reason: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::LoadFailed {
                url: url.to_string(),
                reason: reason.to_string(),
            },
            shader: None,
        }
    }

    pub fn invalid_replacement(pattern: &str, reason: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::InvalidReplacement {
                pattern: pattern.to_string(),
                reason: reason.to_string(),
            },
            shader: None,
        }
    }

    pub fn shader_not_found(name: &str) -> Self {
        ErrorKind::ShaderNotFound(name.to_string()).into()
    }

    /// Attach the name of the shader being processed. The innermost name
    /// is kept when errors pass through several layers.
    pub fn in_shader(mut self, name: &str) -> Self {
        if self.shader.is_none() {
            self.shader = Some(name.to_string());
        }
        self
    }
}
