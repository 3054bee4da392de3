//! Shader processing pipeline.
//!
//! `process` is the full conversion used for final compilation:
//!
//! 1. processor source pre-transform
//! 2. include resolution
//! 3. after-include hook
//! 4. precision injection, `#version 3` short-circuit, symbol table,
//!    conditional evaluation, post-processing, inlining
//!
//! `preprocess` runs the same steps minus precision injection and the
//! already-converted check, for sources that feed later pipeline stages.

use crate::engine::ShaderEngine;
use crate::error::Result;
use crate::expression::SymbolTable;
use crate::includes::process_includes;
use crate::options::ProcessingOptions;
use crate::platform::ShaderLanguage;
use crate::tree::build_tree;

/// Result of a processing run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedShader {
    /// Final source.
    pub code: String,
    /// Source right after include resolution (and the after-include hook).
    pub code_with_includes: String,
}

/// Both stages after platform finalization.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedShaders {
    pub vertex_code: String,
    pub fragment_code: String,
}

/// Let the processor set up its context before an effect is processed.
pub fn initialize(options: &mut ProcessingOptions) {
    if let Some(processor) = options.processor.as_deref_mut() {
        processor.initialize_shaders();
    }
}

/// Full conversion of one stage.
pub fn process(
    source: &str,
    options: &mut ProcessingOptions,
    engine: Option<&dyn ShaderEngine>,
) -> Result<ProcessedShader> {
    let code_with_includes = resolve_includes(source, options, engine)?;
    let code = process_shader_conversion(&code_with_includes, options, engine);
    Ok(ProcessedShader {
        code,
        code_with_includes,
    })
}

/// Conditional evaluation without precision handling, for intermediate
/// sources (compute shaders, multi-stage pipelines).
pub fn preprocess(
    source: &str,
    options: &mut ProcessingOptions,
    engine: Option<&dyn ShaderEngine>,
) -> Result<ProcessedShader> {
    let code_with_includes = resolve_includes(source, options, engine)?;
    let code = apply_preprocessing(&code_with_includes, options, engine);
    Ok(ProcessedShader {
        code,
        code_with_includes,
    })
}

/// Let the processor rewrite both stages together. Without a processor or
/// a finalize hook the sources are returned as they are.
pub fn finalize(vertex_code: &str, fragment_code: &str, options: &mut ProcessingOptions) -> FinalizedShaders {
    let finalized = options
        .processor
        .as_deref_mut()
        .and_then(|p| p.finalize_shaders(vertex_code, fragment_code));

    match finalized {
        Some((vertex_code, fragment_code)) => FinalizedShaders {
            vertex_code,
            fragment_code,
        },
        None => FinalizedShaders {
            vertex_code: vertex_code.to_string(),
            fragment_code: fragment_code.to_string(),
        },
    }
}

fn resolve_includes(
    source: &str,
    options: &mut ProcessingOptions,
    engine: Option<&dyn ShaderEngine>,
) -> Result<String> {
    let is_fragment = options.is_fragment;
    let source = options
        .processor
        .as_deref_mut()
        .and_then(|p| p.pre_process_shader_code(source, is_fragment))
        .unwrap_or_else(|| source.to_string());

    log::debug!("resolving includes ({} stage)", options.stage());
    let mut code = process_includes(&source, options, engine)?;

    if let Some(hook) = &options.process_code_after_includes {
        code = hook(options.stage(), &code, &options.defines);
    }

    Ok(code)
}

/// Make sure the source declares a float precision matching the request.
pub fn process_precision(source: &str, options: &ProcessingOptions) -> String {
    if options.processor.as_ref().is_some_and(|p| p.no_precision()) {
        return source.to_string();
    }

    let high = options.should_use_high_precision_shader;
    if !source.contains("precision highp float") {
        let header = if high {
            "precision highp float;\n"
        } else {
            "precision mediump float;\n"
        };
        format!("{header}{source}")
    } else if !high {
        source.replacen("precision highp float", "precision mediump float", 1)
    } else {
        source.to_string()
    }
}

/// Build the symbol table for one run.
///
/// Order matters, later entries win: the defines list, the depth-convention
/// flags, `GL_ES` (GLSL only), `__VERSION__`, the platform flag, then the
/// engine's global defines.
pub fn prepare_preprocessors(options: &ProcessingOptions, engine: Option<&dyn ShaderEngine>) -> SymbolTable {
    let mut symbols = SymbolTable::new();

    for define in &options.defines {
        let (name, value) = parse_define(define);
        symbols.insert(name, value);
    }

    if options.is_ndc_half_z_range {
        symbols.insert("IS_NDC_HALF_ZRANGE".to_string(), String::new());
    }
    if options.use_reverse_depth_buffer {
        symbols.insert("USE_REVERSE_DEPTHBUFFER".to_string(), String::new());
    }

    let language = options.processor.as_ref().map(|p| p.shader_language());
    if language == Some(ShaderLanguage::Glsl) {
        symbols.insert("GL_ES".to_string(), "true".to_string());
    }

    symbols.insert("__VERSION__".to_string(), options.version.clone());
    symbols.insert(options.platform_name.clone(), "true".to_string());

    if let Some(engine) = engine {
        engine.global_defines(&mut symbols);
    }

    symbols
}

/// Split one defines-list entry (`NAME`, `NAME VALUE`, `#define NAME VALUE;`)
/// into name and value. The value defaults to an empty string.
pub fn parse_define(define: &str) -> (String, String) {
    let entry = define.trim();
    let entry = entry.strip_prefix("#define").unwrap_or(entry);
    let entry = entry.trim();
    let entry = entry.strip_suffix(';').unwrap_or(entry).trim();

    match entry.split_once(' ') {
        Some((name, value)) => (name.to_string(), value.trim().to_string()),
        None => (entry.to_string(), String::new()),
    }
}

/// Render the conditional-compilation tree of `source`.
pub fn evaluate_preprocessors(
    source: &str,
    symbols: &mut SymbolTable,
    options: &mut ProcessingOptions,
) -> String {
    build_tree(source).process(symbols, options)
}

fn process_shader_conversion(
    source: &str,
    options: &mut ProcessingOptions,
    engine: Option<&dyn ShaderEngine>,
) -> String {
    let mut code = process_precision(source, options);

    let Some(processor) = options.processor.as_deref() else {
        return code;
    };

    if processor.shader_language() == ShaderLanguage::Glsl && code.contains("#version 3") {
        code = code.replacen("#version 300 es", "", 1);
        if !processor.parse_gles3() {
            log::debug!("source already targets GLSL ES 3, skipping conversion");
            return code;
        }
    }

    evaluate_with_hooks(code, options, engine)
}

fn apply_preprocessing(
    source: &str,
    options: &mut ProcessingOptions,
    engine: Option<&dyn ShaderEngine>,
) -> String {
    evaluate_with_hooks(source.to_string(), options, engine)
}

/// Symbol table, pre-processor hook, tree evaluation, post-processor hook
/// and engine inlining.
fn evaluate_with_hooks(
    mut code: String,
    options: &mut ProcessingOptions,
    engine: Option<&dyn ShaderEngine>,
) -> String {
    let mut symbols = prepare_preprocessors(options, engine);
    let is_fragment = options.is_fragment;

    if let Some(processor) = options.processor.as_deref_mut() {
        if let Some(rewritten) = processor.pre_processor(&code, &options.defines, &symbols, is_fragment) {
            code = rewritten;
        }
    }

    options.look_for_closing_bracket_for_uniform_buffer = false;
    code = evaluate_preprocessors(&code, &mut symbols, options);

    if let Some(processor) = options.processor.as_deref_mut() {
        if let Some(rewritten) = processor.post_processor(&code, &options.defines, is_fragment, engine) {
            code = rewritten;
        }
    }

    if let Some(engine) = engine.filter(|e| e.needs_shader_code_inlining()) {
        code = engine.inline_shader_code(&code, is_fragment);
    }

    code
}
