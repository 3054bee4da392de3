//! Include resolver. Expands `#include<name>(find,replace,...)[range]`
//! directives from the include store, fetching missing includes through
//! the engine.
//!
//! Each pass collects every directive of the current text and substitutes
//! them in textual order. A pass that inserts content with further
//! directives, or that had to fetch a missing include, restarts from the
//! top of the partially substituted text.

use std::ops::Range;
use std::sync::OnceLock;

use regex::{NoExpand, Regex};

use crate::engine::ShaderEngine;
use crate::error::{ErrorKind, Result, ShaderError};
use crate::expression::parse_int;
use crate::options::ProcessingOptions;

/// Maximum number of consecutive rescans caused by includes that contain
/// further includes.
pub const MAX_INCLUDE_DEPTH: usize = 64;

fn include_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"#include\s?<(.+)>(\((.*)\))*(\[(.*)\])*").expect("static regex")
    })
}

fn light_member_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"light\{X\}.(\w*)").expect("static regex"))
}

/// One `#include<...>` occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeDirective {
    /// Full matched text, replaced by the expanded content.
    pub text: String,
    pub name: String,
    /// Raw `find,replace,...` list from the parentheses.
    pub replacements: Option<String>,
    /// Raw `min..max` or `index` from the brackets.
    pub range: Option<String>,
    /// Byte range of `text` in the scanned source.
    pub span: Range<usize>,
}

impl IncludeDirective {
    /// All directives of `source`, in textual order.
    pub fn scan(source: &str) -> Vec<IncludeDirective> {
        include_regex()
            .captures_iter(source)
            .map(|caps| IncludeDirective {
                span: caps.get(0).map_or(0..0, |m| m.range()),
                text: caps[0].to_string(),
                name: caps[1].to_string(),
                replacements: caps.get(3).map(|m| m.as_str().to_string()),
                range: caps.get(5).map(|m| m.as_str().to_string()),
            })
            .collect()
    }

    /// Store key of the include. `__decl__` names select a declaration
    /// include, the uniform-buffer flavour when buffers are supported.
    pub fn store_key(&self, supports_uniform_buffers: bool) -> String {
        if !self.name.contains("__decl__") {
            return self.name.clone();
        }
        let mut key = self.name.replacen("__decl__", "", 1);
        if supports_uniform_buffers {
            key = key.replacen("Vertex", "Ubo", 1).replacen("Fragment", "Ubo", 1);
        }
        key.push_str("Declaration");
        key
    }

    /// Apply find/replace pairs and index substitution to the include text.
    pub fn expand(&self, content: &str, options: &ProcessingOptions) -> Result<String> {
        let mut content = content.to_string();

        if let Some(args) = &self.replacements {
            let parts: Vec<&str> = args.split(',').collect();
            for pair in parts.chunks(2) {
                let pattern = pair[0];
                let replacement = pair.get(1).copied().unwrap_or("");
                let re = Regex::new(pattern)
                    .map_err(|e| ShaderError::invalid_replacement(pattern, e))?;
                content = re.replace_all(&content, NoExpand(replacement)).into_owned();
            }
        }

        if let Some(range) = &self.range {
            content = match range.split_once("..") {
                Some((min, max)) => unroll_range(&content, min, max, options),
                None => substitute_index(&content, range, options.supports_uniform_buffers),
            };
        }

        Ok(content)
    }
}

/// Rewrite `light{X}.member` to `member{X}`. Without uniform buffers the
/// per-light members are separate uniforms named with the light index as
/// suffix instead of fields of a per-light block.
pub fn rewrite_light_members(source: &str) -> String {
    light_member_regex()
        .replace_all(source, "${1}{X}")
        .into_owned()
}

fn substitute_index(content: &str, index: &str, supports_uniform_buffers: bool) -> String {
    let content = if supports_uniform_buffers {
        content.to_string()
    } else {
        rewrite_light_members(content)
    };
    content.replace("{X}", index)
}

/// Repeat the content once per index of `min..max`, both bounds included.
/// A non-numeric `max` names an entry of the options' index parameters.
fn unroll_range(content: &str, min: &str, max: &str, options: &ProcessingOptions) -> String {
    let min_index = parse_int(min);
    let max_index = parse_int(max).or_else(|| {
        let bound = options.index_parameters.get(max.trim()).copied();
        if bound.is_none() {
            log::warn!("include range bound '{max}' is not a number nor an index parameter");
        }
        bound
    });

    let (Some(min_index), Some(max_index)) = (min_index, max_index) else {
        return String::new();
    };

    let template = if options.supports_uniform_buffers {
        content.to_string()
    } else {
        rewrite_light_members(content)
    };

    let mut unrolled = String::new();
    for index in min_index..=max_index {
        unrolled.push_str(&template.replace("{X}", &index.to_string()));
        unrolled.push('\n');
    }
    unrolled
}

enum IncludePass {
    Complete(String),
    /// Rescan from the top; `nested` when inserted content had directives.
    Rescan { text: String, nested: bool },
}

/// Resolve every include of `source`, recursively.
pub fn process_includes(
    source: &str,
    options: &ProcessingOptions,
    engine: Option<&dyn ShaderEngine>,
) -> Result<String> {
    let mut text = source.to_string();
    let mut depth = 0;

    loop {
        match resolve_pass(&text, options, engine)? {
            IncludePass::Complete(resolved) => return Ok(resolved),
            IncludePass::Rescan { text: partial, nested } => {
                if nested {
                    depth += 1;
                    if depth > MAX_INCLUDE_DEPTH {
                        return Err(ErrorKind::IncludeDepthExceeded(MAX_INCLUDE_DEPTH).into());
                    }
                }
                text = partial;
            }
        }
    }
}

fn resolve_pass(
    source: &str,
    options: &ProcessingOptions,
    engine: Option<&dyn ShaderEngine>,
) -> Result<IncludePass> {
    let directives = IncludeDirective::scan(source);
    let mut result = String::with_capacity(source.len());
    let mut copied = 0;
    let mut keep_processing = false;

    for directive in &directives {
        result.push_str(&source[copied..directive.span.start]);
        copied = directive.span.start;
        let key = directive.store_key(options.supports_uniform_buffers);

        let Some(content) = options.include_store.include(&key) else {
            let url = format!("{}ShadersInclude/{key}.fx", options.shaders_repository);
            let engine = engine.ok_or_else(|| ShaderError::include_not_found(&key, &url))?;
            log::debug!("include '{key}' not in store, fetching {url}");
            let fetched = engine.load_file(&url).map_err(|e| e.in_shader(&key))?;
            options.include_store.set_include(&key, fetched);
            result.push_str(&source[copied..]);
            return Ok(IncludePass::Rescan {
                text: result,
                nested: false,
            });
        };

        log::trace!("expanding {}", directive.text);
        let expanded = directive.expand(&content, options).map_err(|e| e.in_shader(&key))?;
        keep_processing |= expanded.contains("#include<") || expanded.contains("#include <");
        result.push_str(&expanded);
        copied = directive.span.end;
    }
    result.push_str(&source[copied..]);

    if keep_processing {
        log::debug!("included content has further includes, rescanning");
        Ok(IncludePass::Rescan {
            text: result,
            nested: true,
        })
    } else {
        Ok(IncludePass::Complete(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn options_with(includes: &[(&str, &str)]) -> ProcessingOptions {
        let options = ProcessingOptions::default();
        for (name, source) in includes {
            options.include_store.set_include(name, *source);
        }
        options
    }

    #[test]
    fn scan_captures_all_parts() {
        let directives = IncludeDirective::scan("#include<lightFragment>(a,b)[0..maxLights]\nx");
        assert_eq!(directives.len(), 1);
        let d = &directives[0];
        assert_eq!(d.name, "lightFragment");
        assert_eq!(d.replacements.as_deref(), Some("a,b"));
        assert_eq!(d.range.as_deref(), Some("0..maxLights"));
        assert_eq!(d.text, "#include<lightFragment>(a,b)[0..maxLights]");
    }

    #[test]
    fn scan_accepts_space_before_name() {
        let directives = IncludeDirective::scan("#include <fog>");
        assert_eq!(directives[0].name, "fog");
        assert!(directives[0].replacements.is_none());
        assert!(directives[0].range.is_none());
    }

    #[test]
    fn declaration_keys() {
        let d = IncludeDirective::scan("#include<__decl__defaultVertex>").remove(0);
        assert_eq!(d.store_key(false), "defaultVertexDeclaration");
        assert_eq!(d.store_key(true), "defaultUboDeclaration");
        let d = IncludeDirective::scan("#include<__decl__pbrFragment>").remove(0);
        assert_eq!(d.store_key(true), "pbrUboDeclaration");
    }

    #[test]
    fn range_unrolls_inclusive() {
        let options = options_with(&[("myInc", "v{X};")]);
        let out = process_includes("#include<myInc>[0..3]", &options, None).unwrap();
        assert_eq!(out, "v0;\nv1;\nv2;\nv3;\n");
    }

    #[test]
    fn range_bound_from_index_parameters() {
        let mut options = options_with(&[("light", "l{X}")]);
        options.index_parameters.insert("maxLights".into(), 1);
        let out = process_includes("#include<light>[0..maxLights]", &options, None).unwrap();
        assert_eq!(out, "l0\nl1\n");
    }

    #[test]
    fn unknown_range_bound_expands_to_nothing() {
        let options = options_with(&[("light", "l{X}")]);
        let out = process_includes("a\n#include<light>[0..nope]\nb", &options, None).unwrap();
        assert_eq!(out, "a\n\nb");
    }

    #[test]
    fn single_index_substitution() {
        let options = options_with(&[("shadow", "shadow{X} = light{X}.vLightData;")]);
        let out = process_includes("#include<shadow>[2]", &options, None).unwrap();
        assert_eq!(out, "shadow2 = vLightData2;");
    }

    #[test]
    fn light_members_kept_with_uniform_buffers() {
        let mut options = options_with(&[("shadow", "light{X}.vLightData")]);
        options.supports_uniform_buffers = true;
        let out = process_includes("#include<shadow>[1]", &options, None).unwrap();
        assert_eq!(out, "light1.vLightData");
    }

    #[test]
    fn rewrite_light_members_isolated() {
        assert_eq!(
            rewrite_light_members("light{X}.vLightDiffuse.rgb * light{X}.shadow"),
            "vLightDiffuse{X}.rgb * shadow{X}"
        );
        assert_eq!(rewrite_light_members("lights{X}"), "lights{X}");
    }

    #[test]
    fn replacement_pairs_applied_in_order() {
        let options = options_with(&[("bones", "matricesIndices matricesWeights")]);
        let out = process_includes(
            "#include<bones>(matricesIndices,matricesIndicesExtra,Weights,WeightsExtra)",
            &options,
            None,
        )
        .unwrap();
        assert_eq!(out, "matricesIndicesExtra matricesWeightsExtra");
    }

    #[test]
    fn replacement_is_literal() {
        let options = options_with(&[("inc", "a")]);
        let out = process_includes("#include<inc>(a,$0)", &options, None).unwrap();
        assert_eq!(out, "$0");
    }

    #[test]
    fn invalid_replacement_pattern_is_error() {
        let options = options_with(&[("inc", "a")]);
        let err = process_includes("#include<inc>((,x)", &options, None).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidReplacement { .. }));
    }

    #[test]
    fn nested_includes_resolved() {
        let options = options_with(&[("outer", "begin\n#include<inner>\nend"), ("inner", "middle")]);
        let out = process_includes("#include<outer>", &options, None).unwrap();
        assert_eq!(out, "begin\nmiddle\nend");
    }

    #[test]
    fn duplicate_includes_all_replaced() {
        let options = options_with(&[("x", "X")]);
        let out = process_includes("#include<x>\n#include<x>", &options, None).unwrap();
        assert_eq!(out, "X\nX");
    }

    #[test]
    fn bare_directive_leaves_suffixed_one_intact() {
        let options = options_with(&[("a", "x{X}")]);
        let out = process_includes("#include<a>\n#include<a>[1]", &options, None).unwrap();
        assert_eq!(out, "x{X}\nx1");

        let out = process_includes("#include<a>(x,y)\n#include<a>", &options, None).unwrap();
        assert_eq!(out, "y{X}\nx{X}");
    }

    #[test]
    fn scan_records_spans() {
        let source = "a\n#include<b>[2]\nc";
        let d = IncludeDirective::scan(source).remove(0);
        assert_eq!(&source[d.span.clone()], "#include<b>[2]");
    }

    #[test]
    fn resolved_source_is_unchanged() {
        let options = options_with(&[]);
        let source = "void main() {\n  gl_FragColor = vec4(1.0);\n}";
        let once = process_includes(source, &options, None).unwrap();
        let twice = process_includes(&once, &options, None).unwrap();
        assert_eq!(once, source);
        assert_eq!(twice, source);
    }

    #[test]
    fn self_including_include_hits_depth_limit() {
        let options = options_with(&[("loop", "#include<loop>")]);
        let err = process_includes("#include<loop>", &options, None).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::IncludeDepthExceeded(_)));
    }

    #[test]
    fn missing_include_without_engine() {
        let options = options_with(&[]);
        let err = process_includes("#include<ghost>", &options, None).unwrap_err();
        match err.kind {
            ErrorKind::IncludeNotFound { name, url } => {
                assert_eq!(name, "ghost");
                assert_eq!(url, "ShadersInclude/ghost.fx");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    struct CountingEngine {
        loads: Cell<usize>,
    }

    impl ShaderEngine for CountingEngine {
        fn load_file(&self, url: &str) -> Result<String> {
            self.loads.set(self.loads.get() + 1);
            match url {
                "repo/ShadersInclude/fog.fx" => Ok("fog({X})".to_string()),
                _ => Err(ShaderError::load_failed(url, "not found")),
            }
        }
    }

    #[test]
    fn missing_include_fetched_and_stored() {
        let mut options = options_with(&[("base", "base")]);
        options.shaders_repository = "repo/".to_string();
        let engine = CountingEngine { loads: Cell::new(0) };

        let out = process_includes("#include<base>\n#include<fog>[1]", &options, Some(&engine)).unwrap();
        assert_eq!(out, "base\nfog(1)");
        assert_eq!(engine.loads.get(), 1);
        assert_eq!(options.include_store.include("fog").as_deref(), Some("fog({X})"));

        // Second run is served from the store.
        process_includes("#include<fog>[0]", &options, Some(&engine)).unwrap();
        assert_eq!(engine.loads.get(), 1);
    }

    #[test]
    fn failed_fetch_surfaces_include_name() {
        let options = options_with(&[]);
        let engine = CountingEngine { loads: Cell::new(0) };
        let err = process_includes("#include<missing>", &options, Some(&engine)).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::LoadFailed { .. }));
        assert_eq!(err.shader.as_deref(), Some("missing"));
    }
}
