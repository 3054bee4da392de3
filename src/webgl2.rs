//! GLSL ES 1.00 → GLSL ES 3.00 conversion.

use std::sync::OnceLock;

use regex::Regex;

use crate::engine::ShaderEngine;
use crate::expression::SymbolTable;
use crate::platform::{LanguageProcessor, ShaderLanguage};

const FRAG_COLOR_OUTPUT: &str = "layout(location = 0) out vec4 glFragColor;\n";
const MULTIVIEW_HEADER: &str = "#extension GL_OVR_multiview2 : require\nlayout (num_views = 2) in;\n";

struct Patterns {
    varying: Regex,
    draw_buffers: Regex,
    webgl1_extensions: Regex,
    texture_2d: Regex,
    layout_output: Regex,
    texture_2d_lod: Regex,
    texture_cube_lod: Regex,
    texture_cube: Regex,
    main: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("static regex");
        Patterns {
            varying: re(r"(flat\s)?\s*varying\s*.*"),
            draw_buffers: re(r"#extension.+GL_EXT_draw_buffers.+require"),
            webgl1_extensions: re(
                r"#extension.+(GL_OVR_multiview2|GL_OES_standard_derivatives|GL_EXT_shader_texture_lod|GL_EXT_frag_depth|GL_EXT_draw_buffers).+(enable|require)",
            ),
            texture_2d: re(r"texture2D\s*\("),
            layout_output: re(r"layout *\(location *= *0\) *out"),
            texture_2d_lod: re(r"texture2DLodEXT\s*\("),
            texture_cube_lod: re(r"textureCubeLodEXT\s*\("),
            texture_cube: re(r"textureCube\s*\("),
            main: re(r"void\s+?main\s*\("),
        }
    })
}

/// Rewrites WebGL1-style GLSL for a WebGL2 context: `attribute`/`varying`
/// become `in`/`out`, WebGL1 extensions are dropped and the fragment output
/// is declared explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebGl2Processor;

impl WebGl2Processor {
    pub fn new() -> Self {
        Self
    }
}

impl LanguageProcessor for WebGl2Processor {
    fn shader_language(&self) -> ShaderLanguage {
        ShaderLanguage::Glsl
    }

    fn attribute_processor(&mut self, attribute: &str, _symbols: &SymbolTable) -> Option<String> {
        Some(attribute.replacen("attribute", "in", 1))
    }

    fn varying_check(&self, varying: &str, _is_fragment: bool) -> Option<bool> {
        Some(patterns().varying.is_match(varying))
    }

    fn varying_processor(
        &mut self,
        varying: &str,
        is_fragment: bool,
        _symbols: &SymbolTable,
    ) -> Option<String> {
        let direction = if is_fragment { "in" } else { "out" };
        Some(varying.replacen("varying", direction, 1))
    }

    fn post_processor(
        &mut self,
        code: &str,
        defines: &[String],
        is_fragment: bool,
        _engine: Option<&dyn ShaderEngine>,
    ) -> Option<String> {
        let p = patterns();
        let has_draw_buffers = p.draw_buffers.is_match(code);

        let code = p.webgl1_extensions.replace_all(code, "");
        let code = p.texture_2d.replace_all(&code, "texture(").into_owned();

        if !is_fragment {
            if defines.iter().any(|d| d == "#define MULTIVIEW") {
                return Some(format!("{MULTIVIEW_HEADER}{code}"));
            }
            return Some(code);
        }

        let has_output = p.layout_output.is_match(&code);
        let code = p.texture_2d_lod.replace_all(&code, "textureLod(");
        let code = p.texture_cube_lod.replace_all(&code, "textureLod(");
        let code = p.texture_cube.replace_all(&code, "texture(");
        let code = code
            .replace("gl_FragDepthEXT", "gl_FragDepth")
            .replace("gl_FragColor", "glFragColor")
            .replace("gl_FragData", "glFragData");

        let main = if has_draw_buffers || has_output {
            "void main(".to_string()
        } else {
            format!("{FRAG_COLOR_OUTPUT}void main(")
        };
        Some(p.main.replace_all(&code, regex::NoExpand(&main)).into_owned())
    }
}
