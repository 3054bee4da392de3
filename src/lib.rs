pub mod condition;
pub mod cursor;
pub mod effect;
pub mod engine;
pub mod error;
pub mod expression;
pub mod includes;
pub mod options;
pub mod platform;
pub mod processor;
pub mod store;
pub mod token;
pub mod tree;
pub mod webgl2;

pub use effect::{CompiledEffect, EffectCompiler, ShaderSource};
pub use engine::{FsEngine, ShaderEngine};
pub use error::{ErrorKind, Result, ShaderError};
pub use expression::{Expr, SymbolTable};
pub use options::ProcessingOptions;
pub use platform::{LanguageProcessor, PassthroughProcessor, ShaderLanguage, ShaderStage};
pub use processor::{finalize, preprocess, process, ProcessedShader};
pub use store::ShaderStore;
pub use webgl2::WebGl2Processor;

/// Evaluate one `#if` condition against a defines list.
pub fn evaluate_condition<S: AsRef<str>>(condition: &str, defines: &[S]) -> bool {
    let symbols: SymbolTable = defines
        .iter()
        .map(|d| processor::parse_define(d.as_ref()))
        .collect();
    condition::build_sub_expression(condition).is_true(&symbols)
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn end_to_end_fragment_variant() {
        let store = std::sync::Arc::new(ShaderStore::new());
        store.set_include(
            "lightFragment",
            "#ifdef LIGHT{X}\ncolor += light{X}.vLightDiffuse.rgb;\n#endif",
        );

        let mut options = ProcessingOptions::default()
            .with_store(store)
            .with_defines(["LIGHT0", "LIGHT1", "NUM_LIGHTS 2"])
            .with_processor(WebGl2Processor::new());
        options.is_fragment = true;
        options.index_parameters.insert("maxLights".into(), 2);

        let source = "\
varying vec2 vUV;
void main() {
vec3 color = vec3(0.0);
#include<lightFragment>[0..maxLights]
#if NUM_LIGHTS > 1
color *= 0.5;
#endif
gl_FragColor = vec4(color, 1.0);
}";
        let out = process(source, &mut options, None).unwrap();

        assert!(out.code.starts_with("precision mediump float;\r\n"));
        assert!(out.code.contains("in vec2 vUV;\r\n"));
        assert!(out.code.contains("color += vLightDiffuse0.rgb;\r\n"));
        assert!(out.code.contains("color += vLightDiffuse1.rgb;\r\n"));
        assert!(!out.code.contains("vLightDiffuse2"));
        assert!(out.code.contains("color *= 0.5;\r\n"));
        assert!(out.code.contains("glFragColor = vec4(color, 1.0);"));
        assert!(out.code_with_includes.contains("#ifdef LIGHT2"));
    }

    #[test]
    fn condition_helper() {
        assert!(evaluate_condition("defined(A) && B >= 2", &["A", "B 3"]));
        assert!(!evaluate_condition("defined(A) && B >= 2", &["A", "B 1"]));
        assert!(evaluate_condition("!defined(C) || C", &["A"]));
    }
}
