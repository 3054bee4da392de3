//! Effect-level compilation: resolve stage sources, run the pipeline and
//! cache the result per variant key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::engine::ShaderEngine;
use crate::error::{Result, ShaderError};
use crate::options::ProcessingOptions;
use crate::platform::ShaderStage;
use crate::processor;
use crate::store::ShaderStore;

/// Where a stage's source comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderSource {
    /// Looked up in the store, then fetched from the shader repository.
    Named(String),
    /// Inline source text.
    Code(String),
}

impl ShaderSource {
    /// The part of the variant key this source contributes.
    pub fn key_name(&self) -> &str {
        match self {
            ShaderSource::Named(name) => name,
            ShaderSource::Code(code) => code,
        }
    }
}

/// Variant key of a vertex/fragment pair under a defines list.
pub fn effect_key(vertex: &str, fragment: &str, defines: &[String]) -> String {
    format!("{vertex}+{fragment}@{}", defines.join("\n"))
}

/// Variant key of a compute shader under a defines list.
pub fn compute_key(compute: &str, defines: &[String]) -> String {
    format!("{compute}@{}", defines.join("\n"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledEffect {
    pub key: String,
    pub vertex_code: String,
    pub fragment_code: String,
    /// Stage sources after include resolution, before conditionals.
    pub raw_vertex_code: String,
    pub raw_fragment_code: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCompute {
    pub key: String,
    pub code: String,
    pub raw_code: String,
}

type OptionsFactory = Box<dyn Fn() -> ProcessingOptions>;

/// Compiles effects against one engine and shader store, sharing compiled
/// variants between callers that request the same key.
pub struct EffectCompiler {
    engine: Box<dyn ShaderEngine>,
    store: Arc<ShaderStore>,
    options: OptionsFactory,
    effects: Mutex<HashMap<String, Arc<CompiledEffect>>>,
    computes: Mutex<HashMap<String, Arc<CompiledCompute>>>,
}

impl EffectCompiler {
    /// `options` builds a fresh options value (processor included) for every
    /// compilation; defines, stage and store are filled in per call.
    pub fn new(
        engine: impl ShaderEngine + 'static,
        store: Arc<ShaderStore>,
        options: impl Fn() -> ProcessingOptions + 'static,
    ) -> Self {
        Self {
            engine: Box::new(engine),
            store,
            options: Box::new(options),
            effects: Mutex::new(HashMap::new()),
            computes: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<ShaderStore> {
        &self.store
    }

    /// Compile (or fetch from cache) a vertex/fragment pair.
    pub fn compile(
        &self,
        vertex: &ShaderSource,
        fragment: &ShaderSource,
        defines: &[String],
    ) -> Result<Arc<CompiledEffect>> {
        let key = effect_key(vertex.key_name(), fragment.key_name(), defines);

        if let Some(effect) = self.lock_effects().get(&key) {
            log::debug!("effect cache hit: {}", short_key(&key));
            return Ok(Arc::clone(effect));
        }
        log::debug!("compiling effect {}", short_key(&key));

        let mut options = self.prepare_options(defines);
        let vertex_source = self.resolve_source(vertex, ShaderStage::Vertex, &options)?;
        let fragment_source = self.resolve_source(fragment, ShaderStage::Fragment, &options)?;

        processor::initialize(&mut options);

        options.is_fragment = false;
        let vertex_out = processor::process(&vertex_source, &mut options, Some(self.engine.as_ref()))
            .map_err(|e| e.in_shader(vertex.key_name()))?;

        options.is_fragment = true;
        let fragment_out = processor::process(&fragment_source, &mut options, Some(self.engine.as_ref()))
            .map_err(|e| e.in_shader(fragment.key_name()))?;

        let finalized = processor::finalize(&vertex_out.code, &fragment_out.code, &mut options);

        let effect = Arc::new(CompiledEffect {
            key: key.clone(),
            vertex_code: finalized.vertex_code,
            fragment_code: finalized.fragment_code,
            raw_vertex_code: vertex_out.code_with_includes,
            raw_fragment_code: fragment_out.code_with_includes,
        });

        self.lock_effects().insert(key, Arc::clone(&effect));
        Ok(effect)
    }

    /// Compile (or fetch from cache) a compute shader.
    pub fn compile_compute(&self, compute: &ShaderSource, defines: &[String]) -> Result<Arc<CompiledCompute>> {
        let key = compute_key(compute.key_name(), defines);

        if let Some(effect) = self.lock_computes().get(&key) {
            log::debug!("compute cache hit: {}", short_key(&key));
            return Ok(Arc::clone(effect));
        }
        log::debug!("compiling compute shader {}", short_key(&key));

        let mut options = self.prepare_options(defines);
        let source = self.resolve_source(compute, ShaderStage::Compute, &options)?;

        processor::initialize(&mut options);
        options.is_fragment = false;
        let out = processor::preprocess(&source, &mut options, Some(self.engine.as_ref()))
            .map_err(|e| e.in_shader(compute.key_name()))?;

        let effect = Arc::new(CompiledCompute {
            key: key.clone(),
            code: out.code,
            raw_code: out.code_with_includes,
        });

        self.lock_computes().insert(key, Arc::clone(&effect));
        Ok(effect)
    }

    pub fn cached_effects(&self) -> usize {
        self.lock_effects().len() + self.lock_computes().len()
    }

    pub fn clear_cache(&self) {
        self.lock_effects().clear();
        self.lock_computes().clear();
    }

    fn prepare_options(&self, defines: &[String]) -> ProcessingOptions {
        let mut options = (self.options)();
        options.defines = defines.to_vec();
        options.include_store = Arc::clone(&self.store);
        options.supports_uniform_buffers |= self.engine.supports_uniform_buffers();
        options
    }

    fn resolve_source(
        &self,
        source: &ShaderSource,
        stage: ShaderStage,
        options: &ProcessingOptions,
    ) -> Result<String> {
        let name = match source {
            ShaderSource::Code(code) => return Ok(code.clone()),
            ShaderSource::Named(name) => name,
        };

        let store_key = format!("{name}{}", stage.store_suffix());
        if let Some(code) = self.store.shader(&store_key) {
            return Ok(code);
        }

        let url = format!("{}{name}.{}", options.shaders_repository, stage.file_extension());
        let code = self
            .engine
            .load_file(&url)
            .map_err(|_| ShaderError::shader_not_found(name).in_shader(&url))?;
        self.store.set_shader(&store_key, code.as_str());
        Ok(code)
    }

    fn lock_effects(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<CompiledEffect>>> {
        self.effects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_computes(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<CompiledCompute>>> {
        self.computes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// First line of a key, for log output (inline sources make long keys).
fn short_key(key: &str) -> &str {
    key.lines().next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::webgl2::WebGl2Processor;
    use std::cell::Cell;
    use std::rc::Rc;

    struct MapEngine {
        files: HashMap<String, String>,
        loads: Rc<Cell<usize>>,
    }

    impl ShaderEngine for MapEngine {
        fn load_file(&self, url: &str) -> Result<String> {
            self.loads.set(self.loads.get() + 1);
            self.files
                .get(url)
                .cloned()
                .ok_or_else(|| ShaderError::load_failed(url, "missing"))
        }
    }

    fn compiler(files: &[(&str, &str)]) -> (EffectCompiler, Rc<Cell<usize>>) {
        let loads = Rc::new(Cell::new(0));
        let engine = MapEngine {
            files: files
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            loads: Rc::clone(&loads),
        };
        let compiler = EffectCompiler::new(engine, Arc::new(ShaderStore::new()), || {
            let mut options = ProcessingOptions::default().with_processor(WebGl2Processor::new());
            options.shaders_repository = "shaders/".into();
            options
        });
        (compiler, loads)
    }

    #[test]
    fn key_composition() {
        let defines = vec!["#define A".to_string(), "#define B".to_string()];
        assert_eq!(effect_key("default", "default", &defines), "default+default@#define A\n#define B");
        assert_eq!(compute_key("blur", &[]), "blur@");
    }

    #[test]
    fn named_sources_loaded_once_and_cached() {
        let (compiler, loads) = compiler(&[
            ("shaders/basic.vertex.fx", "attribute vec3 p;\nvoid main() {\n}"),
            (
                "shaders/basic.fragment.fx",
                "#ifdef RED\nvoid main() {\ngl_FragColor = vec4(1.0);\n}\n#endif",
            ),
        ]);
        let vertex = ShaderSource::Named("basic".into());
        let fragment = ShaderSource::Named("basic".into());
        let defines = vec!["RED".to_string()];

        let first = compiler.compile(&vertex, &fragment, &defines).unwrap();
        assert!(first.vertex_code.contains("in vec3 p;"));
        assert!(first.fragment_code.contains("glFragColor = vec4(1.0);"));
        assert_eq!(loads.get(), 2);
        assert!(compiler.store().shader("basicVertexShader").is_some());

        let second = compiler.compile(&vertex, &fragment, &defines).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loads.get(), 2);

        // A new variant reuses the stored sources.
        let plain = compiler.compile(&vertex, &fragment, &[]).unwrap();
        assert!(!plain.fragment_code.contains("main"));
        assert_eq!(loads.get(), 2);
        assert_eq!(compiler.cached_effects(), 2);
    }

    #[test]
    fn missing_named_source_reports_name() {
        let (compiler, _) = compiler(&[]);
        let err = compiler
            .compile(
                &ShaderSource::Named("ghost".into()),
                &ShaderSource::Code("void main() {}".into()),
                &[],
            )
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ShaderNotFound(ref n) if n == "ghost"));
    }

    #[test]
    fn compute_skips_precision() {
        let (compiler, _) = compiler(&[]);
        let compute = ShaderSource::Code("#ifdef FAST\nfast();\n#else\nslow();\n#endif".into());
        let out = compiler.compile_compute(&compute, &["FAST".to_string()]).unwrap();
        assert_eq!(out.code, "fast();\r\n");

        compiler.clear_cache();
        assert_eq!(compiler.cached_effects(), 0);
    }
}
