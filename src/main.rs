use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use shader_processor::{
    condition, processor, EffectCompiler, FsEngine, PassthroughProcessor, ProcessingOptions,
    ShaderLanguage, ShaderSource, ShaderStore, SymbolTable, WebGl2Processor,
};

#[derive(Parser)]
#[command(name = "shaderpp", version = "1.0.0")]
#[command(about = "Shader preprocessor: conditionals, includes and platform conversion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fully process one shader stage (precision, includes, conditionals, conversion)
    Process {
        /// Input shader file
        file: PathBuf,

        #[command(flatten)]
        settings: Settings,
    },

    /// Resolve includes and conditionals only, without precision handling
    Preprocess {
        /// Input shader file
        file: PathBuf,

        #[command(flatten)]
        settings: Settings,
    },

    /// Compile a vertex/fragment pair and print both stages
    Effect {
        /// Vertex shader file, or a shader name looked up in the repository
        vertex: String,

        /// Fragment shader file, or a shader name looked up in the repository
        fragment: String,

        #[command(flatten)]
        settings: Settings,
    },

    /// Evaluate an #if condition against a defines list
    Eval {
        /// Condition text, e.g. "defined(FOG) && NUM_LIGHTS > 2"
        expr: String,

        /// Preprocessor define (NAME or "NAME VALUE")
        #[arg(short = 'D', long = "define")]
        defines: Vec<String>,
    },
}

#[derive(Args)]
struct Settings {
    /// Preprocessor define (NAME or "NAME VALUE")
    #[arg(short = 'D', long = "define")]
    defines: Vec<String>,

    /// JSON options file; command-line flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Shader repository prefix; includes load from <repo>ShadersInclude/<name>.fx
    #[arg(long)]
    repo: Option<String>,

    /// Target processor
    #[arg(long, value_enum, default_value_t = ProcessorKind::Webgl2)]
    processor: ProcessorKind,

    /// Treat the input as a fragment shader
    #[arg(long)]
    fragment: bool,

    /// Request highp float precision
    #[arg(long)]
    high_precision: bool,

    /// Target supports uniform buffers
    #[arg(long)]
    ubo: bool,

    /// Platform name define (default WEBGL2)
    #[arg(long)]
    platform: Option<String>,

    /// Value of __VERSION__
    #[arg(long = "version-string")]
    version_string: Option<String>,

    /// Write output to file instead of stdout
    #[arg(short)]
    o: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProcessorKind {
    /// GLSL ES 1.00 sources converted for WebGL2
    Webgl2,
    /// GLSL without line rewriting
    Glsl,
    /// WGSL without line rewriting
    Wgsl,
    /// No processor: precision handling only
    None,
}

impl Settings {
    fn options(&self) -> Result<ProcessingOptions> {
        let mut options = match &self.config {
            Some(path) => ProcessingOptions::from_json_file(path)
                .with_context(|| format!("cannot read options from '{}'", path.display()))?,
            None => ProcessingOptions::default(),
        };

        options.defines.extend(self.defines.iter().cloned());
        options.is_fragment |= self.fragment;
        options.should_use_high_precision_shader |= self.high_precision;
        options.supports_uniform_buffers |= self.ubo;
        if let Some(repo) = &self.repo {
            options.shaders_repository = repo.clone();
        }
        if let Some(platform) = &self.platform {
            options.platform_name = platform.clone();
        }
        if let Some(version) = &self.version_string {
            options.version = version.clone();
        }

        options.processor = match self.processor {
            ProcessorKind::Webgl2 => Some(Box::new(WebGl2Processor::new())),
            ProcessorKind::Glsl => Some(Box::new(PassthroughProcessor::new(ShaderLanguage::Glsl))),
            ProcessorKind::Wgsl => Some(Box::new(PassthroughProcessor::new(ShaderLanguage::Wgsl))),
            ProcessorKind::None => None,
        };

        Ok(options)
    }

    fn engine(&self) -> FsEngine {
        FsEngine::new().with_uniform_buffers(self.ubo)
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Process { file, settings } => {
            let source = read_source(&file)?;
            let mut options = settings.options()?;
            let engine = settings.engine();
            processor::initialize(&mut options);
            let out = processor::process(&source, &mut options, Some(&engine))
                .with_context(|| format!("cannot process '{}'", file.display()))?;
            emit(&out.code, settings.o.as_deref(), "shader")
        }

        Commands::Preprocess { file, settings } => {
            let source = read_source(&file)?;
            let mut options = settings.options()?;
            let engine = settings.engine();
            processor::initialize(&mut options);
            let out = processor::preprocess(&source, &mut options, Some(&engine))
                .with_context(|| format!("cannot preprocess '{}'", file.display()))?;
            emit(&out.code, settings.o.as_deref(), "shader")
        }

        Commands::Effect {
            vertex,
            fragment,
            settings,
        } => {
            // Validate the settings once up front; the factory below cannot fail.
            let defines = settings.options()?.defines;
            let out_path = settings.o.clone();
            let compiler = EffectCompiler::new(
                settings.engine(),
                Arc::new(ShaderStore::new()),
                move || settings.options().unwrap_or_default(),
            );

            let effect = compiler
                .compile(&shader_source(&vertex)?, &shader_source(&fragment)?, &defines)
                .context("cannot compile effect")?;

            let output = format!(
                "// vertex\n{}\n// fragment\n{}",
                effect.vertex_code, effect.fragment_code
            );
            emit(&output, out_path.as_deref(), "effect")
        }

        Commands::Eval { expr, defines } => {
            let symbols: SymbolTable = defines
                .iter()
                .map(|d| processor::parse_define(d))
                .collect();
            let parsed = condition::build_sub_expression(&expr);
            println!("{parsed} => {}", parsed.is_true(&symbols));
            Ok(())
        }
    }
}

/// A path to an existing file is read as inline source; anything else is a
/// shader name for the repository.
fn shader_source(arg: &str) -> Result<ShaderSource> {
    let path = Path::new(arg);
    if path.is_file() {
        Ok(ShaderSource::Code(read_source(path)?))
    } else {
        Ok(ShaderSource::Named(arg.to_string()))
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("cannot read '{}'", path.display()))
}

fn emit(output: &str, out_path: Option<&Path>, kind: &str) -> Result<()> {
    match out_path {
        Some(path) => {
            fs::write(path, output).with_context(|| format!("cannot write '{}'", path.display()))?;
            eprintln!("wrote {kind} to {} ({} bytes)", path.display(), output.len());
        }
        None => print!("{output}"),
    }
    Ok(())
}
