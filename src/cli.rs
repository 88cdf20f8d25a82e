use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::loader::EngineConfig;
use crate::config::types::{ExecutionLimits, Language};
use crate::engine::{Engine, GradingRequest};
use crate::judge::registry::{resolve_interpreter, ExecutorRegistry};
use crate::sandbox::{CodeExecutor, Sandbox};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade one submission described by a request file
    Grade {
        /// GradingRequest JSON file
        #[arg(long)]
        request: PathBuf,
        /// Engine config file (defaults plus GRADEBOX_* overrides when absent)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run code once in the sandbox and print its output
    Execute {
        /// Language (python, javascript)
        #[arg(long)]
        language: String,
        /// Source file to run
        #[arg(long)]
        code_file: PathBuf,
        /// Text bound to the guest's `input`
        #[arg(long, default_value = "")]
        input: String,
        /// Wall-clock timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Memory ceiling in MB
        #[arg(long)]
        memory_mb: Option<u64>,
        /// Engine config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Check which languages can run on this host
    CheckDeps {
        /// Show interpreter paths
        #[arg(long)]
        verbose: bool,
        /// Engine config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Grade { request, config } => grade(&request, config.as_deref()),
        Commands::Execute {
            language,
            code_file,
            input,
            timeout_ms,
            memory_mb,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let language: Language = language.parse()?;
            let code = std::fs::read_to_string(&code_file)
                .with_context(|| format!("Failed to read {}", code_file.display()))?;
            let defaults = config.default_limits;
            let limits = config.effective_limits(Some(ExecutionLimits {
                memory_limit_mb: memory_mb.unwrap_or(defaults.memory_limit_mb),
                timeout_ms: timeout_ms.unwrap_or(defaults.timeout_ms),
            }));

            let sandbox = Sandbox::new(&config);
            match sandbox.execute(&code, language, &input, &limits) {
                Ok(output) => {
                    print!("{}", output);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("Execution failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::CheckDeps { verbose, config } => {
            let config = load_config(config.as_deref())?;
            check_language_dependencies(&config, verbose)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env()?,
    };
    Ok(config)
}

fn grade(request_path: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let content = std::fs::read_to_string(request_path)
        .with_context(|| format!("Failed to read request {}", request_path.display()))?;
    let request: GradingRequest = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse request {}", request_path.display()))?;

    let engine = Engine::new(config)?;
    let response = engine.grade_submission(&request)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn check_language_dependencies(config: &EngineConfig, verbose: bool) -> Result<()> {
    println!("Checking language dependencies...");
    println!();

    let presets = config.language_presets();
    let registry = ExecutorRegistry::from_presets(&presets);
    let available = registry.available();

    for language in Language::ALL {
        let preset = presets.get(language);
        if available.contains(&language) {
            println!("OK      {}", language);
        } else if preset.is_some() {
            println!("MISSING {}", language);
        } else {
            println!("NONE    {} (no runtime preset)", language);
        }

        if verbose {
            if let Some(preset) = preset {
                let resolved = resolve_interpreter(&preset.interpreter);
                match resolved {
                    Some(path) => println!("        {} -> {}", preset.id, path.display()),
                    None => println!(
                        "        {} -> {} NOT FOUND",
                        preset.id,
                        preset.interpreter.display()
                    ),
                }
            }
        }
    }

    println!();
    if available.is_empty() {
        eprintln!("Warning: no language can run on this host");
        eprintln!("   Install python3 or node, or set GRADEBOX_PYTHON / GRADEBOX_NODE");
        std::process::exit(1);
    }
    println!("{} of {} languages runnable", available.len(), Language::ALL.len());
    Ok(())
}
