//! Toolbox CLI
//!
//! Dispatch capabilities, inspect contracts, generate adapters and drive the
//! OpenAI runner.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use toolbox_cli::openai::{OpenAiClient, OpenAiSettings, run_conversation};
use toolbox_cli::{describe_capability, dispatch_with_input, list_capabilities, skillgen, toolgen};
use toolbox_core::ToolboxConfig;
use toolbox_registry::Dispatcher;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "toolbox")]
#[command(about = "Contract-described capability toolbox", long_about = None)]
struct Cli {
    /// Plugin tree root
    #[arg(long, global = true)]
    capabilities_dir: Option<PathBuf>,

    /// Tracing filter
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct InputArgs {
    /// Input as a JSON string
    #[arg(long)]
    input_json: Option<String>,
    /// Input read from a JSON file
    #[arg(long)]
    input_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Invoke a capability and print its envelope
    Dispatch {
        /// Capability name
        #[arg(long)]
        capability: String,
        #[command(flatten)]
        input: InputArgs,
    },
    /// List capabilities
    List,
    /// Print a capability contract
    Describe {
        /// Capability name
        name: String,
    },
    /// Generate OpenAI tool definitions
    Toolgen {
        /// Write `<name>.json` files here instead of each plugin's adapters/
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Generate Claude SKILL.md stubs
    Skillgen {
        /// Skills root
        #[arg(long, default_value = skillgen::DEFAULT_SKILLS_DIR)]
        out_dir: PathBuf,
        /// Overwrite existing skills
        #[arg(long)]
        force: bool,
        /// Print instead of writing
        #[arg(long)]
        dry_run: bool,
        /// Only this capability
        #[arg(long)]
        capability: Option<String>,
    },
    /// Chat with an OpenAI model that can call capabilities
    Run {
        /// User message
        #[arg(long)]
        message: String,
        /// Chat model, overrides OPENAI_MODEL
        #[arg(long)]
        model: Option<String>,
        /// Request limit before giving up
        #[arg(long, default_value_t = 16)]
        max_turns: usize,
    },
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let mut config = ToolboxConfig::from_env().wrap_err("invalid environment")?;
    if let Some(dir) = cli.capabilities_dir {
        config.capabilities_dir = dir;
    }
    if let Some(level) = cli.log_level {
        config.log_filter = level;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let registry = toolbox_capabilities::default_registry(&config.capabilities_dir).wrap_err_with(|| {
        format!(
            "failed to load capabilities from {}",
            config.capabilities_dir.display()
        )
    })?;

    match cli.command {
        Commands::Dispatch { capability, input } => {
            let dispatcher = Dispatcher::new(Arc::new(registry));
            let envelope = dispatch_with_input(
                &dispatcher,
                &capability,
                input.input_json,
                input.input_file.as_deref(),
            );
            println!("{}", envelope.to_json_pretty());
            Ok(if envelope.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::List => {
            println!("{}", serde_json::to_string_pretty(&list_capabilities(&registry))?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Describe { name } => {
            print!("{}", describe_capability(&registry, &name)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Toolgen { out_dir } => {
            for path in toolgen::write_tools(&registry, out_dir.as_deref())? {
                println!("{}", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Skillgen {
            out_dir,
            force,
            dry_run,
            capability,
        } => {
            let options = skillgen::SkillOptions {
                out_dir,
                force,
                dry_run,
                capability,
            };
            let outcomes = skillgen::write_skills(&registry, &options)?;
            for outcome in &outcomes {
                println!("{outcome}");
            }
            let generated = outcomes.iter().filter(|o| o.generated()).count();
            println!("\n{generated} generated, {} skipped", outcomes.len() - generated);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            message,
            model,
            max_turns,
        } => {
            let mut settings = OpenAiSettings::from_env()?;
            if let Some(model) = model {
                settings.model = model;
            }
            let model = settings.model.clone();
            let client = OpenAiClient::new(settings);
            let dispatcher = Dispatcher::new(Arc::new(registry));

            let runtime = tokio::runtime::Runtime::new()?;
            let answer = runtime.block_on(run_conversation(
                &client,
                &dispatcher,
                &model,
                &message,
                max_turns,
            ))?;
            println!("{answer}");
            Ok(ExitCode::SUCCESS)
        }
    }
}
