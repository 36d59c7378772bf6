mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use medgemma::bootstrap::{
    default_cache_dir, ModelSettings, MEDGEMMA_GGUF_FILE, MEDGEMMA_GGUF_REPO, MEDGEMMA_REPO,
};
use medgemma::key_manager::HUGGINGFACE_TOKEN;
use medgemma::model::gemma::DeviceKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Set up and check a local MedGemma install", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that the access token is set and can reach the model
    CheckToken {
        #[command(flatten)]
        model: ModelArgs,
    },

    /// Interactively store an access token in an env file
    SetupToken {
        /// File to write the token to
        #[arg(long, default_value = ".env")]
        env_file: PathBuf,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Download the model files and run a short test generation
    Download {
        /// Only download and load, skip the test generation
        #[arg(long)]
        skip_test: bool,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Print the version
    Version,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DeviceArg {
    Cpu,
    Cuda,
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Gated model repository the token needs access to
    #[arg(long, default_value = MEDGEMMA_REPO)]
    repo: String,

    /// Repository holding the quantized weights
    #[arg(long, default_value = MEDGEMMA_GGUF_REPO)]
    gguf_repo: String,

    #[arg(long, default_value = MEDGEMMA_GGUF_FILE)]
    gguf_file: String,

    /// Where model files are cached (defaults to the platform cache directory)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "cpu")]
    device: DeviceArg,

    /// Environment variable holding the access token
    #[arg(long, default_value = HUGGINGFACE_TOKEN)]
    token_env: String,
}

impl ModelArgs {
    fn into_settings(self) -> ModelSettings {
        ModelSettings {
            repo: self.repo,
            gguf_repo: self.gguf_repo,
            gguf_file: self.gguf_file,
            cache_dir: self.cache_dir.unwrap_or_else(default_cache_dir),
            device: match self.device {
                DeviceArg::Cpu => DeviceKind::Cpu,
                DeviceArg::Cuda => DeviceKind::Cuda,
            },
            token_env: self.token_env,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::CheckToken { model } => {
            commands::check_token::execute(&model.into_settings()).await?;
        }
        Command::SetupToken { env_file, model } => {
            commands::setup_token::execute(&env_file, &model.into_settings()).await?;
        }
        Command::Download { skip_test, model } => {
            commands::download::execute(model.into_settings(), skip_test).await?;
        }
        Command::Version => {
            commands::version::execute()?;
        }
    }
    Ok(())
}
