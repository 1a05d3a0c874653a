//! quizmab - 本地臂存储的同步与维护命令行

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::error;

use quizmab_engine::{
    init_tracing, EngineConfig, EngineError, EngineResult, HttpSyncTransport, Storage, SyncEngine,
    SyncPhase, SyncStatus,
};

/// Adaptive quiz engine maintenance CLI
#[derive(Parser, Debug)]
#[command(name = "quizmab")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Learner whose data the command operates on
    #[arg(long = "user", env = "QUIZMAB_USER_ID")]
    user_id: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Exchange local changes with the server
    Sync {
        /// Reset the sync watermark and resend the full history
        #[arg(long)]
        force: bool,
    },

    /// Show local arm counts and the sync watermark
    Status,

    /// Delete every local arm for the user
    Reset,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("quizmab: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let _log_guard = init_tracing(&config.logging);

    match run(cli, &config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "命令执行失败");
            eprintln!("quizmab: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: &EngineConfig) -> EngineResult<ExitCode> {
    let storage = Storage::new(&config.db_path)?;

    match cli.command {
        Commands::Sync { force } => {
            if !config.sync_enabled() {
                return Err(EngineError::Config(
                    "QUIZMAB_API_BASE_URL 未设置，无法同步".to_string(),
                ));
            }
            let token = std::env::var("QUIZMAB_AUTH_TOKEN").unwrap_or_default();
            let transport =
                HttpSyncTransport::new(&config.api_base_url, token, config.sync_timeout)
                    .map_err(|e| EngineError::Config(e.to_string()))?;
            let engine = SyncEngine::new(storage, Arc::new(transport), config.sync_timeout);

            let report = if force {
                engine.force_full_sync(&cli.user_id).await?
            } else {
                engine.sync(&cli.user_id).await?
            };
            print_json(&report);

            Ok(if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Status => {
            print_json(&SyncStatus::load(&storage, &cli.user_id, SyncPhase::Idle)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Reset => {
            let deleted = storage.delete_all_for_user(&cli.user_id)?;
            println!(
                "deleted {} question arms and {} topic arms for {}",
                deleted.question_arms, deleted.topic_arms, cli.user_id
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("quizmab: 序列化输出失败: {}", e),
    }
}
