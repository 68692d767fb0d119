use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use shadow_pm::config::{CONFIG_FILE_NAME, Secrets, Settings};
use shadow_pm::logging::{self, LogFormat};

mod cmd;

#[derive(Parser)]
#[command(name = "shadow-pm")]
#[command(version, about = "Strategic memory pipeline: meetings to tickets, intent to PR reviews")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = CONFIG_FILE_NAME)]
    pub config: PathBuf,

    /// Log output format: pretty or json
    #[arg(long, global = true, default_value = "pretty")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Port to serve on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Enable dev mode (permissive CORS for a local dashboard)
        #[arg(long)]
        dev: bool,
    },
    /// Write a default config file and create the state database
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Process meeting notes and/or a recording
    Ingest {
        /// Meeting notes or transcript
        #[arg(long)]
        text: Option<String>,

        /// Path to a meeting recording
        #[arg(long)]
        video: Option<PathBuf>,

        /// Project id (defaults to project.default_id)
        #[arg(long)]
        project: Option<String>,

        /// Continuation token from an earlier ingestion
        #[arg(long)]
        signature: Option<String>,
    },
    /// Review a diff against the stored strategic intent
    Audit {
        /// File containing the unified diff
        #[arg(long)]
        diff_file: PathBuf,

        /// Repository as owner/name
        #[arg(long)]
        repo: String,

        /// Pull request number
        #[arg(long)]
        change: u64,

        /// Continuation token (defaults to the stored one)
        #[arg(long)]
        token: Option<String>,

        /// Project id (defaults to project.default_id)
        #[arg(long)]
        project: Option<String>,

        /// Ask for an APPROVED/FLAGGED verdict instead of a free-text review
        #[arg(long)]
        verdict: bool,
    },
    /// Show the stored strategic state for a project
    State {
        /// Project id (defaults to project.default_id)
        project: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.log_format);

    let file_settings = Settings::load_or_default(&cli.config)?;
    let settings = file_settings.clone().apply_env();
    let secrets = Secrets::from_env();

    match cli.command {
        Commands::Serve { port, host, dev } => {
            cmd::cmd_serve(settings, &secrets, port, host, dev).await?;
        }
        Commands::Init { force } => cmd::cmd_init(&cli.config, &file_settings, force)?,
        Commands::Ingest {
            text,
            video,
            project,
            signature,
        } => {
            cmd::cmd_ingest(&settings, &secrets, text, video.as_deref(), project, signature).await?;
        }
        Commands::Audit {
            diff_file,
            repo,
            change,
            token,
            project,
            verdict,
        } => {
            let args = cmd::AuditArgs {
                diff_file,
                repo,
                change,
                token,
                project,
                verdict,
            };
            cmd::cmd_audit(&settings, &secrets, args).await?;
        }
        Commands::State { project } => cmd::cmd_state(&settings, project).await?,
    }

    Ok(())
}
