use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use verdict::{
    compare_variants, CampaignDocument, CampaignStatus, CampaignStore, ConfidenceThreshold,
    DeclareOptions, VariantRepository, VerdictError, WinnerService, WinnerSettings,
};

#[derive(Parser)]
#[command(name = "verdict", about = "Significance testing and winner declaration for content experiments")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, env = "VERDICT_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Conversions every variant needs before auto-detection may declare
    #[arg(long, env = "VERDICT_MIN_CONVERSIONS", default_value_t = 100)]
    min_conversions: u64,

    #[arg(long, env = "VERDICT_MIN_DAYS", default_value_t = 7)]
    min_days: u32,

    /// 90, 95 or 99
    #[arg(long, env = "VERDICT_CONFIDENCE", default_value = "95")]
    confidence: ConfidenceThreshold,

    #[arg(long, env = "VERDICT_AUTO_APPLY")]
    auto_apply: bool,

    #[arg(long, env = "VERDICT_AUTO_ARCHIVE")]
    auto_archive: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Load a campaign document (campaign + variants) from a JSON file
    Create { file: PathBuf },
    /// List campaigns, optionally filtered by status
    List {
        #[arg(long)]
        status: Option<CampaignStatus>,
    },
    /// Compare every variant against the control
    Analyze { campaign: String },
    /// Best observed variant, significant or not
    Recommend { campaign: String },
    Declare {
        campaign: String,
        variant: String,
        #[arg(long, default_value = "cli")]
        actor: String,
        /// Route all traffic to the winner right away
        #[arg(long)]
        apply: bool,
        #[arg(long)]
        archive: bool,
        #[arg(long)]
        notify: bool,
    },
    Apply { campaign: String },
    ArchiveLosers { campaign: String },
    Archive {
        campaign: String,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
    Restore { campaign: String },
    Start { campaign: String },
    Pause { campaign: String },
    Resume { campaign: String },
    Complete { campaign: String },
    AutoDetect { campaign: String },
}

impl Cli {
    fn settings(&self) -> Result<WinnerSettings, VerdictError> {
        let settings = WinnerSettings {
            min_conversions: self.min_conversions,
            min_running_days: self.min_days,
            confidence_threshold: self.confidence,
            auto_apply: self.auto_apply,
            auto_archive: self.auto_archive,
        };
        settings.validate()?;
        Ok(settings)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), VerdictError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<(), VerdictError> {
    let settings = cli.settings()?;
    let store = Arc::new(CampaignStore::new(&cli.data_dir)?);
    let service = WinnerService::new(store.clone(), store.clone(), settings);

    match cli.command {
        Command::Create { file } => {
            let data = std::fs::read_to_string(&file)?;
            let document: CampaignDocument = serde_json::from_str(&data)?;
            let created = store.create(document)?;
            tracing::info!(campaign_id = %created.campaign.id, "campaign created");
            print_json(&created)
        }
        Command::List { status } => print_json(&store.list(status)),
        Command::Analyze { campaign } => {
            let variants = store.list_variants(&campaign)?;
            print_json(&compare_variants(&variants)?)
        }
        Command::Recommend { campaign } => print_json(&service.get_recommendation(&campaign)?),
        Command::Declare {
            campaign,
            variant,
            actor,
            apply,
            archive,
            notify,
        } => {
            let options = DeclareOptions {
                auto_detected: false,
                auto_apply: apply,
                archive,
                notify,
            };
            print_json(&service.declare(&campaign, &variant, &actor, options)?)
        }
        Command::Apply { campaign } => print_json(&service.apply(&campaign)?),
        Command::ArchiveLosers { campaign } => print_json(&service.archive_losers(&campaign)?),
        Command::Archive { campaign, actor } => {
            print_json(&service.archive_campaign(&campaign, &actor)?)
        }
        Command::Restore { campaign } => print_json(&service.restore_campaign(&campaign)?),
        Command::Start { campaign } => print_json(&service.start(&campaign)?),
        Command::Pause { campaign } => print_json(&service.pause(&campaign)?),
        Command::Resume { campaign } => print_json(&service.resume(&campaign)?),
        Command::Complete { campaign } => print_json(&service.complete(&campaign)?),
        Command::AutoDetect { campaign } => print_json(&service.auto_detect_winner(&campaign)?),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let payload = err.to_payload();
            match serde_json::to_string(&payload) {
                Ok(json) => eprintln!("{json}"),
                Err(_) => eprintln!("{}: {}", payload.code, payload.message),
            }
            ExitCode::FAILURE
        }
    }
}
