use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use orchestrator_client::{logging, ClientConfig, Orchestrator, OrchestratorView, StepStatus};

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive the CurricAlign pipeline from the terminal", long_about = None)]
struct Cli {
    /// Orchestrator API base URL (overrides CURRICALIGN_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a pipeline run and follow it until it settles
    Run(RunArgs),
    /// Ask the backend to cancel a job
    Cancel {
        /// Job id returned when the run started
        job_id: String,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Curriculum PDF to upload before the run
    #[arg(long, conflicts_with = "stored", required_unless_present = "stored")]
    pdf: Option<PathBuf>,

    /// Reuse curriculum data already stored by the backend
    #[arg(long)]
    stored: bool,

    /// Skip scraping new job listings
    #[arg(long)]
    no_scrape: bool,

    /// Skip skill extraction
    #[arg(long)]
    no_extract: bool,

    /// Retrain the ML models
    #[arg(long)]
    retrain: bool,

    /// Do not generate the PDF report
    #[arg(long)]
    no_pdf: bool,

    /// Where to save the report (overrides CURRICALIGN_DOWNLOAD_DIR)
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Print the report URL instead of downloading the file
    #[arg(long)]
    no_download: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init_logging();

    let args = Cli::parse();

    let mut config = ClientConfig::from_env().context("invalid CURRICALIGN_* environment")?;
    if let Some(url) = &args.api_url {
        config = config.with_api_url(url)?;
    }

    match args.command {
        Command::Run(run) => run_pipeline(config, run).await,
        Command::Cancel { job_id } => {
            use orchestrator_client::OrchestratorApi;
            let api = orchestrator_client::HttpOrchestratorApi::new(&config)?;
            api.cancel_job(&job_id).await?;
            println!("Cancel requested for job {}", job_id);
            Ok(())
        }
    }
}

async fn run_pipeline(mut config: ClientConfig, run: RunArgs) -> anyhow::Result<()> {
    config.flags.scrape_enabled = !run.no_scrape;
    config.flags.extract_enabled = !run.no_extract;
    config.flags.retrain_models = run.retrain;
    config.flags.generate_pdf = !run.no_pdf;
    config.auto_download = !run.no_download;
    if let Some(dir) = run.download_dir {
        config.download_dir = dir;
    }

    let orchestrator = Orchestrator::from_config(config)?;
    let mut updates = orchestrator.subscribe();

    let job_id = match &run.pdf {
        Some(path) => orchestrator.start_from_pdf(path).await,
        None => orchestrator.start_from_stored().await,
    }
    .context("failed to start the pipeline")?;
    println!("Started job {}", job_id);

    let mut last = orchestrator.view();
    print_progress(&last);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                orchestrator.cancel();
                anyhow::bail!("run cancelled");
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let view = updates.borrow_and_update().clone();
        if view.steps != last.steps {
            print_progress(&view);
        }
        last = view;
        if !last.is_processing {
            break;
        }
    }

    if let Some(error) = &last.last_error {
        // Nothing more will arrive for a failed run; stop the poller.
        orchestrator.cancel();
        anyhow::bail!("pipeline failed: {}", error);
    }

    if last.is_complete {
        let settled = orchestrator.wait_for_download().await;
        match (&settled.report_path, &settled.report_url) {
            (Some(path), _) => println!("Report saved to {}", path.display()),
            (None, Some(url)) if run.no_download => println!("Report available at {}", url),
            (None, Some(url)) => eprintln!("Report available at {} but could not be downloaded", url),
            (None, None) => println!("Pipeline completed without a report"),
        }
    }

    Ok(())
}

fn print_progress(view: &OrchestratorView) {
    for step in &view.steps {
        let marker = match step.status {
            StepStatus::Pending => " ",
            StepStatus::InProgress => ">",
            StepStatus::Completed => "x",
            StepStatus::Error => "!",
        };
        println!("[{}] {}. {} ({})", marker, step.id, step.name, step.status);
    }
    println!();
}
