use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Context};
use clap::Parser;
use futures::StreamExt;
use leadcrawler::{
    browser_controller::{BrowserOptions, ChromeLauncher},
    crawler::DEFAULT_NOTE,
    runner::{Runner, RunnerOptions},
    types::{SessionStatus, StartRequest},
    utils::DB_DIR,
};
use log::debug;
use signal_hook::consts::{SIGINT, SIGTERM};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Sales Navigator lead crawler CLI", long_about = None)]
struct Args {
    /// Saved search to crawl
    search_url: String,
    /// Note sent with every invitation, [lead_name] is replaced by the lead's name
    #[arg(short = 'n', long, default_value = DEFAULT_NOTE)]
    note: String,
    /// Template name, enables the daily per-template store
    #[arg(short = 't', long)]
    template: Option<String>,
    /// Maximum number of successful connection requests
    #[arg(short = 'l', long)]
    limit: Option<usize>,
    #[arg(long, env = "LINKEDIN_EMAIL", default_value = "")]
    email: String,
    #[arg(long, env = "LINKEDIN_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,
    /// Directory the lead files are written to
    #[arg(short = 'd', long)]
    db_dir: Option<PathBuf>,
    /// Show the browser window
    #[arg(long)]
    headed: bool,
    /// Maximum time the browser will wait for an event before timing out
    #[arg(long, default_value_t = 120)]
    browser_timeout: u64,
    /// Print progress as server-sent-event frames instead of plain lines
    #[arg(long)]
    sse: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    if let Ok(env) = std::env::var("RUST_LOG") {
        if env == "debug" {
            println!("{number:/>width$}", number = "", width = 20);
            println!("Debug mode enabled");
            println!("{number:/>width$}", number = "", width = 20);
            println!();
        }
    }

    debug!(
        "Starting crawler for {} with template {:?} and limit {:?}",
        args.search_url, args.template, args.limit
    );

    let browser_options = BrowserOptions::default_builder()
        .headless(!args.headed)
        .browser_timeout(Duration::from_secs(args.browser_timeout))
        .build()?;
    let runner_options = RunnerOptions::default_builder()
        .store_dir(args.db_dir.clone().unwrap_or_else(|| DB_DIR.clone()))
        .build()?;
    let runner = Arc::new(Runner::new(
        runner_options,
        Arc::new(ChromeLauncher::new(browser_options)),
    ));

    let should_terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, Arc::clone(&should_terminate))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&should_terminate))?;

    let id = runner
        .start_session(StartRequest {
            email: args.email.clone(),
            password: args.password.clone(),
            connect_note: args.note.clone(),
            template_name: args.template.clone(),
            search_url: args.search_url.clone(),
            lead_limit: args.limit,
        })
        .context("could not start crawl session")?;

    let watcher = {
        let runner = runner.clone();
        tokio::spawn(async move {
            loop {
                if should_terminate.load(Ordering::Relaxed) {
                    let stopped = runner.stop_session();
                    debug!("termination signal received, {} sessions stopped", stopped);
                    break;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        })
    };

    if args.sse {
        let mut frames = runner
            .stream_progress(&id)
            .ok_or_else(|| anyhow!("no progress stream for session {}", id))?;
        while let Some(frame) = frames.next().await {
            print!("{}", frame);
        }
    } else {
        let mut events = runner
            .take_events(&id)
            .ok_or_else(|| anyhow!("no progress stream for session {}", id))?;
        while let Some(event) = events.recv().await {
            println!("{} [{:?}] {}", event.timestamp, event.status, event.message);
        }
    }

    let outcome = runner.wait(&id).await?;
    watcher.abort();

    println!(
        "session {} finished as {:?} with {} leads",
        outcome.id,
        outcome.status,
        outcome.leads.len()
    );
    if outcome.status == SessionStatus::Error {
        return Err(anyhow!("session {} ended with an error", outcome.id));
    }

    Ok(())
}
