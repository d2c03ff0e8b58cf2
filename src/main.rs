mod config;
mod error;
mod models;
mod output;
mod roster;
mod session;
mod tasks;
mod tools;

use anyhow::{Context as _, Result};
use chrono::Utc;
use config::Config;
use models::SessionBrief;
use output::{new_session_id, OutputLayout};
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::Arc;
use tasks::AgencyServices;
use tools::llm::OpenAiChat;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_BRAND: &str = "YourBrand";

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv = dotenvy::dotenv();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agentcy=info,graph_flow=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Ok(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            eprintln!("Configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let brand = prompt_line(&format!("Enter brand name (default: {DEFAULT_BRAND}): "))?;
    let brand = if brand.is_empty() {
        DEFAULT_BRAND.to_string()
    } else {
        brand
    };
    let objective = prompt_line("Enter your goal or problem statement: ")?;
    if objective.is_empty() {
        anyhow::bail!("a goal or problem statement is required");
    }

    let session_id = new_session_id(Utc::now());
    let output = OutputLayout::new(&config.output_dir);
    let http = tools::http_client(&config)?;

    if !config.visual_enabled() {
        warn!("REPLICATE_API_TOKEN not set, the session will run without image generation");
    }
    let visual = tools::visual_tool(&config, &http, &output, &session_id).map(Arc::new);
    let services = Arc::new(AgencyServices {
        chat: Arc::new(OpenAiChat::for_agents(&config)),
        research: Arc::new(tools::research_tool(&config, &http, &output)),
        visual,
        output: output.clone(),
    });

    let outcome = session::run_session(
        services,
        SessionBrief {
            session_id,
            brand,
            objective,
        },
    )
    .await?;

    println!("\nSession {} finished in {} ms", outcome.session_id, outcome.total_time_ms);
    println!("Output:           {}", output.root().display());
    println!("Research reports: {}", output.research_dir().display());
    println!("Deliverables:     {}", output.content_dir().display());
    println!("Images:           {}", output.images_dir().display());
    println!("Transcript:       {}", outcome.transcript_path.display());

    let issues: Vec<_> = outcome.context.failures().collect();
    if !issues.is_empty() {
        println!("\nIncomplete work:");
        for entry in issues {
            println!("- {}: {}", entry.speaker, entry.content);
        }
    }
    Ok(())
}

fn prompt_line(prompt: &str) -> Result<String> {
    let mut stdout = io::stdout();
    stdout.write_all(prompt.as_bytes())?;
    stdout.flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    Ok(line.trim().to_string())
}
