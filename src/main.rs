// Copyright 2026 Deedhound Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use deedhound::extract::{self, JurisdictionRules};
use deedhound::renderer::chromium::{find_chromium, ChromiumRenderer};
use deedhound::renderer::Renderer;

#[derive(Parser)]
#[command(
    name = "deedhound",
    about = "Deedhound — recorded-deed retrieval pipeline",
    version,
    after_help = "Run 'deedhound <command> --help' for details on each command."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the environment and diagnose issues
    Doctor,
    /// Open a URL and report the recording references found on it.
    /// A development aid for writing site adapters.
    Inspect {
        /// Page to scan (assessor record, recorder search results)
        url: String,
        /// Exclude document types (repeatable, substring match)
        #[arg(long = "exclude")]
        exclude: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "deedhound=debug" } else { "deedhound=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Doctor => doctor(cli.json).await,
        Commands::Inspect { url, exclude } => inspect(&url, &exclude, cli.json).await,
    };

    if let Err(e) = &result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    result
}

async fn doctor(json: bool) -> Result<()> {
    let chromium = find_chromium();
    let launchable = match &chromium {
        Some(_) => ChromiumRenderer::new().await.is_ok(),
        None => false,
    };

    if json {
        println!(
            "{}",
            serde_json::json!({
                "chromiumPath": chromium.as_ref().map(|p| p.display().to_string()),
                "launchable": launchable,
            })
        );
    } else {
        match &chromium {
            Some(path) => println!("Chromium: {}", path.display()),
            None => println!(
                "Chromium: not found (set DEEDHOUND_CHROMIUM_PATH or install google-chrome)"
            ),
        }
        println!("Launchable: {}", if launchable { "yes" } else { "no" });
    }

    if chromium.is_none() || !launchable {
        anyhow::bail!("environment is not ready");
    }
    Ok(())
}

async fn inspect(url: &str, exclude: &[String], json: bool) -> Result<()> {
    let url = url::Url::parse(url).with_context(|| format!("invalid URL: {url}"))?;
    let excludes: Vec<&str> = exclude.iter().map(String::as_str).collect();
    let rules = JurisdictionRules::default_rules_excluding(&excludes);

    let renderer = ChromiumRenderer::new().await?;
    let mut ctx = renderer.new_context().await?;
    ctx.navigate(url.as_str(), 30_000).await?;
    let html = ctx.get_html().await?;
    ctx.close().await?;
    renderer.shutdown().await?;

    let rows = extract::scan_tables(&html);
    let document = scraper::Html::parse_document(&html);
    let text = document.root_element().text().collect::<Vec<_>>().join(" ");
    let references = extract::extract(&text, &rows, &rules);

    if json {
        let out: Vec<serde_json::Value> = references
            .iter()
            .map(|r| {
                serde_json::json!({
                    "reference": r.reference,
                    "date": r.date.map(|d| d.to_string()),
                    "docType": r.doc_type,
                })
            })
            .collect();
        println!("{}", serde_json::Value::Array(out));
    } else if references.is_empty() {
        println!("No recording references found ({} table rows scanned).", rows.len());
    } else {
        for r in &references {
            let date = r
                .date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "no date".to_string());
            let doc_type = r.doc_type.as_deref().unwrap_or("unknown type");
            println!("{}  [{date}]  {doc_type}", r.reference);
        }
    }

    Ok(())
}
