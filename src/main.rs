// BioMCP Client - Main Entry Point
//
// Command-line front end for the BioMCP tool server client:
// - Raw tool calls
// - Biomedical searches (literature, trials, variants, drug interactions)
// - Connection status
//
// BIOMCP_URL (or [biomcp].url in the config file) is required.

use anyhow::{Context, Result};
use biomcp_client::biomedical::{BiomedicalQuery, BiomedicalSearch, QueryParameters, QueryType};
use biomcp_client::config::Config;
use biomcp_client::logging;
use biomcp_client::mcp::{BioMcpClient, ResponseEnvelope};
use biomcp_client::metrics;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// BioMCP: client for the biomedical tool server
#[derive(Parser, Debug)]
#[command(name = "biomcp")]
#[command(author = "BioMCP Chat Contributors")]
#[command(version)]
#[command(about = "Query the BioMCP biomedical tool server", long_about = None)]
struct Args {
    /// Path to the config file (default: ~/.config/biomcp/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print Prometheus metrics before exiting
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Call a tool with raw JSON arguments and print the response envelope
    Call {
        /// Tool name (e.g. search, think)
        tool: String,

        /// JSON object passed as the tool arguments
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Run a biomedical search
    Search {
        /// literature, trials, variants, drug, or auto to detect from the text
        kind: String,

        /// Question or search text
        text: String,

        /// Gene symbol (repeatable; extracted from the text when omitted)
        #[arg(long = "gene")]
        genes: Vec<String>,

        /// Disease name (repeatable)
        #[arg(long = "disease")]
        diseases: Vec<String>,

        /// Variant identifier (repeatable)
        #[arg(long = "variant")]
        variants: Vec<String>,

        /// Results per page (1-100)
        #[arg(long, default_value_t = 10)]
        page_size: u32,
    },
    /// Connect, complete the handshake and report the session
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    logging::init_tracing(&config.logging, args.verbose)?;
    if args.metrics {
        metrics::init().context("Failed to register metrics")?;
    }

    let settings = config.client_settings()?;
    info!("BioMCP client v{} starting...", env!("CARGO_PKG_VERSION"));
    let client = BioMcpClient::connect(settings)?;

    let outcome = match args.command {
        Commands::Call { tool, args } => call_tool(&client, &tool, &args).await,
        Commands::Search {
            kind,
            text,
            genes,
            diseases,
            variants,
            page_size,
        } => {
            let request = SearchRequest {
                kind,
                text,
                genes,
                diseases,
                variants,
                page_size,
            };
            search(&client, request).await
        }
        Commands::Status => status(&client).await,
    };

    client.shutdown().await;

    if args.metrics {
        print!("{}", metrics::gather());
    }

    outcome
}

/// Call a tool and print the envelope
async fn call_tool(client: &BioMcpClient, tool: &str, raw_args: &str) -> Result<()> {
    let params: Value =
        serde_json::from_str(raw_args).context("--args must be a JSON object")?;
    if !params.is_object() {
        anyhow::bail!("--args must be a JSON object, got: {}", raw_args);
    }

    info!("Calling tool {}", tool);
    let envelope = client.call(tool, params).await;
    print_envelope(&envelope)?;

    if !envelope.success {
        anyhow::bail!("Tool call {} failed", tool);
    }
    Ok(())
}

struct SearchRequest {
    kind: String,
    text: String,
    genes: Vec<String>,
    diseases: Vec<String>,
    variants: Vec<String>,
    page_size: u32,
}

/// Run a domain search and print each result item
async fn search(client: &BioMcpClient, request: SearchRequest) -> Result<()> {
    let query_type = if request.kind.eq_ignore_ascii_case("auto") {
        QueryType::detect(&request.text)
    } else {
        QueryType::from_label(&request.kind)
    };
    if query_type == QueryType::GeneralBiomedical {
        warn!(
            "'{}' is not a searchable kind; use literature, trials, variants, drug or auto",
            request.kind
        );
    }

    let mut parameters = QueryParameters::from_text(&request.text, &request.kind, request.page_size);
    if !request.genes.is_empty() {
        parameters.genes = request.genes;
    }
    if !request.diseases.is_empty() {
        parameters.diseases = request.diseases;
    }
    if !request.variants.is_empty() {
        parameters.variants = request.variants;
    }

    let query = BiomedicalQuery::new(&request.text, query_type, parameters)?;
    info!("Running {} search: {}", query_type.as_str(), query.text());

    let search = BiomedicalSearch::new(Arc::new(client.clone()));
    let results = search.search(&query).await;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for item in &results {
        match item.get("text").and_then(Value::as_str) {
            Some(text) => println!("{}", text),
            None => println!("{}", serde_json::to_string_pretty(item)?),
        }
    }
    info!("{} results", results.len());
    Ok(())
}

/// Wait for the session and print the connection state
async fn status(client: &BioMcpClient) -> Result<()> {
    match client.wait_until_ready().await {
        Ok(session) => {
            println!("state:    {}", client.state().name());
            println!("session:  {}", session.session_id);
            println!("endpoint: {}", session.callback_endpoint);
            println!("stream generation: {}", client.status().generation);
            Ok(())
        }
        Err(e) => {
            error!("Tool server not ready: {}", e);
            println!("state: {}", client.state().name());
            Err(e.into())
        }
    }
}

fn print_envelope(envelope: &ResponseEnvelope) -> Result<()> {
    let json = serde_json::to_string_pretty(envelope).context("Failed to render response")?;
    println!("{}", json);
    Ok(())
}
