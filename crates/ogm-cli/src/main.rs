//! CLI entry point for the object-graph mapper.
//!
//! Reads an entity document (JSON) from a file or stdin, writes JSON results
//! to stdout. Logs go to stderr.

mod document;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use ogm_core::events::SaveEvent;
use ogm_core::{EntityGraph, OgmConfig, OperationBatch};
use ogm_graph::{GraphClient, GraphConfig, Neo4jPersister};
use ogm_persist::{EntityPersister, SaveReport};

use crate::document::SaveDocument;

#[derive(Parser)]
#[command(name = "ogm")]
#[command(about = "Cycle-safe persistence of entity graphs into Neo4j")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Entity document to read (default: stdin).
    #[arg(short, long, global = true)]
    input: Option<PathBuf>,

    /// Config file prefix (default: ogm).
    #[arg(short, long, default_value = "ogm", global = true)]
    config: String,
}

#[derive(Subcommand)]
enum Command {
    /// Print the operation batches a save would run, without connecting.
    Plan,
    /// Save the document's roots to Neo4j in one transaction.
    Save,
}

#[derive(Serialize)]
struct PlanOutput<'a> {
    nodes: usize,
    relationships: usize,
    clears: usize,
    batches: &'a [OperationBatch],
}

#[derive(Serialize)]
struct SaveOutput<'a> {
    report: &'a SaveReport,
    entities: &'a EntityGraph,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = OgmConfig::load(&cli.config)?;

    let input = match &cli.input {
        Some(path) => std::fs::read_to_string(path)?,
        None => std::io::read_to_string(std::io::stdin())?,
    };
    let doc = SaveDocument::from_json(&input)?;
    let schema = doc.registry()?;

    match cli.command {
        Command::Plan => {
            let plan = ogm_persist::plan_all(&schema, &doc.entities, &doc.roots, &config.persist)?;
            let output = PlanOutput {
                nodes: plan.graph.nodes().len(),
                relationships: plan.graph.relationships().len(),
                clears: plan.graph.clears().len(),
                batches: &plan.batches,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Save => {
            let client = GraphClient::connect(&GraphConfig::from(&config.neo4j)).await?;
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<SaveEvent>();
            let events = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    tracing::info!(save_id = %event.save_id, payload = ?event.payload, "Save event");
                }
            });

            let engine = EntityPersister::new(Neo4jPersister::new(client), Arc::new(schema))
                .with_settings(config.persist.clone())
                .with_event_sink(tx);
            let saved = engine.save_all(&doc.entities, &doc.roots).await;
            drop(engine);
            let _ = events.await;

            let saved = saved?;
            let output = SaveOutput {
                report: &saved.report,
                entities: &saved.graph,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
