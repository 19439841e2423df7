//! Command-line interface for the dynamic mapper.
//!
//! Runs mappings offline against the in-memory platform, which is what the
//! "test mapping" view of an editor needs: the composed request chain.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};

use dynmapper_core::config::{env_bool, env_vars};
use dynmapper_core::{MapperConfig, Mapping};
use dynmapper_engine::{InMemoryPlatform, MappingProcessor};

/// Dynamic mapper - turn device payloads into platform objects.
#[derive(Parser, Debug)]
#[command(name = "dynmapper")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate a mapping against one payload and print the request chain.
    Test {
        /// Mapping file (one mapping or an array of mappings).
        #[arg(short, long)]
        mapping: PathBuf,
        /// Mapping id, required when the file holds several mappings.
        #[arg(long)]
        id: Option<String>,
        /// Raw payload file.
        #[arg(short, long)]
        payload: PathBuf,
        /// Topic the payload arrived on.
        #[arg(short, long, default_value = "")]
        topic: String,
        /// Message key.
        #[arg(short, long)]
        key: Option<String>,
        /// Dispatch to the in-memory platform instead of a dry run.
        #[arg(long)]
        send: bool,
        /// Known identities: JSON array of {externalIdType, externalId, internalId}.
        #[arg(long)]
        identities: Option<PathBuf>,
        /// Time budget for platform calls.
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
    /// Check mapping definitions without evaluating them.
    Validate {
        /// Mapping file (one mapping or an array of mappings).
        #[arg(short, long)]
        mapping: PathBuf,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MappingFile {
    One(Box<Mapping>),
    Many(Vec<Mapping>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentitySeed {
    external_id_type: String,
    external_id: String,
    internal_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Test {
            mapping,
            id,
            payload,
            topic,
            key,
            send,
            identities,
            timeout_secs,
        } => {
            let config = MapperConfig::load(args.config.as_deref())?;
            let config = if send { config.with_send_payload(true) } else { config };
            run_test(TestRun {
                config,
                mapping: &mapping,
                id: id.as_deref(),
                payload: &payload,
                topic: &topic,
                key: key.as_deref(),
                identities: identities.as_deref(),
                timeout: Duration::from_secs(timeout_secs),
            })
            .await
        }
        Command::Validate { mapping } => run_validate(&mapping),
    }
}

fn init_logging(verbose: bool) {
    let json_logging = env_bool(env_vars::LOG_JSON).unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        tracing_subscriber::EnvFilter::new(format!("dynmapper={level}"))
            .add_directive(tracing::Level::WARN.into())
    });

    // stdout carries the result document
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

struct TestRun<'a> {
    config: MapperConfig,
    mapping: &'a Path,
    id: Option<&'a str>,
    payload: &'a Path,
    topic: &'a str,
    key: Option<&'a str>,
    identities: Option<&'a Path>,
    timeout: Duration,
}

async fn run_test(run: TestRun<'_>) -> Result<()> {
    let mapping = select_mapping(load_mappings(run.mapping)?, run.id)?;
    let raw = std::fs::read(run.payload)
        .with_context(|| format!("Failed to read payload {}", run.payload.display()))?;

    let platform = Arc::new(InMemoryPlatform::new());
    if let Some(path) = run.identities {
        for seed in load_identities(path)? {
            platform.register_identity(&seed.external_id_type, &seed.external_id, &seed.internal_id);
        }
    }

    let processor = MappingProcessor::new(run.config, platform.clone(), platform.clone())
        .with_deadline(run.timeout);
    let result = processor
        .evaluate(&mapping, &raw, run.topic, run.key)
        .await
        .with_context(|| format!("Mapping '{}' failed", mapping.id))?;

    let summary = result.summary();
    info!(mapping = %mapping.id, fan_out = result.fan_out, summary = %summary, "Mapping evaluated");
    for error in &result.errors {
        warn!(mapping = %mapping.id, error = %error, "Evaluation reported an error");
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn run_validate(path: &Path) -> Result<()> {
    let mappings = load_mappings(path)?;
    let mut invalid = 0;
    for mapping in &mappings {
        match mapping.validate() {
            Ok(()) => println!("ok      {}", mapping.id),
            Err(e) => {
                invalid += 1;
                println!("invalid {}: {}", mapping.id, e);
            }
        }
    }
    if invalid > 0 {
        bail!("{} of {} mappings are invalid", invalid, mappings.len());
    }
    Ok(())
}

fn load_mappings(path: &Path) -> Result<Vec<Mapping>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read mapping file {}", path.display()))?;
    let file: MappingFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse mapping file {}", path.display()))?;
    Ok(match file {
        MappingFile::One(mapping) => vec![*mapping],
        MappingFile::Many(mappings) => mappings,
    })
}

fn select_mapping(mappings: Vec<Mapping>, id: Option<&str>) -> Result<Mapping> {
    match id {
        Some(id) => mappings
            .into_iter()
            .find(|m| m.id == id)
            .with_context(|| format!("No mapping with id '{}'", id)),
        None => {
            let count = mappings.len();
            let mut iter = mappings.into_iter();
            match (iter.next(), count) {
                (Some(mapping), 1) => Ok(mapping),
                (None, _) => bail!("Mapping file is empty"),
                _ => bail!("Mapping file holds {} mappings, select one with --id", count),
            }
        }
    }
}

fn load_identities(path: &Path) -> Result<Vec<IdentitySeed>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read identities {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse identities {}", path.display()))
}
