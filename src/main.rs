//! Command-line front end: import CACTUS cases, synthesize session arcs,
//! inspect stored history and logs, and extract CCDs.

#![deny(unsafe_code)]

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cbtsynth_core::case::CaseProfile;
use cbtsynth_core::ids::CaseId;
use cbtsynth_core::intake::{case_file_stem, RawCactusRecord};
use cbtsynth_core::provider::LlmProvider;
use cbtsynth_engine::batch::synthesize_cases;
use cbtsynth_engine::ccd::CcdExtractor;
use cbtsynth_engine::orchestrator::Orchestrator;
use cbtsynth_engine::transcript::TranscriptBundle;
use cbtsynth_llm::{OpenAiProvider, ReliableConfig, ReliableProvider};
use cbtsynth_settings::{load_settings, load_settings_from_path, SynthSettings};
use cbtsynth_store::CaseStore;
use cbtsynth_telemetry::{init_telemetry, LogQuery, MetricsQuery, TelemetryConfig};

#[derive(Debug, Parser)]
#[command(name = "cbtsynth", about = "Constrained synthesis of multi-session CBT transcripts")]
struct Cli {
    /// Settings file (defaults to ~/.cbtsynth/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Case database (overrides `storage.databasePath`).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert a raw CACTUS JSONL file into one case file per line.
    Import {
        #[arg(long, default_value = "data/raw_cactus.jsonl")]
        input: PathBuf,
        #[arg(long, default_value = "data/cases")]
        output_dir: PathBuf,
        #[arg(long, default_value_t = 1)]
        start_index: usize,
        #[arg(long, default_value_t = 5)]
        zero_pad: usize,
    },

    /// Register case files (paths or glob patterns) and seed their intake records.
    Register { cases: Vec<String> },

    /// Synthesize sessions for one case and write its transcript bundle.
    Generate {
        /// Case file, or the id of an already registered case.
        case: String,
        /// Stop after this many sessions; the whole arc when omitted.
        #[arg(long)]
        sessions: Option<usize>,
        #[arg(long, default_value = "data/sessions")]
        output_dir: PathBuf,
    },

    /// Synthesize several cases concurrently.
    Batch {
        /// Glob pattern for case files, e.g. `data/cases/*.json`.
        pattern: String,
        #[arg(long)]
        sessions: Option<usize>,
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long, default_value = "data/sessions")]
        output_dir: PathBuf,
    },

    /// List cases, or print one case's committed sessions.
    History {
        case: Option<String>,
        /// Print the full records as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show persisted warnings, or metric snapshots with `--metrics`.
    Logs {
        /// Only entries for this case.
        case: Option<String>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        level: Option<String>,
        /// RFC 3339 timestamp lower bound.
        #[arg(long)]
        since: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value_t = false)]
        metrics: bool,
        /// Metric name filter, with `--metrics`.
        #[arg(long)]
        name: Option<String>,
    },

    /// Extract a CCD per session from a transcript bundle.
    Ccd {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        model: Option<String>,
        /// Use all client utterances up to each session.
        #[arg(long, default_value_t = false)]
        cumulative: bool,
        /// Add the intake's client utterances as baseline evidence.
        #[arg(long, default_value_t = false)]
        include_intake: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => load_settings().context("failed to load settings")?,
    };
    settings.validate().context("invalid settings")?;
    let telemetry = init_telemetry(&TelemetryConfig::from_settings(&settings.logging));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| PathBuf::from(&settings.storage.database_path));

    match cli.command {
        Command::Import {
            input,
            output_dir,
            start_index,
            zero_pad,
        } => import(&input, &output_dir, start_index, zero_pad),
        Command::Register { cases } => {
            let store = open_store(&db_path)?;
            for path in expand_patterns(&cases)? {
                let profile = load_case(&path)?;
                if store.has_case(&profile.id)? {
                    println!("{} already registered", profile.id);
                    continue;
                }
                store.register_case(&profile)?;
                println!("{} registered", profile.id);
            }
            Ok(())
        }
        Command::Generate {
            case,
            sessions,
            output_dir,
        } => {
            let store = Arc::new(open_store(&db_path)?);
            let case_id = resolve_case(&store, &case)?;
            let orchestrator = build_orchestrator(store.clone(), &settings, &telemetry)?;

            let records = orchestrator.synthesize_sessions(&case_id, sessions, &cancel).await?;
            println!("{case_id}: {} session(s) committed", records.len());
            write_bundle(&store, &case_id, &settings, &output_dir)?;
            Ok(())
        }
        Command::Batch {
            pattern,
            sessions,
            concurrency,
            output_dir,
        } => {
            let store = Arc::new(open_store(&db_path)?);
            let mut case_ids = Vec::new();
            for path in expand_patterns(std::slice::from_ref(&pattern))? {
                case_ids.push(resolve_case(&store, &path.display().to_string())?);
            }
            let orchestrator = build_orchestrator(store.clone(), &settings, &telemetry)?;
            let limit = concurrency.unwrap_or(settings.batch.max_concurrent_cases);

            let outcomes = synthesize_cases(&orchestrator, &case_ids, sessions, limit, &cancel).await;
            let mut failed = 0;
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(records) => println!("{}: {} session(s) committed", outcome.case_id, records.len()),
                    Err(e) => {
                        failed += 1;
                        println!("{}: failed: {e}", outcome.case_id);
                    }
                }
                write_bundle(&store, &outcome.case_id, &settings, &output_dir)?;
            }
            if failed > 0 {
                anyhow::bail!("{failed} of {} case(s) failed", outcomes.len());
            }
            Ok(())
        }
        Command::History { case, json } => {
            let store = open_store(&db_path)?;
            match case {
                None => {
                    for summary in store.list_cases()? {
                        println!(
                            "{}\t{}\t{} session(s)\t{}",
                            summary.id, summary.client_name, summary.sessions, summary.created_at
                        );
                    }
                }
                Some(id) => {
                    let history = store.get_history(&CaseId::from_raw(id))?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&history)?);
                    } else {
                        for record in &history {
                            println!(
                                "{}\t{}\t{}\t{} turn(s)",
                                record.session_id,
                                record.stage,
                                record.artifact.kind,
                                record.dialogue.len()
                            );
                        }
                    }
                }
            }
            Ok(())
        }
        Command::Logs {
            case,
            session,
            level,
            since,
            limit,
            metrics,
            name,
        } => {
            if metrics {
                let recorder = telemetry
                    .metrics()
                    .context("metrics are disabled (logging.metricsEnabled)")?;
                let query = MetricsQuery {
                    name,
                    since,
                    limit: Some(limit),
                };
                for snap in recorder.query(&query)? {
                    println!(
                        "{}\t{}\t{}\t{}\t{}",
                        snap.timestamp,
                        snap.metric_type.as_str(),
                        snap.name,
                        snap.labels.as_deref().unwrap_or("-"),
                        snap.value
                    );
                }
                return Ok(());
            }

            let sink = telemetry
                .logs()
                .context("log persistence is disabled (logging.persistWarnings)")?;
            let query = LogQuery {
                level,
                target: None,
                case_id: case,
                session_id: session,
                since,
                limit: Some(limit),
            };
            for record in sink.query(&query)? {
                println!(
                    "{}\t{}\t{}/{}\t{}\t{}",
                    record.timestamp,
                    record.level,
                    record.case_id.as_deref().unwrap_or("-"),
                    record.session_id.as_deref().unwrap_or("-"),
                    record.target,
                    record.message
                );
            }
            Ok(())
        }
        Command::Ccd {
            input,
            output,
            model,
            cumulative,
            include_intake,
        } => {
            let bundle = TranscriptBundle::load(&input)
                .with_context(|| format!("failed to read bundle {}", input.display()))?;
            let model = model.or_else(|| settings.ccd.model.clone());
            let provider = build_provider(&settings, model.as_deref())?;
            let timeout = std::time::Duration::from_millis(settings.generation.timeout_ms);
            let extractor = CcdExtractor::new(provider, &settings.ccd, timeout);

            let report = extractor
                .extract_sessions(
                    &bundle,
                    cumulative || settings.ccd.cumulative,
                    include_intake || settings.ccd.include_intake,
                    &cancel,
                )
                .await?;
            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&output, serde_json::to_string_pretty(&report)?)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("{} ({} of {} session(s) failed)", output.display(), report.failed(), report.sessions.len());
            Ok(())
        }
    }
}

fn import(input: &Path, output_dir: &Path, start_index: usize, zero_pad: usize) -> Result<()> {
    let file = std::fs::File::open(input).with_context(|| format!("failed to open {}", input.display()))?;
    std::fs::create_dir_all(output_dir)?;

    let mut index = start_index;
    for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawCactusRecord = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid record", input.display(), line_no + 1))?;
        let stem = case_file_stem(index, zero_pad);
        let profile = raw.into_case(CaseId::from_raw(stem.clone()));
        let path = output_dir.join(format!("{stem}.json"));
        std::fs::write(&path, serde_json::to_string_pretty(&profile)?)?;
        index += 1;
    }
    info!(cases = index - start_index, dir = %output_dir.display(), "import finished");
    println!("{} case(s) written to {}", index - start_index, output_dir.display());
    Ok(())
}

fn open_store(path: &Path) -> Result<CaseStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    CaseStore::open(path).with_context(|| format!("failed to open case database {}", path.display()))
}

fn load_case(path: &Path) -> Result<CaseProfile> {
    Ok(CaseProfile::load(path)?)
}

/// A case file is registered on first use; anything else must be a known id.
fn resolve_case(store: &CaseStore, case: &str) -> Result<CaseId> {
    let path = Path::new(case);
    if path.is_file() {
        let profile = load_case(path)?;
        if !store.has_case(&profile.id)? {
            store.register_case(&profile)?;
            info!(case_id = %profile.id, "case registered");
        }
        return Ok(profile.id);
    }
    let id = CaseId::from_raw(case);
    if !store.has_case(&id)? {
        anyhow::bail!("{case} is neither a case file nor a registered case");
    }
    Ok(id)
}

fn expand_patterns(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let matches: Vec<PathBuf> = glob::glob(pattern)
            .with_context(|| format!("invalid pattern {pattern}"))?
            .filter_map(|entry| entry.ok())
            .collect();
        if matches.is_empty() {
            anyhow::bail!("no case files match {pattern}");
        }
        paths.extend(matches);
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}

fn build_provider(settings: &SynthSettings, model: Option<&str>) -> Result<Arc<dyn LlmProvider>> {
    let mut provider = OpenAiProvider::from_settings(&settings.generation).context("failed to create generator")?;
    if let Some(model) = model {
        provider = provider.with_model(model);
    }
    Ok(Arc::new(ReliableProvider::new(
        provider,
        ReliableConfig::from_settings(&settings.retry),
    )))
}

fn build_orchestrator(
    store: Arc<CaseStore>,
    settings: &SynthSettings,
    telemetry: &cbtsynth_telemetry::TelemetryGuard,
) -> Result<Orchestrator> {
    let provider = build_provider(settings, None)?;
    let mut orchestrator = Orchestrator::new(store, provider, settings)?;
    if let Some(metrics) = telemetry.metrics() {
        orchestrator = orchestrator.with_metrics(metrics);
    }
    Ok(orchestrator)
}

fn write_bundle(store: &CaseStore, case_id: &CaseId, settings: &SynthSettings, output_dir: &Path) -> Result<()> {
    let history = store.get_history(case_id)?;
    let bundle = TranscriptBundle::from_history(case_id.clone(), &history, settings.prompt.system_prompt_path.clone());
    let path = output_dir.join(format!("{case_id}.json"));
    bundle
        .write(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(case_id = %case_id, path = %path.display(), sessions = bundle.sessions.len(), "bundle written");
    Ok(())
}
