//! Batch explanations: one short generation call per highlight.
//!
//! Each qualifying highlight gets its own explanation, keyed by the
//! highlight's `(group, sequence)` position. Runs are incremental:
//!
//! - an existing successful explanation for the same text is reused;
//! - explanations for highlights that left the input are dropped;
//! - failed explanations are retried only with `--rerun-failed`;
//! - a highlight whose text changed is explained again.
//!
//! Calls go through the same [`Driver`] as outline chunks, with
//! `batch.concurrency` as the limit.

use anyhow::{bail, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::driver::{Driver, DriverOptions, Job};
use crate::generation::{create_generator, Generator};
use crate::input::{load_input, InputDocument};
use crate::models::{ExplanationRecord, InputItem, RecordStatus};
use crate::progress::{ProgressEvent, ProgressMode, ProgressReporter};
use crate::prompt::{explain_prompt, PromptTemplate, DEFAULT_EXPLAIN_TEMPLATE};
use crate::sanitize;
use crate::store::{self, ExplanationStore};

#[derive(Debug, Clone, Copy, Default)]
pub struct ExplainOptions {
    pub dry_run: bool,
    pub rerun_failed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExplainReport {
    pub highlights: usize,
    pub reused: usize,
    pub pending: usize,
    pub dropped: usize,
    pub generated: usize,
    pub failed: usize,
}

/// `marg explain`: explain every highlight in the input file.
pub async fn run_explain(
    config: &Config,
    input_path: &Path,
    options: ExplainOptions,
    mode: ProgressMode,
) -> Result<()> {
    let doc = load_input(input_path)?;
    let generator = create_generator(&config.generation)?;
    let reporter = mode.reporter();

    let report = run_explain_with(config, generator, doc, options, reporter.as_ref()).await?;

    if options.dry_run {
        println!("explain (dry-run)");
    } else {
        println!("explain");
    }
    println!("  highlights: {}", report.highlights);
    println!("  reused: {}", report.reused);
    println!("  to generate: {}", report.pending);
    println!("  dropped: {}", report.dropped);
    if options.dry_run {
        return Ok(());
    }
    println!("  generated: {}", report.generated);
    println!("  failed: {}", report.failed);
    println!("ok");
    Ok(())
}

pub async fn run_explain_with(
    config: &Config,
    generator: Arc<dyn Generator>,
    doc: InputDocument,
    options: ExplainOptions,
    reporter: &dyn ProgressReporter,
) -> Result<ExplainReport> {
    let path = config.store.explanations_path();
    let mut existing = store::load_explanations(&path).await?;
    let now = Utc::now();

    let qualifying: Vec<&InputItem> = doc.items.iter().filter(|i| i.is_qualifying()).collect();

    let mut next = ExplanationStore::new();
    let mut pending: Vec<(&InputItem, chrono::DateTime<Utc>)> = Vec::new();
    let mut report = ExplainReport {
        highlights: qualifying.len(),
        ..Default::default()
    };

    for &item in &qualifying {
        let key = item.key().to_string();
        match existing.remove(&key) {
            Some(mut record) if is_reusable(&record, item, options) => {
                record.updated_at = now;
                next.insert(key, record);
                report.reused += 1;
            }
            Some(record) => pending.push((item, record.created_at)),
            None => pending.push((item, now)),
        }
    }
    report.pending = pending.len();
    report.dropped = existing.len();

    reporter.report(ProgressEvent::Planned {
        stage: "explain".to_string(),
        planned: qualifying.len() as u64,
        pending: pending.len() as u64,
    });
    info!(
        highlights = report.highlights,
        reused = report.reused,
        pending = report.pending,
        dropped = report.dropped,
        "planned explanations"
    );

    if options.dry_run {
        return Ok(report);
    }

    let template =
        PromptTemplate::load(config.batch.prompt_template.as_deref(), DEFAULT_EXPLAIN_TEMPLATE)?;
    let jobs: Vec<Job> = pending
        .iter()
        .map(|(item, _)| Job {
            key: item.key().to_string(),
            prompt: explain_prompt(&template, item, &doc.meta),
        })
        .collect();

    let driver = Driver::new(generator, DriverOptions::batch(&config.generation, &config.batch));
    let outcomes = tokio::select! {
        outcomes = driver.run(jobs, reporter, "explain") => outcomes,
        Ok(()) = tokio::signal::ctrl_c() => {
            bail!("Interrupted; explanation store left unchanged");
        }
    };
    let mut outcomes: HashMap<String, _> =
        outcomes.into_iter().map(|o| (o.key.clone(), o)).collect();

    for (item, created_at) in pending {
        let key = item.key().to_string();
        let (explanation, status) = match outcomes.remove(&key) {
            Some(outcome) => (outcome.structured, outcome.status),
            None => (
                sanitize::failure_placeholder("no result").0,
                RecordStatus::Failed,
            ),
        };
        if status == RecordStatus::Failed {
            report.failed += 1;
        } else {
            report.generated += 1;
        }
        next.insert(
            key,
            ExplanationRecord {
                key: item.key(),
                text: item.text.clone(),
                explanation,
                status,
                created_at,
                updated_at: now,
            },
        );
    }

    store::save_explanations(&path, &next).await?;
    Ok(report)
}

fn is_reusable(record: &ExplanationRecord, item: &InputItem, options: ExplainOptions) -> bool {
    if record.text != item.text {
        return false;
    }
    !(options.rerun_failed && record.status == RecordStatus::Failed)
}
