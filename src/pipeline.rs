//! Outline pipeline orchestration.
//!
//! Coordinates one incremental outline run:
//! input → plan → load store → reconcile → generate → merge → save →
//! reload → assemble → write outputs.
//!
//! The store is only written after every generation job has reached a
//! terminal state. A failed load (corrupt store) or an interrupt (Ctrl-C)
//! aborts the run before anything is saved, leaving the last-good store.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::assemble::{assemble, AssembledDocument};
use crate::chunk::plan_chunks;
use crate::config::Config;
use crate::driver::{Driver, DriverOptions, Job};
use crate::generation::{create_generator, Generator};
use crate::input::{load_input, InputDocument};
use crate::models::ChunkPlan;
use crate::progress::{ProgressEvent, ProgressMode, ProgressReporter};
use crate::prompt::{outline_prompt, PromptTemplate, DEFAULT_OUTLINE_TEMPLATE};
use crate::reconcile::{reconcile_with, Reconciliation, Regenerate};
use crate::store;

#[derive(Debug, Clone, Default)]
pub struct OutlineOptions {
    pub dry_run: bool,
    pub regenerate: Regenerate,
    /// Overrides `output.dir`.
    pub output_dir: Option<PathBuf>,
}

/// What one planned chunk is going to get.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanLine {
    pub ordinal: usize,
    pub identity: String,
    pub qualifying: usize,
    pub action: &'static str,
}

/// Counts and paths from one outline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutlineReport {
    pub items: usize,
    pub skipped: usize,
    pub plan: Vec<PlanLine>,
    pub reused: usize,
    pub replaced: usize,
    pub fresh: usize,
    pub obsolete: Vec<String>,
    pub generated: usize,
    pub failed: usize,
    pub generator_calls: u64,
    pub markdown_path: Option<PathBuf>,
    pub html_path: Option<PathBuf>,
}

/// `marg outline`: run the pipeline for the input file at `input_path`.
pub async fn run_outline(
    config: &Config,
    input_path: &Path,
    options: &OutlineOptions,
    mode: ProgressMode,
) -> Result<()> {
    let doc = load_input(input_path)?;
    let generator = create_generator(&config.generation)?;
    let stem = output_stem(input_path);
    let reporter = mode.reporter();

    let report = run_outline_with(config, generator, doc, &stem, options, reporter.as_ref()).await?;

    if options.dry_run {
        println!("outline {} (dry-run)", stem);
    } else {
        println!("outline {}", stem);
    }
    println!("  highlights: {}", report.items);
    println!("  skipped (unparseable keys): {}", report.skipped);
    println!("  chunks planned: {}", report.plan.len());
    if options.dry_run {
        for line in &report.plan {
            println!(
                "    #{} {} ({} highlights) {}",
                line.ordinal, line.identity, line.qualifying, line.action
            );
        }
    }
    println!("  reused: {}", report.reused);
    println!("  replaced: {}", report.replaced);
    println!("  fresh: {}", report.fresh);
    println!("  obsolete: {}", report.obsolete.len());
    if options.dry_run {
        for identity in &report.obsolete {
            println!("    {}", identity);
        }
        return Ok(());
    }
    println!("  generated: {}", report.generated);
    println!("  failed: {}", report.failed);
    if let Some(path) = &report.markdown_path {
        println!("  markdown: {}", path.display());
    }
    if let Some(path) = &report.html_path {
        println!("  html: {}", path.display());
    }
    println!("ok");
    Ok(())
}

/// Library entry point with an injected generator.
pub async fn run_outline_with(
    config: &Config,
    generator: Arc<dyn Generator>,
    doc: InputDocument,
    stem: &str,
    options: &OutlineOptions,
    reporter: &dyn ProgressReporter,
) -> Result<OutlineReport> {
    let plans = plan_chunks(&doc.items, config.chunking.min_highlights);
    warn_unknown_identities(&plans, &options.regenerate);

    // A corrupt store is fatal here, before any generation work.
    let previous = store::load_chunks(&config.store.path).await?;
    let reconciliation = reconcile_with(&plans, &previous, Utc::now(), &options.regenerate);

    let mut report = OutlineReport {
        items: doc.items.len(),
        skipped: doc.skipped,
        plan: plan_lines(&plans, &reconciliation),
        reused: reconciliation.reuse.len(),
        replaced: reconciliation.replace.len(),
        fresh: reconciliation.fresh.len(),
        obsolete: reconciliation
            .obsolete
            .iter()
            .map(|r| r.identity.clone())
            .collect(),
        ..Default::default()
    };

    reporter.report(ProgressEvent::Planned {
        stage: "outline".to_string(),
        planned: plans.len() as u64,
        pending: reconciliation.pending_count() as u64,
    });
    info!(
        planned = plans.len(),
        reuse = report.reused,
        replace = report.replaced,
        fresh = report.fresh,
        obsolete = report.obsolete.len(),
        "reconciled chunk plan"
    );

    if options.dry_run {
        return Ok(report);
    }

    let template = PromptTemplate::load(
        config.generation.prompt_template.as_deref(),
        DEFAULT_OUTLINE_TEMPLATE,
    )?;
    let jobs: Vec<Job> = reconciliation
        .pending()
        .into_iter()
        .map(|plan| Job {
            key: plan.job_key(),
            prompt: outline_prompt(&template, plan, &doc.meta),
        })
        .collect();
    let pending = jobs.len();

    if !jobs.is_empty() && !config.generation.is_enabled() {
        warn!(
            pending = jobs.len(),
            "generation provider is disabled; pending chunks are stored as failure placeholders"
        );
    }

    let driver = Driver::new(generator, DriverOptions::outline(&config.generation));
    let outcomes = tokio::select! {
        outcomes = driver.run(jobs, reporter, "outline") => outcomes,
        Ok(()) = tokio::signal::ctrl_c() => {
            bail!("Interrupted; chunk store left unchanged");
        }
    };
    report.generator_calls = outcomes.iter().map(|o| o.attempts as u64).sum();
    report.generated = outcomes.iter().filter(|o| !o.is_failed()).count();
    // Missing outcomes count as failures too.
    report.failed = pending - report.generated;

    let next = reconciliation.apply(outcomes);

    store::save_chunks(&config.store.path, &next).await?;

    // Assemble from what is actually on disk.
    let saved = store::load_chunks(&config.store.path).await?;
    let doc_out = assemble(&plans, &saved, &doc.meta);
    let out_dir = options
        .output_dir
        .clone()
        .unwrap_or_else(|| config.output.dir.clone());
    let (md, html) = write_outputs(&out_dir, stem, &doc_out)?;
    report.markdown_path = Some(md);
    report.html_path = Some(html);

    Ok(report)
}

/// `marg assemble`: rebuild the outline files from the store alone.
pub async fn run_assemble(
    config: &Config,
    input_path: Option<&Path>,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let saved = store::load_chunks(&config.store.path).await?;

    let (plans, meta, stem) = match input_path {
        Some(path) => {
            let doc = load_input(path)?;
            let plans = plan_chunks(&doc.items, config.chunking.min_highlights);
            (plans, doc.meta, output_stem(path))
        }
        None => (Vec::new(), Default::default(), output_stem(&config.store.path)),
    };

    let doc_out = assemble(&plans, &saved, &meta);
    let out_dir = output_dir.unwrap_or_else(|| config.output.dir.clone());
    let (md, html) = write_outputs(&out_dir, &stem, &doc_out)?;

    println!("assemble {}", stem);
    println!("  sections: {}", saved.len());
    println!("  failed placeholders: {}", saved.failed_count());
    println!("  markdown: {}", md.display());
    println!("  html: {}", html.display());
    println!("ok");
    Ok(())
}

fn plan_lines(plans: &[ChunkPlan], reconciliation: &Reconciliation) -> Vec<PlanLine> {
    plans
        .iter()
        .map(|plan| {
            let action = if reconciliation
                .reuse
                .iter()
                .any(|r| r.chunk_identity() == plan.identity)
            {
                "reuse"
            } else if let Some(r) = reconciliation
                .replace
                .iter()
                .find(|r| r.plan.identity == plan.identity)
            {
                if r.previous.chunk_identity() == plan.identity {
                    "regenerate"
                } else {
                    "replace"
                }
            } else {
                "fresh"
            };
            PlanLine {
                ordinal: plan.ordinal,
                identity: plan.key(),
                qualifying: plan.qualifying_count(),
                action,
            }
        })
        .collect()
}

fn warn_unknown_identities(plans: &[ChunkPlan], regenerate: &Regenerate) {
    for identity in &regenerate.identities {
        if !plans.iter().any(|p| &p.key() == identity) {
            warn!(identity = %identity, "--regenerate names no planned chunk; ignored");
        }
    }
}

fn output_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "outline".to_string())
}

fn write_outputs(dir: &Path, stem: &str, doc: &AssembledDocument) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    let md = dir.join(format!("{}_outline.md", stem));
    let html = dir.join(format!("{}_outline.html", stem));
    std::fs::write(&md, &doc.structured)
        .with_context(|| format!("Failed to write {}", md.display()))?;
    std::fs::write(&html, &doc.display)
        .with_context(|| format!("Failed to write {}", html.display()))?;
    Ok((md, html))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_stem() {
        assert_eq!(output_stem(Path::new("/tmp/books/capital.json")), "capital");
        assert_eq!(output_stem(Path::new("/")), "outline");
    }
}
