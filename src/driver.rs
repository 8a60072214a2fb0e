//! Generation driver: runs jobs against a [`Generator`] with bounded
//! concurrency, retries, and output validation.
//!
//! Every job walks an explicit state machine:
//!
//! ```text
//! Pending ─▶ Calling{attempt} ─▶ Validating{attempt} ─▶ Accepted
//!               ▲      │                 │
//!               └──────┴── retry ◀───────┘
//!                      │                 │
//!                      ▼                 ▼
//!                  FailedPlaceholder (attempts exhausted or not retryable)
//! ```
//!
//! A job never fails the run. Whatever happens, it ends in exactly one
//! [`JobOutcome`]; failures carry a visible placeholder with status
//! `failed`. Jobs run as tokio tasks gated by a counting semaphore and
//! their outcomes are gathered by a single collector loop, keyed by job key,
//! so completion order does not matter.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::{BatchConfig, GenerationConfig};
use crate::generation::{GenerationError, Generator};
use crate::models::RecordStatus;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::sanitize;

/// What a successful response has to look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputShape {
    /// HTML with heading or paragraph structure (outline chunks).
    Markup,
    /// Any non-empty text (explanations).
    Plain,
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `backoff * 2^(n-2)`, capped at 2^5.
    pub backoff: Duration,
    pub timeout: Duration,
    pub concurrency: usize,
    pub shape: OutputShape,
}

impl DriverOptions {
    /// Options for outline chunks.
    pub fn outline(config: &GenerationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            timeout: Duration::from_secs(config.timeout_secs),
            concurrency: config.concurrency.max(1),
            shape: OutputShape::Markup,
        }
    }

    /// Options for batch explanations.
    pub fn batch(config: &GenerationConfig, batch: &BatchConfig) -> Self {
        Self {
            concurrency: batch.concurrency.max(1),
            shape: OutputShape::Plain,
            ..Self::outline(config)
        }
    }

    fn delay_before(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        hint.unwrap_or_else(|| self.backoff * (1u32 << (attempt - 2).min(5)))
    }
}

/// One unit of generation work.
#[derive(Debug, Clone)]
pub struct Job {
    /// Identity the outcome is filed under.
    pub key: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub key: String,
    /// Markdown form (outline) or plain text (explanations).
    pub structured: String,
    /// HTML form.
    pub display: String,
    pub status: RecordStatus,
    pub attempts: u32,
}

impl JobOutcome {
    pub fn is_failed(&self) -> bool {
        self.status == RecordStatus::Failed
    }
}

enum JobState {
    Pending,
    Calling {
        attempt: u32,
        delay: Duration,
    },
    Validating {
        attempt: u32,
        raw: String,
    },
    Accepted {
        attempts: u32,
        structured: String,
        display: String,
    },
    FailedPlaceholder {
        attempts: u32,
        structured: String,
        display: String,
    },
}

pub struct Driver {
    generator: Arc<dyn Generator>,
    options: DriverOptions,
}

impl Driver {
    pub fn new(generator: Arc<dyn Generator>, options: DriverOptions) -> Self {
        Self { generator, options }
    }

    /// Run every job to a terminal state and return their outcomes.
    ///
    /// Outcomes are in completion order. A job whose task panicked has no
    /// outcome; callers treat a missing key as a failure.
    pub async fn run(
        &self,
        jobs: Vec<Job>,
        reporter: &dyn ProgressReporter,
        stage: &str,
    ) -> Vec<JobOutcome> {
        let total = jobs.len() as u64;
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        let mut tasks = JoinSet::new();

        for job in jobs {
            let semaphore = semaphore.clone();
            let generator = self.generator.clone();
            let options = self.options.clone();
            tasks.spawn(async move {
                // The semaphore is never closed, so acquiring cannot fail.
                let _permit = semaphore.acquire_owned().await.ok();
                run_job(generator.as_ref(), &options, job).await
            });
        }

        let mut outcomes = Vec::with_capacity(total as usize);
        let mut done = 0u64;
        let mut failed = 0u64;
        while let Some(joined) = tasks.join_next().await {
            done += 1;
            match joined {
                Ok(outcome) => {
                    if outcome.is_failed() {
                        failed += 1;
                    }
                    outcomes.push(outcome);
                }
                Err(e) => {
                    failed += 1;
                    warn!(error = %e, "generation task aborted");
                }
            }
            reporter.report(ProgressEvent::Generating {
                stage: stage.to_string(),
                n: done,
                total,
                failed,
            });
        }

        outcomes
    }
}

async fn run_job(generator: &dyn Generator, options: &DriverOptions, job: Job) -> JobOutcome {
    let mut state = JobState::Pending;

    loop {
        state = match state {
            JobState::Pending => JobState::Calling {
                attempt: 1,
                delay: Duration::ZERO,
            },

            JobState::Calling { attempt, delay } => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                debug!(key = %job.key, attempt, "calling generator");

                let call = generator.generate(&job.prompt);
                let result = match tokio::time::timeout(options.timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(GenerationError::Timeout(options.timeout)),
                };

                match result {
                    Ok(raw) => JobState::Validating { attempt, raw },
                    Err(e) if e.is_retryable() && attempt < options.max_attempts => {
                        warn!(key = %job.key, attempt, error = %e, "generation failed; retrying");
                        JobState::Calling {
                            attempt: attempt + 1,
                            delay: options.delay_before(attempt + 1, e.retry_after()),
                        }
                    }
                    Err(e) => {
                        warn!(key = %job.key, attempt, error = %e, "generation failed");
                        let (structured, display) = sanitize::failure_placeholder(&e.to_string());
                        JobState::FailedPlaceholder {
                            attempts: attempt,
                            structured,
                            display,
                        }
                    }
                }
            }

            JobState::Validating { attempt, raw } => match validate(options.shape, &raw) {
                Some((structured, display)) => JobState::Accepted {
                    attempts: attempt,
                    structured,
                    display,
                },
                None if attempt < options.max_attempts => {
                    warn!(key = %job.key, attempt, "malformed generator output; retrying");
                    JobState::Calling {
                        attempt: attempt + 1,
                        delay: options.delay_before(attempt + 1, None),
                    }
                }
                None => {
                    warn!(key = %job.key, attempt, "malformed generator output; giving up");
                    let (structured, display) = sanitize::malformed_placeholder(&raw);
                    JobState::FailedPlaceholder {
                        attempts: attempt,
                        structured,
                        display,
                    }
                }
            },

            JobState::Accepted {
                attempts,
                structured,
                display,
            } => {
                return JobOutcome {
                    key: job.key,
                    structured,
                    display,
                    status: RecordStatus::Generated,
                    attempts,
                }
            }

            JobState::FailedPlaceholder {
                attempts,
                structured,
                display,
            } => {
                return JobOutcome {
                    key: job.key,
                    structured,
                    display,
                    status: RecordStatus::Failed,
                    attempts,
                }
            }
        };
    }
}

/// Post-process a raw response into `(structured, display)`.
fn validate(shape: OutputShape, raw: &str) -> Option<(String, String)> {
    let stripped = sanitize::strip_wrapping(raw);
    match shape {
        OutputShape::Markup => {
            let html = sanitize::validate_markup(&stripped)?;
            Some((sanitize::html_to_markdown(&html), html))
        }
        OutputShape::Plain => {
            if stripped.is_empty() {
                return None;
            }
            let display = format!("<p>{}</p>", sanitize::escape_html(&stripped));
            Some((stripped, display))
        }
    }
}
