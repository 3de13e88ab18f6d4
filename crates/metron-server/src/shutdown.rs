//! Ordered graceful shutdown.
//!
//! Steps run one after another under a single deadline. A failing step is
//! logged and the sequence carries on, so the database is still closed when
//! the final snapshot could not be written. Once the deadline passes the
//! remaining steps are skipped.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::time::timeout_at;

pub type StepFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    Failed,
    TimedOut,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub name: &'static str,
    pub outcome: StepOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub steps: Vec<StepReport>,
}

impl ShutdownReport {
    pub fn success(&self) -> bool {
        self.steps.iter().all(|s| s.outcome == StepOutcome::Done)
    }

    pub fn outcome(&self, name: &str) -> Option<StepOutcome> {
        self.steps.iter().find(|s| s.name == name).map(|s| s.outcome)
    }
}

/// Named shutdown steps in execution order.
pub struct ShutdownPlan {
    deadline: Duration,
    steps: Vec<(&'static str, StepFuture)>,
}

impl ShutdownPlan {
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            steps: Vec::new(),
        }
    }

    pub fn step<F>(mut self, name: &'static str, fut: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.steps.push((name, Box::pin(fut)));
        self
    }

    pub async fn run(self) -> ShutdownReport {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.deadline;
        let mut report = ShutdownReport::default();
        let mut expired = false;

        for (name, fut) in self.steps {
            if expired {
                tracing::warn!(step = name, "Shutdown step skipped after deadline");
                report.steps.push(StepReport {
                    name,
                    outcome: StepOutcome::Skipped,
                    elapsed: Duration::ZERO,
                });
                continue;
            }

            let step_started = Instant::now();
            let outcome = match timeout_at(deadline, fut).await {
                Ok(Ok(())) => {
                    tracing::info!(step = name, "Shutdown step completed");
                    StepOutcome::Done
                }
                Ok(Err(e)) => {
                    tracing::error!(step = name, error = %e, "Shutdown step failed");
                    StepOutcome::Failed
                }
                Err(_) => {
                    tracing::error!(step = name, "Shutdown deadline reached");
                    expired = true;
                    StepOutcome::TimedOut
                }
            };
            report.steps.push(StepReport {
                name,
                outcome,
                elapsed: step_started.elapsed(),
            });
        }

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            success = report.success(),
            "Shutdown finished"
        );
        report
    }
}
