//! Interval-driven job runner.
//!
//! Each pipeline stage is an independently scheduled job: one `run_once`
//! pass over its selection query, safe to run concurrently with a previous
//! still-running pass (overlap shows up as lock contention or a lost claim,
//! both handled inside the stage). Errors stop the item, never the batch,
//! and a failed cycle is simply retried on the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info};

use crate::channel::AdapterError;
use crate::lock::LockError;
use crate::llm::LlmError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("runner error: {0}")]
    Runner(#[from] task_runner_module::RunnerError),
}

pub trait PipelineJob: Send + Sync {
    fn name(&self) -> &'static str;

    /// One pass over the job's selection; returns how many items it settled.
    fn run_once(&self) -> Result<usize, PipelineError>;
}

/// Run a job every `interval` until the stop flag is raised.
pub fn run_job_loop(job: &dyn PipelineJob, interval: Duration, stop: &AtomicBool) {
    info!("{} job started ({}s interval)", job.name(), interval.as_secs());
    while !stop.load(Ordering::Relaxed) {
        match job.run_once() {
            Ok(0) => {}
            Ok(count) => info!("{}: settled {} item(s)", job.name(), count),
            Err(err) => error!("{} cycle failed: {}", job.name(), err),
        }
        sleep_until_stop(interval, stop);
    }
    info!("{} job stopped", job.name());
}

pub fn spawn_job(
    job: Arc<dyn PipelineJob>,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || run_job_loop(job.as_ref(), interval, &stop))
}

/// Sleep in short slices so shutdown is not held up by a long interval.
fn sleep_until_stop(interval: Duration, stop: &AtomicBool) {
    let slice = Duration::from_millis(250);
    let mut remaining = interval;
    while remaining > Duration::ZERO && !stop.load(Ordering::Relaxed) {
        let step = remaining.min(slice);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingJob {
        runs: AtomicUsize,
        stop: Arc<AtomicBool>,
    }

    impl PipelineJob for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn run_once(&self) -> Result<usize, PipelineError> {
            let runs = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if runs >= 3 {
                self.stop.store(true, Ordering::SeqCst);
            }
            Ok(runs)
        }
    }

    #[test]
    fn loop_runs_until_stopped() {
        let stop = Arc::new(AtomicBool::new(false));
        let job = CountingJob {
            runs: AtomicUsize::new(0),
            stop: Arc::clone(&stop),
        };
        run_job_loop(&job, Duration::from_millis(1), &stop);
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
    }

    struct FailingJob;

    impl PipelineJob for FailingJob {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn run_once(&self) -> Result<usize, PipelineError> {
            Err(PipelineError::Llm(LlmError::EmptyResponse))
        }
    }

    #[test]
    fn cycle_failure_does_not_kill_the_loop() {
        let stop = Arc::new(AtomicBool::new(false));
        let job = FailingJob;
        let flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            flag.store(true, Ordering::SeqCst);
        });
        run_job_loop(&job, Duration::from_millis(1), &stop);
        handle.join().expect("join");
    }
}
