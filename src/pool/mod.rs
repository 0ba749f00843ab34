//! Bounded worker pool that computes checksums off the reconciler's
//! critical path.
//!
//! Thread-per-worker, fed by a bounded job channel: "run a caller-supplied
//! job and report the result." Jobs and results travel on two separate
//! bounded channels and workers share no mutable state; the reconciler is
//! the only component that correlates submissions with results, by path.

use std::io::Read;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::checksum::{self, ChecksumAlgorithm};

/// A unit of checksum work. `open` is called on the worker thread, not the
/// submitter's thread, so opening a file handle never blocks the reconciler.
pub struct ChecksumJob {
    pub path: PathBuf,
    pub algorithm: ChecksumAlgorithm,
    pub open: Box<dyn FnOnce() -> std::io::Result<Box<dyn Read + Send>> + Send>,
}

impl ChecksumJob {
    pub fn new(
        path: PathBuf,
        algorithm: ChecksumAlgorithm,
        open: impl FnOnce() -> std::io::Result<Box<dyn Read + Send>> + Send + 'static,
    ) -> Self {
        ChecksumJob {
            path,
            algorithm,
            open: Box::new(open),
        }
    }
}

#[derive(Debug)]
pub struct ChecksumResult {
    pub path: PathBuf,
    pub digest: Option<String>,
    pub error: Option<String>,
}

/// Channel capacity relative to pool size: enough to keep workers fed
/// without letting an unbounded backlog of opened-but-unread files build up.
const QUEUE_DEPTH_PER_WORKER: usize = 4;

pub struct WorkerPool {
    job_tx: Option<Sender<ChecksumJob>>,
    result_rx: Receiver<ChecksumResult>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// `size` is capped by the process file-descriptor limit
    /// (`utils::fd_limit::max_workers_by_fd_limit`) — one open file per
    /// worker at a time, plus the catalog's own connections — so a large
    /// `parallel_workers` setting can't run the process into EMFILE.
    pub fn new(size: usize) -> Self {
        let size = match crate::utils::max_workers_by_fd_limit() {
            Some(cap) => size.max(1).min(cap.max(1)),
            None => size.max(1),
        };
        let (job_tx, job_rx) = bounded::<ChecksumJob>(size * QUEUE_DEPTH_PER_WORKER);
        let (result_tx, result_rx) = bounded::<ChecksumResult>(size * QUEUE_DEPTH_PER_WORKER);

        let handles = (0..size)
            .map(|_| {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                thread::spawn(move || worker_loop(job_rx, result_tx))
            })
            .collect();

        WorkerPool {
            job_tx: Some(job_tx),
            result_rx,
            handles,
        }
    }

    /// Submits a job, blocking if every worker is busy and the queue is
    /// full. Returns an error only if every worker thread has already
    /// exited (the pool is being torn down).
    pub fn submit(&self, job: ChecksumJob) -> Result<(), crossbeam_channel::SendError<ChecksumJob>> {
        self.job_tx
            .as_ref()
            .expect("submit called after stop")
            .send(job)
    }

    /// Results arrive in completion order, not submission order.
    pub fn results(&self) -> &Receiver<ChecksumResult> {
        &self.result_rx
    }

    /// Drops the job sender (workers exit once the queue drains) and joins
    /// every worker thread. Safe to call once; idempotent if called again.
    pub fn stop(&mut self) {
        self.job_tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(job_rx: Receiver<ChecksumJob>, result_tx: Sender<ChecksumResult>) {
    while let Ok(job) = job_rx.recv() {
        let result = run_job(job.path.clone(), job.algorithm, job.open);
        if result_tx.send(result).is_err() {
            break;
        }
    }
}

fn run_job(
    path: PathBuf,
    algorithm: ChecksumAlgorithm,
    open: Box<dyn FnOnce() -> std::io::Result<Box<dyn Read + Send>> + Send>,
) -> ChecksumResult {
    match open() {
        Ok(mut reader) => match checksum::compute(algorithm, &mut reader) {
            Ok(digest) => ChecksumResult {
                path,
                digest: Some(digest),
                error: None,
            },
            Err(e) => ChecksumResult {
                path,
                digest: None,
                error: Some(e.to_string()),
            },
        },
        Err(e) => ChecksumResult {
            path,
            digest: None,
            error: Some(e.to_string()),
        },
    }
}
