use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info};

use super::combine::CombinedChunk;
use super::error::{GraphError, Result};
use super::transformer::{GraphDocument, GraphTransformer};
use crate::error::WorkerError;

pub struct GraphJob {
    /// Position of the chunk in the submitted batch.
    pub index: usize,
    pub chunk: CombinedChunk,
}

pub struct GraphJobResult {
    pub index: usize,
    pub result: Result<GraphDocument>,
}

/// Fixed set of threads running transformer calls.
pub struct TransformerPool {
    job_sender: Sender<GraphJob>,
    result_receiver: Receiver<GraphJobResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl TransformerPool {
    pub fn new(
        transformer: Arc<dyn GraphTransformer>,
        worker_count: usize,
    ) -> std::result::Result<Self, WorkerError> {
        let worker_count = worker_count.max(1);
        let (job_sender, job_receiver) = bounded::<GraphJob>(worker_count * 2);
        // Unbounded so a submitter that has not started collecting never
        // blocks the workers.
        let (result_sender, result_receiver) = unbounded::<GraphJobResult>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_transformer = Arc::clone(&transformer);

            let handle = thread::Builder::new()
                .name(format!("graph-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(worker_id, job_rx, result_tx, shutdown_flag, worker_transformer)
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        info!("Started {} graph workers", worker_count);

        Ok(Self {
            job_sender,
            result_receiver,
            workers,
            shutdown,
        })
    }

    pub fn submit(&self, job: GraphJob) -> std::result::Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .send(job)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn recv_result(&self) -> Option<GraphJobResult> {
        self.result_receiver.recv().ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down graph workers...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Closes the job queue and joins the workers. Results still queued are
    /// returned.
    pub fn wait(self) -> Vec<GraphJobResult> {
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Graph worker {} panicked: {:?}", i, e);
            } else {
                debug!("Graph worker {} finished", i);
            }
        }

        self.result_receiver.try_iter().collect()
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<GraphJob>,
    result_sender: Sender<GraphJobResult>,
    shutdown: Arc<AtomicBool>,
    transformer: Arc<dyn GraphTransformer>,
) {
    debug!("Graph worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Graph worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job) => {
                // a panicking call still yields exactly one result for its job
                let result =
                    panic::catch_unwind(AssertUnwindSafe(|| transformer.convert(&job.chunk)))
                        .unwrap_or_else(|payload| {
                            error!("Graph worker {} panicked on chunk {}", worker_id, job.index);
                            let message = panic_message(&*payload);
                            Err(GraphError::Worker(WorkerError::Panicked(message)))
                        });
                let result = GraphJobResult {
                    index: job.index,
                    result,
                };
                if let Err(e) = result_sender.send(result) {
                    error!("Graph worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Graph worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Graph worker {} stopped", worker_id);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Runs every chunk through the transformer on at most `max_workers` threads.
/// Results come back in completion order, one per chunk.
pub fn transform_all(
    transformer: Arc<dyn GraphTransformer>,
    chunks: Vec<CombinedChunk>,
    max_workers: usize,
) -> std::result::Result<Vec<GraphJobResult>, WorkerError> {
    let expected = chunks.len();
    if expected == 0 {
        return Ok(Vec::new());
    }

    let pool = TransformerPool::new(transformer, max_workers.min(expected))?;
    let submitted = chunks
        .into_iter()
        .enumerate()
        .try_for_each(|(index, chunk)| pool.submit(GraphJob { index, chunk }));

    let mut results = Vec::with_capacity(expected);
    if submitted.is_ok() {
        while results.len() < expected {
            match pool.recv_result() {
                Some(result) => results.push(result),
                None => break,
            }
        }
    }
    results.extend(pool.wait());
    submitted?;

    if results.len() != expected {
        error!("Expected {} graph results, got {}", expected, results.len());
        return Err(WorkerError::ChannelClosed);
    }
    Ok(results)
}
