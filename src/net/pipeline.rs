//! Multi-worker translation pipeline.
//!
//! Frames are handed to worker threads over bounded channels, picked by a
//! hash of the flow's far end so an egress frame and the replies to it land
//! on the same worker in submission order. Each worker classifies the frame
//! by the port it arrived on, runs the
//! matching translator, fixes checksums and pushes accepted frames to a
//! shared output channel. All workers share one [`Translator`] and hence
//! one set of connection tables.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use tracing::{debug, error, info, trace, warn};

use super::checksum::update_checksums;
use super::packet::remote_endpoint;
use super::pcap_utils::CapturedFrame;
use crate::nat::{Direction, NatError, NatResult, Translator, Verdict};
use crate::utils::consts::WORKER_QUEUE_DEPTH;

#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
    unclassified: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub received: u64,
    pub forwarded: u64,
    pub dropped: u64,
    /// Frames addressed to neither port.
    pub unclassified: u64,
}

impl PipelineStats {
    pub fn report(&self) -> PipelineReport {
        PipelineReport {
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            unclassified: self.unclassified.load(Ordering::Relaxed),
        }
    }
}

pub struct Pipeline {
    translator: Arc<Translator>,
    inputs: Vec<Sender<CapturedFrame>>,
    workers: Vec<JoinHandle<()>>,
    output: Receiver<CapturedFrame>,
    stats: Arc<PipelineStats>,
    next: usize,
}

impl Pipeline {
    pub fn spawn(translator: Arc<Translator>, workers: usize) -> Self {
        let workers = workers.max(1);
        let (out_tx, out_rx) = unbounded::<CapturedFrame>();
        let stats = Arc::new(PipelineStats::default());

        let mut inputs = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let (tx, rx) = bounded::<CapturedFrame>(WORKER_QUEUE_DEPTH);
            let translator = translator.clone();
            let out_tx = out_tx.clone();
            let stats = stats.clone();
            handles.push(thread::spawn(move || {
                run_worker(id, &translator, rx, out_tx, &stats)
            }));
            inputs.push(tx);
        }
        info!("Started {} translation worker(s)", workers);

        Self {
            translator,
            inputs,
            workers: handles,
            output: out_rx,
            stats,
            next: 0,
        }
    }

    /// Worker owning the flow of `data`, if it has a recognizable one.
    fn flow_worker(&self, data: &[u8]) -> Option<usize> {
        let outbound = self.translator.classify(data)? == Direction::Egress;
        let flow = remote_endpoint(data, outbound)?;
        let mut hasher = DefaultHasher::new();
        flow.hash(&mut hasher);
        Some((hasher.finish() % self.inputs.len() as u64) as usize)
    }

    pub fn submit(&mut self, frame: CapturedFrame) -> NatResult<()> {
        let worker = match self.flow_worker(&frame.data) {
            Some(worker) => worker,
            // dropped by the worker anyway, spread them out
            None => {
                self.next = self.next.wrapping_add(1);
                self.next % self.inputs.len()
            }
        };
        self.inputs[worker]
            .send(frame)
            .map_err(|_| NatError::Capture(format!("worker {} has stopped", worker)))
    }

    /// Frames translated so far, without waiting for more.
    pub fn drain(&self) -> impl Iterator<Item = CapturedFrame> + '_ {
        self.output.try_iter()
    }

    pub fn stats(&self) -> PipelineReport {
        self.stats.report()
    }

    /// Closes the inputs, waits for the workers and returns the frames
    /// not yet drained.
    pub fn finish(mut self) -> NatResult<(Vec<CapturedFrame>, PipelineReport)> {
        self.inputs.clear();
        let mut panicked = 0;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            error!("{} worker(s) panicked", panicked);
            return Err(NatError::Capture(format!("{} worker(s) panicked", panicked)));
        }

        let rest = self.output.try_iter().collect();
        let report = self.stats.report();
        info!(
            "Pipeline done: {} received, {} forwarded, {} dropped, {} unclassified",
            report.received, report.forwarded, report.dropped, report.unclassified
        );
        Ok((rest, report))
    }
}

fn run_worker(
    id: usize,
    translator: &Translator,
    input: Receiver<CapturedFrame>,
    output: Sender<CapturedFrame>,
    stats: &PipelineStats,
) {
    debug!("Worker {} running", id);
    for mut frame in input.iter() {
        stats.received.fetch_add(1, Ordering::Relaxed);

        let Some(direction) = translator.classify(&frame.data) else {
            trace!("Worker {}: frame for neither port", id);
            stats.unclassified.fetch_add(1, Ordering::Relaxed);
            continue;
        };

        match translator.translate(direction, &mut frame.data) {
            Verdict::Accept => {}
            Verdict::Drop(reason) => {
                trace!("Worker {}: {} frame dropped ({})", id, direction, reason);
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        }

        if let Err(e) = update_checksums(&mut frame.data) {
            warn!("Worker {}: checksum update failed: {:?}", id, e);
        }
        stats.forwarded.fetch_add(1, Ordering::Relaxed);
        if output.send(frame).is_err() {
            break;
        }
    }
    debug!("Worker {} stopping", id);
}
