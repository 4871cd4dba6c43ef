//! Offline replay of a capture through the NAT.
//!
//! Connection aging runs on capture time: the engine's clock is set to each
//! frame's timestamp before the frame is submitted. With a single worker
//! every frame is translated at exactly its own timestamp. With more
//! workers a frame may be translated after the clock has moved on to later
//! frames, so aging decisions can be late by up to the queue depth.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use super::pcap_utils::{create_capture, next_frame, open_capture, write_frame};
use super::pipeline::{Pipeline, PipelineReport};
use crate::nat::events::{CounterSnapshot, FanoutSink};
use crate::nat::{
    ConnectionManager, ManualClock, NatConfig, NatCounters, NatResult, Protocol, TracingSink,
    Translator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    pub pipeline: PipelineReport,
    pub counters: CounterSnapshot,
    /// Bindings still alive at the end, indexed by `Protocol::index`.
    pub active: [usize; Protocol::COUNT],
}

pub fn replay_capture(
    config: NatConfig,
    input: &Path,
    output: &Path,
    workers: usize,
) -> NatResult<ReplayReport> {
    let clock = Arc::new(ManualClock::new());
    let counters = Arc::new(NatCounters::new());
    let events = FanoutSink::new()
        .with(Arc::new(TracingSink))
        .with(counters.clone());
    let manager = Arc::new(ConnectionManager::new(
        &config.options,
        clock.clone(),
        Arc::new(events),
    ));
    let translator = Arc::new(Translator::new(config, manager)?);

    let mut reader = open_capture(input)?;
    let mut writer = create_capture(output)?;
    let mut pipeline = Pipeline::spawn(translator.clone(), workers);

    while let Some(frame) = next_frame(&mut reader)? {
        clock.set(frame.timestamp);
        pipeline.submit(frame)?;
        for done in pipeline.drain() {
            write_frame(&mut writer, &done)?;
        }
    }
    let (rest, report) = pipeline.finish()?;
    for done in &rest {
        write_frame(&mut writer, done)?;
    }
    writer.into_writer().flush()?;

    let manager = translator.manager();
    let active = Protocol::ALL.map(|protocol| manager.active_bindings(protocol));
    for protocol in Protocol::ALL {
        info!(
            "{} bindings active: {}",
            protocol,
            active[protocol.index()]
        );
    }
    Ok(ReplayReport {
        pipeline: report,
        counters: counters.snapshot(),
        active,
    })
}
