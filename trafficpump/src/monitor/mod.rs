mod drops;
mod ebpf;

use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use aya::maps::{PerCpuArray, RingBuf};
use log::info;
use tokio::{signal, sync::mpsc};
use trafficpump_common::{DROPS_MAP, EVENTS_MAP};

use crate::export::{Batcher, Sink, run_exporter};

/// Decoded records waiting for the exporter.
const EVENT_QUEUE: usize = 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub node_id: String,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub output: Option<PathBuf>,
    pub drop_report_interval: Duration,
}

pub async fn run_monitor(config: Config) -> Result<(), anyhow::Error> {
    info!("Starting connection monitor on node {}...", config.node_id);

    let mut bpf = ebpf::load()?;
    let attached = ebpf::attach_all(&mut bpf)?;
    info!("{attached}/{} probes attached", ebpf::PROBES.len());

    let events = RingBuf::try_from(bpf.take_map(EVENTS_MAP).context("EVENTS map not found")?)?;
    let drop_counters =
        PerCpuArray::try_from(bpf.take_map(DROPS_MAP).context("DROPS map not found")?)?;

    let mut sinks = vec![Sink::Log];
    if let Some(path) = &config.output {
        sinks.push(Sink::ndjson(path).await?);
        info!("Writing events to {}", path.display());
    }
    let batcher = Batcher::new(config.node_id, config.batch_size, sinks);

    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    let mut drain = tokio::spawn(ebpf::drain_events(events, tx));
    let reporter = tokio::spawn(drops::report_drops(
        drop_counters,
        config.drop_report_interval,
    ));
    let exporter = tokio::spawn(run_exporter(rx, batcher, config.flush_interval));

    info!("Waiting for events... Press Ctrl-C to exit");
    let finished = tokio::select! {
        res = signal::ctrl_c() => {
            res.context("failed to listen for Ctrl-C")?;
            None
        }
        res = &mut drain => Some(res),
    };
    let outcome = match finished {
        None => {
            info!("Exiting...");
            drain.abort();
            // the sender is released once the aborted task is gone
            let _ = drain.await;
            Ok(())
        }
        Some(res) => res.context("event drain task failed").and_then(|r| r),
    };

    reporter.abort();
    exporter.await.context("exporter task failed")?;

    // programs stay attached until here
    drop(bpf);
    outcome
}
