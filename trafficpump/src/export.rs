use std::{fmt, net::Ipv4Addr, path::Path, time::Duration};

use anyhow::Context;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::mpsc,
    time::{Instant, interval_at},
};
use trafficpump_common::ConnectionEvent;

use crate::utils::boot_seconds;

const IPPROTO_TCP: u8 = 6;

/// One captured connection as handed to the sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedEvent {
    pub node_id: String,
    pub timestamp: u64,
    pub pid: u32,
    pub uid: u32,
    /// `"<comm> [<syscall>]"`
    pub process_name: String,
    pub saddr: Ipv4Addr,
    pub daddr: Ipv4Addr,
    pub sport: u16,
    pub dport: u16,
    pub protocol: u8,
}

impl ExportedEvent {
    pub fn new(node_id: &str, event: &ConnectionEvent) -> Self {
        Self {
            node_id: node_id.to_string(),
            timestamp: event.timestamp,
            pid: event.pid,
            uid: event.uid,
            process_name: format!("{} [{}]", event.process_name(), event.syscall_name()),
            saddr: event.source_ip(),
            daddr: event.dest_ip(),
            sport: event.sport,
            dport: event.dport,
            protocol: IPPROTO_TCP,
        }
    }
}

impl fmt::Display for ExportedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {}:{} → {}:{} | PID:{} | {} | TCP",
            boot_seconds(self.timestamp),
            self.saddr,
            self.sport,
            self.daddr,
            self.dport,
            self.pid,
            self.process_name
        )
    }
}

/// Destination for flushed batches.
pub enum Sink {
    Log,
    Ndjson(File),
}

impl Sink {
    /// Appends to `path`, creating it if needed.
    pub async fn ndjson(path: &Path) -> Result<Self, anyhow::Error> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("failed to open output file {}", path.display()))?;
        Ok(Sink::Ndjson(file))
    }

    fn name(&self) -> &'static str {
        match self {
            Sink::Log => "log",
            Sink::Ndjson(_) => "ndjson",
        }
    }

    async fn write_batch(&mut self, batch: &[ExportedEvent]) -> Result<(), anyhow::Error> {
        match self {
            Sink::Log => {
                for event in batch {
                    info!("{event}");
                }
            }
            Sink::Ndjson(file) => {
                let mut buf = Vec::new();
                for event in batch {
                    serde_json::to_writer(&mut buf, event)?;
                    buf.push(b'\n');
                }
                file.write_all(&buf).await?;
                file.flush().await?;
            }
        }
        Ok(())
    }
}

/// Accumulates events and hands them to every sink in batches.
pub struct Batcher {
    node_id: String,
    batch_size: usize,
    pending: Vec<ExportedEvent>,
    sinks: Vec<Sink>,
    exported: u64,
}

impl Batcher {
    pub fn new(node_id: String, batch_size: usize, sinks: Vec<Sink>) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            node_id,
            batch_size,
            pending: Vec::with_capacity(batch_size),
            sinks,
            exported: 0,
        }
    }

    /// Queues an event, flushing once a full batch is pending.
    pub async fn push(&mut self, event: &ConnectionEvent) {
        self.pending.push(ExportedEvent::new(&self.node_id, event));
        if self.pending.len() >= self.batch_size {
            self.flush().await;
        }
    }

    /// Sends everything pending to the sinks and returns how many events
    /// were flushed. A failing sink is logged; the batch is not retried.
    pub async fn flush(&mut self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        for sink in &mut self.sinks {
            if let Err(e) = sink.write_batch(&self.pending).await {
                warn!("failed to write batch to {} sink: {e:#}", sink.name());
            }
        }
        let flushed = self.pending.len();
        self.pending.clear();
        self.exported += flushed as u64;
        debug!("flushed {flushed} events");
        flushed
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn exported(&self) -> u64 {
        self.exported
    }
}

/// Feeds the batcher until every sender is gone, flushing on each tick of
/// `flush_interval` and once more before returning.
pub async fn run_exporter(
    mut rx: mpsc::Receiver<ConnectionEvent>,
    mut batcher: Batcher,
    flush_interval: Duration,
) -> Batcher {
    let mut ticker = interval_at(Instant::now() + flush_interval, flush_interval);
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => batcher.push(&event).await,
                None => break,
            },
            _ = ticker.tick() => {
                batcher.flush().await;
            }
        }
    }
    debug!("event channel closed, {} events pending", batcher.pending());
    batcher.flush().await;
    info!("exported {} events", batcher.exported());
    batcher
}
