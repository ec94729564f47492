use std::fmt;

use anyhow::Context;
use aya::{
    Ebpf,
    maps::{MapData, RingBuf},
    programs::{KProbe, TracePoint},
};
use aya_log::EbpfLogger;
use log::{debug, info, warn};
use tokio::{io::unix::AsyncFd, sync::mpsc};
use trafficpump_common::{ConnectionEvent, Probe};

/// Where a program is attached in the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Tracepoint {
        category: &'static str,
        name: &'static str,
    },
    KProbe {
        function: &'static str,
    },
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Tracepoint { category, name } => write!(f, "tracepoint {category}/{name}"),
            Hook::KProbe { function } => write!(f, "kprobe {function}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProbeSpec {
    /// Program name in the eBPF object.
    pub program: &'static str,
    pub probe: Probe,
    pub hook: Hook,
}

pub const PROBES: [ProbeSpec; 4] = [
    ProbeSpec {
        program: "trace_connect",
        probe: Probe::Connect,
        hook: Hook::Tracepoint {
            category: "syscalls",
            name: "sys_enter_connect",
        },
    },
    ProbeSpec {
        program: "trace_accept",
        probe: Probe::Accept,
        hook: Hook::Tracepoint {
            category: "syscalls",
            name: "sys_enter_accept",
        },
    },
    ProbeSpec {
        program: "trace_accept4",
        probe: Probe::Accept4,
        hook: Hook::Tracepoint {
            category: "syscalls",
            name: "sys_enter_accept4",
        },
    },
    ProbeSpec {
        program: "kprobe_tcp_v4_connect",
        probe: Probe::TcpConnect,
        hook: Hook::KProbe {
            function: "tcp_v4_connect",
        },
    },
];

/// Loads the embedded object and starts forwarding kernel-side log records.
pub fn load() -> Result<Ebpf, anyhow::Error> {
    let mut bpf = Ebpf::load(aya::include_bytes_aligned!(concat!(
        env!("OUT_DIR"),
        "/trafficpump"
    )))
    .context("failed to load eBPF object")?;

    match EbpfLogger::init(&mut bpf) {
        Err(e) => {
            // This can happen if you remove all log statements from your eBPF program.
            warn!("failed to initialize eBPF logger: {e}");
        }
        Ok(logger) => {
            let mut logger =
                tokio::io::unix::AsyncFd::with_interest(logger, tokio::io::Interest::READABLE)?;
            tokio::task::spawn(async move {
                loop {
                    let mut guard = match logger.readable_mut().await {
                        Ok(guard) => guard,
                        Err(e) => {
                            warn!("eBPF logger stopped: {e}");
                            break;
                        }
                    };
                    guard.get_inner_mut().flush();
                    guard.clear_ready();
                }
            });
        }
    }

    Ok(bpf)
}

fn attach(bpf: &mut Ebpf, spec: &ProbeSpec) -> Result<(), anyhow::Error> {
    let program = bpf
        .program_mut(spec.program)
        .with_context(|| format!("program {} not found", spec.program))?;
    match spec.hook {
        Hook::Tracepoint { category, name } => {
            let program: &mut TracePoint = program.try_into()?;
            program.load()?;
            program.attach(category, name)?;
        }
        Hook::KProbe { function } => {
            let program: &mut KProbe = program.try_into()?;
            program.load()?;
            program.attach(function, 0)?;
        }
    }
    Ok(())
}

/// Attaches every probe it can. A probe that fails is skipped with a
/// warning; failing all of them is an error.
pub fn attach_all(bpf: &mut Ebpf) -> Result<usize, anyhow::Error> {
    let mut attached = 0;
    for spec in &PROBES {
        match attach(bpf, spec) {
            Ok(()) => {
                info!(
                    "attached {} ({}) to {}",
                    spec.program,
                    spec.probe.name(),
                    spec.hook
                );
                attached += 1;
            }
            Err(e) => warn!("failed to attach {} to {}: {e:#}", spec.program, spec.hook),
        }
    }
    if attached == 0 {
        anyhow::bail!("no probes could be attached");
    }
    Ok(attached)
}

/// Forwards every record in `ring_buf` to `tx` until the receiver is gone.
pub async fn drain_events(
    ring_buf: RingBuf<MapData>,
    tx: mpsc::Sender<ConnectionEvent>,
) -> Result<(), anyhow::Error> {
    let mut ring_buf_poll = AsyncFd::new(ring_buf).context("failed to poll EVENTS")?;
    let mut batch = Vec::new();

    loop {
        let mut guard = ring_buf_poll.readable_mut().await?;
        while let Some(item) = guard.get_inner_mut().next() {
            match ConnectionEvent::from_bytes(&item) {
                Some(event) => batch.push(event),
                None => warn!("skipping short record of {} bytes", item.len()),
            }
        }
        guard.clear_ready();
        drop(guard);

        for event in batch.drain(..) {
            if tx.send(event).await.is_err() {
                debug!("exporter gone, stopping drain");
                return Ok(());
            }
        }
    }
}
