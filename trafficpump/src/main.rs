use std::{path::PathBuf, time::Duration};

use clap::Parser;
use log::debug;

mod export;
mod monitor;
mod utils;

/// Streams connect/accept events captured by eBPF probes.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Identifier attached to every exported event [default: hostname]
    #[arg(long, env = "NODE_ID")]
    node_id: Option<String>,

    /// Flush as soon as this many events are pending
    #[arg(long, env = "BATCH_SIZE", default_value_t = 50)]
    batch_size: usize,

    /// Flush pending events at least this often, in seconds
    #[arg(long, env = "FLUSH_INTERVAL_SECS", default_value_t = 5)]
    flush_interval: u64,

    /// Also append every event as a JSON line to this file
    #[arg(long, env = "OUTPUT")]
    output: Option<PathBuf>,

    /// How often to report events dropped in the kernel, in seconds
    #[arg(long, env = "DROP_REPORT_SECS", default_value_t = 10)]
    drop_report_interval: u64,
}

impl Args {
    fn into_config(self) -> monitor::Config {
        monitor::Config {
            node_id: self.node_id.unwrap_or_else(utils::hostname),
            batch_size: self.batch_size.max(1),
            flush_interval: Duration::from_secs(self.flush_interval.max(1)),
            output: self.output,
            drop_report_interval: Duration::from_secs(self.drop_report_interval.max(1)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = Args::parse().into_config();

    // Bump the memlock rlimit. This is needed for older kernels that don't use the
    // new memcg based accounting, see https://lwn.net/Articles/837122/
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {ret}");
    }

    monitor::run_monitor(config).await
}
