use std::time::Duration;

use aya::maps::{MapData, PerCpuArray};
use log::{debug, warn};
use trafficpump_common::Dropped;

const REASONS: usize = Dropped::COUNT as usize;

/// Remembers the last seen totals so each report only shows what is new.
#[derive(Debug, Default)]
pub struct DropTally {
    last: [u64; REASONS],
}

impl DropTally {
    /// Returns the non-zero increases since the previous call.
    pub fn update(&mut self, totals: [u64; REASONS]) -> Vec<(Dropped, u64)> {
        let mut deltas = Vec::new();
        for reason in Dropped::ALL {
            let i = reason.index() as usize;
            let delta = totals[i].saturating_sub(self.last[i]);
            if delta > 0 {
                deltas.push((reason, delta));
            }
            self.last[i] = totals[i];
        }
        deltas
    }
}

fn read_totals(drops: &PerCpuArray<MapData, u64>) -> Result<[u64; REASONS], aya::maps::MapError> {
    let mut totals = [0; REASONS];
    for reason in Dropped::ALL {
        let values = drops.get(&reason.index(), 0)?;
        totals[reason.index() as usize] = values.iter().sum();
    }
    Ok(totals)
}

/// Periodically logs how many events the probes had to drop, per reason.
pub async fn report_drops(drops: PerCpuArray<MapData, u64>, period: Duration) {
    let mut tally = DropTally::default();
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let totals = match read_totals(&drops) {
            Ok(totals) => totals,
            Err(e) => {
                warn!("failed to read DROPS: {e}");
                continue;
            }
        };
        for (reason, count) in tally.update(totals) {
            match reason {
                Dropped::UnsupportedFamily => debug!("skipped {count} non-IPv4 connects"),
                _ => warn!("dropped {count} events: {}", reason.name()),
            }
        }
    }
}
