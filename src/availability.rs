use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{HourSlot, RemoteArtifact};
use crate::source::PageviewSource;

pub const DEFAULT_LOOKBACK_HOURS: usize = 6;
/// Minutes into an hour after which its dump is usually published.
pub const PUBLISH_DELAY_MINUTES: u32 = 15;

/// Hour used by manual runs when nothing recent is published.
pub fn demo_slot() -> HourSlot {
    HourSlot::new(2025, 5, 1, 10).unwrap_or_else(|_| HourSlot::current())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ScheduleDecision {
    Run { slot: HourSlot, run_key: String },
    Skip { reason: String },
}

impl ScheduleDecision {
    fn run(slot: HourSlot) -> Self {
        ScheduleDecision::Run {
            slot,
            run_key: format!("wikipedia_hourly_{}", slot.run_tag()),
        }
    }
}

/// HEAD-based checks against the dump host, used to decide whether a run is worth starting.
pub struct AvailabilityProbe<S: PageviewSource> {
    source: S,
    base_url: String,
}

impl<S: PageviewSource> AvailabilityProbe<S> {
    pub fn new(source: S, base_url: impl Into<String>) -> Self {
        Self {
            source,
            base_url: base_url.into(),
        }
    }

    pub fn url(&self, slot: HourSlot) -> String {
        RemoteArtifact::for_slot(slot, &self.base_url).url
    }

    /// Transport errors count as "not available".
    pub fn check_available(&self, slot: HourSlot) -> bool {
        let url = self.url(slot);
        match self.source.probe(&url) {
            Ok(available) => {
                debug!(slot = %slot, available, "probed");
                available
            }
            Err(err) => {
                debug!(slot = %slot, "probe failed: {err}");
                false
            }
        }
    }

    /// Walks back hour by hour from `start`, probing at most `max_lookback` slots.
    pub fn find_latest_available(&self, start: HourSlot, max_lookback: usize) -> Option<HourSlot> {
        let mut candidate = start;
        for _ in 0..max_lookback {
            if self.check_available(candidate) {
                return Some(candidate);
            }
            candidate = candidate.previous();
        }
        None
    }

    /// Scheduled trigger: target the previous complete hour, else the latest published one.
    pub fn scheduled_decision(
        &self,
        scheduled_at: NaiveDateTime,
        max_lookback: usize,
    ) -> ScheduleDecision {
        let target = HourSlot::truncate(scheduled_at).previous();
        match self.find_latest_available(target, max_lookback) {
            Some(slot) => {
                if slot != target {
                    warn!(target = %target, using = %slot, "target hour not published yet");
                }
                ScheduleDecision::run(slot)
            }
            None => ScheduleDecision::Skip {
                reason: format!(
                    "no Wikipedia data available for {target}; checked {}; will retry at next schedule",
                    self.url(target)
                ),
            },
        }
    }

    /// Manual trigger: start from the current hour once it is likely published,
    /// fall back to the demo hour when nothing recent is available.
    pub fn manual_slot(&self, now: NaiveDateTime, max_lookback: usize) -> HourSlot {
        let current = HourSlot::truncate(now);
        let preferred = if now.minute() >= PUBLISH_DELAY_MINUTES {
            current
        } else {
            current.previous()
        };
        match self.find_latest_available(preferred, max_lookback) {
            Some(slot) => {
                info!(slot = %slot, url = %self.url(slot), "found available data");
                slot
            }
            None => {
                let demo = demo_slot();
                warn!(slot = %demo, "no recent data available, falling back to demo hour");
                demo
            }
        }
    }
}
