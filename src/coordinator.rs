use std::panic::{self, AssertUnwindSafe};

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info};

use crate::domain::HourSlot;
use crate::error::IngestError;
use crate::fetcher::Fetcher;
use crate::source::PageviewSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotOutcome {
    pub slot: HourSlot,
    pub fetched: bool,
}

/// Fans `task` out over a pool of `max_workers` threads and waits for every slot.
///
/// Outcomes come back in input order. A task that panics counts as a failed slot
/// and does not disturb its siblings.
pub fn run_bounded<F>(
    slots: &[HourSlot],
    max_workers: usize,
    task: F,
) -> Result<Vec<SlotOutcome>, IngestError>
where
    F: Fn(HourSlot) -> bool + Sync,
{
    let pool = ThreadPoolBuilder::new()
        .num_threads(max_workers.max(1))
        .thread_name(|index| format!("pageview-fetch-{index}"))
        .build()
        .map_err(|err| IngestError::InvalidSetting {
            name: "MAX_DOWNLOAD_WORKERS".to_string(),
            message: err.to_string(),
        })?;

    let outcomes = pool.install(|| {
        slots
            .par_iter()
            .map(|&slot| {
                let fetched = panic::catch_unwind(AssertUnwindSafe(|| task(slot)))
                    .unwrap_or_else(|_| {
                        error!(slot = %slot, "fetch task panicked");
                        false
                    });
                SlotOutcome { slot, fetched }
            })
            .collect::<Vec<_>>()
    });
    Ok(outcomes)
}

pub fn download_all<S: PageviewSource>(
    fetcher: &Fetcher<S>,
    slots: &[HourSlot],
    max_workers: usize,
) -> Result<Vec<SlotOutcome>, IngestError> {
    info!(
        slots = slots.len(),
        workers = max_workers,
        "starting parallel download"
    );
    let outcomes = run_bounded(slots, max_workers, |slot| fetcher.process(slot))?;
    let failed = outcomes.iter().filter(|outcome| !outcome.fetched).count();
    info!(
        fetched = outcomes.len() - failed,
        failed, "parallel download completed"
    );
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn slots(count: u32) -> Vec<HourSlot> {
        (0..count)
            .map(|hour| HourSlot::new(2025, 5, 1, hour).unwrap())
            .collect()
    }

    #[test]
    fn every_slot_reported_in_input_order() {
        let slots = slots(12);
        let outcomes = run_bounded(&slots, 3, |_| true).unwrap();
        assert_eq!(
            outcomes.iter().map(|outcome| outcome.slot).collect::<Vec<_>>(),
            slots
        );
        assert!(outcomes.iter().all(|outcome| outcome.fetched));
    }

    #[test]
    fn concurrency_is_bounded() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        run_bounded(&slots(16), 4, |_| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            active.fetch_sub(1, Ordering::SeqCst);
            true
        })
        .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[test]
    fn panicking_slot_does_not_affect_siblings() {
        let slots = slots(6);
        let poisoned = slots[2];
        let outcomes = run_bounded(&slots, 2, |slot| {
            if slot == poisoned {
                panic!("boom");
            }
            true
        })
        .unwrap();
        for outcome in outcomes {
            assert_eq!(outcome.fetched, outcome.slot != poisoned);
        }
    }
}
