//! Fair-price estimation from paired local/reference mid samples.
//!
//! The estimator keeps a bounded ring of per-second offsets
//! (`local_mid - ref_mid`) and exposes the windowed median, so
//! `fair_price = ref_mid + median_offset` tracks the venue's persistent
//! basis without chasing every tick.

use std::collections::VecDeque;

use rust_decimal::Decimal;

use crate::types::now_ms;

/// Ring capacity; must cover window_secs plus slack so eviction never
/// discards in-window samples.
const MIN_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy)]
struct OffsetSample {
    offset: Decimal,
    second: u64,
}

#[derive(Debug)]
pub struct FairPriceEstimator {
    window_secs: u64,
    min_samples: usize,
    samples: VecDeque<OffsetSample>,
    capacity: usize,
}

impl FairPriceEstimator {
    pub fn new(window_ms: u64, min_samples: usize) -> Self {
        let window_secs = (window_ms / 1000).max(1);
        let capacity = MIN_CAPACITY.max(window_secs as usize + 60);
        Self {
            window_secs,
            min_samples,
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record one paired observation. At most one sample is kept per
    /// wall-clock second; later pairs within the same second are dropped.
    pub fn add_sample(&mut self, local_mid: Decimal, ref_mid: Decimal) {
        self.add_sample_at(local_mid, ref_mid, now_ms() / 1000);
    }

    fn add_sample_at(&mut self, local_mid: Decimal, ref_mid: Decimal, second: u64) {
        if let Some(last) = self.samples.back() {
            if last.second >= second {
                return;
            }
        }
        self.samples.push_back(OffsetSample {
            offset: local_mid - ref_mid,
            second,
        });
        self.evict(second);
    }

    fn evict(&mut self, now_sec: u64) {
        let horizon = now_sec.saturating_sub(self.window_secs);
        while let Some(front) = self.samples.front() {
            if front.second <= horizon || self.samples.len() > self.capacity {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Samples currently inside the window.
    pub fn sample_count(&self) -> usize {
        self.windowed(now_ms() / 1000).len()
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    /// Windowed median offset, gated on `min_samples`.
    pub fn median_offset(&self) -> Option<Decimal> {
        self.median_offset_at(now_ms() / 1000)
    }

    /// Windowed median offset without the `min_samples` gate; None only when
    /// no in-window sample exists.
    pub fn raw_median_offset(&self) -> Option<Decimal> {
        median(self.windowed(now_ms() / 1000))
    }

    /// `ref_mid + median_offset`, None while the estimator is warming up.
    pub fn fair_price(&self, ref_mid: Decimal) -> Option<Decimal> {
        self.median_offset().map(|offset| ref_mid + offset)
    }

    fn median_offset_at(&self, now_sec: u64) -> Option<Decimal> {
        let offsets = self.windowed(now_sec);
        if offsets.len() < self.min_samples {
            return None;
        }
        median(offsets)
    }

    fn windowed(&self, now_sec: u64) -> Vec<Decimal> {
        let horizon = now_sec.saturating_sub(self.window_secs);
        self.samples
            .iter()
            .filter(|s| s.second > horizon)
            .map(|s| s.offset)
            .collect()
    }
}

fn median(mut offsets: Vec<Decimal>) -> Option<Decimal> {
    if offsets.is_empty() {
        return None;
    }
    offsets.sort();
    let n = offsets.len();
    if n % 2 == 1 {
        Some(offsets[n / 2])
    } else {
        Some((offsets[n / 2 - 1] + offsets[n / 2]) / Decimal::TWO)
    }
}
