//! Counter sampler: cumulative byte counters in, instantaneous rates out.
//!
//! Reading the counters is separated from deriving rates so the rate math can
//! be exercised without touching the host. [`derive_rate`] holds all of the
//! baseline rules; [`CounterSampler`] pairs it with a [`CounterSource`].

use std::time::Instant;

use netpulse_types::{ByteCounterSample, RateSample, BYTES_PER_KB};
use sysinfo::Networks;

/// Source of cumulative byte counters.
///
/// Reads never fail. An implementation that cannot reach the host counters
/// returns the last reading it had.
pub trait CounterSource: Send {
    fn read(&mut self) -> ByteCounterSample;
}

impl<S: CounterSource + ?Sized> CounterSource for Box<S> {
    fn read(&mut self) -> ByteCounterSample {
        (**self).read()
    }
}

/// Counters summed over every interface reported by `sysinfo`.
#[derive(Debug)]
pub struct SysinfoCounters {
    networks: Networks,
    origin: Instant,
    last: Option<(u64, u64)>,
}

impl SysinfoCounters {
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
            origin: Instant::now(),
            last: None,
        }
    }

    fn totals(&mut self) -> Option<(u64, u64)> {
        self.networks.refresh_list();
        if self.networks.is_empty() {
            return None;
        }

        let (sent, received) = self
            .networks
            .iter()
            .fold((0u64, 0u64), |(sent, received), (_, data)| {
                (
                    sent.saturating_add(data.total_transmitted()),
                    received.saturating_add(data.total_received()),
                )
            });
        Some((sent, received))
    }
}

impl Default for SysinfoCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSource for SysinfoCounters {
    fn read(&mut self) -> ByteCounterSample {
        let timestamp = self.origin.elapsed().as_secs_f64();

        let (sent, received) = match self.totals() {
            Some(totals) => {
                self.last = Some(totals);
                totals
            }
            None => {
                tracing::debug!("no network interfaces reported, reusing last counters");
                self.last.unwrap_or((0, 0))
            }
        };

        ByteCounterSample::new(timestamp, sent, received)
    }
}

/// Derive a rate from a baseline and a fresh reading.
///
/// Returns the rate for this cycle and the sample to keep as the next
/// baseline:
///
/// - no baseline: zero rate, `current` becomes the baseline
/// - `elapsed <= 0`: `last_rate` unchanged, the baseline is kept
/// - a counter went backwards: zero rate, `current` becomes the baseline
/// - otherwise `(Δbytes / elapsed) / 1024` per direction
pub fn derive_rate(
    previous: Option<&ByteCounterSample>,
    current: ByteCounterSample,
    last_rate: RateSample,
) -> (RateSample, ByteCounterSample) {
    let Some(previous) = previous else {
        return (RateSample::ZERO, current);
    };

    let elapsed = current.elapsed_since(previous);
    if elapsed <= 0.0 || !elapsed.is_finite() {
        tracing::debug!(elapsed, "non-positive elapsed time, keeping previous rate");
        return (last_rate, *previous);
    }

    if current.is_reset_from(previous) {
        tracing::debug!(
            sent = current.bytes_sent,
            received = current.bytes_received,
            "byte counters went backwards, re-baselining"
        );
        return (RateSample::ZERO, current);
    }

    let received = (current.bytes_received - previous.bytes_received) as f64;
    let sent = (current.bytes_sent - previous.bytes_sent) as f64;

    let rate = RateSample::new(
        received / elapsed / BYTES_PER_KB,
        sent / elapsed / BYTES_PER_KB,
    );
    (rate, current)
}

/// Reads counters from a source and turns consecutive readings into rates.
#[derive(Debug)]
pub struct CounterSampler<S> {
    source: S,
    last_rate: RateSample,
}

impl<S: CounterSource> CounterSampler<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            last_rate: RateSample::ZERO,
        }
    }

    /// Take one reading and derive the rate against `previous`.
    pub fn sample(&mut self, previous: Option<&ByteCounterSample>) -> (RateSample, ByteCounterSample) {
        let current = self.source.read();
        let (rate, baseline) = derive_rate(previous, current, self.last_rate);
        self.last_rate = rate;
        (rate, baseline)
    }
}

impl CounterSampler<SysinfoCounters> {
    /// Sampler over the host's interface counters.
    pub fn system() -> Self {
        Self::new(SysinfoCounters::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a fixed list of readings, then repeats the last one.
    struct ScriptedCounters {
        readings: VecDeque<ByteCounterSample>,
        last: ByteCounterSample,
    }

    impl ScriptedCounters {
        fn new(readings: impl IntoIterator<Item = ByteCounterSample>) -> Self {
            Self {
                readings: readings.into_iter().collect(),
                last: ByteCounterSample::default(),
            }
        }
    }

    impl CounterSource for ScriptedCounters {
        fn read(&mut self) -> ByteCounterSample {
            if let Some(next) = self.readings.pop_front() {
                self.last = next;
            }
            self.last
        }
    }

    #[test]
    fn first_sample_establishes_baseline() {
        let current = ByteCounterSample::new(3.0, 10, 20);
        let (rate, baseline) = derive_rate(None, current, RateSample::new(5.0, 5.0));
        assert!(rate.is_zero());
        assert_eq!(baseline, current);
    }

    #[test]
    fn one_second_scenario() {
        let t0 = ByteCounterSample::new(0.0, 1000, 2000);
        let t1 = ByteCounterSample::new(1.0, 2024, 3072);

        let (rate, baseline) = derive_rate(Some(&t0), t1, RateSample::ZERO);

        // (3072 - 2000) / 1.0 / 1024 and (2024 - 1000) / 1.0 / 1024
        assert!((rate.download_kbps - 1072.0 / 1024.0).abs() < 1e-9);
        assert!((rate.upload_kbps - 1.0).abs() < 1e-9);
        assert_eq!(baseline, t1);
    }

    #[test]
    fn rate_is_delta_over_elapsed() {
        let t0 = ByteCounterSample::new(10.0, 0, 0);
        let t1 = ByteCounterSample::new(12.0, 4096, 8192);

        let (rate, _) = derive_rate(Some(&t0), t1, RateSample::ZERO);

        assert_eq!(rate.download_kbps, 4.0);
        assert_eq!(rate.upload_kbps, 2.0);
    }

    #[test]
    fn non_positive_elapsed_keeps_previous_rate() {
        let previous_rate = RateSample::new(7.5, 1.25);
        let t0 = ByteCounterSample::new(5.0, 100, 100);

        for ts in [5.0, 4.0] {
            let t1 = ByteCounterSample::new(ts, 9000, 9000);
            let (rate, baseline) = derive_rate(Some(&t0), t1, previous_rate);
            assert_eq!(rate, previous_rate);
            assert_eq!(baseline, t0);
        }
    }

    #[test]
    fn counter_reset_rebaselines() {
        let t0 = ByteCounterSample::new(0.0, 5000, 5000);
        let t1 = ByteCounterSample::new(1.0, 10, 6000);

        let (rate, baseline) = derive_rate(Some(&t0), t1, RateSample::new(3.0, 3.0));
        assert!(rate.is_zero());
        assert_eq!(baseline, t1);

        // the cycle after a reset measures from the new baseline
        let t2 = ByteCounterSample::new(2.0, 1034, 7024);
        let (rate, _) = derive_rate(Some(&baseline), t2, rate);
        assert_eq!(rate.upload_kbps, 1.0);
        assert_eq!(rate.download_kbps, 1.0);
    }

    #[test]
    fn sampler_threads_last_rate_through_anomalies() {
        let mut sampler = CounterSampler::new(ScriptedCounters::new([
            ByteCounterSample::new(0.0, 0, 0),
            ByteCounterSample::new(1.0, 1024, 2048),
            ByteCounterSample::new(1.0, 4096, 4096),
        ]));

        let (rate, baseline) = sampler.sample(None);
        assert!(rate.is_zero());

        let (rate, baseline) = sampler.sample(Some(&baseline));
        assert_eq!(rate, RateSample::new(2.0, 1.0));

        // same timestamp again: previous rate, baseline untouched
        let (rate, kept) = sampler.sample(Some(&baseline));
        assert_eq!(rate, RateSample::new(2.0, 1.0));
        assert_eq!(kept, baseline);
    }

    #[test]
    fn system_counters_are_monotonic_in_time() {
        let mut counters = SysinfoCounters::new();
        let a = counters.read();
        let b = counters.read();
        assert!(b.timestamp_monotonic >= a.timestamp_monotonic);
    }
}
