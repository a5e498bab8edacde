//! Shared telemetry state and publication.
//!
//! The scheduler is the only writer. Publishing holds the publication lock
//! for the whole assemble-and-emit step, so a tick's snapshot reaches every
//! sink before the next one starts, and once [`TelemetryState::close`] returns
//! no sink sees another snapshot.

use netpulse_types::{LatencySample, NetworkInfo, RateSample, TelemetrySnapshot};
use parking_lot::{Mutex, RwLock};

use crate::output::Sink;

/// Fields that make up the next snapshot.
#[derive(Debug, Default)]
struct Assembled {
    sequence: u64,
    rate: RateSample,
    latency: Option<LatencySample>,
    network: NetworkInfo,
    latest: Option<TelemetrySnapshot>,
}

impl Assembled {
    fn next(&mut self) -> TelemetrySnapshot {
        self.sequence += 1;
        let snapshot = TelemetrySnapshot::builder()
            .sequence(self.sequence)
            .rate(self.rate)
            .maybe_latency(self.latency)
            .network(self.network.clone())
            .build();
        self.latest = Some(snapshot.clone());
        snapshot
    }
}

#[derive(Debug, Default)]
struct Publication {
    closed: bool,
    sinks: Vec<Sink>,
}

#[derive(Debug, Default)]
pub(crate) struct TelemetryState {
    assembled: RwLock<Assembled>,
    publication: Mutex<Publication>,
}

impl TelemetryState {
    /// Install the sinks for a run.
    pub fn attach(&self, sinks: Vec<Sink>) {
        let mut publication = self.publication.lock();
        if !publication.closed {
            publication.sinks = sinks;
        }
    }

    /// Record a fast-loop result and publish it.
    ///
    /// Returns the published sequence number, or `None` once closed.
    pub fn publish_sample(&self, rate: RateSample, latency: LatencySample) -> Option<u64> {
        self.publish(|assembled| {
            assembled.rate = rate;
            assembled.latency = Some(latency);
        })
    }

    /// Replace the network info wholesale and publish.
    ///
    /// A field that failed to resolve this time is published as `None`; the
    /// previous value is not carried over.
    pub fn publish_network(&self, network: NetworkInfo) -> Option<u64> {
        self.publish(|assembled| assembled.network = network)
    }

    fn publish(&self, update: impl FnOnce(&mut Assembled)) -> Option<u64> {
        let publication = self.publication.lock();
        if publication.closed {
            return None;
        }

        let snapshot = {
            let mut assembled = self.assembled.write();
            update(&mut assembled);
            assembled.next()
        };

        for sink in &publication.sinks {
            sink.emit(&snapshot);
        }
        tracing::trace!(sequence = snapshot.sequence, "published snapshot");

        Some(snapshot.sequence)
    }

    /// Stop all further publication and release the sinks.
    pub fn close(&self) {
        let mut publication = self.publication.lock();
        publication.closed = true;
        publication.sinks.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.publication.lock().closed
    }

    /// The most recently published snapshot.
    pub fn latest(&self) -> Option<TelemetrySnapshot> {
        self.assembled.read().latest.clone()
    }

    pub fn sequence(&self) -> u64 {
        self.assembled.read().sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Output;

    #[test]
    fn sequence_increases_per_publish() {
        let state = TelemetryState::default();
        assert_eq!(state.latest(), None);

        assert_eq!(state.publish_sample(RateSample::ZERO, LatencySample::timeout()), Some(1));
        assert_eq!(state.publish_network(NetworkInfo::unknown()), Some(2));
        assert_eq!(state.sequence(), 2);
        assert_eq!(state.latest().unwrap().sequence, 2);
    }

    #[test]
    fn network_update_keeps_latest_sample() {
        let state = TelemetryState::default();
        state.publish_sample(RateSample::new(3.0, 1.0), LatencySample::measured(20.0));

        let network = NetworkInfo {
            gateway: Some("192.168.1.1".into()),
            ..Default::default()
        };
        state.publish_network(network.clone());

        let latest = state.latest().unwrap();
        assert_eq!(latest.rate, RateSample::new(3.0, 1.0));
        assert_eq!(latest.latency, Some(LatencySample::measured(20.0)));
        assert_eq!(latest.network, network);
    }

    #[test]
    fn network_is_replaced_wholesale() {
        let state = TelemetryState::default();
        state.publish_network(NetworkInfo {
            local_ip: Some("10.0.0.2".into()),
            public_ip: Some("203.0.113.1".into()),
            ..Default::default()
        });
        state.publish_network(NetworkInfo {
            public_ip: Some("203.0.113.2".into()),
            ..Default::default()
        });

        let network = state.latest().unwrap().network;
        assert_eq!(network.local_ip, None);
        assert_eq!(network.public_ip.as_deref(), Some("203.0.113.2"));
    }

    #[tokio::test]
    async fn closed_state_publishes_nothing() {
        let (output, mut rx) = Output::channel(8);
        let state = TelemetryState::default();
        state.attach(vec![output.activate()]);
        drop(output);

        assert_eq!(state.publish_sample(RateSample::ZERO, LatencySample::timeout()), Some(1));
        state.close();
        assert!(state.is_closed());
        assert_eq!(state.publish_network(NetworkInfo::unknown()), None);

        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        assert!(rx.recv().await.is_none(), "sinks are released on close");
        assert_eq!(state.sequence(), 1);
    }

    #[test]
    fn attach_after_close_is_ignored() {
        let (output, mut rx) = Output::channel(8);
        let state = TelemetryState::default();
        state.close();
        state.attach(vec![output.activate()]);

        state.publish_sample(RateSample::ZERO, LatencySample::timeout());
        assert!(rx.try_recv().is_err());
    }
}
