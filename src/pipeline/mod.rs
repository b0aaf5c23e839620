/// Decode, filter, aggregate and publish inbound notifications
pub mod aggregator;
pub mod filter;
pub mod scheduler;

use log::{error, info, warn};
use std::sync::Arc;
use std::time::Instant;

use crate::bluetooth::frame::decode;
use crate::mqtt::{BrokerSession, PublishError};
use crate::mqtt::transport::Transport;
use crate::utils::hex_dump;
use aggregator::SampleAggregator;
use filter::ChangeFilter;
use scheduler::PublishScheduler;

/// Receiver of raw characteristic notifications
pub trait NotificationSink {
    fn on_notification(&mut self, handle: u16, payload: &[u8]);
}

/// Destination for window means
pub trait StatePublisher {
    fn publish_state(&self, readings: Option<(f64, f64)>) -> Result<(), PublishError>;
}

impl<T: Transport> StatePublisher for BrokerSession<T> {
    fn publish_state(&self, readings: Option<(f64, f64)>) -> Result<(), PublishError> {
        BrokerSession::publish_state(self, readings)
    }
}

impl<P: StatePublisher + ?Sized> StatePublisher for Arc<P> {
    fn publish_state(&self, readings: Option<(f64, f64)>) -> Result<(), PublishError> {
        (**self).publish_state(readings)
    }
}

/// Runs every notification through decoder, change filter, aggregator and
/// publish scheduler
pub struct TelemetryPipeline<P> {
    filter: ChangeFilter,
    aggregator: SampleAggregator,
    scheduler: PublishScheduler,
    publisher: P,
}

impl<P: StatePublisher> TelemetryPipeline<P> {
    pub fn new(publisher: P) -> Self {
        Self::with_scheduler(publisher, PublishScheduler::default())
    }

    pub fn with_scheduler(publisher: P, scheduler: PublishScheduler) -> Self {
        Self {
            filter: ChangeFilter::new(),
            aggregator: SampleAggregator::new(),
            scheduler,
            publisher,
        }
    }

    /// Samples accumulated since the last accepted publish
    pub fn pending_samples(&self) -> u32 {
        self.aggregator.count()
    }

    /// Handle one notification that arrived at `now`
    pub fn handle_at(&mut self, handle: u16, payload: &[u8], now: Instant) {
        match decode(payload) {
            Ok(reading) => {
                if self.filter.should_log(&reading) {
                    info!(
                        "{:.2}V {:.2}A {:.0}C {:.2}Ah {:.2}Wh",
                        reading.voltage,
                        reading.current,
                        reading.temperature,
                        reading.capacity_ah,
                        reading.capacity_wh
                    );
                }
                self.aggregator.add(reading.current, reading.voltage);
            }
            Err(e) => {
                error!(
                    "Handle Value Not/Ind: 0x{:04x} - ({} bytes): {}",
                    handle,
                    payload.len(),
                    e
                );
                for line in hex_dump(payload) {
                    error!("  {}", line);
                }
            }
        }

        if !self.scheduler.try_acquire(now) {
            return;
        }

        let mean = self.aggregator.flush();
        match self.publisher.publish_state(mean.readings()) {
            Ok(()) => self.aggregator.reset(),
            Err(e) => warn!(
                "State not published ({}), keeping {} samples for the next window",
                e,
                self.pending_samples()
            ),
        }
    }
}

impl<P: StatePublisher> NotificationSink for TelemetryPipeline<P> {
    fn on_notification(&mut self, handle: u16, payload: &[u8]) {
        self.handle_at(handle, payload, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::frame::{FRAME_LEN, FRAME_MARKER};
    use std::cell::{Cell, RefCell};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingPublisher {
        published: RefCell<Vec<Option<(f64, f64)>>>,
        offline: Cell<bool>,
    }

    impl StatePublisher for RecordingPublisher {
        fn publish_state(&self, readings: Option<(f64, f64)>) -> Result<(), PublishError> {
            if self.offline.get() {
                return Err(PublishError::Offline);
            }
            self.published.borrow_mut().push(readings);
            Ok(())
        }
    }

    /// Frame with the given raw voltage (0.1 V) and current (mA) counts
    fn frame(decivolts: u32, milliamps: u32) -> Vec<u8> {
        let mut frame = vec![0u8; FRAME_LEN];
        frame[..2].copy_from_slice(&FRAME_MARKER);
        frame[4..7].copy_from_slice(&decivolts.to_be_bytes()[1..]);
        frame[7..10].copy_from_slice(&milliamps.to_be_bytes()[1..]);
        frame
    }

    fn secs(v: u64) -> Duration {
        Duration::from_secs(v)
    }

    fn assert_mean(actual: Option<(f64, f64)>, current: f64, voltage: f64) {
        let (c, v) = actual.unwrap();
        assert!((c - current).abs() < 1e-9, "current {} != {}", c, current);
        assert!((v - voltage).abs() < 1e-9, "voltage {} != {}", v, voltage);
    }

    #[test]
    fn test_first_frame_publishes_immediately() {
        let mut pipeline = TelemetryPipeline::new(RecordingPublisher::default());
        pipeline.handle_at(0x0010, &frame(520, 2000), Instant::now());

        let published = pipeline.publisher.published.borrow();
        assert_eq!(published.len(), 1);
        assert_mean(published[0], 2.0, 52.0);
        drop(published);
        assert_eq!(pipeline.pending_samples(), 0);
    }

    #[test]
    fn test_window_mean_is_published_after_interval() {
        let start = Instant::now();
        let mut pipeline = TelemetryPipeline::new(RecordingPublisher::default());

        pipeline.handle_at(0x0010, &frame(500, 1000), start);
        pipeline.handle_at(0x0010, &frame(500, 2000), start + secs(10));
        pipeline.handle_at(0x0010, &frame(520, 4000), start + secs(30));
        assert_eq!(pipeline.publisher.published.borrow().len(), 1);
        assert_eq!(pipeline.pending_samples(), 2);

        pipeline.handle_at(0x0010, &frame(540, 6000), start + secs(60));
        let published = pipeline.publisher.published.borrow();
        assert_eq!(published.len(), 2);
        assert_mean(published[1], 4.0, 52.0);
    }

    #[test]
    fn test_failed_publish_keeps_samples() {
        let start = Instant::now();
        let mut pipeline = TelemetryPipeline::new(RecordingPublisher::default());
        pipeline.publisher.offline.set(true);

        pipeline.handle_at(0x0010, &frame(500, 1000), start);
        assert_eq!(pipeline.pending_samples(), 1);

        pipeline.publisher.offline.set(false);
        pipeline.handle_at(0x0010, &frame(500, 3000), start + secs(30));
        assert!(pipeline.publisher.published.borrow().is_empty());

        pipeline.handle_at(0x0010, &frame(530, 5000), start + secs(60));
        let published = pipeline.publisher.published.borrow();
        assert_eq!(published.len(), 1);
        assert_mean(published[0], 3.0, 51.0);
        drop(published);
        assert_eq!(pipeline.pending_samples(), 0);
    }

    #[test]
    fn test_unchanged_readings_still_aggregate() {
        let start = Instant::now();
        let mut pipeline = TelemetryPipeline::new(RecordingPublisher::default());
        pipeline.handle_at(0x0010, &frame(500, 1000), start);

        for i in 1..=3 {
            pipeline.handle_at(0x0010, &frame(500, 1000), start + secs(i));
        }
        assert_eq!(pipeline.pending_samples(), 3);
    }

    #[test]
    fn test_rejected_frame_leaves_accumulator_alone() {
        let start = Instant::now();
        let mut pipeline = TelemetryPipeline::new(RecordingPublisher::default());
        pipeline.handle_at(0x0010, &frame(500, 1000), start);
        pipeline.handle_at(0x0010, &frame(500, 1000), start + secs(1));

        pipeline.handle_at(0x0010, &[0xff, 0x55, 0x01], start + secs(2));
        let mut bad_marker = frame(500, 1000);
        bad_marker[0] = 0x00;
        pipeline.handle_at(0x0010, &bad_marker, start + secs(3));

        assert_eq!(pipeline.pending_samples(), 1);
        assert_eq!(pipeline.publisher.published.borrow().len(), 1);
    }

    #[test]
    fn test_window_without_samples_publishes_host_state_only() {
        let start = Instant::now();
        let mut pipeline = TelemetryPipeline::new(RecordingPublisher::default());
        pipeline.handle_at(0x0010, &frame(500, 1000), start);

        // Only malformed traffic in the next window
        pipeline.handle_at(0x0010, &[0u8; 12], start + secs(61));
        let published = pipeline.publisher.published.borrow();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1], None);
    }

    #[test]
    fn test_no_traffic_no_publish() {
        let start = Instant::now();
        let mut pipeline = TelemetryPipeline::with_scheduler(
            RecordingPublisher::default(),
            PublishScheduler::new(secs(60)),
        );
        pipeline.handle_at(0x0010, &frame(500, 1000), start);
        pipeline.handle_at(0x0010, &frame(500, 1000), start + secs(5));

        // Nothing arrives for ten minutes, so nothing else is published
        assert_eq!(pipeline.publisher.published.borrow().len(), 1);

        pipeline.handle_at(0x0010, &frame(500, 1000), start + secs(600));
        assert_eq!(pipeline.publisher.published.borrow().len(), 2);
    }
}
