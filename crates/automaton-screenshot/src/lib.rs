//! Adaptive-rate screenshot producer: a continuously running per-session
//! task rather than an on-demand capture call, so idle sessions cost almost
//! nothing and active ones get a responsive stream.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use automaton_browser_worker::{BrowserDriver, Worker};
use automaton_core_types::OutboundEvent;
use automaton_event_bus::{SessionFanout, HIGH_WATER_MARK, LOW_WATER_MARK};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

const IDLE_HZ: f64 = 2.0;
const BURST_HZ: f64 = 10.0;
const BURST_DURATION: Duration = Duration::from_secs(2);
const SUSPENDED_POLL: Duration = Duration::from_millis(250);
const DEFAULT_QUALITY: u8 = 80;
const QUALITY_STEP: u8 = 10;
const MIN_QUALITY: u8 = 1;
const MAX_QUALITY: u8 = 100;

/// Per-session adaptive screenshot producer. One instance is driven by a
/// spawned task for the lifetime of a session; `notify_activity` bumps it
/// into its 2-second 10 Hz burst window.
pub struct ScreenshotStreamer<D: BrowserDriver> {
    worker: Arc<Worker<D>>,
    fanout: Arc<SessionFanout>,
    base_rate_hz: f64,
    quality: AtomicU8,
    burst_until: Mutex<Option<Instant>>,
    stop: Notify,
    stopped: AtomicBool,
}

impl<D: BrowserDriver + 'static> ScreenshotStreamer<D> {
    pub fn new(worker: Arc<Worker<D>>, fanout: Arc<SessionFanout>, base_rate_hz: f64) -> Arc<Self> {
        Arc::new(Self {
            worker,
            fanout,
            base_rate_hz: if base_rate_hz > 0.0 { base_rate_hz } else { IDLE_HZ },
            quality: AtomicU8::new(DEFAULT_QUALITY),
            burst_until: Mutex::new(None),
            stop: Notify::new(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Called by the orchestrator after any Worker action completes or a
    /// navigation event is observed.
    pub fn notify_activity(&self) {
        *self.burst_until.lock() = Some(Instant::now() + BURST_DURATION);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop.notify_waiters();
    }

    fn is_bursting(&self) -> bool {
        self.burst_until
            .lock()
            .map(|deadline| Instant::now() < deadline)
            .unwrap_or(false)
    }

    fn frame_interval(&self) -> Duration {
        let hz = if self.is_bursting() { BURST_HZ } else { self.base_rate_hz };
        Duration::from_secs_f64(1.0 / hz.max(0.1))
    }

    /// Adjust JPEG quality toward the spec's targets based on average
    /// client backpressure.
    fn adapt_quality(&self) {
        let load = self.fanout.average_load_factor();
        let current = self.quality.load(Ordering::Relaxed);
        let next = if load > HIGH_WATER_MARK {
            current.saturating_sub(QUALITY_STEP).max(MIN_QUALITY)
        } else if load < LOW_WATER_MARK && current < DEFAULT_QUALITY {
            (current + QUALITY_STEP).min(DEFAULT_QUALITY)
        } else {
            current
        };
        self.quality.store(next.clamp(MIN_QUALITY, MAX_QUALITY), Ordering::Relaxed);
    }

    pub fn current_quality(&self) -> u8 {
        self.quality.load(Ordering::Relaxed)
    }

    /// Re-encode captured frame bytes at the current adaptive quality.
    /// A driver that can't produce decodable image bytes (e.g. the
    /// in-memory `SimulatedDriver`, which returns an empty payload) is
    /// passed through unchanged rather than failing the frame.
    fn reencode(&self, data_base64: &str) -> String {
        if data_base64.is_empty() {
            return data_base64.to_string();
        }
        let Ok(raw) = STANDARD.decode(data_base64) else {
            return data_base64.to_string();
        };
        let Ok(image) = image::load_from_memory(&raw) else {
            return data_base64.to_string();
        };
        let mut buf = Vec::new();
        let quality = self.current_quality();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
        match image.write_with_encoder(encoder) {
            Ok(()) => STANDARD.encode(buf),
            Err(err) => {
                warn!(?err, "failed to re-encode screenshot frame; passing through original bytes");
                data_base64.to_string()
            }
        }
    }

    /// Run the producer loop until `stop` is called. Suspended (no capture,
    /// no broadcast) whenever no client is attached.
    pub async fn run(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            if self.fanout.client_count() == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(SUSPENDED_POLL) => continue,
                    _ = self.stop.notified() => return,
                }
            }

            self.adapt_quality();
            match self.worker.snapshot().await {
                Ok(frame) => {
                    let data = self.reencode(&frame.data_base64);
                    self.fanout.broadcast(OutboundEvent::RealTimeScreenshot {
                        data,
                        url: frame.url,
                        frame_id: frame.id.0,
                    });
                }
                Err(err) => debug!(?err, "screenshot capture failed; skipping frame"),
            }

            let interval = self.frame_interval();
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.stop.notified() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automaton_browser_worker::SimulatedDriver;

    fn streamer(rate: f64) -> (Arc<ScreenshotStreamer<SimulatedDriver>>, Arc<SessionFanout>) {
        let driver = Arc::new(SimulatedDriver::new("https://example.test"));
        let worker = Arc::new(Worker::new(driver));
        let fanout = Arc::new(SessionFanout::new());
        (ScreenshotStreamer::new(worker, fanout.clone(), rate), fanout)
    }

    #[test]
    fn idle_interval_matches_base_rate() {
        let (streamer, _fanout) = streamer(2.0);
        let interval = streamer.frame_interval();
        assert_eq!(interval, Duration::from_millis(500));
    }

    #[test]
    fn activity_triggers_a_burst_window() {
        let (streamer, _fanout) = streamer(2.0);
        streamer.notify_activity();
        let interval = streamer.frame_interval();
        assert_eq!(interval, Duration::from_millis(100));
    }

    #[test]
    fn quality_decreases_under_backpressure_and_recovers() {
        let (streamer, fanout) = streamer(2.0);
        let (_id, outbox) = fanout.attach(4);
        for frame_id in 0..4u64 {
            fanout.broadcast(OutboundEvent::RealTimeScreenshot {
                data: format!("f{frame_id}"),
                url: "https://x".into(),
                frame_id,
            });
        }
        let _ = outbox;
        streamer.adapt_quality();
        assert_eq!(streamer.current_quality(), DEFAULT_QUALITY - QUALITY_STEP);
    }

    #[tokio::test]
    async fn suspended_without_clients_emits_nothing() {
        let (streamer, fanout) = streamer(2.0);
        assert_eq!(fanout.client_count(), 0);
        let handle = tokio::spawn(streamer.clone().run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        streamer.stop();
        let _ = handle.await;
    }
}
