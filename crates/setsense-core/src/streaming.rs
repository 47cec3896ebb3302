//! Characteristic stream decoding.
//!
//! A [`RepStream`] subscribes to the rep counter characteristic (and the
//! status characteristic when the sensor has one), seeds itself with one
//! read, then merges pushed notifications and a periodic fallback read into a
//! single stream of [`RepStreamSample`]s.
//!
//! Polls and notifications are not ordered relative to each other, and a poll
//! often repeats a value a notification already delivered. Consumers must
//! therefore count by "the counter increased", never by sample position.
//!
//! The stream ends with one `Err(StreamError)` item when the link drops or the
//! fallback read keeps failing. It never retries on its own.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::Stream;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use setsense_types::uuid::{REP_COUNTER, REP_SERVICE, REP_STATUS};
use setsense_types::{Channel, RepStreamSample, SampleSource};

use crate::error::{Error, Result, StreamError};
use crate::transport::{Link, NotificationStream, SharedLink};
use crate::util::unix_millis;

/// Options for a [`RepStream`].
///
/// ```
/// use std::time::Duration;
/// use setsense_core::DecoderOptions;
///
/// let options = DecoderOptions::builder()
///     .poll_interval(Duration::from_millis(500))
///     .max_consecutive_failures(5)
///     .build();
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Service both characteristics live under.
    pub service: Uuid,
    /// Rep counter characteristic.
    pub primary: Uuid,
    /// Optional status characteristic, used for liveness only.
    pub secondary: Option<Uuid>,
    /// Fallback read interval.
    /// Default: 750 ms.
    pub poll_interval: Duration,
    /// Buffer size for the sample channel.
    /// Default: 32 samples.
    pub buffer_size: usize,
    /// Consecutive fallback read failures that end the stream.
    /// Default: 3.
    pub max_consecutive_failures: u32,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            service: REP_SERVICE,
            primary: REP_COUNTER,
            secondary: Some(REP_STATUS),
            poll_interval: Duration::from_millis(750),
            buffer_size: 32,
            max_consecutive_failures: 3,
        }
    }
}

impl DecoderOptions {
    /// Create a new builder for DecoderOptions.
    pub fn builder() -> DecoderOptionsBuilder {
        DecoderOptionsBuilder::default()
    }

    /// Validate the options and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::invalid_config("buffer_size must be > 0"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::invalid_config("poll_interval must be > 0"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(Error::invalid_config("max_consecutive_failures must be > 0"));
        }
        if self.secondary == Some(self.primary) {
            return Err(Error::invalid_config(
                "secondary characteristic must differ from primary",
            ));
        }
        Ok(())
    }
}

/// Builder for DecoderOptions.
#[derive(Debug, Clone, Default)]
pub struct DecoderOptionsBuilder {
    options: DecoderOptions,
}

impl DecoderOptionsBuilder {
    /// Set the service.
    #[must_use]
    pub fn service(mut self, service: Uuid) -> Self {
        self.options.service = service;
        self
    }

    /// Set the rep counter characteristic.
    #[must_use]
    pub fn primary(mut self, primary: Uuid) -> Self {
        self.options.primary = primary;
        self
    }

    /// Set or clear the status characteristic.
    #[must_use]
    pub fn secondary(mut self, secondary: Option<Uuid>) -> Self {
        self.options.secondary = secondary;
        self
    }

    /// Set the fallback read interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.options.poll_interval = interval;
        self
    }

    /// Set the buffer size.
    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.options.buffer_size = size;
        self
    }

    /// Set the failure limit for fallback reads.
    #[must_use]
    pub fn max_consecutive_failures(mut self, max: u32) -> Self {
        self.options.max_consecutive_failures = max;
        self
    }

    /// Build the DecoderOptions.
    #[must_use]
    pub fn build(self) -> DecoderOptions {
        self.options
    }
}

/// Result type for stream items.
pub type SampleResult = std::result::Result<RepStreamSample, StreamError>;

/// Decoded samples from one attached sensor.
pub struct RepStream {
    receiver: mpsc::Receiver<SampleResult>,
    handle: tokio::task::JoinHandle<()>,
    cancel_token: CancellationToken,
    link: SharedLink,
    subscribed: Vec<Uuid>,
}

impl std::fmt::Debug for RepStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepStream")
            .field("link", &self.link.id())
            .field("subscribed", &self.subscribed)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl RepStream {
    /// Subscribe to the sensor and start decoding.
    ///
    /// Fails if the options are invalid or the primary characteristic cannot
    /// be subscribed. A missing secondary characteristic is not an error.
    #[tracing::instrument(level = "info", skip_all, fields(peripheral = %link.id()))]
    pub async fn attach(link: SharedLink, options: DecoderOptions) -> Result<Self> {
        options.validate()?;

        let notifications = link.notifications().await?;
        link.subscribe(options.primary).await?;
        let mut subscribed = vec![options.primary];

        let mut secondary = None;
        if let Some(uuid) = options.secondary {
            if !link.has_characteristic(options.service, uuid).await {
                debug!("Status characteristic {} not offered, skipping", uuid);
            } else if let Err(e) = link.subscribe(uuid).await {
                warn!("Status characteristic present but not subscribable: {}", e);
            } else {
                subscribed.push(uuid);
                secondary = Some(uuid);
            }
        }
        info!(secondary = secondary.is_some(), "Attached rep stream");

        let (tx, rx) = mpsc::channel(options.buffer_size);
        let cancel_token = CancellationToken::new();
        let pump = Pump {
            link: SharedLink::clone(&link),
            options,
            secondary,
            tx,
            token: cancel_token.clone(),
        };
        let handle = tokio::spawn(pump.run(notifications));

        Ok(Self {
            receiver: rx,
            handle,
            cancel_token,
            link,
            subscribed,
        })
    }

    /// Stop polling and delivery, then disable notifications.
    ///
    /// Undelivered samples are discarded. Unsubscribe failures are ignored;
    /// the link may already be gone.
    pub async fn detach(mut self) {
        self.cancel_token.cancel();
        // A pump parked on a full buffer wakes with a send error.
        self.receiver.close();
        let _ = (&mut self.handle).await;
        for uuid in std::mem::take(&mut self.subscribed) {
            if let Err(e) = self.link.unsubscribe(uuid).await {
                debug!("unsubscribe {} failed: {}", uuid, e);
            }
        }
        info!("Detached rep stream");
    }

    /// Get a cancellation token that can be used to stop the stream externally.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Check if the background task is still running.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Whether the status characteristic was subscribed.
    pub fn has_secondary(&self) -> bool {
        self.subscribed.len() > 1
    }
}

impl Drop for RepStream {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl Stream for RepStream {
    type Item = SampleResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

struct Pump {
    link: SharedLink,
    options: DecoderOptions,
    secondary: Option<Uuid>,
    tx: mpsc::Sender<SampleResult>,
    token: CancellationToken,
}

impl Pump {
    async fn run(self, mut notifications: NotificationStream) {
        let max_failures = self.options.max_consecutive_failures;
        let mut consecutive_failures: u32 = 0;

        let Some(seed) = self.read_primary().await else {
            return;
        };
        match seed {
            Ok(payload) => {
                if !self.emit(&payload, Channel::Primary, SampleSource::Seed).await {
                    return;
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!("Seed read failed: {}", e);
            }
        }

        let mut ticker = interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the seed read stands in for it.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    debug!("Rep stream cancelled, stopping");
                    break;
                }
                notification = notifications.next() => {
                    let Some(notification) = notification else {
                        warn!("Notification stream ended, sensor disconnected");
                        self.deliver(Err(StreamError::Disconnected)).await;
                        break;
                    };
                    if let Some(channel) = self.channel_of(notification.characteristic)
                        && !self.emit(&notification.value, channel, SampleSource::Notification).await
                    {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let Some(read) = self.read_primary().await else {
                        break;
                    };
                    match read {
                        Ok(payload) => {
                            consecutive_failures = 0;
                            if !self.emit(&payload, Channel::Primary, SampleSource::Poll).await {
                                break;
                            }
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            warn!(
                                "Fallback read failed (failure {}/{}): {}",
                                consecutive_failures, max_failures, e
                            );
                            if consecutive_failures >= max_failures {
                                let err = if self.link.is_connected().await {
                                    StreamError::Characteristic { detail: e.to_string() }
                                } else {
                                    StreamError::Disconnected
                                };
                                warn!("Ending rep stream: {}", err);
                                self.deliver(Err(err)).await;
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    fn channel_of(&self, characteristic: Uuid) -> Option<Channel> {
        if characteristic == self.options.primary {
            Some(Channel::Primary)
        } else if Some(characteristic) == self.secondary {
            Some(Channel::Secondary)
        } else {
            None
        }
    }

    /// Read the counter, or `None` if the stream is cancelled first.
    async fn read_primary(&self) -> Option<Result<Vec<u8>>> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                debug!("Rep stream cancelled during read");
                None
            }
            read = self.link.read(self.options.primary) => Some(read),
        }
    }

    /// Decode and forward one payload. Returns `false` once the stream is
    /// cancelled or the receiver is gone.
    async fn emit(&self, payload: &[u8], channel: Channel, source: SampleSource) -> bool {
        let sample = RepStreamSample::from_payload(payload, channel, source, unix_millis());
        if sample.parsed_value.is_none() {
            debug!(raw = %sample.raw_text, ?channel, ?source, "Payload carries no counter value");
        }
        self.deliver(Ok(sample)).await
    }

    async fn deliver(&self, item: SampleResult) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            sent = self.tx.send(item) => {
                if sent.is_err() {
                    debug!("Stream receiver dropped, stopping");
                }
                sent.is_ok()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::mock::{MockLink, MockTransport};
    use crate::transport::{AdapterState, Transport};

    async fn attached(link: &Arc<MockLink>, options: DecoderOptions) -> RepStream {
        let transport = MockTransport::new(AdapterState::PoweredOn);
        transport.add_peripheral(Arc::clone(link));
        let shared = transport.connect(&link.advertisement()).await.unwrap();
        RepStream::attach(shared, options).await.unwrap()
    }

    #[test]
    fn test_decoder_options_default() {
        let opts = DecoderOptions::default();
        assert_eq!(opts.poll_interval, Duration::from_millis(750));
        assert_eq!(opts.max_consecutive_failures, 3);
        assert_eq!(opts.secondary, Some(REP_STATUS));
    }

    #[test]
    fn test_decoder_options_validate() {
        assert!(DecoderOptions::builder().buffer_size(0).build().validate().is_err());
        assert!(
            DecoderOptions::builder()
                .poll_interval(Duration::ZERO)
                .build()
                .validate()
                .is_err()
        );
        assert!(
            DecoderOptions::builder()
                .secondary(Some(REP_COUNTER))
                .build()
                .validate()
                .is_err()
        );
        assert!(DecoderOptions::default().validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_seed_read_then_notifications() {
        let link = Arc::new(MockLink::rep_sensor("RepSensor"));
        link.set_value(REP_COUNTER, b"REPS:2");
        let mut stream = attached(&link, DecoderOptions::default()).await;

        let seed = stream.next().await.unwrap().unwrap();
        assert_eq!(seed.source, SampleSource::Seed);
        assert_eq!(seed.parsed_value, Some(2));

        link.notify(REP_COUNTER, b"REPS:3");
        let pushed = stream.next().await.unwrap().unwrap();
        assert_eq!(pushed.source, SampleSource::Notification);
        assert_eq!(pushed.counter_value(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribes_secondary_when_offered() {
        let link = Arc::new(MockLink::rep_sensor("RepSensor"));
        let mut stream = attached(&link, DecoderOptions::default()).await;
        assert!(stream.has_secondary());
        assert!(link.is_subscribed(REP_STATUS));

        let _seed = stream.next().await;
        link.notify(REP_STATUS, b"BAT 80");
        let status = stream.next().await.unwrap().unwrap();
        assert_eq!(status.channel, Channel::Secondary);
        assert_eq!(status.parsed_value, Some(80));
        assert_eq!(status.counter_value(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_secondary_is_skipped() {
        let link = Arc::new(
            MockLink::builder("RepSensor")
                .characteristic(REP_SERVICE, REP_COUNTER)
                .value(REP_COUNTER, b"0")
                .build(),
        );
        let stream = attached(&link, DecoderOptions::default()).await;
        assert!(!stream.has_secondary());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_primary_fails_attach() {
        let link = Arc::new(
            MockLink::builder("RepSensor")
                .characteristic(REP_SERVICE, REP_STATUS)
                .build(),
        );
        let transport = MockTransport::new(AdapterState::PoweredOn);
        transport.add_peripheral(Arc::clone(&link));
        let shared = transport.connect(&link.advertisement()).await.unwrap();
        let err = RepStream::attach(shared, DecoderOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::CharacteristicNotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_poll() {
        let link = Arc::new(MockLink::rep_sensor("RepSensor"));
        let mut stream = attached(&link, DecoderOptions::default()).await;
        let _seed = stream.next().await;

        link.set_value(REP_COUNTER, b"REPS:4");
        let polled = stream.next().await.unwrap().unwrap();
        assert_eq!(polled.source, SampleSource::Poll);
        assert_eq!(polled.parsed_value, Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_is_kept_for_diagnostics() {
        let link = Arc::new(MockLink::rep_sensor("RepSensor"));
        let mut stream = attached(&link, DecoderOptions::default()).await;
        let _seed = stream.next().await;

        link.notify(REP_COUNTER, b"xyz");
        let sample = stream.next().await.unwrap().unwrap();
        assert_eq!(sample.raw_text, "xyz");
        assert_eq!(sample.parsed_value, None);
        assert!(stream.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_ends_stream_with_error() {
        let link = Arc::new(MockLink::rep_sensor("RepSensor"));
        let mut stream = attached(&link, DecoderOptions::default()).await;
        let _seed = stream.next().await;

        link.simulate_disconnect();
        let last = stream.next().await.unwrap();
        assert_eq!(last, Err(StreamError::Disconnected));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_read_failures_end_stream() {
        let link = Arc::new(MockLink::rep_sensor("RepSensor"));
        let mut stream = attached(&link, DecoderOptions::default()).await;
        let _seed = stream.next().await;

        link.set_fail_reads(true);
        let last = stream.next().await.unwrap();
        assert!(matches!(last, Err(StreamError::Characteristic { .. })));
        // Seed plus three failed polls.
        assert_eq!(link.read_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_stops_polling_and_unsubscribes() {
        let link = Arc::new(MockLink::rep_sensor("RepSensor"));
        let mut stream = attached(&link, DecoderOptions::default()).await;
        let _seed = stream.next().await;

        stream.detach().await;
        assert!(!link.is_subscribed(REP_COUNTER));
        assert!(!link.is_subscribed(REP_STATUS));

        let reads = link.read_count();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(link.read_count(), reads);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_with_full_buffer() {
        let link = Arc::new(MockLink::rep_sensor("RepSensor"));
        let options = DecoderOptions::builder().buffer_size(2).build();
        let mut stream = attached(&link, options).await;
        let _seed = stream.next().await;

        for reps in 1..=40 {
            link.notify(REP_COUNTER, format!("REPS:{}", reps).as_bytes());
        }
        let _first = stream.next().await;
        // Let the pump refill the buffer and park on the next send.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let detached = tokio::time::timeout(Duration::from_secs(30), stream.detach()).await;
        assert!(detached.is_ok());
        assert!(!link.is_subscribed(REP_COUNTER));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_during_unanswered_read() {
        let link = Arc::new(MockLink::rep_sensor("RepSensor"));
        link.set_stall_reads(true);
        let stream = attached(&link, DecoderOptions::default()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(link.read_count(), 1);

        let detached = tokio::time::timeout(Duration::from_secs(30), stream.detach()).await;
        assert!(detached.is_ok());
    }
}
