//! Time-bounded PID polling loop

use crate::registry::{PollRegistry, RegistryChange};
use obd_protocol::logbook::reading_message;
use obd_protocol::{
    DecodeError, DecodedReading, EventCategory, ObdClient, ObdError, PidDecoder, RawFrame,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Where the poll deadline is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineCheck {
    /// After each full sweep of the poll list
    #[default]
    PerSweep,
    /// After every exchange
    PerExchange,
}

/// Configuration for the poller
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Deadline granularity
    pub deadline_check: DeadlineCheck,
    /// Pause after a failed exchange before the next one
    pub error_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            deadline_check: DeadlineCheck::PerSweep,
            error_backoff: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
}

/// Result of polling one signal
#[derive(Debug, Clone, PartialEq)]
pub enum SignalOutcome {
    /// Decoding was not requested
    Raw(RawFrame),
    Decoded(DecodedReading),
    DecodeFailed { frame: RawFrame, error: DecodeError },
}

/// Counters for one polling run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Full sweeps of the poll list
    pub sweeps: u64,
    /// Completed request/response exchanges
    pub exchanges: u64,
    pub decoded: u64,
    pub decode_failures: u64,
    /// Exchanges that failed at the transport
    pub errors: u64,
}

/// Polls every registered PID in order until a deadline
pub struct PidPoller {
    registry: PollRegistry,
    decoder: PidDecoder,
    config: PollerConfig,
    state: PollerState,
    readings_tx: Option<mpsc::Sender<DecodedReading>>,
}

impl PidPoller {
    pub fn new(decoder: PidDecoder, config: PollerConfig) -> Self {
        Self {
            registry: PollRegistry::new(),
            decoder,
            config,
            state: PollerState::Idle,
            readings_tx: None,
        }
    }

    /// Forward every decoded reading to `tx`
    pub fn with_readings(mut self, tx: mpsc::Sender<DecodedReading>) -> Self {
        self.readings_tx = Some(tx);
        self
    }

    /// Register a PID and record the outcome
    pub fn add<T>(&mut self, client: &mut ObdClient<T>, pid: u8) -> RegistryChange
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let change = self.registry.add(pid);
        Self::record_change(client, change);
        change
    }

    /// Unregister a PID and record the outcome
    pub fn remove<T>(&mut self, client: &mut ObdClient<T>, pid: u8) -> RegistryChange
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let change = self.registry.remove(pid);
        Self::record_change(client, change);
        change
    }

    fn record_change<T>(client: &mut ObdClient<T>, change: RegistryChange)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if change.is_applied() {
            debug!("{}", change);
        } else {
            warn!("{}", change);
        }
        client.record(EventCategory::PollMng, &change.to_string());
    }

    pub fn registry(&self) -> &PollRegistry {
        &self.registry
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// One exchange for `pid`, decoded when requested
    pub async fn poll_signal<T>(
        &self,
        client: &mut ObdClient<T>,
        pid: u8,
        decode: bool,
    ) -> Result<SignalOutcome, ObdError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let frame = client.query_pid(pid).await?;
        if !decode {
            return Ok(SignalOutcome::Raw(frame));
        }

        match self.decoder.decode_frame(&frame, pid) {
            Ok(reading) => {
                if !reading.ack {
                    warn!("PID {:02X} response not acknowledged", pid);
                }
                client.record(
                    EventCategory::Parser,
                    &reading_message(reading.pid, &reading.description, reading.value),
                );
                Ok(SignalOutcome::Decoded(reading))
            }
            Err(error) => {
                warn!("PID {:02X} decode failed: {}", pid, error);
                client.record(
                    EventCategory::Parser,
                    &format!("Error in parsing message: {}", error),
                );
                Ok(SignalOutcome::DecodeFailed { frame, error })
            }
        }
    }

    /// Poll the registry until `duration` has elapsed.
    ///
    /// With [`DeadlineCheck::PerSweep`] a started sweep always completes, so
    /// at least one exchange per registered PID happens even for a zero
    /// duration and the run may overshoot by up to one sweep.
    pub async fn run<T>(
        &mut self,
        client: &mut ObdClient<T>,
        duration: Duration,
        decode: bool,
    ) -> PollSummary
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let deadline = Instant::now() + duration;
        let pids: Vec<u8> = self.registry.iter().collect();
        let mut summary = PollSummary::default();

        info!(
            "Starting poll of {} PIDs for {:?} (decode: {})",
            pids.len(),
            duration,
            decode
        );
        client.record(
            EventCategory::PollMng,
            &format!(
                "POLLSTART with timeout {}s {}",
                duration.as_secs_f64(),
                if decode {
                    "parsing output."
                } else {
                    "without parsing output."
                }
            ),
        );
        self.state = PollerState::Polling;

        if pids.is_empty() {
            warn!("Poll list is empty, idling until deadline");
            tokio::time::sleep_until(deadline).await;
        } else {
            'sweeps: loop {
                for &pid in &pids {
                    self.poll_once(client, pid, decode, &mut summary).await;

                    if self.config.deadline_check == DeadlineCheck::PerExchange
                        && Instant::now() >= deadline
                    {
                        break 'sweeps;
                    }
                }
                summary.sweeps += 1;

                if Instant::now() >= deadline {
                    break;
                }
            }
        }

        self.state = PollerState::Idle;
        client.record(EventCategory::PollMng, "POLLEND after timeout.");
        client.flush_log();
        info!(
            "Poll finished: {} sweeps, {} exchanges, {} decoded, {} decode failures, {} errors",
            summary.sweeps,
            summary.exchanges,
            summary.decoded,
            summary.decode_failures,
            summary.errors
        );
        summary
    }

    async fn poll_once<T>(
        &self,
        client: &mut ObdClient<T>,
        pid: u8,
        decode: bool,
        summary: &mut PollSummary,
    ) where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        match self.poll_signal(client, pid, decode).await {
            Ok(outcome) => {
                summary.exchanges += 1;
                match outcome {
                    SignalOutcome::Decoded(reading) => {
                        summary.decoded += 1;
                        if let Some(tx) = &self.readings_tx {
                            // Non-blocking: a slow consumer drops readings
                            let _ = tx.try_send(reading);
                        }
                    }
                    SignalOutcome::DecodeFailed { .. } => summary.decode_failures += 1,
                    SignalOutcome::Raw(_) => {}
                }
            }
            Err(e) => {
                summary.errors += 1;
                warn!("PID {:02X} exchange failed: {}", pid, e);
                tokio::time::sleep(self.config.error_backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::mock::MockElm327;
    use obd_protocol::{ClientConfig, EnvelopeFormat, MemorySink, PidTable};
    use std::sync::Arc;
    use tokio::io::DuplexStream;

    fn poller(envelope: EnvelopeFormat, deadline_check: DeadlineCheck) -> PidPoller {
        let decoder = PidDecoder::new(Arc::new(PidTable::standard()), envelope);
        PidPoller::new(
            decoder,
            PollerConfig {
                deadline_check,
                ..Default::default()
            },
        )
    }

    fn client(transport: DuplexStream, sink: &MemorySink) -> ObdClient<DuplexStream> {
        ObdClient::with_transport(
            "mock",
            transport,
            ClientConfig::default(),
            Box::new(sink.clone()),
        )
    }

    #[tokio::test]
    async fn test_zero_duration_still_runs_one_sweep() {
        let (transport, device) = MockElm327::new().spawn();
        let sink = MemorySink::new();
        let mut client = client(transport, &sink);
        let mut poller = poller(EnvelopeFormat::Short, DeadlineCheck::PerSweep);
        poller.add(&mut client, 13);

        let summary = poller.run(&mut client, Duration::ZERO, false).await;
        client.close().await;

        assert_eq!(summary.sweeps, 1);
        assert_eq!(summary.exchanges, 1);
        assert_eq!(device.received().await, vec!["010D"]);
        assert_eq!(poller.state(), PollerState::Idle);
    }

    #[tokio::test]
    async fn test_sweep_completes_past_deadline() {
        let (transport, device) = MockElm327::new().spawn();
        let sink = MemorySink::new();
        let mut client = client(transport, &sink);
        let mut poller = poller(EnvelopeFormat::Short, DeadlineCheck::PerSweep);
        for pid in [12, 13, 16] {
            poller.add(&mut client, pid);
        }

        let summary = poller.run(&mut client, Duration::ZERO, false).await;
        client.close().await;

        assert_eq!(summary.exchanges, 3);
        assert_eq!(device.received().await, vec!["010C", "010D", "0110"]);
    }

    #[tokio::test]
    async fn test_per_exchange_check_stops_mid_sweep() {
        let (transport, device) = MockElm327::new().spawn();
        let sink = MemorySink::new();
        let mut client = client(transport, &sink);
        let mut poller = poller(EnvelopeFormat::Short, DeadlineCheck::PerExchange);
        for pid in [12, 13, 16] {
            poller.add(&mut client, pid);
        }

        let summary = poller.run(&mut client, Duration::ZERO, false).await;
        client.close().await;

        assert_eq!(summary.exchanges, 1);
        assert_eq!(summary.sweeps, 0);
        assert_eq!(device.received().await, vec!["010C"]);
    }

    #[tokio::test]
    async fn test_repeats_sweeps_until_deadline() {
        let (transport, device) = MockElm327::new().spawn();
        let sink = MemorySink::new();
        let mut client = client(transport, &sink);
        let mut poller = poller(EnvelopeFormat::Short, DeadlineCheck::PerSweep);
        poller.add(&mut client, 12);
        poller.add(&mut client, 13);

        let summary = poller.run(&mut client, Duration::from_millis(30), false).await;
        client.close().await;

        assert!(summary.sweeps >= 1);
        assert_eq!(summary.exchanges, summary.sweeps * 2);
        let received = device.received().await;
        assert_eq!(received.len() as u64, summary.exchanges);
        for pair in received.chunks(2) {
            assert_eq!(pair, ["010C", "010D"]);
        }
    }

    #[tokio::test]
    async fn test_decoded_readings_are_logged_and_forwarded() {
        let (transport, _device) = MockElm327::new().spawn();
        let sink = MemorySink::new();
        let mut client = client(transport, &sink);
        let (tx, mut rx) = mpsc::channel(16);
        let mut poller = poller(EnvelopeFormat::Short, DeadlineCheck::PerSweep).with_readings(tx);
        poller.add(&mut client, 12);
        poller.add(&mut client, 13);

        let summary = poller.run(&mut client, Duration::ZERO, true).await;
        client.close().await;

        assert_eq!(summary.decoded, 2);
        let rpm = rx.recv().await.unwrap();
        assert_eq!(rpm.pid, 12);
        assert!((rpm.value - 1668.0).abs() < 1e-9);
        let speed = rx.recv().await.unwrap();
        assert_eq!(speed.value, 40.0);

        let parser = sink.messages(EventCategory::Parser);
        assert_eq!(parser[0], "Msg Id: 12 (Engine RPM) - Value = 1668");
        assert_eq!(parser[1], "Msg Id: 13 (Speed km/h) - Value = 40");
    }

    #[tokio::test]
    async fn test_long_envelope_decoding() {
        let (transport, _device) = MockElm327::new()
            .with_envelope(EnvelopeFormat::Long)
            .spawn();
        let sink = MemorySink::new();
        let mut client = client(transport, &sink);
        let poller = poller(EnvelopeFormat::Long, DeadlineCheck::PerSweep);

        let outcome = poller.poll_signal(&mut client, 0x05, true).await.unwrap();
        client.close().await;

        match outcome {
            SignalOutcome::Decoded(reading) => assert_eq!(reading.value, 75.0),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_stop_the_sweep() {
        let (transport, device) = MockElm327::new().respond("010C", "NO DATA").spawn();
        let sink = MemorySink::new();
        let mut client = client(transport, &sink);
        let mut poller = poller(EnvelopeFormat::Short, DeadlineCheck::PerSweep);
        poller.add(&mut client, 12);
        poller.add(&mut client, 13);

        let summary = poller.run(&mut client, Duration::ZERO, true).await;
        client.close().await;

        assert_eq!(summary.decode_failures, 1);
        assert_eq!(summary.decoded, 1);
        assert_eq!(device.received().await, vec!["010C", "010D"]);
        let parser = sink.messages(EventCategory::Parser);
        assert!(parser[0].starts_with("Error in parsing message"));
    }

    #[tokio::test]
    async fn test_raw_outcome_without_decoding() {
        let (transport, _device) = MockElm327::new().spawn();
        let sink = MemorySink::new();
        let mut client = client(transport, &sink);
        let poller = poller(EnvelopeFormat::Short, DeadlineCheck::PerSweep);

        let outcome = poller.poll_signal(&mut client, 13, false).await.unwrap();
        client.close().await;

        assert!(matches!(outcome, SignalOutcome::Raw(ref f) if f.text == "010D\r41 0D 28\r\r>"));
        assert!(sink.messages(EventCategory::Parser).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_session_keeps_polling_until_deadline() {
        let sink = MemorySink::new();
        let mut client: ObdClient<DuplexStream> =
            ObdClient::new("mock", ClientConfig::default(), Box::new(sink.clone()));
        let mut poller = poller(EnvelopeFormat::Short, DeadlineCheck::PerSweep);
        poller.add(&mut client, 12);

        let summary = poller.run(&mut client, Duration::from_secs(1), true).await;

        assert_eq!(summary.exchanges, 0);
        assert!(summary.errors >= 1);
        assert_eq!(summary.errors, summary.sweeps);
        assert_eq!(poller.state(), PollerState::Idle);
        assert!(!sink.messages(EventCategory::Tx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_registry_waits_out_the_deadline() {
        let (transport, device) = MockElm327::new().spawn();
        let sink = MemorySink::new();
        let mut client = client(transport, &sink);
        let mut poller = poller(EnvelopeFormat::Short, DeadlineCheck::PerSweep);

        let started = Instant::now();
        let summary = poller.run(&mut client, Duration::from_secs(2), true).await;
        assert!(started.elapsed() >= Duration::from_secs(2));
        client.close().await;

        assert_eq!(summary, PollSummary::default());
        assert!(device.received().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_rpm_reply_is_not_read_as_speed() {
        let (transport, _device) = MockElm327::new()
            .delay("010C", Duration::from_millis(300))
            .spawn();
        let sink = MemorySink::new();
        let config = ClientConfig {
            read_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let mut client = ObdClient::with_transport("mock", transport, config, Box::new(sink.clone()));
        let poller = poller(EnvelopeFormat::Short, DeadlineCheck::PerSweep);

        let rpm = poller.poll_signal(&mut client, 0x0C, true).await.unwrap();
        let speed = poller.poll_signal(&mut client, 0x0D, true).await.unwrap();
        client.close().await;

        match (rpm, speed) {
            (SignalOutcome::Decoded(rpm), SignalOutcome::Decoded(speed)) => {
                assert_eq!(rpm.pid, 0x0C);
                assert!((rpm.value - 1668.0).abs() < 1e-9);
                assert_eq!(speed.pid, 0x0D);
                assert_eq!(speed.value, 40.0);
            }
            other => panic!("unexpected outcomes: {:?}", other),
        }
        assert_eq!(
            sink.messages(EventCategory::Parser),
            vec![
                "Msg Id: 12 (Engine RPM) - Value = 1668",
                "Msg Id: 13 (Speed km/h) - Value = 40"
            ]
        );
    }

    #[tokio::test]
    async fn test_mismatched_reply_is_a_decode_failure() {
        let (transport, _device) = MockElm327::new().respond("010D", "41 0C 1A F8").spawn();
        let sink = MemorySink::new();
        let mut client = client(transport, &sink);
        let poller = poller(EnvelopeFormat::Short, DeadlineCheck::PerSweep);

        let outcome = poller.poll_signal(&mut client, 0x0D, true).await.unwrap();
        client.close().await;

        assert!(matches!(
            outcome,
            SignalOutcome::DecodeFailed {
                error: DecodeError::PidMismatch {
                    requested: 0x0D,
                    echoed: 0x0C
                },
                ..
            }
        ));
        assert!(sink.messages(EventCategory::Parser)[0].starts_with("Error in parsing message"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_reaches_the_event_log() {
        let (transport, device_end) = tokio::io::duplex(64);
        drop(device_end);
        let sink = MemorySink::new();
        let mut client = client(transport, &sink);
        let mut poller = poller(EnvelopeFormat::Short, DeadlineCheck::PerSweep);
        poller.add(&mut client, 12);

        let summary = poller.run(&mut client, Duration::ZERO, true).await;

        assert_eq!(summary.errors, 1);
        assert_eq!(summary.exchanges, 0);
        let tx = sink.messages(EventCategory::Tx);
        assert_eq!(tx.len(), 1);
        assert!(tx[0].starts_with("Error: could not send 010C"));
    }

    #[tokio::test]
    async fn test_registry_changes_are_logged() {
        let (transport, _device) = MockElm327::new().spawn();
        let sink = MemorySink::new();
        let mut client = client(transport, &sink);
        let mut poller = poller(EnvelopeFormat::Short, DeadlineCheck::PerSweep);

        assert_eq!(poller.add(&mut client, 12), RegistryChange::Added(12));
        assert_eq!(poller.add(&mut client, 12), RegistryChange::AlreadyPresent(12));
        assert_eq!(poller.remove(&mut client, 13), RegistryChange::NotPresent(13));
        assert_eq!(poller.registry().iter().collect::<Vec<_>>(), vec![12]);

        let log = sink.messages(EventCategory::PollMng);
        assert_eq!(log.len(), 3);
        assert!(log[1].contains("already there"));
        client.close().await;
    }
}
