//! Background thread draining the Kafka consumer.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::Message;
use tracing::{debug, error, trace, warn};

use super::{decode_record, TopicSet};
use crate::bus::SinkSlot;
use crate::envelope::Envelope;

/// Consumer plus the topics it is subscribed to. Subscription updates and
/// polling both happen under the one lock.
pub struct ConsumerState {
    pub consumer: BaseConsumer,
    pub topics: TopicSet,
}

#[derive(Default)]
struct Signal {
    terminated: bool,
    woken: bool,
}

struct Shared {
    state: Arc<Mutex<ConsumerState>>,
    sink: Arc<SinkSlot>,
    interval: Duration,
    signal: Mutex<Signal>,
    condvar: Condvar,
}

/// Owns the polling thread.
///
/// Each cycle drains whatever the consumer has buffered, commits, releases
/// the consumer and then hands the records to the sink. Between cycles the
/// thread sleeps for the polling interval or until woken.
pub struct MessagePoller {
    shared: Arc<Shared>,
}

impl MessagePoller {
    pub fn start(
        state: Arc<Mutex<ConsumerState>>,
        sink: Arc<SinkSlot>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state,
            sink,
            interval,
            signal: Mutex::new(Signal::default()),
            condvar: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        thread::Builder::new()
            .name("eventwire-kafka-poller".to_string())
            .spawn(move || worker.run())?;

        debug!(interval_ms = interval.as_millis() as u64, "Kafka message poller started");
        Ok(Self { shared })
    }

    /// Run a poll cycle now instead of waiting out the interval.
    pub fn wake(&self) {
        self.shared
            .signal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .woken = true;
        self.shared.condvar.notify_one();
    }

    /// Ask the thread to exit. Does not wait for it.
    pub fn terminate(&self) {
        self.shared
            .signal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .terminated = true;
        self.shared.condvar.notify_one();
    }

    pub fn is_terminated(&self) -> bool {
        self.shared
            .signal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .terminated
    }
}

impl Shared {
    fn run(&self) {
        loop {
            if self.signal.lock().unwrap_or_else(|e| e.into_inner()).terminated {
                break;
            }

            for envelope in self.poll() {
                self.sink.deliver(envelope);
            }

            let mut signal = self.signal.lock().unwrap_or_else(|e| e.into_inner());
            if !signal.terminated && !signal.woken {
                signal = self
                    .condvar
                    .wait_timeout(signal, self.interval)
                    .unwrap_or_else(|e| e.into_inner())
                    .0;
            }
            if signal.terminated {
                break;
            }
            signal.woken = false;
        }

        debug!("Kafka message poller has exited");
    }

    fn poll(&self) -> Vec<Envelope> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.topics.is_empty() {
            return Vec::new();
        }

        let mut envelopes = Vec::new();
        let mut consumed = 0usize;
        while let Some(result) = state.consumer.poll(Duration::ZERO) {
            match result {
                Ok(message) => {
                    consumed += 1;
                    match decode_record(message.payload()) {
                        Ok(envelope) => {
                            trace!(
                                topic = %message.topic(),
                                partition = message.partition(),
                                offset = message.offset(),
                                "Received record"
                            );
                            envelopes.push(envelope);
                        }
                        Err(e) => {
                            // Still committed so the record is not redelivered
                            warn!(topic = %message.topic(), error = %e, "Failed to decode record");
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    break;
                }
            }
        }

        if consumed > 0 {
            if let Err(e) = state.consumer.commit_consumer_state(CommitMode::Async) {
                debug!(error = %e, "Failed to commit offsets");
            }
        }
        envelopes
    }
}
