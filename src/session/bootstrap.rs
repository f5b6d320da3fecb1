//! Process lifecycle for the producer and consumer binaries.
//!
//! The producer opens the publish endpoint, publishes the coordination record
//! and runs the heartbeat loop on a background thread until the running flag
//! clears. A consumer claims a role from the record, opens a subscribe endpoint
//! tagged with its ordinal, runs the consumer loop in the background and asks
//! the user to guess its speed class.

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::coord::{CoordinationRecord, RecordStore, Role, SessionRole};
use crate::core::{Error, QuantaClock, Result};
use crate::heartbeat::{self, ConsumerReport, ProducerReport, RunningFlag};
use crate::session::guard::LoopGuard;
use crate::session::outcome::{check_outcome, Outcome};
use crate::session::{SessionConfig, SessionState};
use crate::transport::{ChannelDescriptor, Publication, SendOutcome, Subscription, Transport};

const SUPERVISE_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct ProducerSummary {
    pub record: CoordinationRecord,
    pub report: ProducerReport,
    /// Whether any consumer attached while the producer ran.
    pub connected: bool,
}

#[derive(Debug)]
pub struct ConsumerSummary {
    pub session: SessionRole,
    pub outcome: Outcome,
    pub report: ConsumerReport,
}

/// Publication wrapper that remembers the first time a subscriber attached.
struct AttachWatch<P> {
    inner: P,
    attached: Arc<AtomicBool>,
}

impl<P: Publication> Publication for AttachWatch<P> {
    fn is_connected(&self) -> bool {
        let connected = self.inner.is_connected();
        if connected {
            self.attached.store(true, Ordering::Release);
        }
        connected
    }

    fn try_send(&mut self, payload: &[u8]) -> Result<SendOutcome> {
        self.inner.try_send(payload)
    }
}

pub struct SessionBootstrap<T: Transport> {
    transport: T,
    store: RecordStore,
    config: SessionConfig,
    state: SessionState,
}

impl<T: Transport> SessionBootstrap<T> {
    pub fn new(transport: T, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            store: RecordStore::new(&config.record_path),
            config,
            state: SessionState::Idle,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {} -> {}",
            self.state,
            next
        );
        debug!("session {} -> {}", self.state, next);
        self.state = next;
    }

    fn abort(&mut self) {
        if self.state.can_transition_to(SessionState::Stopping) {
            self.transition(SessionState::Stopping);
        }
        if self.state == SessionState::Stopping {
            self.transition(SessionState::Terminated);
        }
    }

    /// Publishes a fresh record for `roles` and heartbeats until `running`
    /// clears or every subscriber goes away.
    pub fn run_producer(&mut self, roles: Vec<Role>, running: &RunningFlag) -> Result<ProducerSummary> {
        self.transition(SessionState::Connecting);
        let result = self.start_producer(roles, running);
        if result.is_err() {
            self.abort();
        }
        result
    }

    fn start_producer(&mut self, roles: Vec<Role>, running: &RunningFlag) -> Result<ProducerSummary> {
        let record = CoordinationRecord::create(
            self.config.transport_address.clone(),
            self.config.stream_id,
            roles,
        );

        // Holds the single-publisher lock before the record is replaced.
        let publication = self
            .transport
            .open_publish_endpoint(&record.transport_address, record.stream_id)?;
        self.store.persist(&record)?;
        let channel = ChannelDescriptor::new(record.transport_address.clone(), record.stream_id);
        info!("publishing on {channel}, waiting for consumers");
        self.transition(SessionState::AwaitingConnection);

        let attached = Arc::new(AtomicBool::new(false));
        let mut publication = AttachWatch {
            inner: publication,
            attached: Arc::clone(&attached),
        };
        let producer_config = self.config.producer_config();
        let guard = LoopGuard::spawn("pulse-producer", running.clone(), move |running| {
            let clock = QuantaClock::new();
            heartbeat::run_producer(&mut publication, &clock, &running, &producer_config)
        })?;

        while running.is_running() && !guard.is_finished() {
            if self.state == SessionState::AwaitingConnection && attached.load(Ordering::Acquire) {
                self.transition(SessionState::Running);
            }
            thread::sleep(SUPERVISE_INTERVAL);
        }

        self.transition(SessionState::Stopping);
        let report = guard.stop_and_join()?;
        self.transition(SessionState::Terminated);
        info!(
            "producer finished ({:?}): {} heartbeats sent, {} congested",
            report.exit, report.stats.sent, report.stats.congested
        );
        Ok(ProducerSummary {
            record,
            report,
            connected: attached.load(Ordering::Acquire),
        })
    }

    /// Claims a role and runs one consumer session against `input`/`output`.
    ///
    /// Fails with [`Error::NoSlotsRemaining`] without touching the transport
    /// when every role is already taken. Returns `Ok(None)` when `running`
    /// clears before the producer attaches.
    pub fn run_consumer<R, W>(
        &mut self,
        running: &RunningFlag,
        input: &mut R,
        output: &mut W,
    ) -> Result<Option<ConsumerSummary>>
    where
        R: BufRead + ?Sized,
        W: Write + ?Sized,
    {
        self.transition(SessionState::ClaimingRole);
        let (session, record) = match self.store.claim_next_role() {
            Ok(claimed) => claimed,
            Err(Error::NoSlotsRemaining) => {
                self.transition(SessionState::Rejected);
                return Err(Error::NoSlotsRemaining);
            }
            Err(err) => {
                self.abort();
                return Err(err);
            }
        };
        self.transition(SessionState::Connecting);

        let result = self.start_consumer(session, &record, running, input, output);
        if result.is_err() {
            self.abort();
        }
        result
    }

    fn start_consumer<R, W>(
        &mut self,
        session: SessionRole,
        record: &CoordinationRecord,
        running: &RunningFlag,
        input: &mut R,
        output: &mut W,
    ) -> Result<Option<ConsumerSummary>>
    where
        R: BufRead + ?Sized,
        W: Write + ?Sized,
    {
        writeln!(output, "I'm {session}")?;
        let channel = ChannelDescriptor::new(record.transport_address.clone(), record.stream_id)
            .tagged(session.ordinal);
        writeln!(output, "Connecting to {channel}")?;
        info!("{session} connecting to {channel}");

        let connect_idle = self.config.connect_idle();
        let mut subscription = loop {
            match self.transport.open_subscribe_endpoint(
                &record.transport_address,
                record.stream_id,
                session.ordinal,
            ) {
                Ok(subscription) => break subscription,
                Err(Error::ChannelNotReady) => {
                    if !running.is_running() {
                        self.stop_before_connect(session);
                        return Ok(None);
                    }
                    connect_idle.idle();
                }
                Err(err) => return Err(err),
            }
        };
        self.transition(SessionState::AwaitingConnection);

        while !subscription.is_connected() {
            if !running.is_running() {
                self.stop_before_connect(session);
                return Ok(None);
            }
            connect_idle.idle();
        }
        writeln!(output, "Connected")?;

        let consumer_config = self.config.consumer_config();
        let role = session.role;
        let guard = LoopGuard::spawn("pulse-consumer", running.clone(), move |running| {
            let clock = QuantaClock::new();
            heartbeat::run_consumer(&mut subscription, &clock, role, &running, &consumer_config)
        })?;
        self.transition(SessionState::Running);

        let outcome = check_outcome(session, &record.role_assignments, input, output);

        self.transition(SessionState::Stopping);
        let report = guard.stop_and_join()?;
        self.transition(SessionState::Terminated);
        let outcome = outcome?;
        info!(
            "{session} finished ({outcome:?}): {} heartbeats observed",
            report.observed
        );
        Ok(Some(ConsumerSummary {
            session,
            outcome,
            report,
        }))
    }

    fn stop_before_connect(&mut self, session: SessionRole) {
        warn!("{session} stopped before the producer attached");
        self.transition(SessionState::Stopping);
        self.transition(SessionState::Terminated);
    }
}
