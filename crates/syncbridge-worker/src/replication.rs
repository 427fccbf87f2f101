//! The replication pump: source → buffer → destination, with a supervisor.
//!
//! Three tasks run in parallel: the read pump pulls canonical messages from
//! the source and beats the liveness monitor, the write pump delivers
//! records and states to the destination under the timeout monitor's watch,
//! and the supervisor evaluates both monitors on a fixed interval. The only
//! shared mutable state is the monitors' single-word timestamps and the
//! bounded hand-off channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use syncbridge_types::catalog::ResolvedCatalog;
use syncbridge_types::message::ProtocolMessage;

use crate::destination::DestinationHandle;
use crate::errors::SyncError;
use crate::metrics::{MessageMetricsTracker, SyncMetricsSnapshot};
use crate::monitor::{DestinationTimeoutMonitor, HeartbeatMonitor};
use crate::source::SourceHandle;

#[derive(Debug, Clone)]
pub struct ReplicationOptions {
    /// Capacity of the source → destination hand-off buffer.
    pub channel_capacity: usize,
    /// How often the supervisor evaluates the monitors.
    pub supervisor_interval: Duration,
}

impl Default for ReplicationOptions {
    fn default() -> Self {
        Self {
            channel_capacity: 16,
            supervisor_interval: Duration::from_secs(1),
        }
    }
}

/// Outcome of a completed (or aborted) replication.
///
/// Monitor trips are advisory: they stop the pumps and surface here, and
/// the caller owns the decision of how to report them.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationSummary {
    pub duration_secs: f64,
    pub metrics: SyncMetricsSnapshot,
    pub liveness_tripped: bool,
    pub destination_timeout_tripped: bool,
}

/// Run one sync: start both handles, pump until the source is exhausted or
/// a monitor trips, close both handles, and report.
pub async fn run_replication(
    mut source: SourceHandle,
    mut destination: DestinationHandle,
    catalog: Arc<ResolvedCatalog>,
    heartbeat: Arc<HeartbeatMonitor>,
    timeout_monitor: Arc<DestinationTimeoutMonitor>,
    options: ReplicationOptions,
) -> Result<ReplicationSummary, SyncError> {
    let start = Instant::now();

    source.start().await?;
    destination.start(Arc::clone(&catalog)).await?;

    let source_counters = source.counters();
    let destination_counters = destination.counters();
    let tracker = Arc::new(MessageMetricsTracker::default());

    if let Some(mut states) = destination.take_state_receiver() {
        tokio::spawn(async move {
            while let Some(state) = states.recv().await {
                tracing::debug!(state = %state.data, "Destination state message");
            }
        });
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let source_done = Arc::new(AtomicBool::new(false));
    let (message_tx, message_rx) = mpsc::channel(options.channel_capacity.max(1));

    let read_task = tokio::spawn(read_pump(
        source,
        message_tx,
        Arc::clone(&heartbeat),
        Arc::clone(&source_done),
        stop_rx.clone(),
    ));
    let write_task = tokio::spawn(write_pump(
        destination,
        message_rx,
        Arc::clone(&tracker),
        stop_rx,
    ));
    let supervisor_task = tokio::spawn(supervise(
        stop_tx,
        heartbeat,
        timeout_monitor,
        Arc::clone(&tracker),
        source_done,
        options.supervisor_interval,
    ));

    let read_result = read_task.await;
    let write_result = write_task.await;
    supervisor_task.abort();

    let mut first_error: Option<SyncError> = None;
    for result in [read_result, write_result] {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!("Replication pump failed: {err}");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
            Err(join_err) => {
                if first_error.is_none() {
                    first_error =
                        Some(SyncError::Infrastructure(anyhow!(
                            "replication pump panicked: {join_err}"
                        )));
                }
            }
        }
    }

    let metrics = tracker.snapshot(source_counters.as_ref(), destination_counters.as_ref());
    metrics.emit();

    if let Some(err) = first_error {
        return Err(err);
    }

    Ok(ReplicationSummary {
        duration_secs: start.elapsed().as_secs_f64(),
        liveness_tripped: metrics.liveness_trips > 0,
        destination_timeout_tripped: metrics.destination_timeout_trips > 0,
        metrics,
    })
}

async fn read_pump(
    mut source: SourceHandle,
    sender: mpsc::Sender<ProtocolMessage>,
    heartbeat: Arc<HeartbeatMonitor>,
    source_done: Arc<AtomicBool>,
    mut stop: watch::Receiver<bool>,
) -> Result<(), SyncError> {
    let result = loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    tracing::info!("Read pump stopping on supervisor signal");
                    break Ok(());
                }
            }
            read = source.attempt_read() => match read {
                Ok(Some(message)) => {
                    heartbeat.beat();
                    if sender.send(message).await.is_err() {
                        // Destination side is gone; nothing left to feed.
                        break Ok(());
                    }
                }
                Ok(None) => {
                    tracing::info!("Source exhausted");
                    break Ok(());
                }
                Err(err) => break Err(err),
            }
        }
    };
    source_done.store(true, Ordering::Relaxed);
    let close_result = source.close().await;
    result.and(close_result)
}

async fn write_pump(
    mut destination: DestinationHandle,
    mut receiver: mpsc::Receiver<ProtocolMessage>,
    tracker: Arc<MessageMetricsTracker>,
    mut stop: watch::Receiver<bool>,
) -> Result<(), SyncError> {
    let result = loop {
        let message = tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    tracing::info!("Write pump stopping on supervisor signal");
                    break Ok(());
                }
                continue;
            }
            received = receiver.recv() => match received {
                Some(message) => message,
                None => break destination.notify_end_of_input().await,
            }
        };
        // The delivery itself is also a suspension point: a write stuck on
        // destination backpressure is abandoned when the supervisor signals,
        // and close interrupts the underlying process I/O.
        tokio::select! {
            _ = stop.changed() => {
                tracing::info!("Abandoning in-flight delivery on supervisor signal");
                break Ok(());
            }
            delivered = deliver_one(&mut destination, &tracker, &message) => {
                if let Err(err) = delivered {
                    break Err(err);
                }
            }
        }
    };
    let close_result = destination.close().await;
    result.and(close_result)
}

async fn deliver_one(
    destination: &mut DestinationHandle,
    tracker: &MessageMetricsTracker,
    message: &ProtocolMessage,
) -> Result<(), SyncError> {
    match message {
        ProtocolMessage::Record(_) => {
            destination.accept(message).await?;
            tracker.observe_record_delivered();
        }
        ProtocolMessage::State(_) => {
            destination.accept(message).await?;
            tracker.observe_state_delivered();
        }
        ProtocolMessage::Log(log) => {
            tracing::info!(origin = "source", level = ?log.level, "{}", log.message);
        }
        ProtocolMessage::Trace(trace) => {
            tracing::debug!(origin = "source", kind = ?trace.kind, "Source trace message");
        }
        other => {
            tracing::debug!(
                message_type = other.type_name(),
                "Skipping message not meant for the destination"
            );
        }
    }
    Ok(())
}

/// Periodic monitor evaluation. Signals the pumps once and keeps ticking
/// until aborted after both pumps have joined.
async fn supervise(
    stop: watch::Sender<bool>,
    heartbeat: Arc<HeartbeatMonitor>,
    timeout_monitor: Arc<DestinationTimeoutMonitor>,
    tracker: Arc<MessageMetricsTracker>,
    source_done: Arc<AtomicBool>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut signaled = false;
    loop {
        ticker.tick().await;
        if signaled {
            continue;
        }
        let now = Instant::now();
        if !source_done.load(Ordering::Relaxed) && !heartbeat.is_beating(now) {
            tracker.observe_liveness_trip();
            tracing::error!(
                threshold_secs = heartbeat.threshold().as_secs(),
                "No source activity within the silence threshold, stopping sync"
            );
            let _ = stop.send(true);
            signaled = true;
            continue;
        }
        if timeout_monitor.check(now) {
            tracker.observe_destination_timeout_trip();
            tracing::error!(
                timeout_secs = timeout_monitor.timeout().as_secs(),
                stalled_call = timeout_monitor.tripped_call().map(|call| call.name()),
                "Destination call exceeded its deadline, stopping sync"
            );
            let _ = stop.send(true);
            signaled = true;
        }
    }
}
