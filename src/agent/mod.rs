pub mod commands;
pub mod orchestrator;
pub mod prompt;

pub use orchestrator::Orchestrator;

use crate::channels::{Channel, ChannelMessage, CliChannel};
use crate::config::Config;
use crate::providers::{create_provider, Provider};
use crate::scheduler::{Scheduler, TokioScheduler};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Upper bound on messages processed concurrently.
const MAX_IN_FLIGHT_MESSAGES: usize = 16;
const CHANNEL_QUEUE_CAPACITY: usize = 100;
const PENDING_POLL_INTERVAL: Duration = Duration::from_millis(250);

struct InFlightSenderTask {
    task_id: u64,
    cancellation: CancellationToken,
}

fn interruption_scope_key(message: &ChannelMessage) -> String {
    format!("{}:{}", message.chat_id, message.sender_id)
}

fn log_worker_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(error) = result {
        tracing::error!("Message worker crashed: {error}");
    }
}

/// Process every message from `rx` on its own task.
///
/// With `interrupt_on_new_message`, a newer message from the same sender in
/// the same chat cancels that sender's in-flight response.
pub async fn run_message_dispatch_loop(
    mut rx: mpsc::Receiver<ChannelMessage>,
    orchestrator: Arc<Orchestrator>,
    interrupt_on_new_message: bool,
    max_in_flight_messages: usize,
) {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(max_in_flight_messages.max(1)));
    let mut workers = tokio::task::JoinSet::new();
    let in_flight_by_sender = Arc::new(parking_lot::Mutex::new(
        HashMap::<String, InFlightSenderTask>::new(),
    ));
    let task_sequence = AtomicU64::new(1);

    while let Some(message) = rx.recv().await {
        let scope_key = interruption_scope_key(&message);
        let cancellation = CancellationToken::new();
        let task_id = task_sequence.fetch_add(1, Ordering::Relaxed);

        // Cancel before waiting for a permit so a saturated pool still
        // interrupts the previous response.
        if interrupt_on_new_message {
            let previous = in_flight_by_sender.lock().insert(
                scope_key.clone(),
                InFlightSenderTask {
                    task_id,
                    cancellation: cancellation.clone(),
                },
            );
            if let Some(previous) = previous {
                tracing::info!(
                    chat_id = %message.chat_id,
                    sender = %message.sender_id,
                    "Interrupting previous in-flight response for sender"
                );
                previous.cancellation.cancel();
            }
        }

        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let orchestrator = Arc::clone(&orchestrator);
        let in_flight = Arc::clone(&in_flight_by_sender);
        workers.spawn(async move {
            let _permit = permit;
            let chat_id = message.chat_id.clone();

            if let Err(e) = orchestrator.handle_message(message, cancellation).await {
                tracing::error!(%chat_id, kind = e.kind(), "Message processing failed: {e}");
            }

            if interrupt_on_new_message {
                let mut active = in_flight.lock();
                if active
                    .get(&scope_key)
                    .is_some_and(|state| state.task_id == task_id)
                {
                    active.remove(&scope_key);
                }
            }
        });

        while let Some(result) = workers.try_join_next() {
            log_worker_join_result(result);
        }
    }

    while let Some(result) = workers.join_next().await {
        log_worker_join_result(result);
    }
}

/// Run the agent on the console channel until stdin closes, then wait for
/// deferred replies (Ctrl-C skips the wait).
pub async fn run(config: Config) -> Result<()> {
    let channel: Arc<dyn Channel> = Arc::new(CliChannel::new());
    let provider: Arc<dyn Provider> = Arc::from(create_provider(&config)?);
    let scheduler = Arc::new(TokioScheduler::new());

    let orchestrator = Arc::new(Orchestrator::new(
        &config,
        Arc::clone(&channel),
        provider,
        Arc::clone(&scheduler) as Arc<dyn Scheduler>,
    ));
    match orchestrator.restore_context_windows() {
        Ok(0) => {}
        Ok(restored) => tracing::info!(restored, "Restored per-chat context windows"),
        Err(e) => tracing::warn!("Could not restore context windows: {e:#}"),
    }

    let (tx, rx) = mpsc::channel(CHANNEL_QUEUE_CAPACITY);
    let listener = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move { channel.listen(tx).await })
    };
    tracing::info!(
        channel = channel.name(),
        database = %config.database_path().display(),
        "Agent listening"
    );

    run_message_dispatch_loop(
        rx,
        orchestrator,
        config.agent.interrupt_on_new_message,
        MAX_IN_FLIGHT_MESSAGES,
    )
    .await;

    match listener.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Channel listener failed: {e:#}"),
        Err(e) => tracing::error!("Channel listener crashed: {e}"),
    }

    if scheduler.pending() > 0 {
        tracing::info!(
            pending = scheduler.pending(),
            "Waiting for deferred replies (Ctrl-C to quit)"
        );
        tokio::select! {
            () = async {
                while scheduler.pending() > 0 {
                    tokio::time::sleep(PENDING_POLL_INTERVAL).await;
                }
            } => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(dropped = scheduler.pending(), "Discarding deferred replies");
            }
        }
    }
    Ok(())
}
