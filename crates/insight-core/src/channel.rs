//! Ordered, single-consumer event delivery with a lifetime deadline.
//!
//! An `EventChannel` moves through `Open -> Streaming -> terminal`, where the
//! terminal state is one of `Completed`, `CompletedWithError` or `TimedOut`.
//! Every terminal transition happens under one async lock, so at most one is
//! ever applied, and no send can succeed after it.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::errors::ChannelError;
use crate::stream::StreamEvent;

type TimeoutHandler = Box<dyn FnOnce() -> Option<StreamEvent> + Send + 'static>;
type CompletionHandler = Box<dyn FnOnce(&ChannelOutcome) + Send + 'static>;

/// Lifecycle state of an `EventChannel`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Streaming,
    Completed,
    CompletedWithError,
    TimedOut,
}

impl ChannelState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithError | Self::TimedOut
        )
    }
}

/// How a channel reached its terminal state; passed to completion handlers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// `complete()` or `send_and_complete()` closed the channel.
    Completed,
    /// `complete_with_error()` closed the channel.
    Errored { reason: String },
    /// The deadline elapsed first.
    TimedOut,
    /// A send found the consumer disconnected.
    ConsumerGone,
}

impl ChannelOutcome {
    fn state(&self) -> ChannelState {
        match self {
            Self::Completed => ChannelState::Completed,
            Self::Errored { .. } | Self::ConsumerGone => ChannelState::CompletedWithError,
            Self::TimedOut => ChannelState::TimedOut,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Signal {
    Live,
    Expired,
    Terminal,
}

struct Core {
    state: ChannelState,
    tx: Option<mpsc::Sender<StreamEvent>>,
}

#[derive(Default)]
struct Handlers {
    on_timeout: Option<TimeoutHandler>,
    on_completion: Vec<CompletionHandler>,
    outcome: Option<ChannelOutcome>,
}

struct Shared {
    id: uuid::Uuid,
    core: tokio::sync::Mutex<Core>,
    handlers: Mutex<Handlers>,
    signal: watch::Sender<Signal>,
}

impl Shared {
    fn handlers(&self) -> MutexGuard<'_, Handlers> {
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies a terminal transition. Caller holds the core lock.
    fn close_locked(&self, core: &mut Core, outcome: &ChannelOutcome) {
        core.state = outcome.state();
        core.tx = None;
        self.signal.send_replace(Signal::Terminal);
        debug!(channel_id = %self.id, state = ?core.state, "event channel closed");
    }

    /// Runs completion handlers exactly once.
    fn notify_completion(&self, outcome: ChannelOutcome) {
        let pending = {
            let mut handlers = self.handlers();
            handlers.on_timeout = None;
            handlers.outcome = Some(outcome.clone());
            std::mem::take(&mut handlers.on_completion)
        };
        for handler in pending {
            handler(&outcome);
        }
    }

    async fn fire_timeout(&self) {
        self.signal.send_replace(Signal::Expired);
        let mut core = self.core.lock().await;
        if core.state.is_terminal() {
            return;
        }
        let handler = self.handlers().on_timeout.take();
        if let Some(event) = handler.and_then(|handler| handler())
            && let Some(tx) = core.tx.as_ref()
            && tx.try_send(event).is_err()
        {
            debug!(channel_id = %self.id, "timeout event could not be delivered");
        }
        let outcome = ChannelOutcome::TimedOut;
        self.close_locked(&mut core, &outcome);
        drop(core);
        self.notify_completion(outcome);
    }
}

/// Producer half of a streaming connection.
///
/// Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct EventChannel {
    shared: Arc<Shared>,
}

impl EventChannel {
    /// Opens a channel with a bounded buffer and arms its timeout watchdog.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(timeout: Duration, buffer_capacity: usize) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::channel(buffer_capacity.max(1));
        let (signal, _) = watch::channel(Signal::Live);
        let shared = Arc::new(Shared {
            id: uuid::Uuid::new_v4(),
            core: tokio::sync::Mutex::new(Core {
                state: ChannelState::Open,
                tx: Some(tx),
            }),
            handlers: Mutex::new(Handlers::default()),
            signal,
        });
        tokio::spawn(watchdog(shared.clone(), timeout));
        (Self { shared }, EventReceiver { rx })
    }

    /// Identifier used in logs.
    pub fn id(&self) -> uuid::Uuid {
        self.shared.id
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ChannelState {
        self.shared.core.lock().await.state
    }

    /// Returns true once the channel is terminal or its deadline has passed.
    pub fn is_closed(&self) -> bool {
        *self.shared.signal.borrow() != Signal::Live
    }

    /// Delivers one event.
    ///
    /// Fails with `ChannelClosed` after any terminal transition (or once the
    /// deadline has passed), and with `ConsumerGone` when the receiver was
    /// dropped; the latter also closes the channel.
    pub async fn send(&self, event: StreamEvent) -> Result<(), ChannelError> {
        let mut core = self.shared.core.lock().await;
        self.deliver(&mut core, event).await?;
        core.state = ChannelState::Streaming;
        Ok(())
    }

    /// Delivers a final event and completes the channel in one step.
    pub async fn send_and_complete(&self, event: StreamEvent) -> Result<(), ChannelError> {
        let mut core = self.shared.core.lock().await;
        self.deliver(&mut core, event).await?;
        let outcome = ChannelOutcome::Completed;
        self.shared.close_locked(&mut core, &outcome);
        drop(core);
        self.shared.notify_completion(outcome);
        Ok(())
    }

    /// Transitions to `Completed`. Returns false if the channel was already terminal.
    pub async fn complete(&self) -> bool {
        self.close(ChannelOutcome::Completed).await
    }

    /// Transitions to `CompletedWithError`. Returns false if the channel was already terminal.
    pub async fn complete_with_error(&self, reason: impl Into<String>) -> bool {
        self.close(ChannelOutcome::Errored {
            reason: reason.into(),
        })
        .await
    }

    /// Registers the handler run when the deadline elapses before any terminal
    /// transition. The returned event, if any, is written as the last frame.
    ///
    /// Replaces a previously registered handler; ignored once the channel is terminal.
    pub fn on_timeout<F>(&self, handler: F)
    where
        F: FnOnce() -> Option<StreamEvent> + Send + 'static,
    {
        let mut handlers = self.shared.handlers();
        if handlers.outcome.is_none() {
            handlers.on_timeout = Some(Box::new(handler));
        }
    }

    /// Registers a handler run exactly once after the channel reaches any
    /// terminal state. Runs immediately if that already happened.
    pub fn on_completion<F>(&self, handler: F)
    where
        F: FnOnce(&ChannelOutcome) + Send + 'static,
    {
        let outcome = {
            let mut handlers = self.shared.handlers();
            match handlers.outcome.clone() {
                Some(outcome) => outcome,
                None => {
                    handlers.on_completion.push(Box::new(handler));
                    return;
                }
            }
        };
        handler(&outcome);
    }

    async fn deliver(&self, core: &mut Core, event: StreamEvent) -> Result<(), ChannelError> {
        if core.state.is_terminal() {
            return Err(ChannelError::ChannelClosed);
        }
        let Some(tx) = core.tx.clone() else {
            return Err(ChannelError::ChannelClosed);
        };
        let mut signal = self.shared.signal.subscribe();
        let reserved = tokio::select! {
            biased;
            _ = signal.wait_for(|s| *s != Signal::Live) => {
                return Err(ChannelError::ChannelClosed);
            }
            permit = tx.reserve() => permit,
        };
        match reserved {
            Ok(permit) => {
                permit.send(event);
                Ok(())
            }
            Err(_) => {
                let outcome = ChannelOutcome::ConsumerGone;
                self.shared.close_locked(core, &outcome);
                self.shared.notify_completion(outcome);
                Err(ChannelError::ConsumerGone)
            }
        }
    }

    async fn close(&self, outcome: ChannelOutcome) -> bool {
        let mut core = self.shared.core.lock().await;
        if core.state.is_terminal() {
            return false;
        }
        self.shared.close_locked(&mut core, &outcome);
        drop(core);
        self.shared.notify_completion(outcome);
        true
    }
}

async fn watchdog(shared: Arc<Shared>, timeout: Duration) {
    let mut signal = shared.signal.subscribe();
    // The `watch::Ref` from `wait_for` is not `Send`; settle the race before awaiting anything else.
    let expired = tokio::select! {
        _ = tokio::time::sleep(timeout) => true,
        _ = signal.wait_for(|s| *s == Signal::Terminal) => false,
    };
    if expired {
        shared.fire_timeout().await;
    }
}

/// Consumer half of an `EventChannel`.
///
/// Yields events in send order and ends after the channel's terminal transition
/// once buffered events are drained. Dropping it disconnects the consumer.
pub struct EventReceiver {
    rx: mpsc::Receiver<StreamEvent>,
}

impl EventReceiver {
    /// Waits for the next event; `None` once the channel is closed and drained.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Collects every remaining event.
    pub async fn collect(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

impl futures::Stream for EventReceiver {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const LONG: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn delivers_events_in_order_and_ends_after_complete() {
        let (channel, rx) = EventChannel::open(LONG, 8);
        channel.send(StreamEvent::content("a")).await.expect("send a");
        channel.send(StreamEvent::content("b")).await.expect("send b");
        assert_eq!(channel.state().await, ChannelState::Streaming);
        assert!(channel.complete().await);

        assert_eq!(
            rx.collect().await,
            vec![StreamEvent::content("a"), StreamEvent::content("b")]
        );
        assert_eq!(channel.state().await, ChannelState::Completed);
    }

    #[tokio::test]
    async fn no_send_succeeds_after_any_terminal_transition() {
        let (completed, _rx1) = EventChannel::open(LONG, 8);
        assert!(completed.complete().await);
        assert_eq!(
            completed.send(StreamEvent::content("late")).await,
            Err(ChannelError::ChannelClosed)
        );
        assert!(!completed.complete().await);
        assert!(!completed.complete_with_error("again").await);

        let (errored, _rx2) = EventChannel::open(LONG, 8);
        assert!(errored.complete_with_error("transport broke").await);
        assert_eq!(errored.state().await, ChannelState::CompletedWithError);
        assert_eq!(
            errored
                .send_and_complete(StreamEvent::result("late"))
                .await,
            Err(ChannelError::ChannelClosed)
        );
    }

    #[tokio::test]
    async fn dropped_receiver_reports_consumer_gone_then_closed() {
        let (channel, rx) = EventChannel::open(LONG, 8);
        drop(rx);
        assert_eq!(
            channel.send(StreamEvent::content("x")).await,
            Err(ChannelError::ConsumerGone)
        );
        assert_eq!(channel.state().await, ChannelState::CompletedWithError);
        assert_eq!(
            channel.send(StreamEvent::content("y")).await,
            Err(ChannelError::ChannelClosed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_once_and_writes_handler_event_last() {
        let (channel, rx) = EventChannel::open(Duration::from_secs(5), 8);
        let fired = Arc::new(AtomicUsize::new(0));
        let completions = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            channel.on_timeout(move || {
                fired.fetch_add(1, Ordering::SeqCst);
                Some(StreamEvent::error("分析超时"))
            });
        }
        {
            let completions = completions.clone();
            channel.on_completion(move |outcome| {
                assert_eq!(outcome, &ChannelOutcome::TimedOut);
                completions.fetch_add(1, Ordering::SeqCst);
            });
        }
        channel.send(StreamEvent::content("before")).await.expect("send");

        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(channel.state().await, ChannelState::TimedOut);
        assert_eq!(
            channel.send(StreamEvent::content("after")).await,
            Err(ChannelError::ChannelClosed)
        );
        assert!(!channel.complete().await);
        assert_eq!(
            rx.collect().await,
            vec![StreamEvent::content("before"), StreamEvent::error("分析超时")]
        );
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_disarms_timeout() {
        let (channel, _rx) = EventChannel::open(Duration::from_secs(1), 8);
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            channel.on_timeout(move || {
                fired.fetch_add(1, Ordering::SeqCst);
                None
            });
        }
        assert!(channel.complete().await);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(channel.state().await, ChannelState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_unblocks_send_waiting_on_a_stalled_consumer() {
        let (channel, _rx) = EventChannel::open(Duration::from_secs(2), 1);
        channel.send(StreamEvent::content("fills buffer")).await.expect("send");
        let blocked = channel.send(StreamEvent::content("waits")).await;
        assert_eq!(blocked, Err(ChannelError::ChannelClosed));
        tokio::task::yield_now().await;
        assert_eq!(channel.state().await, ChannelState::TimedOut);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_closers_apply_exactly_one_terminal_transition() {
        for round in 0..50u64 {
            let (channel, rx) = EventChannel::open(Duration::from_micros(200 + round * 20), 64);
            let timeouts = Arc::new(AtomicUsize::new(0));
            let completions = Arc::new(AtomicUsize::new(0));
            {
                let timeouts = timeouts.clone();
                channel.on_timeout(move || {
                    timeouts.fetch_add(1, Ordering::SeqCst);
                    Some(StreamEvent::error("超时"))
                });
            }
            {
                let completions = completions.clone();
                channel.on_completion(move |_| {
                    completions.fetch_add(1, Ordering::SeqCst);
                });
            }

            let mut closers = Vec::new();
            for i in 0..12 {
                let channel = channel.clone();
                closers.push(tokio::spawn(async move {
                    match i % 3 {
                        0 => (channel.complete().await, false),
                        1 => (channel.complete_with_error(format!("closer {i}")).await, false),
                        _ => {
                            let sent = channel
                                .send_and_complete(StreamEvent::result(format!("result {i}")))
                                .await
                                .is_ok();
                            (sent, sent)
                        }
                    }
                }));
            }
            let mut winners = 0;
            let mut result_winners = 0;
            for closer in closers {
                let (won, emitted) = closer.await.expect("join");
                winners += usize::from(won);
                result_winners += usize::from(emitted);
            }
            assert!(channel.state().await.is_terminal(), "round {round}");
            // A winning watchdog notifies after releasing the lock.
            for _ in 0..10_000 {
                if completions.load(Ordering::SeqCst) > 0 {
                    break;
                }
                tokio::task::yield_now().await;
            }

            let timed_out = usize::from(channel.state().await == ChannelState::TimedOut);
            let timeout_events = timeouts.load(Ordering::SeqCst);
            assert!(timeout_events <= timed_out, "round {round}");
            assert_eq!(winners + timed_out, 1, "round {round}");
            assert_eq!(completions.load(Ordering::SeqCst), 1, "round {round}");
            let terminal_events = rx
                .collect()
                .await
                .into_iter()
                .filter(StreamEvent::is_terminal)
                .count();
            assert_eq!(terminal_events, result_winners + timeout_events, "round {round}");
            assert!(terminal_events <= 1, "round {round}");
        }
    }

    #[tokio::test]
    async fn completion_handler_registered_late_runs_immediately() {
        let (channel, _rx) = EventChannel::open(LONG, 8);
        channel
            .send_and_complete(StreamEvent::result("done"))
            .await
            .expect("final");
        let seen = Arc::new(Mutex::new(None));
        {
            let seen = seen.clone();
            channel.on_completion(move |outcome| {
                *seen.lock().expect("lock") = Some(outcome.clone());
            });
        }
        assert_eq!(
            *seen.lock().expect("lock"),
            Some(ChannelOutcome::Completed)
        );
    }
}
