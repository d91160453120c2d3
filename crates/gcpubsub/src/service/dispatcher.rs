//! Dispatcher
//!
//! Runs one receive loop per [`Dispatcher::receive`] call:
//!
//! ```text
//! pull ──▶ flow control ──▶ ordering queues ──▶ worker slot ──▶ handler
//!  ▲            │                                                  │
//!  └── slot ◀───┴────────────── ack / nack ◀───────────────────────┘
//! ```
//!
//! The pull loop stops as soon as the caller's token is cancelled. Handlers
//! already running finish and are settled normally; messages that never
//! reached a worker are nacked. `receive` returns once every task is done.

use futures::FutureExt;
use parking_lot::{Mutex, MutexGuard};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use pubsub_telemetry::{log_event, receive_span};

use super::flow_control::{FlowController, FlowPermit};
use super::ordering::OrderingQueues;
use crate::domain::{DispatchFailure, Message, PubSubError, ResolvedConfig};
use crate::metrics::{Outcome, TelemetryRecorder};
use crate::ports::{BrokerClient, MessageHandler, ReceivedMessage, SubscriptionHandle};

/// Upper bound on messages requested by a single pull.
const MAX_PULL_BATCH: usize = 100;

pub struct Dispatcher {
    /// `None` when no subscription is configured.
    subscription: Option<Arc<dyn SubscriptionHandle>>,
    config: Arc<ResolvedConfig>,
    telemetry: Arc<TelemetryRecorder>,
}

impl Dispatcher {
    pub fn new(
        client: &dyn BrokerClient,
        config: Arc<ResolvedConfig>,
        telemetry: Arc<TelemetryRecorder>,
    ) -> Self {
        let subscription = config
            .subscriber_enabled()
            .then(|| client.subscription(&config.subscription_id));
        Self {
            subscription,
            config,
            telemetry,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.subscription.is_some()
    }

    /// Dispatch messages to `handler` until `token` is cancelled or pulling fails.
    ///
    /// Handler failures never end the loop; they only decide ack versus nack.
    pub async fn receive(
        &self,
        token: CancellationToken,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), PubSubError> {
        let Some(subscription) = self.subscription.clone() else {
            return Err(PubSubError::SubscriberDisabled);
        };

        let run = Arc::new(ReceiveRun {
            subscription,
            handler,
            config: Arc::clone(&self.config),
            telemetry: Arc::clone(&self.telemetry),
            flow: FlowController::new(
                self.config.max_outstanding_messages,
                self.config.max_outstanding_bytes,
            ),
            workers: Arc::new(Semaphore::new(self.config.num_workers)),
            ordering: Mutex::new(OrderingQueues::new()),
            stop: token.child_token(),
        });

        log_event!(
            info,
            self.config.logging_enabled,
            subscription = run.subscription.id(),
            workers = self.config.num_workers,
            max_outstanding_messages = self.config.max_outstanding_messages,
            "Receive started"
        );

        let mut tasks = TaskPool::new(run.subscription.id(), self.config.logging_enabled);
        let outcome = run.pull_loop(&mut tasks).await;

        // Abandon anything that has not reached a worker yet, then drain.
        run.stop.cancel();
        tasks.drain().await;
        run.report_outstanding();

        match &outcome {
            Err(PubSubError::Cancelled) => log_event!(
                info,
                self.config.logging_enabled,
                subscription = run.subscription.id(),
                "Receive stopped"
            ),
            Err(e) => log_event!(
                error,
                self.config.logging_enabled,
                subscription = run.subscription.id(),
                error = %e,
                "Receive failed"
            ),
            Ok(()) => {}
        }
        outcome
    }
}

/// A pulled message holding its flow-control permit until settled.
struct Delivery {
    ack_id: String,
    message: Message,
    pulled_at: Instant,
    permit: FlowPermit,
}

enum Settlement {
    Handled {
        result: Result<(), DispatchFailure>,
        handler_elapsed: Duration,
    },
    /// Receive stopped before a worker picked the message up.
    Abandoned,
}

/// Dispatch tasks of one receive call.
///
/// Finished tasks are reaped before every spawn, so the set only holds work
/// that is still running plus whatever completed since the last spawn.
struct TaskPool {
    tasks: JoinSet<()>,
    subscription: String,
    logging_enabled: bool,
}

impl TaskPool {
    fn new(subscription: &str, logging_enabled: bool) -> Self {
        Self {
            tasks: JoinSet::new(),
            subscription: subscription.to_string(),
            logging_enabled,
        }
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.reap();
        self.tasks.spawn(task);
    }

    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            self.report(joined);
        }
    }

    async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            self.report(joined);
        }
    }

    fn report(&self, joined: Result<(), JoinError>) {
        if let Err(e) = joined {
            log_event!(
                error,
                self.logging_enabled,
                subscription = %self.subscription,
                error = %e,
                "Dispatch task failed"
            );
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tasks.len()
    }
}

/// State shared by the pull loop and the tasks of one receive call.
struct ReceiveRun {
    subscription: Arc<dyn SubscriptionHandle>,
    handler: Arc<dyn MessageHandler>,
    config: Arc<ResolvedConfig>,
    telemetry: Arc<TelemetryRecorder>,
    flow: FlowController,
    workers: Arc<Semaphore>,
    ordering: Mutex<OrderingQueues<Delivery>>,
    stop: CancellationToken,
}

impl ReceiveRun {
    async fn pull_loop(self: &Arc<Self>, tasks: &mut TaskPool) -> Result<(), PubSubError> {
        loop {
            tasks.reap();
            let reserved = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Err(PubSubError::Cancelled),
                reserved = self.flow.reserve() => reserved,
            };
            let Some((slot, spare)) = reserved else {
                return Err(PubSubError::Cancelled);
            };

            let batch = (spare + 1).min(MAX_PULL_BATCH);
            let pulled = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return Err(PubSubError::Cancelled),
                pulled = self.subscription.pull(batch) => pulled,
            };
            let received = pulled.map_err(PubSubError::Broker)?;
            let pulled_at = Instant::now();

            let mut first_slot = Some(slot);
            let mut received = received.into_iter();
            while let Some(next) = received.next() {
                let slot = match first_slot.take().or_else(|| self.flow.try_reserve()) {
                    Some(slot) => slot,
                    None => {
                        let reserved = tokio::select! {
                            biased;
                            _ = self.stop.cancelled() => None,
                            reserved = self.flow.reserve() => reserved,
                        };
                        match reserved {
                            Some((slot, _)) => slot,
                            None => {
                                self.nack_unstarted(std::iter::once(next).chain(received)).await;
                                return Err(PubSubError::Cancelled);
                            }
                        }
                    }
                };

                let size = next.message.size();
                let permit = tokio::select! {
                    biased;
                    _ = self.stop.cancelled() => None,
                    permit = self.flow.admit(slot, size) => Some(permit),
                };
                let Some(permit) = permit else {
                    self.nack_unstarted(std::iter::once(next).chain(received)).await;
                    return Err(PubSubError::Cancelled);
                };

                let ReceivedMessage { ack_id, mut message } = next;
                if !self.config.ordering_enabled {
                    message.clear_ordering_key();
                }
                self.dispatch(
                    Delivery {
                        ack_id,
                        message,
                        pulled_at,
                        permit,
                    },
                    tasks,
                );
            }
            self.report_outstanding();
        }
    }

    /// Start a task for `delivery`, or queue it behind its ordering key.
    fn dispatch(self: &Arc<Self>, delivery: Delivery, tasks: &mut TaskPool) {
        let key = delivery.message.ordering_key.clone();
        let admitted = self.ordering_queues().admit(&key, delivery);
        if let Some(first) = admitted {
            let run = Arc::clone(self);
            tasks.spawn(async move { run.process_key(key, first).await });
        }
    }

    /// Process `first`, then every message queued behind the same key.
    async fn process_key(self: Arc<Self>, key: String, first: Delivery) {
        let mut next = Some(first);
        while let Some(delivery) = next {
            self.process(delivery).await;
            next = if key.is_empty() {
                None
            } else {
                self.ordering_queues().next(&key)
            };
        }
    }

    async fn process(&self, delivery: Delivery) {
        let Delivery {
            ack_id,
            message,
            pulled_at,
            permit,
        } = delivery;
        let subscription = self.subscription.id();
        let message_id = message.id.clone();
        let attempt = message.delivery_attempt;
        let span = receive_span(&message.attributes, subscription);

        let work = async {
            let worker = tokio::select! {
                biased;
                _ = self.stop.cancelled() => None,
                worker = Arc::clone(&self.workers).acquire_owned() => worker.ok(),
            };
            let Some(_worker) = worker else {
                return Settlement::Abandoned;
            };
            let started = Instant::now();
            let result = invoke(Arc::clone(&self.handler), message).instrument(span).await;
            Settlement::Handled {
                result,
                handler_elapsed: started.elapsed(),
            }
        };

        match self.with_lease(&ack_id, pulled_at, work).await {
            Settlement::Handled {
                result,
                handler_elapsed,
            } => {
                let mut outcome = Outcome::of(&result);
                match result {
                    Ok(()) => {
                        if let Err(e) = self.subscription.ack(&ack_id).await {
                            if self.config.exactly_once_delivery {
                                outcome = Outcome::Error;
                                log_event!(
                                    warn,
                                    self.config.logging_enabled,
                                    subscription,
                                    message_id = %message_id,
                                    error = %e,
                                    "Ack was not confirmed"
                                );
                            } else {
                                log_event!(
                                    debug,
                                    self.config.logging_enabled,
                                    subscription,
                                    message_id = %message_id,
                                    error = %e,
                                    "Ack failed"
                                );
                            }
                        }
                    }
                    Err(failure) => {
                        log_event!(
                            warn,
                            self.config.logging_enabled,
                            subscription,
                            message_id = %message_id,
                            delivery_attempt = attempt,
                            error = %failure,
                            "Handler failed, message will be redelivered"
                        );
                        self.nack(&ack_id, &message_id).await;
                    }
                }
                self.telemetry.record_receive(
                    subscription,
                    pulled_at.elapsed(),
                    handler_elapsed,
                    attempt,
                    outcome,
                );
            }
            Settlement::Abandoned => self.nack(&ack_id, &message_id).await,
        }

        drop(permit);
        self.report_outstanding();
    }

    /// Drive `work` while periodically extending the message's lease.
    ///
    /// Extensions are sent every half period, each pushing the deadline one
    /// period out, until `max_extension` has elapsed since the pull.
    async fn with_lease<F: Future>(&self, ack_id: &str, pulled_at: Instant, work: F) -> F::Output {
        let period = self.config.lease_extension_period();
        let tick = (period / 2).max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut extending = true;

        tokio::pin!(work);
        loop {
            tokio::select! {
                output = &mut work => return output,
                _ = ticker.tick(), if extending => {
                    if pulled_at.elapsed() >= self.config.max_extension {
                        extending = false;
                        continue;
                    }
                    if let Err(e) = self.subscription.modify_ack_deadline(ack_id, period).await {
                        log_event!(
                            debug,
                            self.config.logging_enabled,
                            subscription = self.subscription.id(),
                            error = %e,
                            "Lease extension failed"
                        );
                    }
                }
            }
        }
    }

    async fn nack(&self, ack_id: &str, message_id: &str) {
        if let Err(e) = self.subscription.nack(ack_id).await {
            log_event!(
                debug,
                self.config.logging_enabled,
                subscription = self.subscription.id(),
                message_id,
                error = %e,
                "Nack failed"
            );
        }
    }

    async fn nack_unstarted(&self, pending: impl Iterator<Item = ReceivedMessage>) {
        for received in pending {
            self.nack(&received.ack_id, &received.message.id).await;
        }
    }

    fn report_outstanding(&self) {
        self.telemetry
            .set_outstanding(self.subscription.id(), self.flow.outstanding_messages());
    }

    fn ordering_queues(&self) -> MutexGuard<'_, OrderingQueues<Delivery>> {
        self.ordering.lock()
    }
}

/// Run the handler behind an abort-isolation boundary.
///
/// A panic inside the handler becomes [`DispatchFailure::Panicked`] and is
/// settled exactly like a returned error.
async fn invoke(handler: Arc<dyn MessageHandler>, message: Message) -> Result<(), DispatchFailure> {
    match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(DispatchFailure::Returned(e)),
        Err(payload) => Err(DispatchFailure::from_panic(payload)),
    }
}
