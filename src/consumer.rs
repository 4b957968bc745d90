// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Mock Consumer
//!
//! A queue consumer for tests. It accepts a fixed number of deliveries,
//! captures each of them into a [`CapturedStream`], answers the ones that carry
//! reply routing with canned responses, and unsubscribes once its budget is
//! spent.
//!
//! ```ignore
//! let captured = MockConsumerFactory::new(transport.clone())
//!     .consume(2)?
//!     .on("orders")
//!     .then_respond(Message::new("accepted"))
//!     .start()
//!     .await?;
//! ```
//!
//! For every delivery the consumer:
//! 1. decrements its remaining budget and takes the result `r`
//! 2. if `r >= 0`, appends the delivery to the stream and, when the delivery
//!    has both a reply-to address and a correlation id, publishes the next
//!    canned response to that address under the same correlation id
//! 3. if `r <= 0`, cancels its subscription and completes the stream
//!
//! The delivery that spends the budget is therefore still captured and
//! answered before the stream completes.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    message::{Delivery, Message, Publishing},
    otel,
    sequencer::ResponseSequencer,
    stream::{self, CapturedStream, ConsumerState, StreamSink},
    topology,
    transport::{Subscription, Transport},
};
use futures_util::{stream::BoxStream, StreamExt};
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
};
use std::{
    borrow::Cow,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Entry point for building mock consumers on a shared transport.
#[derive(Clone)]
pub struct MockConsumerFactory {
    transport: Arc<dyn Transport>,
}

impl MockConsumerFactory {
    /// Creates a factory whose consumers subscribe through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> MockConsumerFactory {
        MockConsumerFactory { transport }
    }

    /// Starts building a consumer that accepts exactly `requests` deliveries.
    ///
    /// # Errors
    /// `InvalidArgument` when `requests` is lower than one or does not fit
    /// the consumer's signed countdown.
    pub fn consume(&self, requests: usize) -> Result<MockConsumerBuilder, AmqpError> {
        if requests < 1 {
            return Err(AmqpError::InvalidArgument(format!(
                "a mock consumer must accept at least one request, got {requests}"
            )));
        }

        let Ok(budget) = i64::try_from(requests) else {
            return Err(AmqpError::InvalidArgument(format!(
                "a mock consumer accepts at most {} requests, got {requests}",
                i64::MAX
            )));
        };

        Ok(MockConsumerBuilder {
            transport: self.transport.clone(),
            requests: budget,
            queue: None,
            exchange: None,
            responses: ResponseSequencer::bounded(requests),
        })
    }
}

/// Builder arranging the queue and canned responses of a mock consumer.
pub struct MockConsumerBuilder {
    transport: Arc<dyn Transport>,
    requests: i64,
    queue: Option<String>,
    exchange: Option<String>,
    responses: ResponseSequencer,
}

impl MockConsumerBuilder {
    /// Sets the queue to consume from.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn on(mut self, queue: &str) -> Self {
        self.queue = Some(queue.to_owned());
        self
    }

    /// Declares the queue and a direct `exchange` on start, binding them with
    /// the empty routing key.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn bound_to(mut self, exchange: &str) -> Self {
        self.exchange = Some(exchange.to_owned());
        self
    }

    /// Appends a canned response. Responses are used in order; the last one
    /// repeats once they run out. Responses beyond the request count are
    /// dropped.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn then_respond(mut self, response: Message) -> Self {
        self.responses.offer(response);
        self
    }

    /// Subscribes to the queue and returns the stream of captured deliveries.
    ///
    /// # Errors
    /// `InvalidArgument` when no queue was set; transport errors when the
    /// declaration or the subscription fails.
    pub async fn start(self) -> Result<CapturedStream, AmqpError> {
        let Some(queue) = self.queue else {
            return Err(AmqpError::InvalidArgument(
                "a mock consumer needs a queue, call `on` before `start`".to_owned(),
            ));
        };

        let (state_tx, state_rx) = watch::channel(ConsumerState::Armed);

        if let Some(exchange) = &self.exchange {
            topology::declare_bound_queue(
                self.transport.as_ref(),
                &ExchangeDefinition::new(exchange),
                &queue,
            )
            .await?;
        }

        let Subscription {
            consumer_tag,
            deliveries,
        } = self.transport.consume(&queue, true).await?;

        debug!(
            queue,
            consumer_tag,
            requests = self.requests,
            responses = self.responses.len(),
            "mock consumer started"
        );

        let (sink, rx) = stream::channel();
        let cancel = CancellationToken::new();
        state_tx.send_replace(ConsumerState::Active);

        let consumer = MockConsumer {
            transport: self.transport,
            tracer: global::tracer("mock consumer"),
            queue,
            consumer_tag: consumer_tag.clone(),
            remaining: AtomicI64::new(self.requests),
            responses: self.responses,
            sink,
            state: state_tx,
        };

        tokio::spawn(consumer.run(deliveries, cancel.clone()));

        Ok(CapturedStream::new(consumer_tag, rx, state_rx, cancel))
    }
}

enum Flow {
    Continue,
    Exhausted,
}

struct MockConsumer {
    transport: Arc<dyn Transport>,
    tracer: BoxedTracer,
    queue: String,
    consumer_tag: String,
    // Decremented once per delivery; the value after the decrement decides
    // whether the delivery is accepted and whether it spends the budget.
    remaining: AtomicI64,
    // Advanced only from the consumer task, which sees one delivery at a time.
    responses: ResponseSequencer,
    sink: StreamSink,
    state: watch::Sender<ConsumerState>,
}

impl MockConsumer {
    async fn run(
        mut self,
        mut deliveries: BoxStream<'static, Result<Delivery, AmqpError>>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(consumer_tag = self.consumer_tag, "mock consumer cancelled");
                    self.terminate(ConsumerState::Cancelled).await;
                    return;
                }

                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => match self.handle(delivery).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Exhausted) => {
                            self.terminate(ConsumerState::Completed).await;
                            return;
                        }
                        Err(err) => {
                            self.fail(err).await;
                            return;
                        }
                    },
                    Some(Err(err)) => {
                        error!(error = err.to_string(), "errors consume msg");
                        self.fail(err).await;
                        return;
                    }
                    None => {
                        warn!(
                            consumer_tag = self.consumer_tag,
                            "subscription closed by the transport before the budget was spent"
                        );
                        self.state.send_replace(ConsumerState::Cancelled);
                        self.sink.complete();
                        return;
                    }
                },
            }
        }
    }

    async fn handle(&mut self, delivery: Delivery) -> Result<Flow, AmqpError> {
        let remaining = self.remaining.fetch_sub(1, Ordering::SeqCst) - 1;

        let (_ctx, mut span) = otel::new_span(&delivery.headers, &self.tracer, &self.queue);

        debug!(
            queue = self.queue,
            delivery_tag = delivery.delivery_tag,
            remaining,
            "received delivery"
        );

        if remaining >= 0 {
            let reply_route = delivery.reply_to.clone().zip(delivery.correlation_id.clone());
            self.sink.append(delivery);

            if let Some((reply_to, correlation_id)) = reply_route {
                if let Err(err) = self.reply(&reply_to, &correlation_id).await {
                    span.record_error(&err);
                    span.set_status(Status::Error {
                        description: Cow::from("error to publish reply"),
                    });
                    return Err(err);
                }
            } else {
                debug!("delivery without reply-to or correlation id, no reply sent");
            }
        }

        span.set_status(Status::Ok);

        if remaining <= 0 {
            return Ok(Flow::Exhausted);
        }

        Ok(Flow::Continue)
    }

    async fn reply(&mut self, reply_to: &str, correlation_id: &str) -> Result<(), AmqpError> {
        let Some(response) = self.responses.next() else {
            debug!(correlation_id, "no response declared, no reply sent");
            return Ok(());
        };

        self.transport
            .publish(&Publishing::reply(&response, reply_to, correlation_id))
            .await?;

        debug!(reply_to, correlation_id, "reply published");
        Ok(())
    }

    /// Unsubscribes and completes the stream. The terminal state is published
    /// before the stream ends, so an observer reaching the end sees it.
    async fn terminate(&mut self, outcome: ConsumerState) {
        self.state.send_replace(ConsumerState::Draining);
        self.unsubscribe().await;
        self.state.send_replace(outcome);
        self.sink.complete();
    }

    /// Unsubscribes and errors the stream.
    async fn fail(&mut self, err: AmqpError) {
        self.state.send_replace(ConsumerState::Draining);
        self.unsubscribe().await;
        self.state.send_replace(ConsumerState::Errored);
        self.sink.error(err);
    }

    async fn unsubscribe(&self) {
        if let Err(err) = self.transport.cancel(&self.consumer_tag).await {
            warn!(
                error = err.to_string(),
                consumer_tag = self.consumer_tag,
                "failure to cancel the mock consumer"
            );
        }
    }
}
