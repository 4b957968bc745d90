// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Captured Stream
//!
//! The ordered, terminating sequence of deliveries a mock consumer exposes to
//! the test driving it. The consumer side holds a [`StreamSink`]; the test
//! holds the [`CapturedStream`], which is a `futures` stream of
//! `Result<Delivery, AmqpError>` ending after completion or after the first
//! error.
//!
//! The sink never blocks and never drops items: deliveries are buffered until
//! the observer reads them. When the observer goes away the sink keeps
//! accepting and silently discards, so the consumer is never stalled.

use crate::{errors::AmqpError, message::Delivery};
use futures_util::{Stream, StreamExt};
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Lifecycle of a mock consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Built but not subscribed yet.
    Armed,
    /// Subscribed and accepting deliveries.
    Active,
    /// Budget reached or cancel requested; unsubscribing.
    Draining,
    /// Accepted all requested deliveries.
    Completed,
    /// Stopped from outside before the budget was reached.
    Cancelled,
    /// Stopped by a transport error.
    Errored,
}

impl ConsumerState {
    /// True for the states a consumer never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConsumerState::Completed | ConsumerState::Cancelled | ConsumerState::Errored
        )
    }
}

pub(crate) enum Event {
    Item(Delivery),
    Failed(AmqpError),
}

/// Producer half of a captured stream.
///
/// Owned by exactly one consumer task. `complete` and `error` are terminal;
/// the first terminal signal wins and later ones are ignored.
pub struct StreamSink {
    tx: Option<mpsc::UnboundedSender<Event>>,
}

impl StreamSink {
    /// Appends a delivery. Never blocks.
    pub fn append(&mut self, delivery: Delivery) {
        let Some(tx) = &self.tx else {
            error!(
                delivery_tag = delivery.delivery_tag,
                "delivery appended after the stream was terminated"
            );
            return;
        };

        if tx.send(Event::Item(delivery)).is_err() {
            debug!("captured stream observer is gone, delivery discarded");
        }
    }

    /// Marks the stream complete. Idempotent.
    pub fn complete(&mut self) {
        if self.tx.take().is_some() {
            debug!("captured stream completed");
        }
    }

    /// Terminates the stream with `err`, unless it already terminated.
    pub fn error(&mut self, err: AmqpError) {
        if let Some(tx) = self.tx.take() {
            debug!(error = err.to_string(), "captured stream errored");
            let _ = tx.send(Event::Failed(err));
        }
    }

    /// Whether the stream was completed or errored.
    pub fn is_terminated(&self) -> bool {
        self.tx.is_none()
    }
}

/// Creates a connected sink/receiver pair.
pub(crate) fn channel() -> (StreamSink, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StreamSink { tx: Some(tx) }, rx)
}

/// Observer half of a captured stream, returned by a started mock consumer.
///
/// Yields deliveries in the order the consumer accepted them, then ends when
/// the consumer completes or is cancelled. A transport failure is yielded as a
/// single `Err` item, after which the stream ends.
pub struct CapturedStream {
    consumer_tag: String,
    rx: mpsc::UnboundedReceiver<Event>,
    state: watch::Receiver<ConsumerState>,
    cancel: CancellationToken,
}

impl CapturedStream {
    pub(crate) fn new(
        consumer_tag: String,
        rx: mpsc::UnboundedReceiver<Event>,
        state: watch::Receiver<ConsumerState>,
        cancel: CancellationToken,
    ) -> CapturedStream {
        CapturedStream {
            consumer_tag,
            rx,
            state,
            cancel,
        }
    }

    /// Tag of the transport subscription feeding this stream.
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Current state of the consumer feeding this stream.
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Waits until the consumer reached a terminal state and returns it.
    pub async fn terminated(&self) -> ConsumerState {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(ConsumerState::is_terminal)
            .await
            .map(|current| *current);
        match reached {
            Ok(current) => current,
            // The consumer task is gone; report whatever it left behind.
            Err(_) => *state.borrow(),
        }
    }

    /// Stops the consumer before its budget is reached and unsubscribes it
    /// from the transport. Deliveries accepted so far stay readable.
    ///
    /// # Returns
    /// The terminal state; `Completed` or `Errored` when the consumer had
    /// already finished on its own
    pub async fn cancel(&self) -> ConsumerState {
        self.cancel.cancel();
        self.terminated().await
    }

    /// Drains the stream, returning every delivery or the first error.
    ///
    /// Waits for the consumer to terminate, so only call it once the
    /// expected requests were sent or after [`cancel`](Self::cancel).
    ///
    /// # Errors
    /// The error the consumer terminated with, if any.
    pub async fn collect_deliveries(mut self) -> Result<Vec<Delivery>, AmqpError> {
        let mut deliveries = vec![];
        while let Some(item) = self.next().await {
            deliveries.push(item?);
        }

        Ok(deliveries)
    }
}

impl Stream for CapturedStream {
    type Item = Result<Delivery, AmqpError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|event| {
            event.map(|event| match event {
                Event::Item(delivery) => Ok(delivery),
                Event::Failed(err) => Err(err),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Publishing};

    fn delivery(tag: u64) -> Delivery {
        Delivery::from_publishing(
            Publishing::new(&Message::new(format!("m{tag}")), "", "q"),
            "ctag",
            tag,
        )
    }

    fn pair() -> (StreamSink, CapturedStream, watch::Sender<ConsumerState>) {
        let (sink, rx) = channel();
        let (state_tx, state_rx) = watch::channel(ConsumerState::Active);
        let stream = CapturedStream::new("ctag".to_owned(), rx, state_rx, CancellationToken::new());
        (sink, stream, state_tx)
    }

    #[tokio::test]
    async fn buffers_until_observed_and_ends_on_complete() {
        let (mut sink, stream, _state) = pair();
        sink.append(delivery(1));
        sink.append(delivery(2));
        sink.complete();
        sink.complete();

        let tags: Vec<u64> = stream
            .collect_deliveries()
            .await
            .unwrap()
            .iter()
            .map(|d| d.delivery_tag)
            .collect();
        assert_eq!(tags, vec![1, 2]);
    }

    #[tokio::test]
    async fn error_wins_over_later_complete() {
        let (mut sink, mut stream, _state) = pair();
        sink.append(delivery(1));
        sink.error(AmqpError::ConsumerError("malformed".to_owned()));
        sink.complete();
        assert!(sink.is_terminated());

        assert_eq!(stream.next().await.unwrap().unwrap().delivery_tag, 1);
        assert_eq!(
            stream.next().await.unwrap(),
            Err(AmqpError::ConsumerError("malformed".to_owned()))
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn append_after_termination_is_dropped() {
        let (mut sink, stream, _state) = pair();
        sink.complete();
        sink.append(delivery(9));

        assert!(stream.collect_deliveries().await.unwrap().is_empty());
    }

    #[test]
    fn dropped_observer_does_not_stall_the_sink() {
        let (mut sink, stream, _state) = pair();
        drop(stream);

        sink.append(delivery(1));
        sink.complete();
        assert!(sink.is_terminated());
    }

    #[tokio::test]
    async fn terminated_waits_for_a_terminal_state() {
        let (_sink, stream, state) = pair();
        assert_eq!(stream.state(), ConsumerState::Active);

        tokio::spawn(async move {
            state.send_replace(ConsumerState::Draining);
            state.send_replace(ConsumerState::Completed);
        });

        assert_eq!(stream.terminated().await, ConsumerState::Completed);
    }
}
