// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Transport Port
//!
//! The byte-message transport the mocks are layered on. A transport publishes
//! addressed messages, hands out consumer subscriptions on named queues and
//! declares the queues and exchanges tests need.
//!
//! Two implementations ship with the crate:
//! - [`crate::amqp::LapinTransport`] talks to a real broker through a lapin channel
//! - [`crate::memory::MemoryBroker`] routes messages in-process
//!
//! A transport is shared by every mock of a test. Mocks only open and cancel
//! their own subscriptions; none of them closes the transport.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    message::{Delivery, Publishing},
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// A consumer registration on a queue.
///
/// Deliveries are yielded one at a time in the order the transport delivers
/// them. The stream ends once the subscription is cancelled or the queue goes
/// away; a transport-level failure for a single delivery is yielded as `Err`.
pub struct Subscription {
    pub consumer_tag: String,
    pub deliveries: BoxStream<'static, Result<Delivery, AmqpError>>,
}

impl Subscription {
    /// Wraps the delivery stream of the consumer registered as `consumer_tag`.
    pub fn new(
        consumer_tag: &str,
        deliveries: BoxStream<'static, Result<Delivery, AmqpError>>,
    ) -> Subscription {
        Subscription {
            consumer_tag: consumer_tag.to_owned(),
            deliveries,
        }
    }
}

/// Capability to move raw messages through a broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publishes a message. Failures are never retried.
    async fn publish(&self, publishing: &Publishing) -> Result<(), AmqpError>;

    /// Registers a consumer on `queue`.
    ///
    /// With `no_ack` unset the transport acknowledges each message as it
    /// hands it out.
    async fn consume(&self, queue: &str, no_ack: bool) -> Result<Subscription, AmqpError>;

    /// Cancels the consumer registered under `consumer_tag`.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError>;

    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    async fn queue_delete(&self, queue: &str) -> Result<(), AmqpError>;
}
