// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Management
//!
//! Declares the exchanges, queues and bindings a test needs before its mocks
//! start. The main components are:
//! - `Topology` trait: Interface for topology management
//! - `AmqpTopology`: Implementation of the Topology trait over any [`Transport`]
//! - helpers for the two shapes the mocks use: a queue bound to a direct
//!   exchange with the empty routing key, and a reply queue shared by RPC calls

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
    transport::Transport,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Trait defining the interface for topology management.
#[async_trait]
pub trait Topology<'tp> {
    /// Adds an exchange definition to the topology.
    fn exchange(self, def: &'tp ExchangeDefinition) -> Self;

    /// Adds a queue definition to the topology.
    fn queue(self, def: &'tp QueueDefinition) -> Self;

    /// Adds a queue-to-exchange binding to the topology.
    fn queue_binding(self, binding: &'tp QueueBinding) -> Self;

    /// Declares everything registered so far on the transport.
    async fn install(&self) -> Result<(), AmqpError>;
}

/// Collects exchanges, queues and bindings, and declares them in that order.
pub struct AmqpTopology<'tp> {
    transport: Arc<dyn Transport>,
    pub(crate) queues: Vec<&'tp QueueDefinition>,
    pub(crate) queues_binding: Vec<&'tp QueueBinding>,
    pub(crate) exchanges: Vec<&'tp ExchangeDefinition>,
}

impl<'tp> AmqpTopology<'tp> {
    /// Creates an empty topology declared through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> AmqpTopology<'tp> {
        AmqpTopology {
            transport,
            queues: vec![],
            queues_binding: vec![],
            exchanges: vec![],
        }
    }
}

#[async_trait]
impl<'tp> Topology<'tp> for AmqpTopology<'tp> {
    fn exchange(mut self, def: &'tp ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    fn queue(mut self, def: &'tp QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    fn queue_binding(mut self, binding: &'tp QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Declares exchanges first, then queues, then the bindings between them.
    async fn install(&self) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!("creating exchange: {}", exch.name);
            self.transport.exchange_declare(exch).await?;
        }

        for queue in &self.queues {
            debug!("creating queue: {}", queue.name);
            self.transport.queue_declare(queue).await?;
        }

        for binding in &self.queues_binding {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );
            self.transport.queue_bind(binding).await?;
        }

        Ok(())
    }
}

/// Declares `queue` and the direct exchange `exchange`, and binds them with
/// the empty routing key.
pub async fn declare_bound_queue(
    transport: &dyn Transport,
    exchange: &ExchangeDefinition,
    queue: &str,
) -> Result<(), AmqpError> {
    transport.exchange_declare(exchange).await?;
    transport.queue_declare(&QueueDefinition::new(queue)).await?;
    transport
        .queue_bind(&QueueBinding::new(queue).exchange(&exchange.name))
        .await?;

    debug!(queue, exchange = exchange.name, "queue was bounded");
    Ok(())
}

/// Declares a reply queue meant to outlive single RPC calls: it is neither
/// exclusive nor auto-deleted.
pub async fn declare_reply_queue(transport: &dyn Transport, queue: &str) -> Result<(), AmqpError> {
    transport.queue_declare(&QueueDefinition::new(queue)).await
}

/// Deletes a reply queue declared with [`declare_reply_queue`].
pub async fn delete_reply_queue(transport: &dyn Transport, queue: &str) -> Result<(), AmqpError> {
    transport.queue_delete(queue).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;

    #[tokio::test]
    async fn installs_exchanges_queues_and_bindings() {
        let broker = MemoryBroker::new();
        let exchange = ExchangeDefinition::new("orders").fanout();
        let audit = QueueDefinition::new("audit");
        let billing = QueueDefinition::new("billing").durable();
        let audit_binding = QueueBinding::new("audit").exchange("orders");
        let billing_binding = QueueBinding::new("billing").exchange("orders");

        AmqpTopology::new(broker.clone())
            .exchange(&exchange)
            .queue(&audit)
            .queue(&billing)
            .queue_binding(&audit_binding)
            .queue_binding(&billing_binding)
            .install()
            .await
            .unwrap();

        assert!(broker.has_exchange("orders"));
        assert!(broker.has_queue("audit"));
        assert!(broker.has_queue("billing"));
    }

    #[tokio::test]
    async fn binding_before_declaring_fails() {
        let broker = MemoryBroker::new();
        let binding = QueueBinding::new("nowhere").exchange("missing");

        let result = AmqpTopology::new(broker)
            .queue_binding(&binding)
            .install()
            .await;
        assert!(matches!(
            result,
            Err(AmqpError::BindingExchangeToQueueError(_, _))
        ));
    }

    #[tokio::test]
    async fn reply_queue_survives_until_deleted() {
        let broker = MemoryBroker::new();
        declare_reply_queue(broker.as_ref(), "replies").await.unwrap();

        let sub = broker.consume("replies", true).await.unwrap();
        broker.cancel(&sub.consumer_tag).await.unwrap();
        assert!(broker.has_queue("replies"));

        delete_reply_queue(broker.as_ref(), "replies").await.unwrap();
        assert!(!broker.has_queue("replies"));
    }
}
