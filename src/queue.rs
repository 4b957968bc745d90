// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! Types describing the queues the mocks consume from and reply to, and how
//! those queues are bound to exchanges.

/// Definition of a queue with its configuration parameters.
///
/// By default a queue is neither durable, exclusive nor auto-deleted. Reply
/// queues shared across RPC calls rely on that: an auto-deleted queue would
/// vanish between calls as soon as its consumer is cancelled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) passive: bool,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            durable: false,
            delete: false,
            exclusive: false,
            passive: false,
        }
    }

    /// Makes the queue durable, persisting across broker restarts.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the queue to auto-delete once its last consumer is cancelled.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Only checks that the queue exists instead of creating it.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }
}

/// Configuration for binding a queue to an exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a new queue binding for the given queue.
    ///
    /// By default, the exchange name and routing key are empty strings.
    /// These should be set using the `exchange` and `routing_key` methods.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
        }
    }

    /// Sets the exchange to bind the queue to.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    /// Sets the routing key for the binding.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_queue_flags() {
        let def = QueueDefinition::new("replies")
            .durable()
            .exclusive()
            .delete()
            .passive();

        assert_eq!(def.name, "replies");
        assert!(def.durable && def.exclusive && def.delete && def.passive);
        assert_eq!(
            QueueDefinition::new("replies"),
            QueueDefinition {
                name: "replies".to_owned(),
                ..QueueDefinition::default()
            }
        );
    }

    #[test]
    fn binding_defaults_to_empty_exchange_and_key() {
        let binding = QueueBinding::new("q");
        assert_eq!(binding.exchange_name, "");
        assert_eq!(binding.routing_key, "");

        let binding = binding.exchange("orders").routing_key("created");
        assert_eq!(binding.exchange_name, "orders");
        assert_eq!(binding.routing_key, "created");
    }
}
