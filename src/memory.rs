// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # In-Memory Broker
//!
//! A [`Transport`] that routes messages inside the process. It implements the
//! subset of broker behaviour the mocks rely on:
//! - the default exchange (`""`) routes to the queue named by the routing key
//! - direct exchanges route by exact binding key, fanout exchanges to every bound queue
//! - queues are FIFO; a consumer pulls one message at a time, so whatever it has
//!   not taken when it is cancelled stays queued for the next consumer
//! - auto-delete queues disappear with their last consumer
//!
//! Every publish is recorded so tests can assert on replies without consuming them.

use crate::{
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    message::{Delivery, Publishing},
    queue::{QueueBinding, QueueDefinition},
    transport::{Subscription, Transport},
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::Notify;
use tracing::{debug, error};
use uuid::Uuid;

struct MemoryQueue {
    def: QueueDefinition,
    messages: VecDeque<Publishing>,
    consumers: HashSet<String>,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    fn new(def: &QueueDefinition) -> MemoryQueue {
        MemoryQueue {
            def: def.clone(),
            messages: VecDeque::new(),
            consumers: HashSet::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, MemoryQueue>,
    bindings: Vec<QueueBinding>,
    consumers: HashMap<String, String>,
    published: Vec<Publishing>,
}

impl BrokerState {
    fn route(&self, publishing: &Publishing) -> Result<Vec<String>, AmqpError> {
        if publishing.exchange.is_empty() {
            return Ok(self
                .queues
                .get_key_value(&publishing.routing_key)
                .map(|(name, _)| vec![name.clone()])
                .unwrap_or_default());
        }

        let Some(kind) = self.exchanges.get(&publishing.exchange) else {
            return Err(AmqpError::PublishingError(format!(
                "exchange `{}` not found",
                publishing.exchange
            )));
        };

        let mut targets: Vec<String> = vec![];
        for binding in &self.bindings {
            let matches = binding.exchange_name == publishing.exchange
                && (*kind == ExchangeKind::Fanout || binding.routing_key == publishing.routing_key);
            if matches && !targets.contains(&binding.queue_name) {
                targets.push(binding.queue_name.clone());
            }
        }

        Ok(targets)
    }

    fn remove_queue(&mut self, name: &str) -> Option<MemoryQueue> {
        let queue = self.queues.remove(name)?;
        self.bindings.retain(|b| b.queue_name != name);
        self.consumers.retain(|_, q| q.as_str() != name);
        queue.notify.notify_waiters();
        Some(queue)
    }
}

/// In-process broker implementing [`Transport`].
///
/// Cheap to share: wrap it in an `Arc` and hand it to every mock of a test.
#[derive(Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    delivery_tags: Arc<AtomicU64>,
}

impl MemoryBroker {
    /// Creates an empty broker: no queues and no exchanges besides the
    /// default one.
    pub fn new() -> Arc<MemoryBroker> {
        Arc::new(MemoryBroker::default())
    }

    /// Every message published so far, in publish order.
    pub fn published(&self) -> Vec<Publishing> {
        self.state.lock().published.clone()
    }

    /// Messages published through the default exchange straight to `queue`,
    /// which is how replies travel.
    pub fn published_to(&self, queue: &str) -> Vec<Publishing> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|p| p.exchange.is_empty() && p.routing_key == queue)
            .cloned()
            .collect()
    }

    /// Number of messages waiting in `queue`, if it exists.
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.state.lock().queues.get(queue).map(|q| q.messages.len())
    }

    /// Number of active consumers on `queue`, if it exists.
    pub fn consumer_count(&self, queue: &str) -> Option<usize> {
        self.state.lock().queues.get(queue).map(|q| q.consumers.len())
    }

    /// Whether `queue` is currently declared.
    pub fn has_queue(&self, queue: &str) -> bool {
        self.state.lock().queues.contains_key(queue)
    }

    /// Whether `exchange` was declared.
    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.state.lock().exchanges.contains_key(exchange)
    }
}

/// Pulls the next message for the consumer `tag`, waiting until one is
/// published. Returns `None` once the consumer is cancelled or its queue is gone.
async fn next_delivery(
    state: &Mutex<BrokerState>,
    delivery_tags: &AtomicU64,
    notify: &Notify,
    queue: &str,
    tag: &str,
) -> Option<Delivery> {
    loop {
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        {
            let mut state = state.lock();
            let queue = state.queues.get_mut(queue)?;
            if !queue.consumers.contains(tag) {
                return None;
            }

            if let Some(publishing) = queue.messages.pop_front() {
                let delivery_tag = delivery_tags.fetch_add(1, Ordering::SeqCst) + 1;
                return Some(Delivery::from_publishing(publishing, tag, delivery_tag));
            }
        }

        notified.await;
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    async fn publish(&self, publishing: &Publishing) -> Result<(), AmqpError> {
        let mut state = self.state.lock();

        let targets = match state.route(publishing) {
            Ok(targets) => targets,
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                return Err(err);
            }
        };

        state.published.push(publishing.clone());

        if targets.is_empty() {
            debug!(
                exchange = publishing.exchange,
                routing_key = publishing.routing_key,
                "message unroutable, dropped"
            );
            return Ok(());
        }

        for name in targets {
            if let Some(queue) = state.queues.get_mut(&name) {
                queue.messages.push_back(publishing.clone());
                queue.notify.notify_waiters();
            }
        }

        Ok(())
    }

    async fn consume(&self, queue: &str, _no_ack: bool) -> Result<Subscription, AmqpError> {
        let tag = format!("amq.ctag-{}", Uuid::new_v4().simple());

        let notify = {
            let mut state = self.state.lock();
            let Some(q) = state.queues.get_mut(queue) else {
                error!(queue, "error to create the consumer, queue not found");
                return Err(AmqpError::BindingConsumerError(queue.to_owned()));
            };

            q.consumers.insert(tag.clone());
            let notify = q.notify.clone();
            state.consumers.insert(tag.clone(), queue.to_owned());
            notify
        };

        debug!(queue, consumer_tag = tag, "consumer registered");

        let seed = (
            self.state.clone(),
            self.delivery_tags.clone(),
            notify,
            queue.to_owned(),
            tag.clone(),
        );
        let deliveries = stream::unfold(seed, |seed| async move {
            let (state, delivery_tags, notify, queue, tag) = &seed;
            let delivery = next_delivery(state, delivery_tags, notify, queue, tag).await?;
            Some((Ok::<_, AmqpError>(delivery), seed))
        });

        Ok(Subscription::new(&tag, deliveries.boxed()))
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        let mut state = self.state.lock();

        let Some(queue_name) = state.consumers.remove(consumer_tag) else {
            error!(consumer_tag, "error to cancel the consumer, unknown tag");
            return Err(AmqpError::CancelConsumerError(consumer_tag.to_owned()));
        };

        let auto_delete = match state.queues.get_mut(&queue_name) {
            Some(queue) => {
                queue.consumers.remove(consumer_tag);
                queue.notify.notify_waiters();
                queue.def.delete && queue.consumers.is_empty()
            }
            None => false,
        };

        if auto_delete {
            debug!(queue = queue_name, "auto-delete queue removed");
            state.remove_queue(&queue_name);
        }

        debug!(consumer_tag, "consumer cancelled");
        Ok(())
    }

    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let mut state = self.state.lock();

        match state.exchanges.get(&def.name) {
            Some(kind) if *kind != def.kind => {
                error!(name = def.name, "exchange redeclared with a different kind");
                Err(AmqpError::DeclareExchangeError(def.name.clone()))
            }
            Some(_) => Ok(()),
            None if def.passive => {
                error!(name = def.name, "passive declare of a missing exchange");
                Err(AmqpError::DeclareExchangeError(def.name.clone()))
            }
            None => {
                state.exchanges.insert(def.name.clone(), def.kind);
                debug!("exchange: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        let mut state = self.state.lock();

        if state.queues.contains_key(&def.name) {
            return Ok(());
        }

        if def.passive {
            error!(name = def.name, "passive declare of a missing queue");
            return Err(AmqpError::DeclareQueueError(def.name.clone()));
        }

        state.queues.insert(def.name.clone(), MemoryQueue::new(def));
        debug!("queue: {} was created", def.name);
        Ok(())
    }

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        let mut state = self.state.lock();

        if !state.queues.contains_key(&binding.queue_name)
            || !state.exchanges.contains_key(&binding.exchange_name)
        {
            error!(
                queue = binding.queue_name,
                exchange = binding.exchange_name,
                "error to bind queue to exchange"
            );
            return Err(AmqpError::BindingExchangeToQueueError(
                binding.exchange_name.clone(),
                binding.queue_name.clone(),
            ));
        }

        if !state.bindings.contains(binding) {
            state.bindings.push(binding.clone());
        }

        Ok(())
    }

    async fn queue_delete(&self, queue: &str) -> Result<(), AmqpError> {
        if self.state.lock().remove_queue(queue).is_some() {
            debug!(queue, "queue deleted");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn broker_with_queue(name: &str) -> Arc<MemoryBroker> {
        let broker = MemoryBroker::new();
        broker.queue_declare(&QueueDefinition::new(name)).await.unwrap();
        broker
    }

    fn publishing(body: &str, exchange: &str, key: &str) -> Publishing {
        Publishing::new(&Message::new(body), exchange, key)
    }

    #[tokio::test]
    async fn default_exchange_routes_by_queue_name() {
        let broker = broker_with_queue("q").await;
        broker.publish(&publishing("a", "", "q")).await.unwrap();
        broker.publish(&publishing("b", "", "missing")).await.unwrap();

        assert_eq!(broker.queue_depth("q"), Some(1));
        assert_eq!(broker.published().len(), 2);
        assert_eq!(broker.published_to("q").len(), 1);
    }

    #[tokio::test]
    async fn direct_and_fanout_exchanges() {
        let broker = broker_with_queue("a").await;
        broker.queue_declare(&QueueDefinition::new("b")).await.unwrap();
        broker.exchange_declare(&ExchangeDefinition::new("direct")).await.unwrap();
        broker
            .exchange_declare(&ExchangeDefinition::new("fan").fanout())
            .await
            .unwrap();

        broker
            .queue_bind(&QueueBinding::new("a").exchange("direct").routing_key("k"))
            .await
            .unwrap();
        broker.queue_bind(&QueueBinding::new("a").exchange("fan")).await.unwrap();
        broker.queue_bind(&QueueBinding::new("b").exchange("fan")).await.unwrap();

        broker.publish(&publishing("1", "direct", "k")).await.unwrap();
        broker.publish(&publishing("2", "direct", "other")).await.unwrap();
        broker.publish(&publishing("3", "fan", "whatever")).await.unwrap();

        assert_eq!(broker.queue_depth("a"), Some(2));
        assert_eq!(broker.queue_depth("b"), Some(1));
    }

    #[tokio::test]
    async fn unknown_exchange_fails_publish() {
        let broker = MemoryBroker::new();
        let err = broker.publish(&publishing("x", "nope", "")).await.unwrap_err();
        assert!(err.is_transport());
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn consumer_receives_in_order_and_leaves_the_rest_after_cancel() {
        let broker = broker_with_queue("q").await;
        for body in ["1", "2", "3"] {
            broker.publish(&publishing(body, "", "q")).await.unwrap();
        }

        let mut sub = broker.consume("q", true).await.unwrap();
        let first = sub.deliveries.next().await.unwrap().unwrap();
        let second = sub.deliveries.next().await.unwrap().unwrap();
        assert_eq!(first.body_str(), Some("1"));
        assert_eq!(second.body_str(), Some("2"));
        assert_eq!(first.consumer_tag, sub.consumer_tag);
        assert!(second.delivery_tag > first.delivery_tag);

        broker.cancel(&sub.consumer_tag).await.unwrap();
        assert!(sub.deliveries.next().await.is_none());
        assert_eq!(broker.queue_depth("q"), Some(1));
    }

    #[tokio::test]
    async fn waiting_consumer_is_woken_by_publish() {
        let broker = broker_with_queue("q").await;
        let mut sub = broker.consume("q", true).await.unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(&publishing("late", "", "q")).await.unwrap();
        });

        let delivery = timeout(Duration::from_secs(1), sub.deliveries.next())
            .await
            .expect("timed out waiting for delivery")
            .unwrap()
            .unwrap();
        assert_eq!(delivery.body_str(), Some("late"));
    }

    #[tokio::test]
    async fn auto_delete_queue_goes_with_last_consumer() {
        let broker = MemoryBroker::new();
        broker
            .queue_declare(&QueueDefinition::new("tmp").delete())
            .await
            .unwrap();
        let sub = broker.consume("tmp", true).await.unwrap();
        assert_eq!(broker.consumer_count("tmp"), Some(1));

        broker.cancel(&sub.consumer_tag).await.unwrap();
        assert!(!broker.has_queue("tmp"));
    }

    #[tokio::test]
    async fn deleting_a_queue_ends_its_consumers() {
        let broker = broker_with_queue("q").await;
        let mut sub = broker.consume("q", true).await.unwrap();

        broker.queue_delete("q").await.unwrap();
        assert!(sub.deliveries.next().await.is_none());
        assert!(matches!(
            broker.cancel(&sub.consumer_tag).await,
            Err(AmqpError::CancelConsumerError(_))
        ));
    }

    #[tokio::test]
    async fn declaration_failures() {
        let broker = MemoryBroker::new();
        assert!(matches!(
            broker.consume("missing", true).await,
            Err(AmqpError::BindingConsumerError(_))
        ));
        assert!(matches!(
            broker.queue_declare(&QueueDefinition::new("missing").passive()).await,
            Err(AmqpError::DeclareQueueError(_))
        ));

        broker.exchange_declare(&ExchangeDefinition::new("ex")).await.unwrap();
        assert!(matches!(
            broker
                .exchange_declare(&ExchangeDefinition::new("ex").fanout())
                .await,
            Err(AmqpError::DeclareExchangeError(_))
        ));
        assert!(matches!(
            broker.queue_bind(&QueueBinding::new("missing").exchange("ex")).await,
            Err(AmqpError::BindingExchangeToQueueError(_, _))
        ));
    }

    #[tokio::test]
    async fn passive_declares_only_check_existence() {
        let broker = MemoryBroker::new();
        assert!(matches!(
            broker
                .exchange_declare(&ExchangeDefinition::new("ex").passive())
                .await,
            Err(AmqpError::DeclareExchangeError(_))
        ));
        assert!(!broker.has_exchange("ex"));

        broker
            .exchange_declare(&ExchangeDefinition::new("ex").durable().delete())
            .await
            .unwrap();
        broker
            .exchange_declare(&ExchangeDefinition::new("ex").passive())
            .await
            .unwrap();

        broker
            .queue_declare(&QueueDefinition::new("q").durable().exclusive())
            .await
            .unwrap();
        broker
            .queue_declare(&QueueDefinition::new("q").passive())
            .await
            .unwrap();
        assert!(broker.has_queue("q"));
    }
}
