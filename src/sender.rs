// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Mock Sender
//!
//! Publishes test messages and performs RPC calls.
//!
//! A publish is fire-and-forget: the message's custom headers are copied into
//! the transport headers, the current trace context is injected, and a
//! transport failure is returned as is. Nothing is retried.
//!
//! An RPC call tags the request with a fresh correlation id and the sender's
//! reply queue, then waits for the one reply carrying that id. Replies reach
//! the waiting call through a single consumer on the reply queue that routes
//! by correlation id; a call that completes or times out drops its entry, so
//! late or duplicate replies find nobody waiting and are discarded.
//!
//! Each sender owns its reply queue: unless one is configured, the name gets
//! a random suffix, so senders sharing a transport never take each other's
//! replies. When the reply consumer stops (its queue was deleted, the
//! subscription failed) the next call starts a new one.

use crate::{
    config::RpcConfigs,
    errors::AmqpError,
    message::{Delivery, Message, Publishing},
    otel, topology,
    transport::{Subscription, Transport},
};
use dashmap::DashMap;
use futures_util::StreamExt;
use std::{sync::Arc, time::Duration};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Prefix of the reply queue generated for a sender when none is configured.
pub const DEFAULT_REPLY_QUEUE: &str = "mock-sender-replies";
/// RPC deadline used when none is configured.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

type PendingReplies = Arc<DashMap<String, oneshot::Sender<Delivery>>>;

/// Consumer on the reply queue handing replies to the calls waiting for them.
struct ReplyRouter {
    consumer_tag: String,
    pending: PendingReplies,
    // Cancelled by the routing task when the reply subscription ends.
    stopped: CancellationToken,
}

impl ReplyRouter {
    async fn start(transport: &dyn Transport, reply_queue: &str) -> Result<ReplyRouter, AmqpError> {
        topology::declare_reply_queue(transport, reply_queue).await?;

        let Subscription {
            consumer_tag,
            mut deliveries,
        } = transport.consume(reply_queue, true).await?;

        debug!(reply_queue, consumer_tag, "reply consumer started");

        let pending = PendingReplies::default();
        let stopped = CancellationToken::new();
        let routes = pending.clone();
        let done = stopped.clone();
        tokio::spawn(async move {
            while let Some(result) = deliveries.next().await {
                match result {
                    Ok(reply) => route_reply(&routes, reply),
                    Err(err) => {
                        error!(error = err.to_string(), "errors consume reply");
                        break;
                    }
                }
            }

            // Stop first: a call registering after the clear must see it.
            done.cancel();
            // Waiting calls see their reply channel closed.
            routes.clear();
            debug!("reply consumer stopped");
        });

        Ok(ReplyRouter {
            consumer_tag,
            pending,
            stopped,
        })
    }

    fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Registers a call waiting for the reply correlated by `correlation_id`.
    ///
    /// # Errors
    /// `ConsumerError` when the reply consumer stopped, since nothing would
    /// ever route the reply.
    fn register(&self, correlation_id: &str) -> Result<PendingReply, AmqpError> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.to_owned(), tx);

        let pending = PendingReply {
            correlation_id: correlation_id.to_owned(),
            rx,
            pending: self.pending.clone(),
        };

        if self.is_stopped() {
            return Err(AmqpError::ConsumerError(format!(
                "reply consumer `{}` stopped",
                self.consumer_tag
            )));
        }

        Ok(pending)
    }
}

fn route_reply(pending: &DashMap<String, oneshot::Sender<Delivery>>, reply: Delivery) {
    let Some(correlation_id) = reply.correlation_id.clone() else {
        debug!("reply without correlation id discarded");
        return;
    };

    match pending.remove(&correlation_id) {
        Some((_, waiting)) => {
            if waiting.send(reply).is_err() {
                debug!(correlation_id, "rpc call gone, reply discarded");
            }
        }
        None => debug!(correlation_id, "late or duplicate reply discarded"),
    }
}

/// Correlation context of one RPC call. Dropping it releases the correlation
/// id, whatever the outcome of the call.
struct PendingReply {
    correlation_id: String,
    rx: oneshot::Receiver<Delivery>,
    pending: PendingReplies,
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.pending.remove(&self.correlation_id);
    }
}

/// Publishes messages and performs RPC calls over a shared transport.
pub struct MockSender {
    transport: Arc<dyn Transport>,
    reply_queue: String,
    timeout: Duration,
    replies: Mutex<Option<Arc<ReplyRouter>>>,
}

impl MockSender {
    /// Creates a sender with its own reply queue and the default deadline.
    ///
    /// # Parameters
    /// * `transport` - Transport shared with the other mocks of the test
    ///
    /// # Returns
    /// A sender whose reply queue is named `mock-sender-replies-<random>`
    pub fn new(transport: Arc<dyn Transport>) -> MockSender {
        MockSender {
            transport,
            reply_queue: format!("{DEFAULT_REPLY_QUEUE}-{}", Uuid::new_v4().simple()),
            timeout: DEFAULT_RPC_TIMEOUT,
            replies: Mutex::new(None),
        }
    }

    /// Creates a sender using the reply queue and deadline from `cfg`. A
    /// missing `reply_queue` keeps the generated one.
    pub fn from_configs(transport: Arc<dyn Transport>, cfg: &RpcConfigs) -> MockSender {
        let sender = MockSender::new(transport).with_timeout(cfg.timeout());
        match &cfg.reply_queue {
            Some(queue) => sender.with_reply_queue(queue),
            None => sender,
        }
    }

    /// Sets the queue RPC replies are sent to. The sender expects to be the
    /// only consumer of that queue.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_reply_queue(mut self, queue: &str) -> Self {
        self.reply_queue = queue.to_owned();
        self
    }

    /// Sets the default RPC deadline.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name of the queue RPC replies are sent to.
    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    /// Declares the reply queue. RPC calls also declare it on first use.
    pub async fn declare_reply_queue(&self) -> Result<(), AmqpError> {
        topology::declare_reply_queue(self.transport.as_ref(), &self.reply_queue).await
    }

    /// Starts a fire-and-forget publish of `message`.
    pub fn basic_publish(&self, message: Message) -> PublishRequest<'_> {
        PublishRequest {
            sender: self,
            message,
            correlation_id: None,
            reply_to: None,
        }
    }

    /// Starts an RPC call sending `message`.
    pub fn rpc(&self, message: Message) -> RpcRequest<'_> {
        RpcRequest {
            sender: self,
            message,
            timeout: self.timeout,
        }
    }

    /// Cancels the reply consumer and deletes the reply queue. The shared
    /// transport stays open.
    ///
    /// # Errors
    /// The first failure among the cancel and the delete. The queue delete is
    /// attempted even when the cancel fails.
    pub async fn close(self) -> Result<(), AmqpError> {
        let cancelled = match self.replies.into_inner() {
            Some(router) if !router.is_stopped() => {
                self.transport.cancel(&router.consumer_tag).await
            }
            _ => Ok(()),
        };

        if let Err(err) = &cancelled {
            warn!(error = err.to_string(), "error cancelling reply consumer");
        }

        let deleted =
            topology::delete_reply_queue(self.transport.as_ref(), &self.reply_queue).await;
        cancelled.and(deleted)
    }

    async fn send(&self, mut publishing: Publishing) -> Result<(), AmqpError> {
        otel::inject_current(&mut publishing.headers);

        if let Err(err) = self.transport.publish(&publishing).await {
            error!(
                error = err.to_string(),
                exchange = publishing.exchange,
                routing_key = publishing.routing_key,
                "error publishing message"
            );
            return Err(err);
        }

        Ok(())
    }

    /// Returns the running reply router, starting one on first use or when
    /// the previous one stopped.
    async fn router(&self) -> Result<Arc<ReplyRouter>, AmqpError> {
        let mut current = self.replies.lock().await;

        if let Some(router) = current.as_ref() {
            if !router.is_stopped() {
                return Ok(router.clone());
            }
            warn!(
                reply_queue = self.reply_queue,
                consumer_tag = router.consumer_tag,
                "reply consumer stopped, restarting"
            );
        }

        let router = ReplyRouter::start(self.transport.as_ref(), &self.reply_queue).await?;
        let router = Arc::new(router);
        *current = Some(router.clone());
        Ok(router)
    }
}

/// A publish waiting for its destination.
pub struct PublishRequest<'s> {
    sender: &'s MockSender,
    message: Message,
    correlation_id: Option<String>,
    reply_to: Option<String>,
}

impl PublishRequest<'_> {
    /// Tags the message with a correlation id.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.correlation_id = Some(correlation_id.to_owned());
        self
    }

    /// Asks for replies to be sent to `reply_to`.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_reply_to(mut self, reply_to: &str) -> Self {
        self.reply_to = Some(reply_to.to_owned());
        self
    }

    /// Publishes the message to `exchange` with `routing_key`.
    pub async fn on(self, exchange: &str, routing_key: &str) -> Result<(), AmqpError> {
        let mut publishing = Publishing::new(&self.message, exchange, routing_key);
        publishing.correlation_id = self.correlation_id;
        publishing.reply_to = self.reply_to;

        self.sender.send(publishing).await
    }
}

/// An RPC call waiting for its destination.
pub struct RpcRequest<'s> {
    sender: &'s MockSender,
    message: Message,
    timeout: Duration,
}

impl RpcRequest<'_> {
    /// Overrides the sender's RPC deadline for this call.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends the request to `exchange` with `routing_key` and waits for the
    /// correlated reply.
    ///
    /// # Errors
    /// `Timeout` when no reply arrives within the deadline; transport errors
    /// when the reply consumer or the publish fails.
    pub async fn on(self, exchange: &str, routing_key: &str) -> Result<Delivery, AmqpError> {
        let router = self.sender.router().await?;

        let correlation_id = Uuid::new_v4().to_string();
        let mut pending = router.register(&correlation_id)?;

        let publishing = Publishing::new(&self.message, exchange, routing_key)
            .with_correlation_id(&correlation_id)
            .with_reply_to(&self.sender.reply_queue);
        self.sender.send(publishing).await?;

        debug!(correlation_id, exchange, routing_key, "rpc request published");

        match tokio::time::timeout(self.timeout, &mut pending.rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                error!(correlation_id, "reply consumer stopped while waiting");
                Err(AmqpError::ConsumerError(format!(
                    "reply consumer on `{}` stopped",
                    self.sender.reply_queue
                )))
            }
            Err(_) => {
                warn!(correlation_id, timeout = ?self.timeout, "rpc reply timed out");
                Err(AmqpError::Timeout(self.timeout))
            }
        }
    }
}
