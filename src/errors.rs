// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the AMQP Test Doubles
//!
//! This module provides the error taxonomy shared by the transports, the mock
//! consumer and the mock sender. The `AmqpError` enum covers setup validation,
//! transport failures reported by the broker, RPC timeouts and payload handling.

use std::time::Duration;
use thiserror::Error;

/// Represents errors that can occur while driving mocked AMQP traffic.
///
/// Transport-level variants (connection, channel, declarations, publish,
/// consume and cancel failures) are grouped by [`AmqpError::is_transport`].
/// None of them is retried by this crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// A setup argument was rejected, e.g. a request count lower than one
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error deleting a queue with the given name
    #[error("failure to delete a queue `{0}`")]
    DeleteQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error binding a consumer to a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error cancelling a consumer subscription
    #[error("failure to cancel consumer `{0}`")]
    CancelConsumerError(String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishingError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// No correlated reply arrived before the deadline
    #[error("no reply received within {0:?}")]
    Timeout(Duration),

    /// Error (de)serializing a message payload
    #[error("failure to parse payload: {0}")]
    ParsePayloadError(String),

    /// Error reading configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

impl AmqpError {
    /// Returns true for failures reported by the underlying transport.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AmqpError::ConnectionError
                | AmqpError::ChannelError
                | AmqpError::DeclareExchangeError(_)
                | AmqpError::DeclareQueueError(_)
                | AmqpError::DeleteQueueError(_)
                | AmqpError::BindingExchangeToQueueError(_, _)
                | AmqpError::BindingConsumerError(_)
                | AmqpError::CancelConsumerError(_)
                | AmqpError::PublishingError(_)
                | AmqpError::AckMessageError
                | AmqpError::ConsumerError(_)
        )
    }

    /// Returns true when an RPC call gave up waiting for its reply.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AmqpError::Timeout(_))
    }
}
