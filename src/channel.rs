// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! Opens the connection and channel a [`crate::amqp::LapinTransport`] runs
//! on when the mocks are pointed at a real broker.

use crate::{amqp::LapinTransport, config::MockConfigs, errors::AmqpError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error};

/// Creates a new AMQP channel for communication with RabbitMQ.
///
/// The connection is named after `cfg.app_name`. Both the connection and the
/// channel are returned so the caller controls their lifetime; the mocks
/// only ever borrow the channel.
pub async fn new_amqp_channel(
    cfg: &MockConfigs,
) -> Result<(Arc<Connection>, Arc<Channel>), AmqpError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.app_name.clone()));

    let conn = match Connection::connect(&cfg.rabbitmq.uri(), options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError {})
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok((Arc::new(conn), Arc::new(c)))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError {})
        }
    }
}

/// Connects to RabbitMQ and wraps the channel in a [`LapinTransport`].
pub async fn new_amqp_transport(
    cfg: &MockConfigs,
) -> Result<(Arc<Connection>, Arc<LapinTransport>), AmqpError> {
    let (conn, channel) = new_amqp_channel(cfg).await?;
    Ok((conn, LapinTransport::new(channel)))
}
