// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Configuration
//!
//! Settings for connecting to RabbitMQ and for the mock sender's RPC calls,
//! read from TOML. Every field has a default, so an empty document is valid:
//!
//! ```toml
//! app_name = "orders-tests"
//!
//! [rabbitmq]
//! host = "localhost"
//! port = 5672
//!
//! [rpc]
//! reply_queue = "orders-replies"
//! timeout_ms = 2000
//! ```

use crate::errors::AmqpError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfigs {
    pub app_name: String,
    pub rabbitmq: RabbitMQConfigs,
    pub rpc: RpcConfigs,
}

impl Default for MockConfigs {
    fn default() -> Self {
        MockConfigs {
            app_name: "amqp-mock".to_owned(),
            rabbitmq: RabbitMQConfigs::default(),
            rpc: RpcConfigs::default(),
        }
    }
}

impl MockConfigs {
    /// Parses configuration from a TOML document.
    pub fn from_toml(raw: &str) -> Result<MockConfigs, AmqpError> {
        toml::from_str(raw).map_err(|err| {
            error!(error = err.to_string(), "failure to parse configs");
            AmqpError::ConfigError(err.to_string())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        RabbitMQConfigs {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "%2f".to_owned(),
        }
    }
}

impl RabbitMQConfigs {
    /// AMQP URI for lapin.
    pub fn uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.vhost
        )
    }
}

/// RPC settings of the mock sender.
///
/// Without `reply_queue` every sender generates its own; naming one pins
/// the queue, so it should not be shared by two senders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfigs {
    pub reply_queue: Option<String>,
    pub timeout_ms: u64,
}

impl Default for RpcConfigs {
    fn default() -> Self {
        RpcConfigs {
            reply_queue: None,
            timeout_ms: 5000,
        }
    }
}

impl RpcConfigs {
    /// RPC deadline applied when a call does not override it.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
