// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Transport
//!
//! [`Transport`] implementation over a lapin channel, for running the mocks
//! against a real broker. Headers are converted to AMQP field values, the
//! correlation id and reply-to address travel as basic properties, and every
//! publish gets a fresh message id.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    message::{Delivery, HeaderValue, Headers, Publishing},
    queue::{QueueBinding, QueueDefinition},
    transport::{Subscription, Transport},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions, QueueDeleteOptions,
    },
    types::{
        AMQPValue, ByteArray, FieldTable, LongInt, LongLongInt, LongString, LongUInt, ShortInt,
        ShortString, ShortUInt,
    },
    BasicProperties, Channel,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};
use uuid::Uuid;

/// Transport talking to RabbitMQ through a shared lapin channel.
///
/// The channel belongs to the caller; this transport never closes it.
pub struct LapinTransport {
    channel: Arc<Channel>,
}

impl LapinTransport {
    /// Creates a transport over an open channel.
    ///
    /// # Parameters
    /// * `channel` - AMQP channel, usually from [`crate::channel::new_amqp_channel`]
    ///
    /// # Returns
    /// The transport, shareable across mocks
    pub fn new(channel: Arc<Channel>) -> Arc<LapinTransport> {
        Arc::new(LapinTransport { channel })
    }
}

/// Converts message headers to an AMQP field table.
pub(crate) fn field_table(headers: &Headers) -> FieldTable {
    let mut btree = BTreeMap::<ShortString, AMQPValue>::default();

    for (key, value) in headers {
        let amqp_value = match value.clone() {
            HeaderValue::ShortString(v) => AMQPValue::ShortString(ShortString::from(v)),
            HeaderValue::LongString(v) => AMQPValue::LongString(LongString::from(v)),
            HeaderValue::Bool(v) => AMQPValue::Boolean(v),
            HeaderValue::Int(v) => AMQPValue::ShortInt(ShortInt::from(v)),
            HeaderValue::LongInt(v) => AMQPValue::LongInt(LongInt::from(v)),
            HeaderValue::LongLongInt(v) => AMQPValue::LongLongInt(LongLongInt::from(v)),
            HeaderValue::Uint(v) => AMQPValue::ShortUInt(ShortUInt::from(v)),
            HeaderValue::LongUint(v) => AMQPValue::LongUInt(LongUInt::from(v)),
            HeaderValue::Double(v) => AMQPValue::Double(v),
            HeaderValue::Bytes(v) => AMQPValue::ByteArray(ByteArray::from(v)),
        };

        btree.insert(ShortString::from(key.clone()), amqp_value);
    }

    FieldTable::from(btree)
}

/// Converts an AMQP field table back to message headers.
///
/// Field types without a header counterpart (nested tables, arrays,
/// decimals, timestamps) are skipped.
pub(crate) fn headers(table: &FieldTable) -> Headers {
    let mut headers = Headers::default();

    for (key, value) in table.inner() {
        let header = match value {
            AMQPValue::ShortString(v) => HeaderValue::ShortString(v.as_str().to_owned()),
            AMQPValue::LongString(v) => {
                HeaderValue::LongString(String::from_utf8_lossy(v.as_bytes()).into_owned())
            }
            AMQPValue::Boolean(v) => HeaderValue::Bool(*v),
            AMQPValue::ShortShortInt(v) => HeaderValue::Int(i16::from(*v)),
            AMQPValue::ShortShortUInt(v) => HeaderValue::Uint(u16::from(*v)),
            AMQPValue::ShortInt(v) => HeaderValue::Int(*v),
            AMQPValue::ShortUInt(v) => HeaderValue::Uint(*v),
            AMQPValue::LongInt(v) => HeaderValue::LongInt(*v),
            AMQPValue::LongUInt(v) => HeaderValue::LongUint(*v),
            AMQPValue::LongLongInt(v) => HeaderValue::LongLongInt(*v),
            AMQPValue::Float(v) => HeaderValue::Double(f64::from(*v)),
            AMQPValue::Double(v) => HeaderValue::Double(*v),
            AMQPValue::ByteArray(v) => HeaderValue::Bytes(v.as_slice().to_vec()),
            _ => {
                debug!(key = key.as_str(), "unsupported header type skipped");
                continue;
            }
        };

        headers.insert(key.as_str().to_owned(), header);
    }

    headers
}

fn from_lapin(delivery: &lapin::message::Delivery, consumer_tag: &str) -> Delivery {
    let props = &delivery.properties;

    Delivery {
        delivery_tag: delivery.delivery_tag,
        consumer_tag: consumer_tag.to_owned(),
        exchange: delivery.exchange.to_string(),
        routing_key: delivery.routing_key.to_string(),
        headers: props.headers().as_ref().map(headers).unwrap_or_default(),
        content_type: props.content_type().as_ref().map(|v| v.to_string()),
        correlation_id: props.correlation_id().as_ref().map(|v| v.to_string()),
        reply_to: props.reply_to().as_ref().map(|v| v.to_string()),
        body: delivery.data.clone(),
    }
}

#[async_trait]
impl Transport for LapinTransport {
    async fn publish(&self, publishing: &Publishing) -> Result<(), AmqpError> {
        let mut props = BasicProperties::default()
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_headers(field_table(&publishing.headers));

        if let Some(content_type) = &publishing.content_type {
            props = props.with_content_type(ShortString::from(content_type.clone()));
        }

        if let Some(correlation_id) = &publishing.correlation_id {
            props = props.with_correlation_id(ShortString::from(correlation_id.clone()));
        }

        if let Some(reply_to) = &publishing.reply_to {
            props = props.with_reply_to(ShortString::from(reply_to.clone()));
        }

        match self
            .channel
            .basic_publish(
                &publishing.exchange,
                &publishing.routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &publishing.body,
                props,
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError(err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn consume(&self, queue: &str, no_ack: bool) -> Result<Subscription, AmqpError> {
        let consumer = match self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_local: false,
                    no_ack,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::BindingConsumerError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        let tag = consumer.tag().to_string();
        let consumer_tag = tag.clone();

        let deliveries = consumer.then(move |result| {
            let consumer_tag = consumer_tag.clone();
            async move {
                let delivery = match result {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        error!(error = err.to_string(), "errors consume msg");
                        return Err(AmqpError::ConsumerError(err.to_string()));
                    }
                };

                if !no_ack {
                    if let Err(err) = delivery.ack(BasicAckOptions { multiple: false }).await {
                        error!(error = err.to_string(), "error whiling ack msg");
                        return Err(AmqpError::AckMessageError);
                    }
                }

                Ok(from_lapin(&delivery, &consumer_tag))
            }
        });

        Ok(Subscription::new(&tag, deliveries.boxed()))
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "failure to cancel the consumer");
                Err(AmqpError::CancelConsumerError(consumer_tag.to_owned()))
            }
            _ => Ok(()),
        }
    }

    async fn exchange_declare(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        match self
            .channel
            .exchange_declare(
                &def.name,
                def.kind.into(),
                ExchangeDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    auto_delete: def.delete,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name,
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(def.name.clone()))
            }
            _ => {
                debug!("exchange: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        match self
            .channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name = def.name, "error to declare the queue");
                Err(AmqpError::DeclareQueueError(def.name.clone()))
            }
            _ => {
                debug!("queue: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn queue_bind(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        match self
            .channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn queue_delete(&self, queue: &str) -> Result<(), AmqpError> {
        match self
            .channel
            .queue_delete(queue, QueueDeleteOptions::default())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), queue, "error to delete the queue");
                Err(AmqpError::DeleteQueueError(queue.to_owned()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_survive_field_table_conversion() {
        let mut original = Headers::new();
        original.insert("kind".to_owned(), HeaderValue::from("order"));
        original.insert("short".to_owned(), HeaderValue::ShortString("s".to_owned()));
        original.insert("flag".to_owned(), HeaderValue::from(true));
        original.insert("small".to_owned(), HeaderValue::from(7_i16));
        original.insert("count".to_owned(), HeaderValue::from(42_i32));
        original.insert("big".to_owned(), HeaderValue::from(-9_i64));
        original.insert("port".to_owned(), HeaderValue::from(8080_u16));
        original.insert("size".to_owned(), HeaderValue::from(12_u32));
        original.insert("ratio".to_owned(), HeaderValue::from(0.5_f64));
        original.insert("raw".to_owned(), HeaderValue::from(vec![1_u8, 2, 3]));

        assert_eq!(headers(&field_table(&original)), original);
    }

    #[test]
    fn unsupported_field_types_are_skipped() {
        let mut btree = BTreeMap::<ShortString, AMQPValue>::default();
        btree.insert(ShortString::from("stamp"), AMQPValue::Timestamp(17));
        btree.insert(ShortString::from("kept"), AMQPValue::LongInt(1));

        let converted = headers(&FieldTable::from(btree));
        assert_eq!(converted.len(), 1);
        assert_eq!(converted.get("kept"), Some(&HeaderValue::LongInt(1)));
    }
}
