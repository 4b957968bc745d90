// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Messages, Deliveries and Publishings
//!
//! This module defines the value types moved through the transports:
//! - `Message`: an immutable body plus custom headers, built by tests or canned responses
//! - `Publishing`: a message addressed to an exchange/routing key with correlation metadata
//! - `Delivery`: an inbound message together with the transport metadata it arrived with

use crate::errors::AmqpError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A single header value.
///
/// The variants mirror the AMQP field types the transports know how to carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeaderValue {
    ShortString(String),
    LongString(String),
    Bool(bool),
    Int(i16),
    LongInt(i32),
    LongLongInt(i64),
    Uint(u16),
    LongUint(u32),
    Double(f64),
    Bytes(Vec<u8>),
}

impl HeaderValue {
    /// Returns the value as a string slice when it holds text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::ShortString(v) | HeaderValue::LongString(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::LongString(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::LongString(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

impl From<i16> for HeaderValue {
    fn from(value: i16) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<i32> for HeaderValue {
    fn from(value: i32) -> Self {
        HeaderValue::LongInt(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::LongLongInt(value)
    }
}

impl From<u16> for HeaderValue {
    fn from(value: u16) -> Self {
        HeaderValue::Uint(value)
    }
}

impl From<u32> for HeaderValue {
    fn from(value: u32) -> Self {
        HeaderValue::LongUint(value)
    }
}

impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        HeaderValue::Double(value)
    }
}

impl From<Vec<u8>> for HeaderValue {
    fn from(value: Vec<u8>) -> Self {
        HeaderValue::Bytes(value)
    }
}

/// String-keyed header map. Ordering carries no meaning.
pub type Headers = BTreeMap<String, HeaderValue>;

/// An immutable message: an opaque body plus custom headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    body: Vec<u8>,
    headers: Headers,
    content_type: Option<String>,
}

impl Message {
    /// Creates a message with the given body and no headers.
    pub fn new(body: impl Into<Vec<u8>>) -> Message {
        Message {
            body: body.into(),
            headers: Headers::default(),
            content_type: None,
        }
    }

    /// Creates a message whose body is the JSON encoding of `payload`.
    pub fn json<T: Serialize>(payload: &T) -> Result<Message, AmqpError> {
        let body = serde_json::to_vec(payload)
            .map_err(|err| AmqpError::ParsePayloadError(err.to_string()))?;

        Ok(Message {
            body,
            headers: Headers::default(),
            content_type: Some(JSON_CONTENT_TYPE.to_owned()),
        })
    }

    /// Adds a header to the message.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_header(mut self, key: &str, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(key.to_owned(), value.into());
        self
    }

    /// Replaces all headers of the message.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the content type carried alongside the body.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_owned());
        self
    }

    /// Raw payload.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Custom headers, copied as is into every publish of this message.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// MIME type of the payload, if one was set.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}

/// A message addressed to an exchange, ready to be handed to a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Publishing {
    pub exchange: String,
    pub routing_key: String,
    pub headers: Headers,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub body: Vec<u8>,
}

impl Publishing {
    /// Addresses `message` to `exchange` with `routing_key`.
    ///
    /// The message's custom headers are copied unchanged.
    pub fn new(message: &Message, exchange: &str, routing_key: &str) -> Publishing {
        Publishing {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            headers: message.headers.clone(),
            content_type: message.content_type.clone(),
            correlation_id: None,
            reply_to: None,
            body: message.body.clone(),
        }
    }

    /// Builds the reply to a request: `response` is routed through the default
    /// exchange straight to the `reply_to` queue and tagged with the request's
    /// correlation id. Headers come from the response, not the request.
    pub fn reply(response: &Message, reply_to: &str, correlation_id: &str) -> Publishing {
        Publishing::new(response, "", reply_to).with_correlation_id(correlation_id)
    }

    /// Tags the publishing with a correlation id.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.correlation_id = Some(correlation_id.to_owned());
        self
    }

    /// Sets the queue replies should be sent to.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn with_reply_to(mut self, reply_to: &str) -> Self {
        self.reply_to = Some(reply_to.to_owned());
        self
    }
}

/// An inbound message plus the transport metadata it was delivered with.
///
/// Deliveries are plain values; every observer gets its own copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub consumer_tag: String,
    pub exchange: String,
    pub routing_key: String,
    pub headers: Headers,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub body: Vec<u8>,
}

impl Delivery {
    /// Builds the delivery a consumer identified by `consumer_tag` receives
    /// for `publishing`.
    pub fn from_publishing(
        publishing: Publishing,
        consumer_tag: &str,
        delivery_tag: u64,
    ) -> Delivery {
        Delivery {
            delivery_tag,
            consumer_tag: consumer_tag.to_owned(),
            exchange: publishing.exchange,
            routing_key: publishing.routing_key,
            headers: publishing.headers,
            content_type: publishing.content_type,
            correlation_id: publishing.correlation_id,
            reply_to: publishing.reply_to,
            body: publishing.body,
        }
    }

    /// Returns the body as UTF-8 text, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Looks up a custom header by name.
    pub fn header(&self, key: &str) -> Option<&HeaderValue> {
        self.headers.get(key)
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AmqpError> {
        serde_json::from_slice(&self.body).map_err(|err| AmqpError::ParsePayloadError(err.to_string()))
    }

    /// Returns the message part of the delivery, without transport metadata.
    pub fn message(&self) -> Message {
        Message {
            body: self.body.clone(),
            headers: self.headers.clone(),
            content_type: self.content_type.clone(),
        }
    }

    /// True when the delivery carries everything needed to be answered.
    pub fn expects_reply(&self) -> bool {
        self.reply_to.is_some() && self.correlation_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        seq: u32,
    }

    #[test]
    fn reply_takes_headers_from_response() {
        let response = Message::new("pong").with_header("kind", "response");
        let reply = Publishing::reply(&response, "r1", "c1");

        assert_eq!(reply.exchange, "");
        assert_eq!(reply.routing_key, "r1");
        assert_eq!(reply.correlation_id.as_deref(), Some("c1"));
        assert_eq!(reply.reply_to, None);
        assert_eq!(reply.headers.get("kind"), Some(&HeaderValue::from("response")));
        assert_eq!(reply.body, b"pong");
    }

    #[test]
    fn delivery_keeps_body_and_headers() {
        let message = Message::new("ping").with_header("attempt", 3_i32);
        let publishing = Publishing::new(&message, "ex", "key").with_reply_to("r1");
        let delivery = Delivery::from_publishing(publishing, "ctag-1", 7);

        assert_eq!(delivery.body_str(), Some("ping"));
        assert_eq!(delivery.header("attempt"), Some(&HeaderValue::LongInt(3)));
        assert_eq!(delivery.consumer_tag, "ctag-1");
        assert_eq!(delivery.delivery_tag, 7);
        assert!(!delivery.expects_reply());
        assert_eq!(delivery.message(), message);
    }

    #[test]
    fn json_payloads() {
        let message = Message::json(&Ping { seq: 4 }).unwrap();
        assert_eq!(message.content_type(), Some(JSON_CONTENT_TYPE));

        let delivery = Delivery::from_publishing(Publishing::new(&message, "", "q"), "t", 1);
        assert_eq!(delivery.json::<Ping>().unwrap(), Ping { seq: 4 });

        let garbage = Delivery::from_publishing(Publishing::new(&Message::new("{"), "", "q"), "t", 2);
        assert!(matches!(
            garbage.json::<Ping>(),
            Err(AmqpError::ParsePayloadError(_))
        ));
    }
}
