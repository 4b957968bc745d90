// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Test doubles for AMQP request/reply messaging.
//!
//! [`consumer::MockConsumerFactory`] builds queue consumers that capture what
//! they receive and answer with canned responses; [`sender::MockSender`]
//! publishes messages and performs RPC calls. Both run on any
//! [`transport::Transport`]: a real broker through [`amqp::LapinTransport`],
//! or the in-process [`memory::MemoryBroker`].

mod otel;

pub mod amqp;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod exchange;
pub mod memory;
pub mod message;
pub mod queue;
pub mod sender;
pub mod sequencer;
pub mod stream;
pub mod topology;
pub mod transport;
