// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! Exchanges decide which queues a published message lands in. The mocks only
//! need the two routing behaviours tests rely on: exact routing-key matching
//! (direct) and broadcast to every bound queue (fanout).

/// Represents the types of exchanges the transports can declare.
///
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        }
    }
}

/// Definition of an exchange with its configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) delete: bool,
    pub(crate) durable: bool,
    pub(crate) passive: bool,
}

impl ExchangeDefinition {
    /// Creates a new direct exchange definition with the given name.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Direct,
            delete: false,
            durable: false,
            passive: false,
        }
    }

    /// Sets the exchange type to Fanout.
    pub fn fanout(mut self) -> Self {
        self.kind = ExchangeKind::Fanout;
        self
    }

    /// Sets the exchange to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Makes the exchange passive, checking for existence without creating it.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_exchange_is_a_plain_direct_one() {
        let def = ExchangeDefinition::new("orders");
        assert_eq!(def.name, "orders");
        assert_eq!(def.kind, ExchangeKind::Direct);
        assert!(!def.delete && !def.durable && !def.passive);
    }

    #[test]
    fn builder_sets_flags_and_kind() {
        let def = ExchangeDefinition::new("events")
            .fanout()
            .durable()
            .delete()
            .passive();

        assert_eq!(def.kind, ExchangeKind::Fanout);
        assert!(def.durable && def.delete && def.passive);
        assert_eq!(lapin::ExchangeKind::from(def.kind), lapin::ExchangeKind::Fanout);
        assert_eq!(
            lapin::ExchangeKind::from(ExchangeKind::default()),
            lapin::ExchangeKind::Direct
        );
    }
}
