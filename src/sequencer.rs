// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Response Sequencer
//!
//! Canned responses for a mock consumer. Responses are handed out in the order
//! they were offered; once the script runs out the last response repeats for
//! every further request. A sequencer that was never offered anything yields
//! no response at all, so no reply is sent.

use crate::message::Message;
use tracing::warn;

/// Ordered script of canned responses with repeat-last semantics.
///
/// The sequencer is a cursor over an append-only list. It is owned and
/// advanced by a single consumer task, so it carries no synchronization.
#[derive(Debug, Clone, Default)]
pub struct ResponseSequencer {
    responses: Vec<Message>,
    cursor: usize,
    capacity: Option<usize>,
}

impl ResponseSequencer {
    /// Creates an unbounded sequencer.
    pub fn new() -> ResponseSequencer {
        ResponseSequencer::default()
    }

    /// Creates a sequencer holding at most `capacity` responses.
    ///
    /// Nothing is allocated up front, the cap only limits [`offer`](Self::offer).
    pub fn bounded(capacity: usize) -> ResponseSequencer {
        ResponseSequencer {
            responses: Vec::new(),
            cursor: 0,
            capacity: Some(capacity),
        }
    }

    /// Appends a response to the script.
    ///
    /// Returns false, dropping the response, when the sequencer is full.
    pub fn offer(&mut self, response: Message) -> bool {
        if self.capacity.is_some_and(|cap| self.responses.len() >= cap) {
            warn!(
                capacity = self.capacity,
                "response ignored, more responses than expected requests"
            );
            return false;
        }

        self.responses.push(response);
        true
    }

    /// Returns the next response of the script, or the last one once the
    /// script is exhausted. `None` only when nothing was ever offered.
    pub fn next(&mut self) -> Option<Message> {
        let last = self.responses.len().checked_sub(1)?;
        let index = self.cursor.min(last);
        if self.cursor < self.responses.len() {
            self.cursor += 1;
        }

        self.responses.get(index).cloned()
    }

    /// Number of offered responses not handed out yet.
    pub fn pending(&self) -> usize {
        self.responses.len() - self.cursor
    }

    /// Number of responses offered so far.
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    /// True when nothing was offered, meaning no request gets a reply.
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(msg: Option<Message>) -> Option<Vec<u8>> {
        msg.map(|m| m.body().to_vec())
    }

    #[test]
    fn empty_script_never_responds() {
        let mut seq = ResponseSequencer::new();
        assert!(seq.next().is_none());
        assert!(seq.next().is_none());
    }

    #[test]
    fn repeats_last_response_once_exhausted() {
        let mut seq = ResponseSequencer::new();
        seq.offer(Message::new("a"));
        seq.offer(Message::new("b"));

        assert_eq!(body(seq.next()), Some(b"a".to_vec()));
        assert_eq!(body(seq.next()), Some(b"b".to_vec()));
        assert_eq!(seq.pending(), 0);
        assert_eq!(body(seq.next()), Some(b"b".to_vec()));
        assert_eq!(body(seq.next()), Some(b"b".to_vec()));
    }

    #[test]
    fn late_offer_is_served_after_exhaustion() {
        let mut seq = ResponseSequencer::new();
        seq.offer(Message::new("a"));
        assert_eq!(body(seq.next()), Some(b"a".to_vec()));
        assert_eq!(body(seq.next()), Some(b"a".to_vec()));

        seq.offer(Message::new("b"));
        assert_eq!(seq.pending(), 1);
        assert_eq!(body(seq.next()), Some(b"b".to_vec()));
        assert_eq!(body(seq.next()), Some(b"b".to_vec()));
    }

    #[test]
    fn bounded_sequencer_drops_overflow() {
        let mut seq = ResponseSequencer::bounded(1);
        assert!(seq.offer(Message::new("a")));
        assert!(!seq.offer(Message::new("b")));
        assert_eq!(seq.len(), 1);
        assert_eq!(body(seq.next()), Some(b"a".to_vec()));
        assert_eq!(body(seq.next()), Some(b"a".to_vec()));
    }

    #[test]
    fn huge_bound_does_not_preallocate() {
        let mut seq = ResponseSequencer::bounded(usize::MAX);
        assert!(seq.is_empty());
        assert!(seq.offer(Message::new("a")));
        assert_eq!(seq.len(), 1);
        assert_eq!(body(seq.next()), Some(b"a".to_vec()));
    }
}
