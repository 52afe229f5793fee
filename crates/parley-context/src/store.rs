use std::collections::VecDeque;

use tracing::trace;

use parley_core::ContextMessage;

/// Bounded, append-only room transcript.
///
/// Insertion order is preserved and eviction is strictly FIFO: once the store
/// holds `max_messages` entries, every append drops exactly one head entry.
/// Only the broker-processing task writes here; readers take cheap tail
/// clones for prompt assembly and strategy decisions.
pub struct ContextStore {
    messages: VecDeque<ContextMessage>,
    max_messages: usize,
}

impl ContextStore {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(max_messages),
            max_messages,
        }
    }

    /// Append to the tail, evicting the head when over capacity.
    pub fn append(&mut self, message: ContextMessage) {
        self.messages.push_back(message);
        while self.messages.len() > self.max_messages {
            let evicted = self.messages.pop_front();
            if let Some(m) = evicted {
                trace!(id = %m.message.id, "transcript at capacity, evicting head");
            }
        }
    }

    /// The last `n` messages in insertion order. Returns everything when
    /// `n >= len`.
    pub fn tail(&self, n: usize) -> Vec<ContextMessage> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn last_message(&self) -> Option<&ContextMessage> {
        self.messages.back()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
