use dragonfly_core::topic::TopicPattern;

use crate::session::SessionId;

/// Pattern → subscriber-set index driving fan-out.
///
/// Entries keep declaration order, and each entry keeps its subscribers in
/// insertion order, so delivery order within one publication is stable.
/// An entry exists exactly as long as it has at least one subscriber.
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    entries: Vec<IndexEntry>,
}

#[derive(Debug)]
struct IndexEntry {
    pattern: TopicPattern,
    subscribers: Vec<SessionId>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        return Self { entries: vec![] };
    }

    pub fn subscribe(&mut self, pattern: TopicPattern, id: SessionId) {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.pattern == pattern)
        {
            Some(entry) => {
                if !entry.subscribers.contains(&id) {
                    entry.subscribers.push(id);
                }
            }
            None => {
                self.entries.push(IndexEntry {
                    pattern,
                    subscribers: vec![id],
                });
            }
        }
    }

    pub fn unsubscribe(&mut self, source: &str, id: SessionId) {
        if let Some(idx) = self
            .entries
            .iter()
            .position(|entry| entry.pattern.source() == source)
        {
            let entry = &mut self.entries[idx];
            entry.subscribers.retain(|s| *s != id);

            if entry.subscribers.is_empty() {
                self.entries.remove(idx);
            }
        }
    }

    /// Implicit unsubscribe of every pattern a closing session held.
    pub fn drop_session(&mut self, id: SessionId) {
        for entry in self.entries.iter_mut() {
            entry.subscribers.retain(|s| *s != id);
        }

        self.entries.retain(|entry| !entry.subscribers.is_empty());
    }

    /// Session ids due one copy each for a publication on `topic`: entries
    /// in declaration order, subscribers in insertion order. A session
    /// subscribed through two matching patterns appears twice.
    pub fn matching_subscribers(&self, topic: &str) -> Vec<SessionId> {
        let mut out = vec![];

        for entry in self.entries.iter() {
            if entry.pattern.matches(topic) {
                out.extend_from_slice(&entry.subscribers);
            }
        }

        return out;
    }

    pub fn contains(&self, source: &str) -> bool {
        return self
            .entries
            .iter()
            .any(|entry| entry.pattern.source() == source);
    }

    pub fn subscribers(&self, source: &str) -> Option<&[SessionId]> {
        return self
            .entries
            .iter()
            .find(|entry| entry.pattern.source() == source)
            .map(|entry| entry.subscribers.as_slice());
    }

    pub fn is_empty(&self) -> bool {
        return self.entries.is_empty();
    }

    /// Ids present anywhere in the index, for the cleanup invariant checks.
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut out: Vec<SessionId> = vec![];

        for entry in self.entries.iter() {
            for id in entry.subscribers.iter() {
                if !out.contains(id) {
                    out.push(*id);
                }
            }
        }

        return out;
    }
}
