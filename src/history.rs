//! A bounded ring of recent signaling traffic, kept for diagnostics the way a
//! caller might inspect dev tools' network tab. Every [`crate::SfuClient`]
//! call records its request and response here.

use std::collections::VecDeque;
use std::sync::Mutex;

use partytracks_protocol::HistoryEntry;

pub struct History {
    capacity: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl History {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    pub fn record(&self, entry: HistoryEntry) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(endpoint: &str) -> HistoryEntry {
        HistoryEntry::Request { endpoint: endpoint.to_owned(), method: "POST".to_owned(), body: json!({}) }
    }

    #[test]
    fn evicts_oldest_entry_once_full() {
        let history = History::new(2);
        history.record(request("/a"));
        history.record(request("/b"));
        history.record(request("/c"));

        let snapshot = history.snapshot();
        assert_eq!(snapshot.len(), 2);
        match &snapshot[0] {
            HistoryEntry::Request { endpoint, .. } => assert_eq!(endpoint, "/b"),
            HistoryEntry::Response { .. } => panic!("expected Request"),
        }
    }

    #[test]
    fn clear_empties_the_ring() {
        let history = History::new(10);
        history.record(request("/a"));
        history.clear();
        assert!(history.snapshot().is_empty());
    }
}
