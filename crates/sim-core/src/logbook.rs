//! Append-only in-memory game log. One entry per dispatched event; turn
//! context reads bounded newest-first windows filtered by who can see the
//! entry. The API layer flushes the tail to persistence with [`LogBook::since`].

use chrono::{DateTime, Utc};
use contracts::{LogEntry, LogKind};

#[derive(Debug, Clone, Default)]
pub struct LogBook {
    entries: Vec<LogEntry>,
    next_id: u64,
}

impl LogBook {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    pub fn record(
        &mut self,
        time: DateTime<Utc>,
        kind: LogKind,
        source: &str,
        targets: Vec<String>,
        message: String,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(LogEntry {
            id,
            time,
            kind,
            source: source.to_string(),
            targets,
            message,
        });
        id
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Continue numbering after entries that live elsewhere (e.g. already
    /// persisted rows when a game is reopened). Never moves backwards.
    pub fn resume_ids_from(&mut self, next: u64) {
        if next > self.next_id {
            self.next_id = next;
        }
    }

    /// Entries appended since a previous `len()` observation.
    pub fn since(&self, index: usize) -> &[LogEntry] {
        self.entries.get(index..).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Up to `limit` entries visible to `target`, newest first. An entry is
    /// visible to its source, to everyone in its target list, and to all
    /// when the target list is empty (a broadcast).
    pub fn recent(&self, target: &str, limit: usize) -> Vec<&LogEntry> {
        self.entries
            .iter()
            .rev()
            .filter(|e| Self::visible_to(e, target))
            .take(limit)
            .collect()
    }

    fn visible_to(entry: &LogEntry, target: &str) -> bool {
        entry.source == target
            || entry.targets.is_empty()
            || entry.targets.iter().any(|t| t == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    #[test]
    fn ids_are_monotonic_from_one() {
        let mut log = LogBook::new();
        let a = log.record(t0(), LogKind::System, "world", vec![], "start".into());
        let b = log.record(t0(), LogKind::Player, "Ada", vec!["Bob".into()], "hi".into());
        assert_eq!((a, b), (1, 2));
    }

    #[test]
    fn recent_is_newest_first_and_bounded() {
        let mut log = LogBook::new();
        for i in 0..5 {
            log.record(t0(), LogKind::Event, "Ada", vec!["Ada".into()], format!("e{i}"));
        }
        let window = log.recent("Ada", 3);
        let messages: Vec<&str> = window.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["e4", "e3", "e2"]);
    }

    #[test]
    fn visibility_covers_source_targets_and_broadcasts() {
        let mut log = LogBook::new();
        log.record(t0(), LogKind::Player, "Ada", vec!["Bob".into()], "to bob".into());
        log.record(t0(), LogKind::System, "world", vec![], "broadcast".into());
        log.record(t0(), LogKind::Player, "Carl", vec!["Carl".into()], "private".into());

        let bob: Vec<&str> = log.recent("Bob", 10).iter().map(|e| e.message.as_str()).collect();
        assert_eq!(bob, vec!["broadcast", "to bob"]);

        let ada: Vec<&str> = log.recent("Ada", 10).iter().map(|e| e.message.as_str()).collect();
        assert_eq!(ada, vec!["broadcast", "to bob"]);

        let carl = log.recent("Carl", 10);
        assert_eq!(carl.len(), 2);
    }

    #[test]
    fn since_returns_the_appended_tail() {
        let mut log = LogBook::new();
        log.record(t0(), LogKind::System, "world", vec![], "one".into());
        let mark = log.len();
        log.record(t0(), LogKind::System, "world", vec![], "two".into());
        let tail = log.since(mark);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].message, "two");
        assert!(log.since(99).is_empty());
    }
}
