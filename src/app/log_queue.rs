use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::app::models::LogLine;

/// FIFO shared between the capture reader (push) and the view's drain loop.
///
/// There is no capacity ceiling: a log flood grows memory until the consumer drains.
#[derive(Debug, Default)]
pub struct LogQueue {
    lines: Mutex<VecDeque<LogLine>>,
}

impl LogQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, VecDeque<LogLine>> {
        // A panicking producer must not cost the consumer its backlog.
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, line: LogLine) {
        self.guard().push_back(line);
    }

    pub fn extend(&self, lines: impl IntoIterator<Item = LogLine>) {
        self.guard().extend(lines);
    }

    /// Empties the queue and returns everything in arrival order.
    pub fn drain_all(&self) -> Vec<LogLine> {
        let pending = std::mem::take(&mut *self.guard());
        Vec::from(pending)
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::Severity;
    use std::sync::Arc;
    use std::thread;

    fn line(text: &str) -> LogLine {
        LogLine {
            text: text.to_string(),
            severity: Severity::Info,
        }
    }

    #[test]
    fn drain_returns_arrival_order_and_empties() {
        let queue = LogQueue::new();
        queue.push(line("a"));
        queue.extend([line("b"), line("c")]);
        let drained: Vec<_> = queue.drain_all().into_iter().map(|l| l.text).collect();
        assert_eq!(drained, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn concurrent_push_and_drain_loses_nothing() {
        let queue = Arc::new(LogQueue::new());
        let producer_queue = Arc::clone(&queue);
        let producer = thread::spawn(move || {
            for index in 0..5_000 {
                producer_queue.push(line(&index.to_string()));
            }
        });

        let mut seen = Vec::new();
        while !producer.is_finished() {
            seen.extend(queue.drain_all());
            thread::yield_now();
        }
        producer.join().expect("producer");
        seen.extend(queue.drain_all());

        assert_eq!(seen.len(), 5_000);
        for (index, entry) in seen.iter().enumerate() {
            assert_eq!(entry.text, index.to_string());
        }
    }
}
