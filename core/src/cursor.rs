use crate::event::MonitoringEvent;

/// Forward-only view over the events of one trace with bounded lookahead.
///
/// Running past the end is not an error: lookahead returns `None` and
/// `consume` does nothing.
#[derive(Debug, Clone)]
pub struct EventCursor<'a> {
    events: &'a [MonitoringEvent],
    position: usize,
}

impl<'a> EventCursor<'a> {
    pub fn new(events: &'a [MonitoringEvent]) -> Self {
        Self {
            events,
            position: 0,
        }
    }

    /// Event `n` positions ahead of the current one; `lookahead(0)` is the current event.
    pub fn lookahead(&self, n: usize) -> Option<&'a MonitoringEvent> {
        self.position
            .checked_add(n)
            .and_then(|index| self.events.get(index))
    }

    pub fn consume(&mut self) {
        if self.position < self.events.len() {
            self.position += 1;
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Location, TraceBuilder};
    use uuid::Uuid;

    #[test]
    fn test_lookahead_and_consume() {
        let trace = TraceBuilder::new(Uuid::new_v4(), Location::observed("h", 1))
            .invocation(1, "a")
            .entry(2, "a")
            .build();
        let mut cursor = EventCursor::new(&trace.events);

        assert_eq!(cursor.lookahead(0).map(|e| e.timestamp), Some(1));
        assert_eq!(cursor.lookahead(1).map(|e| e.timestamp), Some(2));
        assert!(cursor.lookahead(2).is_none());

        cursor.consume();
        assert_eq!(cursor.position(), 1);
        assert_eq!(cursor.lookahead(0).map(|e| e.timestamp), Some(2));
        assert!(cursor.lookahead(1).is_none());
    }

    #[test]
    fn consume_past_end_is_noop() {
        let events = Vec::new();
        let mut cursor = EventCursor::new(&events);

        cursor.consume();
        cursor.consume();
        assert_eq!(cursor.position(), 0);
        assert!(cursor.lookahead(0).is_none());
        assert!(cursor.lookahead(usize::MAX).is_none());
    }
}
