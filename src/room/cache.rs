//! Bounded FIFO cache of recently raised events (spec §4.6), replayed to a
//! peer that joins a room after those events were raised.

use std::collections::VecDeque;

use crate::protocol::Event;

pub struct EventCache {
    capacity: usize,
    buffer: VecDeque<Event>,
}

impl EventCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, event: Event) {
        if self.capacity == 0 {
            return;
        }
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event);
    }

    pub fn entries(&self) -> impl Iterator<Item = &Event> {
        self.buffer.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn event(code: u8) -> Event {
        Event::new(code, BTreeMap::new())
    }

    #[test]
    fn evicts_oldest_once_full() {
        let mut cache = EventCache::new(2);
        cache.push(event(1));
        cache.push(event(2));
        cache.push(event(3));
        let codes: Vec<u8> = cache.entries().map(|e| e.code).collect();
        assert_eq!(codes, vec![2, 3]);
    }

    #[test]
    fn zero_capacity_cache_keeps_nothing() {
        let mut cache = EventCache::new(0);
        cache.push(event(1));
        assert_eq!(cache.entries().count(), 0);
    }
}
