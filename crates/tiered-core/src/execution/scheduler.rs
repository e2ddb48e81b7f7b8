//! Round-robin scheduling across analytical units.
//!
//! Tasks are queued per unit identity; draining takes one task from each
//! non-empty queue in first-seen unit order before coming back around, so a
//! unit with hundreds of tasks cannot starve a unit with two.

use std::collections::{HashMap, VecDeque};

/// Per-unit FIFO queues drained round-robin.
#[derive(Debug)]
pub struct FairScheduler<T> {
    queues: Vec<(String, VecDeque<T>)>,
    index: HashMap<String, usize>,
    cursor: usize,
    pending: usize,
}

impl<T> Default for FairScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FairScheduler<T> {
    pub fn new() -> Self {
        Self {
            queues: Vec::new(),
            index: HashMap::new(),
            cursor: 0,
            pending: 0,
        }
    }

    pub fn push(&mut self, unit_id: &str, item: T) {
        let slot = match self.index.get(unit_id) {
            Some(slot) => *slot,
            None => {
                self.queues.push((unit_id.to_string(), VecDeque::new()));
                let slot = self.queues.len() - 1;
                self.index.insert(unit_id.to_string(), slot);
                slot
            }
        };
        self.queues[slot].1.push_back(item);
        self.pending += 1;
    }

    /// Tasks not yet handed out.
    pub fn len(&self) -> usize {
        self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    pub fn unit_count(&self) -> usize {
        self.queues.len()
    }

    /// Next task, together with its unit identity.
    pub fn next_task(&mut self) -> Option<(String, T)> {
        if self.pending == 0 {
            return None;
        }
        let n = self.queues.len();
        for offset in 0..n {
            let slot = (self.cursor + offset) % n;
            if let Some(item) = self.queues[slot].1.pop_front() {
                self.cursor = (slot + 1) % n;
                self.pending -= 1;
                return Some((self.queues[slot].0.clone(), item));
            }
        }
        None
    }
}

impl<T> Iterator for FairScheduler<T> {
    type Item = (String, T);

    fn next(&mut self) -> Option<Self::Item> {
        self.next_task()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_order() {
        let mut s = FairScheduler::new();
        for i in 0..3 {
            s.push("A", format!("a{i}"));
        }
        s.push("B", "b0".to_string());
        for i in 0..2 {
            s.push("C", format!("c{i}"));
        }
        let order: Vec<String> = s.map(|(_, t)| t).collect();
        assert_eq!(order, vec!["a0", "b0", "c0", "a1", "c1", "a2"]);
    }

    #[test]
    fn test_small_unit_not_starved() {
        let mut s = FairScheduler::new();
        for i in 0..100 {
            s.push("heavy", i);
        }
        s.push("light", 1000);
        let position = s
            .by_ref()
            .position(|(unit, _)| unit == "light")
            .unwrap();
        assert_eq!(position, 1);
        assert_eq!(s.len(), 99);
    }

    #[test]
    fn test_push_while_draining() {
        let mut s = FairScheduler::new();
        s.push("A", 1);
        s.push("B", 2);
        assert_eq!(s.next_task(), Some(("A".to_string(), 1)));
        s.push("A", 3);
        assert_eq!(s.next_task(), Some(("B".to_string(), 2)));
        assert_eq!(s.next_task(), Some(("A".to_string(), 3)));
        assert!(s.next_task().is_none());
        assert!(s.is_empty());
    }

    #[test]
    fn test_counts() {
        let mut s: FairScheduler<u8> = FairScheduler::new();
        assert!(s.is_empty());
        s.push("A", 1);
        s.push("A", 2);
        s.push("B", 3);
        assert_eq!(s.len(), 3);
        assert_eq!(s.unit_count(), 2);
    }
}
