//! FIFO implemented using VecDeque
//!
//! Tax lots queue up in purchase order. Closing transactions drain from the front, and a
//! partially consumed lot is split with the remainder pushed back onto the front.
use serde::{Deserialize, Serialize};
use std::collections::vec_deque::{IntoIter, Iter};
use std::collections::VecDeque;

#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct FIFO<A> {
    deq: VecDeque<A>,
}

impl<A> Default for FIFO<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> FIFO<A> {
    pub fn new() -> Self {
        Self {
            deq: VecDeque::new(),
        }
    }
    pub fn iter(&self) -> Iter<'_, A> {
        self.deq.iter()
    }
    pub fn append_back(&mut self, e: A) {
        self.deq.push_back(e);
    }
    pub fn pop_front(&mut self) -> Option<A> {
        self.deq.pop_front()
    }
    pub fn push_front(&mut self, e: A) {
        // only used to return the unconsumed half of a split
        //   (intended sequence: pop; split -> (a,b); consume a; push_front b;)
        self.deq.push_front(e);
    }
    pub fn len(&self) -> usize {
        self.deq.len()
    }
    pub fn is_empty(&self) -> bool {
        self.deq.is_empty()
    }
}

impl<A> FromIterator<A> for FIFO<A> {
    fn from_iter<T: IntoIterator<Item = A>>(iter: T) -> Self {
        let mut deq = FIFO::<A>::new();
        deq.extend(iter);
        deq
    }
}

impl<A> IntoIterator for FIFO<A> {
    type Item = A;
    type IntoIter = IntoIter<Self::Item>;
    fn into_iter(self) -> Self::IntoIter {
        self.deq.into_iter()
    }
}

impl<'a, A> IntoIterator for &'a FIFO<A> {
    type Item = &'a A;
    type IntoIter = Iter<'a, A>;
    fn into_iter(self) -> Self::IntoIter {
        self.deq.iter()
    }
}

impl<A> Extend<A> for FIFO<A> {
    fn extend<T: IntoIterator<Item = A>>(&mut self, iter: T) {
        for item in iter.into_iter() {
            self.append_back(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_front_returns_remainder_to_head() {
        let mut fifo = FIFO::from_iter([1, 2, 3]);
        assert_eq!(fifo.pop_front(), Some(1));
        fifo.push_front(10);
        assert_eq!(fifo.iter().copied().collect::<Vec<_>>(), vec![10, 2, 3]);
    }

    #[test]
    fn extend_appends_in_order() {
        let mut fifo = FIFO::new();
        fifo.extend([1, 2]);
        fifo.append_back(3);
        assert_eq!(fifo.len(), 3);
        assert_eq!(fifo.into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
