use std::cmp;
use std::collections::binary_heap::PeekMut;
use std::collections::BinaryHeap;

use crate::entry::{TxnId, ValueKind};
use crate::error::Result;
use crate::iterators::StorageIterator;
use crate::key::{KeySlice, KeyVec};

/// A child cursor tagged with its source index. Smaller index = logically
/// newer source, so equal positions resolve to the newest source first.
struct HeapWrapper<I: StorageIterator>(pub usize, pub Box<I>);

/// Forward ordering: the heap is a max-heap, so comparisons are reversed to
/// pop the smallest (key, txn-desc) position, ties to the smaller index.
impl<I: 'static + for<'a> StorageIterator<KeyType<'a> = KeySlice<'a>>> PartialOrd for HeapWrapper<I> {
    #[allow(clippy::non_canonical_partial_ord_impl)]
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        match self.1.key().cmp(&other.1.key()) {
            cmp::Ordering::Greater => Some(cmp::Ordering::Greater),
            cmp::Ordering::Less => Some(cmp::Ordering::Less),
            cmp::Ordering::Equal => self.0.partial_cmp(&other.0),
        }
        .map(|x| x.reverse())
    }
}

impl<I: 'static + for<'a> StorageIterator<KeyType<'a> = KeySlice<'a>>> Ord for HeapWrapper<I> {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.partial_cmp(other).unwrap()
    }
}

impl<I: 'static + for<'a> StorageIterator<KeyType<'a> = KeySlice<'a>>> Eq for HeapWrapper<I> {}

impl<I: 'static + for<'a> StorageIterator<KeyType<'a> = KeySlice<'a>>> PartialEq for HeapWrapper<I> {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other).unwrap() == cmp::Ordering::Equal
    }
}

/// Backward ordering: pop the largest position first, ties still to the
/// smaller index.
struct BackHeapWrapper<I: StorageIterator>(pub usize, pub Box<I>);

impl<I: 'static + for<'a> StorageIterator<KeyType<'a> = KeySlice<'a>>> PartialOrd for BackHeapWrapper<I> {
    #[allow(clippy::non_canonical_partial_ord_impl)]
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        match self.1.key().cmp(&other.1.key()) {
            cmp::Ordering::Greater => Some(cmp::Ordering::Greater),
            cmp::Ordering::Less => Some(cmp::Ordering::Less),
            cmp::Ordering::Equal => other.0.partial_cmp(&self.0),
        }
    }
}

impl<I: 'static + for<'a> StorageIterator<KeyType<'a> = KeySlice<'a>>> Ord for BackHeapWrapper<I> {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.partial_cmp(other).unwrap()
    }
}

impl<I: 'static + for<'a> StorageIterator<KeyType<'a> = KeySlice<'a>>> Eq for BackHeapWrapper<I> {}

impl<I: 'static + for<'a> StorageIterator<KeyType<'a> = KeySlice<'a>>> PartialEq for BackHeapWrapper<I> {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other).unwrap() == cmp::Ordering::Equal
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// K-way merge over N sorted cursors. A min-heap drives forward iteration;
/// switching direction re-seeks every child around the current position and
/// rebuilds the opposite heap. Exhausted children are parked so a direction
/// change can revive them. Tombstones flow through; collapsing is the
/// consumer's business.
pub struct MergeIterator<I: StorageIterator> {
    forward: BinaryHeap<HeapWrapper<I>>,
    backward: BinaryHeap<BackHeapWrapper<I>>,
    current: Option<HeapWrapper<I>>,
    parked: Vec<HeapWrapper<I>>,
    direction: Direction,
}

impl<I: 'static + for<'a> StorageIterator<KeyType<'a> = KeySlice<'a>>> MergeIterator<I> {
    /// Build a forward merge from cursors ordered newest source first.
    pub fn create(iters: Vec<Box<I>>) -> Self {
        let mut heap = BinaryHeap::new();
        let mut parked = Vec::new();
        for (idx, iter) in iters.into_iter().enumerate() {
            if iter.is_valid() {
                heap.push(HeapWrapper(idx, iter));
            } else {
                parked.push(HeapWrapper(idx, iter));
            }
        }
        let current = heap.pop();
        Self {
            forward: heap,
            backward: BinaryHeap::new(),
            current,
            parked,
            direction: Direction::Forward,
        }
    }

    /// Pull every child out of the heaps and the current slot.
    fn drain_children(&mut self) -> Vec<HeapWrapper<I>> {
        let mut children: Vec<HeapWrapper<I>> = self.parked.drain(..).collect();
        children.extend(self.forward.drain());
        children.extend(self.backward.drain().map(|w| HeapWrapper(w.0, w.1)));
        if let Some(current) = self.current.take() {
            children.push(current);
        }
        children
    }

    /// Re-seat children after a re-seek: valid ones into the heap matching
    /// `direction`, the rest parked.
    fn reseat(&mut self, children: Vec<HeapWrapper<I>>, direction: Direction) {
        self.direction = direction;
        for child in children {
            if !child.1.is_valid() {
                self.parked.push(child);
            } else {
                match direction {
                    Direction::Forward => self.forward.push(child),
                    Direction::Backward => self.backward.push(BackHeapWrapper(child.0, child.1)),
                }
            }
        }
        self.current = match direction {
            Direction::Forward => self.forward.pop(),
            Direction::Backward => self.backward.pop().map(|w| HeapWrapper(w.0, w.1)),
        };
    }

    /// Turn around and walk backward: every child moves to the largest
    /// position strictly before `pos`.
    fn switch_backward_before(&mut self, pos: KeyVec) -> Result<()> {
        let mut children = self.drain_children();
        for child in &mut children {
            child.1.seek_to_key(pos.as_key_slice())?;
            if child.1.is_valid() {
                child.1.prev()?;
            } else {
                child.1.seek_to_last()?;
            }
        }
        self.reseat(children, Direction::Backward);
        Ok(())
    }

    /// Turn around and walk forward: every child moves to the smallest
    /// position strictly after `pos`.
    fn switch_forward_after(&mut self, pos: KeyVec) -> Result<()> {
        let mut children = self.drain_children();
        for child in &mut children {
            child.1.seek_to_key(pos.as_key_slice())?;
            while child.1.is_valid() && child.1.key() == pos.as_key_slice() {
                child.1.next()?;
            }
        }
        self.reseat(children, Direction::Forward);
        Ok(())
    }

    fn next_forward(&mut self) -> Result<()> {
        let current = self.current.as_mut().expect("next on invalid iterator");
        // advance duplicates of the current position in other sources first.
        while let Some(mut inner) = self.forward.peek_mut() {
            debug_assert!(inner.1.key() >= current.1.key(), "heap invariant violated");
            if inner.1.key() == current.1.key() {
                if let e @ Err(_) = inner.1.next() {
                    PeekMut::pop(inner);
                    return e;
                }
                if !inner.1.is_valid() {
                    self.parked.push(PeekMut::pop(inner));
                }
            } else {
                break;
            }
        }

        current.1.next()?;

        if !current.1.is_valid() {
            let exhausted = self.current.take().expect("just checked");
            self.parked.push(exhausted);
            self.current = self.forward.pop();
            return Ok(());
        }

        if let Some(mut inner) = self.forward.peek_mut() {
            let current = self.current.as_mut().expect("still valid");
            if *current < *inner {
                std::mem::swap(&mut *inner, current);
            }
        }
        Ok(())
    }

    fn prev_backward(&mut self) -> Result<()> {
        let current = self.current.as_mut().expect("prev on invalid iterator");
        while let Some(mut inner) = self.backward.peek_mut() {
            debug_assert!(inner.1.key() <= current.1.key(), "heap invariant violated");
            if inner.1.key() == current.1.key() {
                if let e @ Err(_) = inner.1.prev() {
                    PeekMut::pop(inner);
                    return e;
                }
                if !inner.1.is_valid() {
                    let inner = PeekMut::pop(inner);
                    self.parked.push(HeapWrapper(inner.0, inner.1));
                }
            } else {
                break;
            }
        }

        current.1.prev()?;

        if !current.1.is_valid() {
            let exhausted = self.current.take().expect("just checked");
            self.parked.push(exhausted);
            self.current = self.backward.pop().map(|w| HeapWrapper(w.0, w.1));
            return Ok(());
        }

        let should_swap = {
            let current = self.current.as_ref().expect("still valid");
            self.backward.peek().map_or(false, |inner| {
                match inner.1.key().cmp(&current.1.key()) {
                    cmp::Ordering::Greater => true,
                    cmp::Ordering::Less => false,
                    cmp::Ordering::Equal => inner.0 < current.0,
                }
            })
        };
        if should_swap {
            let top = self.backward.pop().expect("peeked above");
            let current = self.current.take().expect("still valid");
            self.current = Some(HeapWrapper(top.0, top.1));
            self.backward.push(BackHeapWrapper(current.0, current.1));
        }
        Ok(())
    }

    fn current_pos(&self) -> KeyVec {
        self.current
            .as_ref()
            .expect("no current position")
            .1
            .key()
            .to_key_vec()
    }
}

impl<I: 'static + for<'a> StorageIterator<KeyType<'a> = KeySlice<'a>>> StorageIterator
    for MergeIterator<I>
{
    type KeyType<'a> = KeySlice<'a>;

    fn key(&self) -> KeySlice {
        self.current.as_ref().unwrap().1.key()
    }

    fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().unwrap().1.value()
    }

    fn kind(&self) -> ValueKind {
        self.current.as_ref().unwrap().1.kind()
    }

    fn txn(&self) -> TxnId {
        self.current.as_ref().unwrap().1.txn()
    }

    fn is_valid(&self) -> bool {
        self.current
            .as_ref()
            .map(|x| x.1.is_valid())
            .unwrap_or(false)
    }

    fn next(&mut self) -> Result<()> {
        match self.direction {
            Direction::Forward => self.next_forward(),
            Direction::Backward => {
                let pos = self.current_pos();
                self.switch_forward_after(pos)
            }
        }
    }

    fn prev(&mut self) -> Result<()> {
        match self.direction {
            Direction::Backward => self.prev_backward(),
            Direction::Forward => {
                let pos = self.current_pos();
                self.switch_backward_before(pos)
            }
        }
    }

    fn seek_to_key(&mut self, key: KeySlice) -> Result<()> {
        let pos = key.to_key_vec();
        let mut children = self.drain_children();
        for child in &mut children {
            child.1.seek_to_key(pos.as_key_slice())?;
        }
        self.reseat(children, Direction::Forward);
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        let mut children = self.drain_children();
        for child in &mut children {
            child.1.seek_to_first()?;
        }
        self.reseat(children, Direction::Forward);
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let mut children = self.drain_children();
        for child in &mut children {
            child.1.seek_to_last()?;
        }
        self.reseat(children, Direction::Backward);
        Ok(())
    }

    fn number_of_iterators(&self) -> usize {
        self.forward
            .iter()
            .map(|x| x.1.number_of_iterators())
            .sum::<usize>()
            + self
                .backward
                .iter()
                .map(|x| x.1.number_of_iterators())
                .sum::<usize>()
            + self
                .current
                .as_ref()
                .map(|x| x.1.number_of_iterators())
                .unwrap_or(0)
    }
}
