use std::hash::Hash;

use ahash::HashMap;
use generational_arena::{Arena, Index};

#[derive(Debug)]
struct Node<K> {
  key: K,
  next: Option<Index>,
  prev: Option<Index>,
}

/// Arena-backed doubly linked list of keys in first-insertion order.
///
/// The head is the oldest key, the tail the newest. Re-pushing a key that is
/// already tracked leaves its position untouched.
#[derive(Debug)]
pub(crate) struct InsertionOrder<K: Eq + Hash + Clone> {
  nodes: Arena<Node<K>>,
  lookup: HashMap<K, Index>,
  head: Option<Index>,
  tail: Option<Index>,
}

impl<K: Eq + Hash + Clone> Default for InsertionOrder<K> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K: Eq + Hash + Clone> InsertionOrder<K> {
  pub(crate) fn new() -> Self {
    Self {
      nodes: Arena::new(),
      lookup: HashMap::default(),
      head: None,
      tail: None,
    }
  }

  // Unlinks a node without touching the arena or the lookup map.
  fn unlink(&mut self, index: Index) {
    let node = &self.nodes[index];
    let prev = node.prev;
    let next = node.next;

    match prev {
      Some(prev_idx) => self.nodes[prev_idx].next = next,
      None => self.head = next,
    }
    match next {
      Some(next_idx) => self.nodes[next_idx].prev = prev,
      None => self.tail = prev,
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.lookup.len()
  }

  pub(crate) fn contains(&self, key: &K) -> bool {
    self.lookup.contains_key(key)
  }

  /// Appends `key` as the newest entry. Returns `false` if it was already tracked.
  pub(crate) fn push_back(&mut self, key: K) -> bool {
    if self.lookup.contains_key(&key) {
      return false;
    }

    let index = self.nodes.insert(Node {
      key: key.clone(),
      next: None,
      prev: self.tail,
    });
    if let Some(old_tail) = self.tail {
      self.nodes[old_tail].next = Some(index);
    }
    self.tail = Some(index);
    if self.head.is_none() {
      self.head = Some(index);
    }
    self.lookup.insert(key, index);
    true
  }

  pub(crate) fn remove(&mut self, key: &K) -> bool {
    match self.lookup.remove(key) {
      Some(index) => {
        self.unlink(index);
        self.nodes.remove(index);
        true
      }
      None => false,
    }
  }

  /// Removes and returns the oldest key.
  pub(crate) fn pop_front(&mut self) -> Option<K> {
    let head = self.head?;
    let key = self.nodes[head].key.clone();
    self.remove(&key);
    Some(key)
  }

  /// Removes up to `count` of the oldest keys, returned oldest first.
  pub(crate) fn pop_front_n(&mut self, count: usize) -> Vec<K> {
    let mut popped = Vec::with_capacity(count.min(self.len()));
    while popped.len() < count {
      match self.pop_front() {
        Some(key) => popped.push(key),
        None => break,
      }
    }
    popped
  }

  pub(crate) fn clear(&mut self) {
    self.nodes.clear();
    self.lookup.clear();
    self.head = None;
    self.tail = None;
  }

  /// Iterates keys from oldest to newest.
  pub(crate) fn iter(&self) -> Iter<'_, K> {
    Iter {
      order: self,
      current: self.head,
    }
  }

  pub(crate) fn to_vec(&self) -> Vec<K> {
    self.iter().cloned().collect()
  }
}

pub(crate) struct Iter<'a, K: Eq + Hash + Clone> {
  order: &'a InsertionOrder<K>,
  current: Option<Index>,
}

impl<'a, K: Eq + Hash + Clone> Iterator for Iter<'a, K> {
  type Item = &'a K;

  fn next(&mut self) -> Option<Self::Item> {
    let index = self.current?;
    let node = &self.order.nodes[index];
    self.current = node.next;
    Some(&node.key)
  }
}
