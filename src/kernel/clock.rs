use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

//discrete-event clock. events due on the same cycle fire in the order they
//were scheduled and each event value has at most one pending instance
pub struct Scheduler<E> {
  cycle: u64,
  seq: u64,
  queue: BTreeMap<(u64, u64), E>,
  pending: HashMap<E, (u64, u64)>,
}

impl<E: Copy + Eq + Hash> Scheduler<E> {
  pub fn new() -> Self {
    Scheduler {
      cycle: 0,
      seq: 0,
      queue: BTreeMap::new(),
      pending: HashMap::new(),
    }
  }

  pub fn now(&self) -> u64 {
    self.cycle
  }

  pub fn enqueue(&mut self, event: E, delay: u64) {
    let cycle = self.cycle + delay;
    self.enqueue_at(event, cycle);
  }

  //if the event is already pending the earlier of the two dates wins
  pub fn enqueue_at(&mut self, event: E, cycle: u64) {
    let cycle = cycle.max(self.cycle);
    if let Some(&key) = self.pending.get(&event) {
      if key.0 <= cycle {
        return;
      }
      self.queue.remove(&key);
    }
    let key = (cycle, self.seq);
    self.seq += 1;
    self.queue.insert(key, event);
    self.pending.insert(event, key);
  }

  pub fn cancel(&mut self, event: &E) {
    if let Some(key) = self.pending.remove(event) {
      self.queue.remove(&key);
    }
  }

  pub fn is_enqueued(&self, event: &E) -> bool {
    self.pending.contains_key(event)
  }

  pub fn next_cycle(&self) -> Option<u64> {
    self.queue.keys().next().map(|&(cycle, _)| cycle)
  }

  pub fn is_empty(&self) -> bool {
    self.queue.is_empty()
  }

  //pops the next event due no later than `limit`, moving the clock to its date
  pub fn pop_due(&mut self, limit: u64) -> Option<E> {
    let key = match self.queue.keys().next() {
      Some(&key) if key.0 <= limit => key,
      _ => return None,
    };
    let event = self.queue.remove(&key)?;
    self.pending.remove(&event);
    self.cycle = key.0;
    Some(event)
  }

  pub fn advance_to(&mut self, cycle: u64) {
    self.cycle = self.cycle.max(cycle);
  }

  pub fn clear(&mut self) {
    self.queue.clear();
    self.pending.clear();
  }
}

impl<E: Copy + Eq + Hash> Default for Scheduler<E> {
  fn default() -> Self {
    Scheduler::new()
  }
}
