//bounded FIFO over a fixed ring of slots. used both as object pools and
//as pending-work lists, each element lives in exactly one queue at a time

pub struct Queue<T> {
  slots: Box<[Option<T>]>,
  first: usize,
  nb_elems: usize,
}

impl<T> Queue<T> {
  pub fn new(size: usize) -> Self {
    assert!(size > 0, "a queue needs at least one slot");
    Queue {
      slots: (0..size).map(|_| None).collect(),
      first: 0,
      nb_elems: 0,
    }
  }

  pub fn len(&self) -> usize {
    self.nb_elems
  }

  pub fn is_full(&self) -> bool {
    self.nb_elems >= self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nb_elems == 0
  }

  //hands the element back if the queue is full
  pub fn push(&mut self, elem: T) -> Result<(), T> {
    if self.is_full() {
      return Err(elem);
    }
    let last = (self.first + self.nb_elems) % self.slots.len();
    self.slots[last] = Some(elem);
    self.nb_elems += 1;
    Ok(())
  }

  pub fn pop(&mut self) -> Option<T> {
    if self.is_empty() {
      return None;
    }
    let elem = self.slots[self.first].take();
    self.first = (self.first + 1) % self.slots.len();
    self.nb_elems -= 1;
    elem
  }

  pub fn first(&self) -> Option<&T> {
    match self.nb_elems {
      0 => None,
      _ => self.slots[self.first].as_ref(),
    }
  }

  pub fn get(&self, idx: usize) -> Option<&T> {
    if idx >= self.nb_elems {
      return None;
    }
    self.slots[(self.first + idx) % self.slots.len()].as_ref()
  }

  pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
    (0..self.nb_elems).filter_map(move |idx| self.get(idx))
  }

  pub fn clear(&mut self) {
    while self.pop().is_some() {}
    self.first = 0;
  }
}
