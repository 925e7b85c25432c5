//point-to-point signal port. a master holds zero or one sink, syncing an
//unbound wire does nothing
pub struct WireMaster<T> {
  sink: Option<Box<dyn FnMut(u64, T)>>,
}

impl<T> WireMaster<T> {
  pub fn new() -> Self {
    WireMaster { sink: None }
  }

  pub fn bind(&mut self, sink: Box<dyn FnMut(u64, T)>) {
    self.sink = Some(sink);
  }

  pub fn unbind(&mut self) {
    self.sink = None;
  }

  pub fn is_bound(&self) -> bool {
    self.sink.is_some()
  }

  pub fn sync(&mut self, cycle: u64, value: T) {
    if let Some(sink) = self.sink.as_mut() {
      sink(cycle, value);
    }
  }
}

impl<T> Default for WireMaster<T> {
  fn default() -> Self {
    WireMaster::new()
  }
}
