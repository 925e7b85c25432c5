//one memory <-> peripheral data movement armed through a channel's registers

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
  Ongoing,
  //continuous transfer went back to its start address
  Wrapped,
  Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
  pub addr: u32,
  pub size: u32,
  //unit size in bytes, 1, 2 or 4
  pub transfer_size: u32,
  pub continuous_mode: bool,
  pub current_addr: u32,
  pub remaining_size: i32,
  pub received_size: u64,
}

impl Transfer {
  pub fn new(addr: u32, size: u32, transfer_size: u32, continuous_mode: bool) -> Self {
    Transfer {
      addr,
      size,
      transfer_size,
      continuous_mode,
      current_addr: addr,
      remaining_size: size as i32,
      received_size: 0,
    }
  }

  //bytes covered by the next unit, the last unit may be truncated
  pub fn next_unit(&self) -> u32 {
    self.transfer_size.min(self.remaining_size.max(0) as u32)
  }

  //consumes the next unit and returns where it lives along with how the
  //transfer moved on
  pub fn advance(&mut self) -> (u32, u32, Progress) {
    let addr = self.current_addr;
    let unit = self.next_unit();
    self.current_addr = self.current_addr.wrapping_add(unit);
    self.remaining_size -= unit as i32;
    self.received_size += unit as u64;
    let progress = if self.remaining_size > 0 {
      Progress::Ongoing
    } else if self.continuous_mode {
      self.current_addr = self.addr;
      self.remaining_size = self.size as i32;
      Progress::Wrapped
    } else {
      Progress::Done
    };
    (addr, unit, progress)
  }
}
