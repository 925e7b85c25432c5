//helpers for picking apart 32-bit register values
//bit indices are inclusive and counted from the LSB

pub type Register = u32;

pub trait BitTwiddle {
  fn nth_bit(&self, n: u32) -> Register;
  fn nth_bit_bool(&self, n: u32) -> bool;
  fn lowest_bits(&self, n: u32) -> Register;
  fn range(&self, lo: u32, hi: u32) -> Register;
}

impl BitTwiddle for Register {
  fn nth_bit(&self, n: u32) -> Register {
    (self >> n) & 1
  }
  fn nth_bit_bool(&self, n: u32) -> bool {
    self.nth_bit(n) == 1
  }
  fn lowest_bits(&self, n: u32) -> Register {
    match n {
      0 => 0,
      32..=u32::MAX => *self,
      _ => self & ((1 << n) - 1),
    }
  }
  fn range(&self, lo: u32, hi: u32) -> Register {
    assert!(lo <= hi && hi < 32);
    (self >> lo).lowest_bits(hi - lo + 1)
  }
}

pub trait Bit {
  fn bit(self, n: u32) -> Register;
}

impl Bit for bool {
  fn bit(self, n: u32) -> Register {
    (self as Register) << n
  }
}
