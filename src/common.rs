//little-endian word accessors over the I/O request payloads

pub trait ReadArray {
  fn read_word(&self, address: usize) -> u32;
}

pub trait WriteArray {
  fn write_word(&mut self, address: usize, value: u32);
}

impl ReadArray for [u8] {
  fn read_word(&self, address: usize) -> u32 {
    self[address] as u32 |
      (self[address + 1] as u32) << 8 |
      (self[address + 2] as u32) << 16 |
      (self[address + 3] as u32) << 24
  }
}

impl WriteArray for [u8] {
  fn write_word(&mut self, address: usize, value: u32) {
    self[address] = value as u8;
    self[address + 1] = (value >> 8) as u8;
    self[address + 2] = (value >> 16) as u8;
    self[address + 3] = (value >> 24) as u8;
  }
}

//packs up to 4 bytes into a word, first byte in the LSBs
pub fn pack_word(bytes: &[u8]) -> u32 {
  bytes.iter()
       .take(4)
       .enumerate()
       .fold(0, |word, (idx, &byte)| word | (byte as u32) << (8 * idx))
}
