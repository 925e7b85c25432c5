use crate::error::{Error, Result};

pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

//the L2 memory the UDMA channels read from and write to
pub struct Memory {
  base: u64,
  contents: Box<[u8]>,
}

impl Memory {
  pub fn new(base: u64, size: usize) -> Self {
    Memory {
      base,
      contents: vec![0; size].into_boxed_slice(),
    }
  }

  //offset into the backing store for an access of `size` bytes at `addr`
  fn offset(&self, addr: u64, size: usize) -> Result<usize> {
    let out_of_range = Error::L2OutOfRange { addr, size };
    let offset = addr.checked_sub(self.base).ok_or(out_of_range)? as usize;
    match offset.checked_add(size) {
      Some(end) if end <= self.contents.len() => Ok(offset),
      _ => Err(Error::L2OutOfRange { addr, size }),
    }
  }

  pub fn read(&self, addr: u64, buffer: &mut [u8]) -> Result<()> {
    let offset = self.offset(addr, buffer.len())?;
    buffer.copy_from_slice(&self.contents[offset..offset + buffer.len()]);
    Ok(())
  }

  pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
    let offset = self.offset(addr, data.len())?;
    self.contents[offset..offset + data.len()].copy_from_slice(data);
    Ok(())
  }
}
