use crate::common::{ReadArray, WriteArray};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoReqStatus {
  Ok,
  Invalid,
}

//a memory-mapped access as seen by a target: address relative to the
//target, payload, direction and completion status
#[derive(Debug, Clone)]
pub struct IoReq {
  pub addr: u64,
  pub data: Vec<u8>,
  pub is_write: bool,
  pub status: IoReqStatus,
}

impl IoReq {
  pub fn read(addr: u64, size: usize) -> Self {
    IoReq {
      addr,
      data: vec![0; size],
      is_write: false,
      status: IoReqStatus::Ok,
    }
  }

  pub fn write(addr: u64, data: &[u8]) -> Self {
    IoReq {
      addr,
      data: data.to_vec(),
      is_write: true,
      status: IoReqStatus::Ok,
    }
  }

  pub fn write_u32(addr: u64, value: u32) -> Self {
    IoReq::write(addr, &value.to_le_bytes())
  }

  pub fn size(&self) -> usize {
    self.data.len()
  }

  //only meaningful on 32-bit requests, which is all registers accept
  pub fn data_u32(&self) -> u32 {
    self.data.as_slice().read_word(0)
  }

  pub fn set_data_u32(&mut self, value: u32) {
    self.data.as_mut_slice().write_word(0, value);
  }
}
