use std::cell::RefCell;
use std::rc::Rc;
use log::{debug, trace, warn};
use crate::config::UdmaConfig;
use crate::error::{Error, Result};
use crate::kernel::IoReq;
use crate::register::{Bit, BitTwiddle};
use super::channel::{Channel, PendingWord};
use super::periph::{RX_CHANNEL, TX_CHANNEL};
use super::queue::Queue;
use super::UdmaCore;

pub const EXT_ADDR_OFFSET: u64 = 0x00;
pub const EXT_CFG_OFFSET: u64 = 0x04;
pub const TIMING_OFFSET: u64 = 0x08;
pub const STATUS_OFFSET: u64 = 0x0c;

pub const EXT_CFG_ADDR_SPACE_BIT: u32 = 0;
pub const EXT_CFG_BURST_LINEAR_BIT: u32 = 1;
pub const EXT_CFG_RESET: u32 = 0x2;
pub const TIMING_RESET: u32 = 0x0100;

pub const CA_BYTES: usize = 6;
const CA_BURST_BIT: u32 = 45;
const CA_ADDR_SPACE_BIT: u32 = 46;
const CA_READ_BIT: u32 = 47;

//the memory device on the other side of the bus
pub trait HyperDevice {
  fn cs_sync(&mut self, cycle: u64, active: bool);
  //command-address bytes and write payload
  fn write_cycle(&mut self, cycle: u64, byte: u8);
  fn read_cycle(&mut self, cycle: u64) -> u8;
}

impl<D: HyperDevice> HyperDevice for Rc<RefCell<D>> {
  fn cs_sync(&mut self, cycle: u64, active: bool) {
    self.borrow_mut().cs_sync(cycle, active)
  }
  fn write_cycle(&mut self, cycle: u64, byte: u8) {
    self.borrow_mut().write_cycle(cycle, byte)
  }
  fn read_cycle(&mut self, cycle: u64) -> u8 {
    self.borrow_mut().read_cycle(cycle)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HyperTransfer {
  pub is_write: bool,
  pub addr: u32,
  pub size: u32,
  pub reg_space: bool,
  pub linear: bool,
}

impl HyperTransfer {
  //the next transfer can ride on the current chip-select assertion
  fn continues_with(&self, next: &HyperTransfer) -> bool {
    self.linear &&
      next.is_write == self.is_write &&
      next.reg_space == self.reg_space &&
      next.addr == self.addr.wrapping_add(self.size)
  }
}

//48-bit command-address word, byte addresses are turned into 16-bit word addresses
pub fn ca_word(is_read: bool, reg_space: bool, linear: bool, addr: u32) -> u64 {
  let word_addr = addr >> 1;
  (is_read as u64) << CA_READ_BIT |
    (reg_space as u64) << CA_ADDR_SPACE_BIT |
    (linear as u64) << CA_BURST_BIT |
    (word_addr.range(3, 31) as u64) << 16 |
    word_addr.range(0, 2) as u64
}

//MSB first, the order they go out on the bus
pub fn ca_bytes(ca: u64) -> [u8; CA_BYTES] {
  let mut bytes = [0; CA_BYTES];
  for (idx, byte) in bytes.iter_mut().enumerate() {
    *byte = (ca >> (8 * (CA_BYTES - 1 - idx))) as u8;
  }
  bytes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Idle,
  Cs,
  Ca,
  Data,
  CsOff,
}

pub struct Hyper {
  id: usize,
  ext_addr: u32,
  ext_cfg: u32,
  timing: u32,

  state: State,
  pending_transfers: Queue<HyperTransfer>,
  current: Option<HyperTransfer>,
  remaining: u32,
  ca: [u8; CA_BYTES],
  ca_idx: usize,
  pending: PendingWord,
  device: Option<Box<dyn HyperDevice>>,
}

impl Hyper {
  pub fn new(id: usize, config: &UdmaConfig) -> Self {
    Hyper {
      id,
      ext_addr: 0,
      ext_cfg: EXT_CFG_RESET,
      timing: TIMING_RESET,
      state: State::Idle,
      //one entry per descriptor of both channels
      pending_transfers: Queue::new(2 * config.channel_depth),
      current: None,
      remaining: 0,
      ca: [0; CA_BYTES],
      ca_idx: 0,
      pending: PendingWord::default(),
      device: None,
    }
  }

  pub fn bind_device(&mut self, device: Box<dyn HyperDevice>) {
    self.device = Some(device);
  }

  //cycles per bus byte
  pub fn period(&self) -> u64 {
    self.timing.range(0, 7) as u64 + 1
  }

  pub fn cs_settle(&self) -> u64 {
    self.timing.range(8, 15) as u64
  }

  pub fn is_busy(&self) -> bool {
    self.state != State::Idle || !self.pending_transfers.is_empty()
  }

  pub fn custom_req(&mut self, req: &mut IoReq, offset: u64) -> Result<()> {
    let value = req.data_u32();
    match (offset, req.is_write) {
      (EXT_ADDR_OFFSET, true) => self.ext_addr = value,
      (EXT_ADDR_OFFSET, false) => req.set_data_u32(self.ext_addr),
      (EXT_CFG_OFFSET, true) => self.ext_cfg = value.lowest_bits(2),
      (EXT_CFG_OFFSET, false) => req.set_data_u32(self.ext_cfg),
      (TIMING_OFFSET, true) => self.timing = value.lowest_bits(16),
      (TIMING_OFFSET, false) => req.set_data_u32(self.timing),
      (STATUS_OFFSET, false) => req.set_data_u32(self.is_busy().bit(0)),
      (STATUS_OFFSET, true) => {},
      _ => return Err(Error::Unmapped { offset }),
    }
    Ok(())
  }

  //a channel got a new transfer, RX ones are device reads
  pub fn transfer_armed(&mut self, slot: usize, size: u32, core: &mut UdmaCore) {
    let transfer = HyperTransfer {
      is_write: slot == TX_CHANNEL,
      addr: self.ext_addr,
      size,
      reg_space: self.ext_cfg.nth_bit_bool(EXT_CFG_ADDR_SPACE_BIT),
      linear: self.ext_cfg.nth_bit_bool(EXT_CFG_BURST_LINEAR_BIT),
    };
    debug!("hyper {}: queued {} of {:#x} bytes at {:#x}",
           self.id, if transfer.is_write { "write" } else { "read" }, size, transfer.addr);
    if self.pending_transfers.push(transfer).is_err() {
      warn!("hyper {}: transfer queue full, dropping it", self.id);
      return;
    }
    if self.state == State::Idle {
      core.wake_periph(self.id);
    }
  }

  //a channel was cleared, its transfers go away and an ongoing one releases
  //chip-select
  pub fn channel_cleared(&mut self, slot: usize, core: &mut UdmaCore) {
    let is_write = slot == TX_CHANNEL;
    let kept: Vec<HyperTransfer> = self.pending_transfers.iter()
      .filter(|transfer| transfer.is_write != is_write)
      .copied()
      .collect();
    self.pending_transfers.clear();
    for transfer in kept {
      self.pending_transfers.push(transfer).ok();
    }
    if is_write {
      self.pending.clear();
    }
    match self.current {
      Some(transfer) if transfer.is_write == is_write => {
        debug!("hyper {}: aborting {} at {:#x}", self.id, if is_write { "write" } else { "read" }, transfer.addr);
        self.current = None;
        self.remaining = 0;
        if self.state != State::Idle {
          self.state = State::CsOff;
          core.wake_periph(self.id);
        }
      },
      _ => {},
    }
  }

  fn set_cs(&mut self, active: bool, cycle: u64) {
    trace!("hyper {}: cs {}", self.id, if active { "asserted" } else { "released" });
    if let Some(device) = self.device.as_mut() {
      device.cs_sync(cycle, active);
    }
  }

  pub fn tick(&mut self, channels: &mut [Channel], core: &mut UdmaCore) {
    let cycle = core.now();
    match self.state {
      State::Idle => {
        let transfer = match self.pending_transfers.pop() {
          Some(transfer) => transfer,
          None => return,
        };
        self.start(transfer);
        self.set_cs(true, cycle);
        self.state = State::Cs;
        core.schedule_periph(self.id, self.cs_settle().max(1));
      },
      State::Cs | State::Ca => {
        let byte = self.ca[self.ca_idx];
        trace!("hyper {}: CA byte {} = {:#04x}", self.id, self.ca_idx, byte);
        if let Some(device) = self.device.as_mut() {
          device.write_cycle(cycle, byte);
        }
        self.ca_idx += 1;
        self.state = if self.ca_idx == CA_BYTES { State::Data } else { State::Ca };
        core.schedule_periph(self.id, self.period());
      },
      State::Data => {
        let transfer = match self.current {
          Some(transfer) => transfer,
          None => {
            self.state = State::CsOff;
            core.schedule_periph(self.id, 1);
            return;
          },
        };
        if transfer.is_write {
          let byte = match channels.get_mut(TX_CHANNEL) {
            Some(channel) => self.pending.next_byte(channel, core),
            None => None,
          };
          //wait for the channel to hand over more data
          let byte = match byte {
            Some(byte) => byte,
            None => return,
          };
          if let Some(device) = self.device.as_mut() {
            device.write_cycle(cycle, byte);
          }
        } else {
          let byte = match self.device.as_mut() {
            Some(device) => device.read_cycle(cycle),
            None => 0,
          };
          if let Some(channel) = channels.get_mut(RX_CHANNEL) {
            channel.push_data(&[byte], core);
          }
        }
        self.remaining -= 1;
        if self.remaining == 0 {
          self.end_transfer(transfer);
        }
        core.schedule_periph(self.id, self.period());
      },
      State::CsOff => {
        self.set_cs(false, cycle);
        self.state = State::Idle;
        core.schedule_periph(self.id, self.cs_settle().max(1));
      },
    }
  }

  fn start(&mut self, transfer: HyperTransfer) {
    let ca = ca_word(!transfer.is_write, transfer.reg_space, transfer.linear, transfer.addr);
    debug!("hyper {}: CA {:#014x}", self.id, ca);
    self.ca = ca_bytes(ca);
    self.ca_idx = 0;
    self.current = Some(transfer);
    self.remaining = transfer.size;
  }

  //keeps chip-select asserted when the next queued transfer picks up where
  //this one ends
  fn end_transfer(&mut self, transfer: HyperTransfer) {
    let burst = match self.pending_transfers.first() {
      Some(next) => transfer.continues_with(next),
      None => false,
    };
    if burst {
      if let Some(next) = self.pending_transfers.pop() {
        debug!("hyper {}: bursting into {:#x}", self.id, next.addr);
        self.current = Some(next);
        self.remaining = next.size;
        return;
      }
    }
    self.current = None;
    self.state = State::CsOff;
  }

  pub fn reset(&mut self) {
    self.ext_addr = 0;
    self.ext_cfg = EXT_CFG_RESET;
    self.timing = TIMING_RESET;
    self.state = State::Idle;
    self.pending_transfers.clear();
    self.current = None;
    self.remaining = 0;
    self.pending.clear();
  }
}

//HyperRAM model decoding the CA phase and serving byte accesses from its array
pub struct HyperRam {
  contents: Vec<u8>,
  ca: Vec<u8>,
  cursor: usize,
  cs_assertions: usize,
  commands: Vec<u64>,
}

impl HyperRam {
  pub fn new(size: usize) -> Self {
    HyperRam {
      contents: vec![0; size],
      ca: Vec::with_capacity(CA_BYTES),
      cursor: 0,
      cs_assertions: 0,
      commands: vec![],
    }
  }

  pub fn contents(&self) -> &[u8] {
    &self.contents
  }

  pub fn contents_mut(&mut self) -> &mut [u8] {
    &mut self.contents
  }

  pub fn cs_assertions(&self) -> usize {
    self.cs_assertions
  }

  //CA words received, in order
  pub fn commands(&self) -> &[u64] {
    &self.commands
  }
}

impl HyperDevice for HyperRam {
  fn cs_sync(&mut self, _cycle: u64, active: bool) {
    if active {
      self.cs_assertions += 1;
    }
    self.ca.clear();
  }

  fn write_cycle(&mut self, _cycle: u64, byte: u8) {
    if self.ca.len() < CA_BYTES {
      self.ca.push(byte);
      if self.ca.len() == CA_BYTES {
        let ca = self.ca.iter().fold(0, |ca, &byte| ca << 8 | byte as u64);
        let word_addr = ((ca >> 16) & 0x1fff_ffff) << 3 | ca & 7;
        self.cursor = (word_addr << 1) as usize;
        self.commands.push(ca);
      }
      return;
    }
    if let Some(slot) = self.contents.get_mut(self.cursor) {
      *slot = byte;
    }
    self.cursor += 1;
  }

  fn read_cycle(&mut self, _cycle: u64) -> u8 {
    let byte = self.contents.get(self.cursor).copied().unwrap_or(0);
    self.cursor += 1;
    byte
  }
}
