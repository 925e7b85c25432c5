use std::collections::VecDeque;
use arrayvec::ArrayVec;
use log::{debug, trace, warn};
use crate::common::pack_word;
use crate::config::UdmaConfig;
use crate::error::{Error, Result};
use crate::kernel::IoReq;
use crate::register::{Bit, BitTwiddle};
use super::queue::Queue;
use super::transfer::{Progress, Transfer};
use super::{ChannelId, Event, UdmaCore};

pub const CHANNEL_SIZE: u64 = 0x10;
pub const SADDR_OFFSET: u64 = 0x0;
pub const SIZE_OFFSET: u64 = 0x4;
pub const CFG_OFFSET: u64 = 0x8;
pub const RESERVED_OFFSET: u64 = 0xc;

pub const SIZE_START_BIT: u32 = 31;
pub const CFG_CONT_BIT: u32 = 0;
pub const CFG_EN_BIT: u32 = 4;
pub const CFG_CLR_BIT: u32 = 5;

//width of the SIZE register's size field
const SIZE_BITS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Rx,
  Tx,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
  pub transfers_completed: u64,
  pub bytes_transferred: u64,
}

//an L2 request issued on behalf of a channel
#[derive(Debug, Clone)]
pub struct ChannelReq {
  pub channel: ChannelId,
  //channel generation at issue time, stale responses are dropped after a reset
  pub generation: u32,
  pub req: IoReq,
  //final request of a transfer (or of a lap in continuous mode)
  pub last: bool,
}

pub struct Channel {
  id: ChannelId,
  direction: Direction,
  name: String,

  saddr: u32,
  size: u32,
  transfer_size: u32,
  continuous_mode: bool,

  //descriptor storage, the queues below hold indices into it
  transfers: Vec<Transfer>,
  free_reqs: Queue<usize>,
  pending_reqs: Queue<usize>,
  current_cmd: Option<usize>,

  ready_reqs: VecDeque<ChannelReq>,
  pub(crate) in_ready_queue: bool,
  l2_pending: usize,
  prefetch: usize,
  pending_bytes: ArrayVec<u8, 4>,
  generation: u32,

  stats: ChannelStats,
  last_transfer: Option<Transfer>,
}

impl Channel {
  pub fn new(id: ChannelId, direction: Direction, name: String, config: &UdmaConfig) -> Self {
    let depth = config.channel_depth;
    let mut free_reqs = Queue::new(depth);
    for idx in 0..depth {
      free_reqs.push(idx).ok();
    }
    Channel {
      id,
      direction,
      name,
      saddr: 0,
      size: 0,
      transfer_size: 1,
      continuous_mode: false,
      transfers: vec![Transfer::new(0, 0, 1, false); depth],
      free_reqs,
      pending_reqs: Queue::new(depth),
      current_cmd: None,
      ready_reqs: VecDeque::new(),
      in_ready_queue: false,
      l2_pending: 0,
      prefetch: config.tx_prefetch,
      pending_bytes: ArrayVec::new(),
      generation: 0,
      stats: ChannelStats::default(),
      last_transfer: None,
    }
  }

  pub fn id(&self) -> ChannelId {
    self.id
  }

  pub fn direction(&self) -> Direction {
    self.direction
  }

  pub fn is_tx(&self) -> bool {
    self.direction == Direction::Tx
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn size_reg(&self) -> u32 {
    self.size
  }

  pub fn current(&self) -> Option<&Transfer> {
    self.current_cmd.map(|idx| &self.transfers[idx])
  }

  pub fn nb_pending(&self) -> usize {
    self.pending_reqs.len()
  }

  pub fn stats(&self) -> &ChannelStats {
    &self.stats
  }

  pub fn last_transfer(&self) -> Option<&Transfer> {
    self.last_transfer.as_ref()
  }

  //a transfer stays busy until its last memory request has been handled
  pub fn is_busy(&self) -> bool {
    self.current_cmd.is_some() || !self.pending_reqs.is_empty() || self.l2_pending > 0 || !self.ready_reqs.is_empty()
  }

  //register access inside the channel window, returns true when a transfer got armed
  pub fn req(&mut self, req: &mut IoReq, offset: u64, core: &mut UdmaCore) -> Result<bool> {
    match offset {
      SADDR_OFFSET => self.saddr_req(req),
      SIZE_OFFSET => self.size_req(req, core),
      CFG_OFFSET => self.cfg_req(req, core),
      RESERVED_OFFSET => {
        if !req.is_write {
          req.set_data_u32(0);
        }
        Ok(false)
      },
      _ => Err(Error::Unmapped { offset }),
    }
  }

  fn saddr_req(&mut self, req: &mut IoReq) -> Result<bool> {
    if req.is_write {
      self.saddr = req.data_u32();
      trace!("{}: SADDR = {:#x}", self.name, self.saddr);
    } else {
      let addr = self.current().map_or(self.saddr, |transfer| transfer.current_addr);
      req.set_data_u32(addr);
    }
    Ok(false)
  }

  fn size_req(&mut self, req: &mut IoReq, core: &mut UdmaCore) -> Result<bool> {
    if req.is_write {
      let value = req.data_u32();
      self.size = value.lowest_bits(SIZE_BITS);
      trace!("{}: SIZE = {:#x}", self.name, self.size);
      if value.nth_bit_bool(SIZE_START_BIT) {
        return Ok(self.enqueue_transfer(core));
      }
    } else {
      let remaining = self.current().map_or(0, |transfer| transfer.remaining_size.max(0) as u32);
      req.set_data_u32(remaining);
    }
    Ok(false)
  }

  fn cfg_req(&mut self, req: &mut IoReq, core: &mut UdmaCore) -> Result<bool> {
    if !req.is_write {
      let datasize: u32 = match self.transfer_size {
        1 => 0,
        2 => 1,
        _ => 2,
      };
      let value = self.continuous_mode.bit(CFG_CONT_BIT) | datasize << 1 | self.is_busy().bit(CFG_EN_BIT);
      req.set_data_u32(value);
      return Ok(false);
    }
    let value = req.data_u32();
    if value.nth_bit_bool(CFG_CLR_BIT) {
      self.reset(core);
      return Ok(false);
    }
    self.continuous_mode = value.nth_bit_bool(CFG_CONT_BIT);
    self.transfer_size = match value.range(1, 2) {
      0 => 1,
      1 => 2,
      _ => 4,
    };
    trace!("{}: CFG = {:#x} (unit {}, continuous {})", self.name, value, self.transfer_size, self.continuous_mode);
    match value.nth_bit_bool(CFG_EN_BIT) {
      true => Ok(self.enqueue_transfer(core)),
      false => Ok(false),
    }
  }

  //a start while busy is queued behind the active transfer, a start with no
  //free descriptor is dropped
  fn enqueue_transfer(&mut self, core: &mut UdmaCore) -> bool {
    if self.size == 0 {
      warn!("{}: ignoring start of an empty transfer", self.name);
      return false;
    }
    let idx = match self.free_reqs.pop() {
      Some(idx) => idx,
      None => {
        warn!("{}: no free transfer, dropping start (saddr {:#x}, size {:#x})", self.name, self.saddr, self.size);
        return false;
      },
    };
    self.transfers[idx] = Transfer::new(self.saddr, self.size, self.transfer_size, self.continuous_mode);
    if let Err(idx) = self.pending_reqs.push(idx) {
      warn!("{}: pending queue full, dropping start", self.name);
      self.free_reqs.push(idx).ok();
      return false;
    }
    debug!("{}: enqueued transfer (saddr {:#x}, size {:#x}, unit {}, continuous {})",
           self.name, self.saddr, self.size, self.transfer_size, self.continuous_mode);
    self.check_state(core);
    true
  }

  fn can_fetch(&self) -> bool {
    self.is_tx() && self.current_cmd.is_some() && self.l2_pending + self.ready_reqs.len() < self.prefetch
  }

  //pulls the next pending transfer when idle and keeps TX prefetching going
  pub fn check_state(&mut self, core: &mut UdmaCore) {
    if self.current_cmd.is_none() {
      if let Some(idx) = self.pending_reqs.pop() {
        debug!("{}: starting transfer at {:#x}", self.name, self.transfers[idx].addr);
        self.current_cmd = Some(idx);
      }
    }
    if self.can_fetch() {
      core.sched.enqueue(Event::Channel(self.id), 1);
    }
  }

  //TX side: fetches one unit of the active transfer from L2
  pub fn event_handler(&mut self, core: &mut UdmaCore) {
    if !self.can_fetch() {
      return;
    }
    let idx = match self.current_cmd {
      Some(idx) => idx,
      None => return,
    };
    let (addr, unit, progress) = self.transfers[idx].advance();
    let req = ChannelReq {
      channel: self.id,
      generation: self.generation,
      req: IoReq::read(addr as u64, unit as usize),
      last: progress != Progress::Ongoing,
    };
    self.l2_pending += 1;
    core.push_l2_read_req(req);
    self.handle_progress(progress);
    self.check_state(core);
  }

  //RX side: bytes coming from the protocol, flushed to L2 one unit at a time
  pub fn push_data(&mut self, data: &[u8], core: &mut UdmaCore) {
    for &byte in data {
      if self.current_cmd.is_none() {
        self.check_state(core);
      }
      let idx = match self.current_cmd {
        Some(idx) => idx,
        None => {
          warn!("{}: no transfer to receive {:#04x}, dropping it", self.name, byte);
          continue;
        },
      };
      self.pending_bytes.push(byte);
      if self.pending_bytes.len() as u32 >= self.transfers[idx].next_unit() {
        let (addr, _, progress) = self.transfers[idx].advance();
        trace!("{}: flushing {:#x} to {:#x}", self.name, pack_word(&self.pending_bytes), addr);
        let req = ChannelReq {
          channel: self.id,
          generation: self.generation,
          req: IoReq::write(addr as u64, &self.pending_bytes),
          last: progress != Progress::Ongoing,
        };
        self.pending_bytes.clear();
        self.l2_pending += 1;
        core.push_l2_write_req(req);
        self.handle_progress(progress);
      }
    }
  }

  fn handle_progress(&mut self, progress: Progress) {
    let idx = match self.current_cmd {
      Some(idx) => idx,
      None => return,
    };
    let transfer = self.transfers[idx];
    match progress {
      Progress::Ongoing => {},
      Progress::Wrapped => {
        debug!("{}: continuous transfer back to {:#x}", self.name, transfer.addr);
        self.stats.transfers_completed += 1;
        self.stats.bytes_transferred += transfer.size as u64;
      },
      Progress::Done => {
        debug!("{}: transfer at {:#x} done ({} bytes)", self.name, transfer.addr, transfer.received_size);
        self.stats.transfers_completed += 1;
        self.stats.bytes_transferred += transfer.received_size;
        self.last_transfer = Some(transfer);
        self.current_cmd = None;
        self.free_reqs.push(idx).ok();
      },
    }
  }

  //memory response for this channel
  pub fn push_ready_req(&mut self, req: ChannelReq, core: &mut UdmaCore) {
    if req.generation != self.generation {
      debug!("{}: dropping response issued before a reset", self.name);
      return;
    }
    self.l2_pending = self.l2_pending.saturating_sub(1);
    self.ready_reqs.push_back(req);
    if !self.in_ready_queue {
      self.in_ready_queue = true;
      core.enqueue_ready(self.id, self.is_tx());
    }
  }

  pub fn has_ready_req(&self) -> bool {
    !self.ready_reqs.is_empty()
  }

  pub fn pop_ready_req(&mut self) -> Option<ChannelReq> {
    self.ready_reqs.pop_front()
  }

  //the protocol is done with a request, signal the end of the transfer if it
  //was the last one and keep the channel going
  pub fn handle_ready_req_end(&mut self, req: ChannelReq, core: &mut UdmaCore) {
    if req.last {
      core.trigger_event(self.id.event_id());
    }
    self.check_state(core);
  }

  //default completion path, used by RX channels whose requests are L2 writes
  pub fn handle_ready_reqs(&mut self, core: &mut UdmaCore) {
    while let Some(req) = self.ready_reqs.pop_front() {
      self.handle_ready_req_end(req, core);
    }
  }

  pub fn reset(&mut self, core: &mut UdmaCore) {
    debug!("{}: reset", self.name);
    self.saddr = 0;
    self.size = 0;
    self.transfer_size = 1;
    self.continuous_mode = false;
    self.free_reqs.clear();
    for idx in 0..self.transfers.len() {
      self.free_reqs.push(idx).ok();
    }
    self.pending_reqs.clear();
    self.current_cmd = None;
    self.ready_reqs.clear();
    self.l2_pending = 0;
    self.pending_bytes.clear();
    self.generation = self.generation.wrapping_add(1);
    core.sched.cancel(&Event::Channel(self.id));
  }
}

//word handed over by a TX channel, consumed one byte at a time LSB first
#[derive(Debug, Default)]
pub struct PendingWord {
  word: u32,
  bytes: usize,
}

impl PendingWord {
  pub fn is_empty(&self) -> bool {
    self.bytes == 0
  }

  pub fn clear(&mut self) {
    self.word = 0;
    self.bytes = 0;
  }

  pub fn next_byte(&mut self, channel: &mut Channel, core: &mut UdmaCore) -> Option<u8> {
    if self.bytes == 0 {
      let req = channel.pop_ready_req()?;
      self.word = pack_word(&req.req.data);
      self.bytes = req.req.data.len();
      channel.handle_ready_req_end(req, core);
    }
    let byte = self.word as u8;
    self.word >>= 8;
    self.bytes -= 1;
    Some(byte)
  }
}
