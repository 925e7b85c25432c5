use log::{debug, trace, warn};
use crate::config::{PeriphKind, UdmaConfig};
use crate::error::{Error, Result};
use crate::kernel::{IoReq, IoReqStatus, Scheduler, WireMaster};
use crate::register::BitTwiddle;

pub mod queue;
pub mod transfer;
pub mod channel;
pub mod l2;
pub mod periph;
pub mod uart;
pub mod i2c;
pub mod cpi;
pub mod hyper;

use channel::Channel;
use l2::L2Port;
use periph::Periph;
use queue::Queue;

//global configuration block, right before the first peripheral
pub const CONF_CG_OFFSET: u64 = 0x00;
pub const CONF_EVTIN_OFFSET: u64 = 0x04;
pub const PERIPH_SIZE: u64 = 0x80;
//each peripheral gets a group of end-of-transfer event ids, one per channel slot
pub const EVENTS_PER_PERIPH: usize = 4;

pub fn periph_offset(id: usize) -> u64 {
  (id as u64 + 1) * PERIPH_SIZE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId {
  pub periph: usize,
  pub slot: usize,
}

impl ChannelId {
  pub fn new(periph: usize, slot: usize) -> Self {
    ChannelId { periph, slot }
  }
  pub fn event_id(&self) -> u32 {
    (self.periph * EVENTS_PER_PERIPH + self.slot) as u32
  }
}

//every source of clock events in the subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
  //services the channels waiting in the ready queues
  Service,
  L2Response,
  Channel(ChannelId),
  Periph(usize),
}

//the state shared by every channel and peripheral: the clock, the L2 port,
//the ready queues and the global registers
pub struct UdmaCore {
  pub(crate) sched: Scheduler<Event>,
  pub(crate) l2: L2Port,
  ready_rx_channels: Queue<ChannelId>,
  ready_tx_channels: Queue<ChannelId>,
  clock_gating: u32,
  evtin: u32,
  event_itf: WireMaster<u32>,
}

impl UdmaCore {
  fn new(config: &UdmaConfig) -> Self {
    let nb_channels = config.periphs.len() * periph::MAX_CHANNELS;
    UdmaCore {
      sched: Scheduler::new(),
      l2: L2Port::new(config),
      ready_rx_channels: Queue::new(nb_channels),
      ready_tx_channels: Queue::new(nb_channels),
      clock_gating: 0,
      evtin: 0,
      event_itf: WireMaster::new(),
    }
  }

  pub fn now(&self) -> u64 {
    self.sched.now()
  }

  pub fn enqueue_ready(&mut self, channel: ChannelId, is_tx: bool) {
    let queue = match is_tx {
      true => &mut self.ready_tx_channels,
      false => &mut self.ready_rx_channels,
    };
    if queue.push(channel).is_err() {
      warn!("ready queue full, dropping channel {:?}", channel);
      return;
    }
    if !self.sched.is_enqueued(&Event::Service) {
      self.sched.enqueue(Event::Service, 1);
    }
  }

  fn pop_ready(&mut self, is_tx: bool) -> Option<ChannelId> {
    match is_tx {
      true => self.ready_tx_channels.pop(),
      false => self.ready_rx_channels.pop(),
    }
  }

  fn has_ready(&self) -> bool {
    !self.ready_rx_channels.is_empty() || !self.ready_tx_channels.is_empty()
  }

  //peripheral tick on the next cycle, unless one is already on its way
  pub fn wake_periph(&mut self, id: usize) {
    let event = Event::Periph(id);
    if !self.sched.is_enqueued(&event) {
      self.sched.enqueue(event, 1);
    }
  }

  pub fn schedule_periph(&mut self, id: usize, delay: u64) {
    self.sched.enqueue(Event::Periph(id), delay);
  }

  pub fn push_l2_read_req(&mut self, req: channel::ChannelReq) {
    self.l2.push_read_req(req, &mut self.sched);
  }

  pub fn push_l2_write_req(&mut self, req: channel::ChannelReq) {
    self.l2.push_write_req(req, &mut self.sched);
  }

  pub fn trigger_event(&mut self, event: u32) {
    debug!("triggering event {}", event);
    let now = self.now();
    self.event_itf.sync(now, event);
  }

  fn reset(&mut self) {
    self.sched.clear();
    self.l2.clear();
    self.ready_rx_channels.clear();
    self.ready_tx_channels.clear();
    self.clock_gating = 0;
    self.evtin = 0;
  }
}

pub struct Udma {
  core: UdmaCore,
  periphs: Vec<Periph>,
}

impl Udma {
  pub fn new(config: &UdmaConfig) -> Result<Self> {
    config.validate()?;
    let periphs = config.periphs
                        .iter()
                        .enumerate()
                        .map(|(id, periph)| Periph::new(id, periph.kind, config))
                        .collect();
    Ok(Udma {
      core: UdmaCore::new(config),
      periphs,
    })
  }

  pub fn now(&self) -> u64 {
    self.core.now()
  }

  pub fn nb_periphs(&self) -> usize {
    self.periphs.len()
  }

  pub fn periph(&self, id: usize) -> Option<&Periph> {
    self.periphs.get(id)
  }

  pub fn periph_mut(&mut self, id: usize) -> Option<&mut Periph> {
    self.periphs.get_mut(id)
  }

  pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
    self.periphs.get(id.periph).and_then(|periph| periph.channel(id.slot))
  }

  pub fn clock_gating(&self) -> u32 {
    self.core.clock_gating
  }

  pub fn bind_event(&mut self, sink: Box<dyn FnMut(u64, u32)>) {
    self.core.event_itf.bind(sink);
  }

  //entry point for memory-mapped accesses, offsets are relative to the UDMA base
  pub fn req(&mut self, req: &mut IoReq) -> IoReqStatus {
    trace!("UDMA access (offset: {:#x}, size: {:#x}, is_write: {})", req.addr, req.size(), req.is_write);
    req.status = match self.access(req) {
      Ok(()) => IoReqStatus::Ok,
      Err(err) => {
        warn!("rejecting access: {}", err);
        IoReqStatus::Invalid
      },
    };
    req.status
  }

  fn access(&mut self, req: &mut IoReq) -> Result<()> {
    let offset = req.addr;
    if req.size() != 4 {
      return Err(Error::InvalidAccessSize { offset, size: req.size() });
    }
    if offset & 3 != 0 {
      return Err(Error::Misaligned { offset });
    }
    if offset < PERIPH_SIZE {
      return self.conf_req(req, offset);
    }
    let id = (offset / PERIPH_SIZE - 1) as usize;
    match self.periphs.get_mut(id) {
      Some(periph) => periph.req(req, offset - periph_offset(id), &mut self.core),
      None => Err(Error::Unmapped { offset }),
    }
  }

  fn conf_req(&mut self, req: &mut IoReq, offset: u64) -> Result<()> {
    match offset {
      CONF_CG_OFFSET => {
        if req.is_write {
          self.set_clock_gating(req.data_u32());
        } else {
          req.set_data_u32(self.core.clock_gating);
        }
      },
      CONF_EVTIN_OFFSET => {
        if req.is_write {
          self.core.evtin = req.data_u32();
        } else {
          req.set_data_u32(self.core.evtin);
        }
      },
      _ => return Err(Error::Unmapped { offset }),
    }
    Ok(())
  }

  fn set_clock_gating(&mut self, value: u32) {
    let previous = self.core.clock_gating;
    self.core.clock_gating = value;
    for (id, periph) in self.periphs.iter_mut().enumerate() {
      let is_on = value.nth_bit_bool(id as u32);
      if is_on != previous.nth_bit_bool(id as u32) {
        periph.clock_gate(is_on, &mut self.core);
      }
    }
  }

  pub fn write_reg(&mut self, offset: u64, value: u32) -> Result<()> {
    let mut req = IoReq::write_u32(offset, value);
    self.access(&mut req)
  }

  pub fn read_reg(&mut self, offset: u64) -> Result<u32> {
    let mut req = IoReq::read(offset, 4);
    self.access(&mut req)?;
    Ok(req.data_u32())
  }

  //reset pulse, everything in flight is dropped
  pub fn reset(&mut self) {
    debug!("reset");
    self.core.reset();
    for periph in self.periphs.iter_mut() {
      periph.reset(&mut self.core);
    }
  }

  pub fn load_l2(&mut self, addr: u64, data: &[u8]) -> Result<()> {
    self.core.l2.memory_mut().write(addr, data)
  }

  pub fn read_l2(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
    let mut data = vec![0; size];
    self.core.l2.memory().read(addr, &mut data)?;
    Ok(data)
  }

  //runs every event due up to and including `cycle`, then moves the clock there
  pub fn run_until(&mut self, cycle: u64) {
    while let Some(event) = self.core.sched.pop_due(cycle) {
      self.handle_event(event);
    }
    self.core.sched.advance_to(cycle);
  }

  pub fn run(&mut self, cycles: u64) {
    let target = self.now() + cycles;
    self.run_until(target);
  }

  //processes the next pending event, returns false when nothing is scheduled
  pub fn step(&mut self) -> bool {
    match self.core.sched.pop_due(u64::MAX) {
      Some(event) => {
        self.handle_event(event);
        true
      },
      None => false,
    }
  }

  //runs until no event is left, or gives up at `max_cycle`
  pub fn run_until_idle(&mut self, max_cycle: u64) -> bool {
    while let Some(next) = self.core.sched.next_cycle() {
      if next > max_cycle {
        self.core.sched.advance_to(max_cycle);
        return false;
      }
      self.step();
    }
    true
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Service => self.channel_handler(),
      Event::L2Response => self.l2_response(),
      Event::Channel(id) => {
        if let Some(periph) = self.periphs.get_mut(id.periph) {
          periph.channel_event(id.slot, &mut self.core);
        }
      },
      Event::Periph(id) => {
        if let Some(periph) = self.periphs.get_mut(id) {
          periph.tick(&mut self.core);
        }
      },
    }
  }

  //one RX and one TX channel are serviced per cycle, in admission order
  fn channel_handler(&mut self) {
    for &is_tx in &[false, true] {
      if let Some(id) = self.core.pop_ready(is_tx) {
        if let Some(periph) = self.periphs.get_mut(id.periph) {
          periph.handle_ready_reqs(id.slot, &mut self.core);
        }
      }
    }
    if self.core.has_ready() && !self.core.sched.is_enqueued(&Event::Service) {
      self.core.sched.enqueue(Event::Service, 1);
    }
  }

  fn l2_response(&mut self) {
    let now = self.now();
    while let Some(req) = self.core.l2.pop_response(now) {
      let id = req.channel;
      match self.periphs.get_mut(id.periph).and_then(|periph| periph.channel_mut(id.slot)) {
        Some(channel) => channel.push_ready_req(req, &mut self.core),
        None => warn!("L2 response for unknown channel {:?}", id),
      }
    }
    self.core.l2.reschedule(&mut self.core.sched);
  }

  fn periph_kind_mut(&mut self, id: usize, expected: PeriphKind) -> Result<&mut Periph> {
    let periph = self.periphs.get_mut(id).ok_or(Error::NoSuchPeriph(id))?;
    if periph.kind() != expected {
      return Err(Error::WrongPeriphKind { id, expected: expected.name() });
    }
    Ok(periph)
  }

  pub fn uart_mut(&mut self, id: usize) -> Result<&mut uart::Uart> {
    let periph = self.periph_kind_mut(id, PeriphKind::Uart)?;
    periph.uart_mut().ok_or(Error::WrongPeriphKind { id, expected: "uart" })
  }

  pub fn i2c_mut(&mut self, id: usize) -> Result<&mut i2c::I2c> {
    let periph = self.periph_kind_mut(id, PeriphKind::I2c)?;
    periph.i2c_mut().ok_or(Error::WrongPeriphKind { id, expected: "i2c" })
  }

  pub fn hyper_mut(&mut self, id: usize) -> Result<&mut hyper::Hyper> {
    let periph = self.periph_kind_mut(id, PeriphKind::Hyper)?;
    periph.hyper_mut().ok_or(Error::WrongPeriphKind { id, expected: "hyper" })
  }

  //one UART RX bit period with the line at `bit`
  pub fn uart_rx_sync(&mut self, id: usize, bit: u8) -> Result<()> {
    self.periph_kind_mut(id, PeriphKind::Uart)?;
    self.periphs[id].uart_rx_sync(bit, &mut self.core);
    Ok(())
  }

  pub fn cpi_sync(&mut self, id: usize, pclk: bool, href: bool, vsync: bool, data: u8) -> Result<()> {
    self.periph_kind_mut(id, PeriphKind::Cpi)?;
    self.periphs[id].cpi_sync(pclk, href, vsync, data, &mut self.core);
    Ok(())
  }
}

#[cfg(test)]
mod tests;
