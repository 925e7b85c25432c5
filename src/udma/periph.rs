use arrayvec::ArrayVec;
use log::{debug, trace};
use crate::config::{PeriphKind, UdmaConfig};
use crate::error::{Error, Result};
use crate::kernel::IoReq;
use crate::register::BitTwiddle;
use super::channel::{Channel, Direction, CFG_CLR_BIT, CFG_OFFSET, CHANNEL_SIZE};
use super::cpi::Cpi;
use super::hyper::Hyper;
use super::i2c::I2c;
use super::uart::Uart;
use super::{ChannelId, UdmaCore};

pub const MAX_CHANNELS: usize = 3;
pub const RX_CHANNEL: usize = 0;
pub const TX_CHANNEL: usize = 1;
//protocol registers start right after the channel windows
pub const CUSTOM_OFFSET: u64 = 0x20;

pub enum Protocol {
  Uart(Uart),
  I2c(I2c),
  Cpi(Cpi),
  Hyper(Hyper),
}

//a protocol block together with the channels it moves data through
pub struct Periph {
  id: usize,
  kind: PeriphKind,
  is_on: bool,
  channels: ArrayVec<Channel, MAX_CHANNELS>,
  protocol: Protocol,
}

impl Periph {
  pub fn new(id: usize, kind: PeriphKind, config: &UdmaConfig) -> Self {
    let index = config.periphs[..id].iter().filter(|periph| periph.kind == kind).count();
    let prefix = format!("{}{}", kind.name(), index);
    let mut channels = ArrayVec::new();
    channels.push(Channel::new(ChannelId::new(id, RX_CHANNEL), Direction::Rx, format!("{}_rx", prefix), config));
    //the camera interface only ever receives
    if kind != PeriphKind::Cpi {
      channels.push(Channel::new(ChannelId::new(id, TX_CHANNEL), Direction::Tx, format!("{}_tx", prefix), config));
    }
    let protocol = match kind {
      PeriphKind::Uart => Protocol::Uart(Uart::new(id)),
      PeriphKind::I2c => Protocol::I2c(I2c::new(id)),
      PeriphKind::Cpi => Protocol::Cpi(Cpi::new(id)),
      PeriphKind::Hyper => Protocol::Hyper(Hyper::new(id, config)),
    };
    Periph {
      id,
      kind,
      is_on: false,
      channels,
      protocol,
    }
  }

  pub fn id(&self) -> usize {
    self.id
  }

  pub fn kind(&self) -> PeriphKind {
    self.kind
  }

  pub fn is_on(&self) -> bool {
    self.is_on
  }

  pub fn nb_channels(&self) -> usize {
    self.channels.len()
  }

  pub fn channel(&self, slot: usize) -> Option<&Channel> {
    self.channels.get(slot)
  }

  pub fn channel_mut(&mut self, slot: usize) -> Option<&mut Channel> {
    self.channels.get_mut(slot)
  }

  pub fn req(&mut self, req: &mut IoReq, offset: u64, core: &mut UdmaCore) -> Result<()> {
    if offset < CUSTOM_OFFSET {
      let slot = (offset / CHANNEL_SIZE) as usize;
      let channel = self.channels.get_mut(slot).ok_or(Error::Unmapped { offset })?;
      let channel_offset = offset % CHANNEL_SIZE;
      let armed = channel.req(req, channel_offset, core)?;
      if armed {
        let size = channel.size_reg();
        if let Protocol::Hyper(hyper) = &mut self.protocol {
          hyper.transfer_armed(slot, size, core);
        }
      }
      let cleared = req.is_write && channel_offset == CFG_OFFSET && req.data_u32().nth_bit_bool(CFG_CLR_BIT);
      if cleared {
        self.channel_cleared(slot, core);
      }
      return Ok(());
    }
    let custom = offset - CUSTOM_OFFSET;
    let result = match &mut self.protocol {
      Protocol::Uart(uart) => uart.custom_req(req, custom, core),
      Protocol::I2c(i2c) => i2c.custom_req(req, custom),
      Protocol::Cpi(cpi) => cpi.custom_req(req, custom),
      Protocol::Hyper(hyper) => hyper.custom_req(req, custom),
    };
    //report the offset inside the peripheral, not inside its custom window
    result.map_err(|err| match err {
      Error::Unmapped { .. } => Error::Unmapped { offset },
      err => err,
    })
  }

  //whatever the protocol still holds from the cleared channel goes too
  fn channel_cleared(&mut self, slot: usize, core: &mut UdmaCore) {
    match &mut self.protocol {
      Protocol::Uart(uart) => uart.channel_cleared(slot),
      Protocol::I2c(i2c) => i2c.channel_cleared(slot),
      Protocol::Hyper(hyper) => hyper.channel_cleared(slot, core),
      Protocol::Cpi(_) => {},
    }
  }

  //gating freezes the protocol state machines, registers stay accessible
  pub fn clock_gate(&mut self, is_on: bool, core: &mut UdmaCore) {
    debug!("periph {} ({}) clock {}", self.id, self.kind.name(), if is_on { "on" } else { "off" });
    self.is_on = is_on;
    if is_on {
      core.wake_periph(self.id);
    }
  }

  pub fn reset(&mut self, core: &mut UdmaCore) {
    self.is_on = false;
    for channel in self.channels.iter_mut() {
      channel.reset(core);
      //the ready queues were flushed along with the rest of the core
      channel.in_ready_queue = false;
    }
    match &mut self.protocol {
      Protocol::Uart(uart) => uart.reset(),
      Protocol::I2c(i2c) => i2c.reset(),
      Protocol::Cpi(cpi) => cpi.reset(),
      Protocol::Hyper(hyper) => hyper.reset(),
    }
  }

  pub fn channel_event(&mut self, slot: usize, core: &mut UdmaCore) {
    if let Some(channel) = self.channels.get_mut(slot) {
      channel.event_handler(core);
    }
  }

  pub fn tick(&mut self, core: &mut UdmaCore) {
    if !self.is_on {
      trace!("periph {} is clock gated", self.id);
      return;
    }
    match &mut self.protocol {
      Protocol::Uart(uart) => uart.tick(&mut self.channels, core),
      Protocol::I2c(i2c) => i2c.tick(&mut self.channels, core),
      Protocol::Hyper(hyper) => hyper.tick(&mut self.channels, core),
      Protocol::Cpi(_) => {},
    }
  }

  //called by the service event for a channel that has memory responses waiting
  pub fn handle_ready_reqs(&mut self, slot: usize, core: &mut UdmaCore) {
    let channel = match self.channels.get_mut(slot) {
      Some(channel) => channel,
      None => return,
    };
    channel.in_ready_queue = false;
    if !channel.is_tx() {
      channel.handle_ready_reqs(core);
      return;
    }
    //TX data is consumed by the protocol at its own pace
    match self.protocol {
      Protocol::Cpi(_) => {},
      _ => core.wake_periph(self.id),
    }
  }

  pub fn uart_rx_sync(&mut self, bit: u8, core: &mut UdmaCore) {
    if !self.is_on {
      trace!("periph {} is clock gated, ignoring RX bit", self.id);
      return;
    }
    if let Protocol::Uart(uart) = &mut self.protocol {
      uart.rx_sync(bit, &mut self.channels, core);
    }
  }

  pub fn cpi_sync(&mut self, pclk: bool, href: bool, vsync: bool, data: u8, core: &mut UdmaCore) {
    if !self.is_on {
      return;
    }
    if let Protocol::Cpi(cpi) = &mut self.protocol {
      cpi.sync(pclk, href, vsync, data, &mut self.channels, core);
    }
  }

  pub fn uart_mut(&mut self) -> Option<&mut Uart> {
    match &mut self.protocol {
      Protocol::Uart(uart) => Some(uart),
      _ => None,
    }
  }

  pub fn i2c_mut(&mut self) -> Option<&mut I2c> {
    match &mut self.protocol {
      Protocol::I2c(i2c) => Some(i2c),
      _ => None,
    }
  }

  pub fn hyper_mut(&mut self) -> Option<&mut Hyper> {
    match &mut self.protocol {
      Protocol::Hyper(hyper) => Some(hyper),
      _ => None,
    }
  }
}
