use std::cell::RefCell;
use std::rc::Rc;
use log::{debug, trace, warn};
use crate::error::{Error, Result};
use crate::kernel::{IoReq, WireMaster};
use crate::register::{Bit, BitTwiddle};
use super::channel::{Channel, PendingWord};
use super::periph::{RX_CHANNEL, TX_CHANNEL};
use super::UdmaCore;

pub const STATUS_OFFSET: u64 = 0x00;
pub const SETUP_OFFSET: u64 = 0x04;
pub const CLKDIV_OFFSET: u64 = 0x08;

pub const STATUS_BUSY_BIT: u32 = 0;
pub const STATUS_NACK_BIT: u32 = 1;
pub const SETUP_RESET_BIT: u32 = 0;

pub const CMD_START: u8 = 0x00;
pub const CMD_STOP: u8 = 0x20;
pub const CMD_RD_ACK: u8 = 0x40;
pub const CMD_RD_NACK: u8 = 0x60;
pub const CMD_WR: u8 = 0x80;
pub const CMD_WAIT: u8 = 0xa0;
pub const CMD_RPT: u8 = 0xc0;
pub const CMD_CFG: u8 = 0xe0;

//bus levels as seen after the wired-AND with the slave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cLines {
  pub scl: bool,
  pub sda: bool,
}

//a device on the bus. it sees every sample the master drives and answers with
//the SDA level it drives itself, true when it releases the line
pub trait I2cSlave {
  fn sync(&mut self, cycle: u64, scl: bool, sda: bool) -> bool;
}

impl<D: I2cSlave> I2cSlave for Rc<RefCell<D>> {
  fn sync(&mut self, cycle: u64, scl: bool, sda: bool) -> bool {
    self.borrow_mut().sync(cycle, scl, sda)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  WaitCmd,
  WaitCfg,
  WaitWrData,
  WaitRpt,
  WaitRptCmd,
  Start0,
  Start1,
  Wr0,
  Wr1,
  Rd0,
  Rd1,
  Stop0,
  Stop1,
  Stop2,
}

enum Step {
  //a bus sample went out, the next one is half a period away
  Emitted,
  Continue,
  //waiting on the command stream
  Stall,
}

pub struct I2c {
  id: usize,
  clkdiv: u32,
  state: State,
  nack: bool,

  pending: PendingWord,
  //data bits left to clock out, plus the ack bit
  pending_value: u8,
  pending_value_bits: u32,
  rd_value: u8,
  rd_bits: u32,
  rd_ack: bool,

  repeat_count: u8,
  repeat_command: u8,
  cfg_msb: Option<u8>,

  slave: Option<Box<dyn I2cSlave>>,
  lines_itf: WireMaster<I2cLines>,
}

impl I2c {
  pub fn new(id: usize) -> Self {
    I2c {
      id,
      clkdiv: 0,
      state: State::WaitCmd,
      nack: false,
      pending: PendingWord::default(),
      pending_value: 0,
      pending_value_bits: 0,
      rd_value: 0,
      rd_bits: 0,
      rd_ack: true,
      repeat_count: 0,
      repeat_command: 0,
      cfg_msb: None,
      slave: None,
      lines_itf: WireMaster::new(),
    }
  }

  pub fn bind_slave(&mut self, slave: Box<dyn I2cSlave>) {
    self.slave = Some(slave);
  }

  pub fn bind_lines(&mut self, sink: Box<dyn FnMut(u64, I2cLines)>) {
    self.lines_itf.bind(sink);
  }

  pub fn clkdiv(&self) -> u32 {
    self.clkdiv
  }

  pub fn half_period(&self) -> u64 {
    self.clkdiv as u64 + 1
  }

  pub fn is_busy(&self) -> bool {
    self.state != State::WaitCmd || self.repeat_count > 0
  }

  pub fn nack(&self) -> bool {
    self.nack
  }

  pub fn custom_req(&mut self, req: &mut IoReq, offset: u64) -> Result<()> {
    match (offset, req.is_write) {
      (STATUS_OFFSET, false) => {
        req.set_data_u32(self.is_busy().bit(STATUS_BUSY_BIT) | self.nack.bit(STATUS_NACK_BIT));
      },
      (STATUS_OFFSET, true) => {},
      (SETUP_OFFSET, true) => {
        if req.data_u32().nth_bit_bool(SETUP_RESET_BIT) {
          debug!("i2c {}: soft reset", self.id);
          self.reset_state();
        }
      },
      (SETUP_OFFSET, false) => req.set_data_u32(0),
      (CLKDIV_OFFSET, true) => self.clkdiv = req.data_u32().lowest_bits(16),
      (CLKDIV_OFFSET, false) => req.set_data_u32(self.clkdiv),
      _ => return Err(Error::Unmapped { offset }),
    }
    Ok(())
  }

  pub fn tick(&mut self, channels: &mut [Channel], core: &mut UdmaCore) {
    loop {
      match self.step(channels, core) {
        Step::Emitted => {
          core.schedule_periph(self.id, self.half_period());
          return;
        },
        Step::Continue => {},
        Step::Stall => return,
      }
    }
  }

  fn next_byte(&mut self, channels: &mut [Channel], core: &mut UdmaCore) -> Option<u8> {
    let channel = channels.get_mut(TX_CHANNEL)?;
    self.pending.next_byte(channel, core)
  }

  //drives one (scl, sda) sample and returns the resulting SDA level
  fn emit(&mut self, scl: bool, sda: bool, core: &mut UdmaCore) -> bool {
    let cycle = core.now();
    let slave_sda = match self.slave.as_mut() {
      Some(slave) => slave.sync(cycle, scl, sda),
      None => true,
    };
    let sda = sda && slave_sda;
    trace!("i2c {}: scl {} sda {}", self.id, scl as u8, sda as u8);
    self.lines_itf.sync(cycle, I2cLines { scl, sda });
    sda
  }

  fn step(&mut self, channels: &mut [Channel], core: &mut UdmaCore) -> Step {
    match self.state {
      State::WaitCmd => {
        let cmd = if self.repeat_count > 0 {
          self.repeat_count -= 1;
          self.repeat_command
        } else {
          match self.next_byte(channels, core) {
            Some(cmd) => cmd,
            None => return Step::Stall,
          }
        };
        self.decode(cmd);
        Step::Continue
      },
      State::WaitCfg => {
        let byte = match self.next_byte(channels, core) {
          Some(byte) => byte,
          None => return Step::Stall,
        };
        match self.cfg_msb.take() {
          None => self.cfg_msb = Some(byte),
          Some(msb) => {
            self.clkdiv = (msb as u32) << 8 | byte as u32;
            debug!("i2c {}: clkdiv {:#x}", self.id, self.clkdiv);
            self.state = State::WaitCmd;
          },
        }
        Step::Continue
      },
      State::WaitWrData => {
        let byte = match self.next_byte(channels, core) {
          Some(byte) => byte,
          None => return Step::Stall,
        };
        self.pending_value = byte;
        self.pending_value_bits = 9;
        self.state = State::Wr0;
        Step::Continue
      },
      State::WaitRpt => {
        let count = match self.next_byte(channels, core) {
          Some(count) => count,
          None => return Step::Stall,
        };
        self.repeat_count = count;
        self.state = State::WaitRptCmd;
        Step::Continue
      },
      State::WaitRptCmd => {
        let cmd = match self.next_byte(channels, core) {
          Some(cmd) => cmd,
          None => return Step::Stall,
        };
        self.repeat_command = cmd;
        self.state = State::WaitCmd;
        Step::Continue
      },
      State::Start0 => {
        self.emit(true, true, core);
        self.state = State::Start1;
        Step::Emitted
      },
      State::Start1 => {
        self.emit(true, false, core);
        self.state = State::WaitCmd;
        Step::Emitted
      },
      State::Wr0 => {
        let bit = self.wr_bit();
        self.emit(false, bit, core);
        self.state = State::Wr1;
        Step::Emitted
      },
      State::Wr1 => {
        let bit = self.wr_bit();
        let sda = self.emit(true, bit, core);
        if self.pending_value_bits == 1 {
          self.nack = sda;
          if self.nack {
            warn!("i2c {}: no ack for {:#04x}", self.id, self.pending_value);
          }
          self.state = State::WaitCmd;
        } else {
          self.pending_value_bits -= 1;
          self.state = State::Wr0;
        }
        Step::Emitted
      },
      State::Rd0 => {
        let bit = self.rd_bit();
        self.emit(false, bit, core);
        self.state = State::Rd1;
        Step::Emitted
      },
      State::Rd1 => {
        let bit = self.rd_bit();
        let sda = self.emit(true, bit, core);
        if self.rd_bits > 1 {
          self.rd_value = self.rd_value << 1 | sda as u8;
          self.rd_bits -= 1;
          if self.rd_bits == 1 {
            trace!("i2c {}: read {:#04x}", self.id, self.rd_value);
            if let Some(channel) = channels.get_mut(RX_CHANNEL) {
              channel.push_data(&[self.rd_value], core);
            }
          }
          self.state = State::Rd0;
        } else {
          self.state = State::WaitCmd;
        }
        Step::Emitted
      },
      State::Stop0 => {
        self.emit(false, false, core);
        self.state = State::Stop1;
        Step::Emitted
      },
      State::Stop1 => {
        self.emit(true, false, core);
        self.state = State::Stop2;
        Step::Emitted
      },
      State::Stop2 => {
        self.emit(true, true, core);
        self.state = State::WaitCmd;
        Step::Emitted
      },
    }
  }

  //MSB first, then the line is released for the slave's ack
  fn wr_bit(&self) -> bool {
    match self.pending_value_bits {
      0 | 1 => true,
      bits => (self.pending_value >> (bits - 2)) & 1 != 0,
    }
  }

  //released while sampling data, then our own ack level
  fn rd_bit(&self) -> bool {
    match self.rd_bits {
      0 | 1 => !self.rd_ack,
      _ => true,
    }
  }

  fn decode(&mut self, cmd: u8) {
    trace!("i2c {}: command {:#04x}", self.id, cmd);
    self.state = match cmd {
      CMD_START => State::Start0,
      CMD_STOP => State::Stop0,
      CMD_RD_ACK | CMD_RD_NACK => {
        self.rd_value = 0;
        self.rd_bits = 9;
        self.rd_ack = cmd == CMD_RD_ACK;
        State::Rd0
      },
      CMD_WR => State::WaitWrData,
      CMD_RPT => State::WaitRpt,
      CMD_CFG => {
        self.cfg_msb = None;
        State::WaitCfg
      },
      _ => {
        trace!("i2c {}: discarding command {:#04x}", self.id, cmd);
        State::WaitCmd
      },
    };
  }

  //the command stream was cleared, bytes still owed to a command will not come
  pub fn channel_cleared(&mut self, slot: usize) {
    if slot != TX_CHANNEL {
      return;
    }
    self.pending.clear();
    self.repeat_count = 0;
    self.cfg_msb = None;
    match self.state {
      State::WaitCfg | State::WaitWrData | State::WaitRpt | State::WaitRptCmd => {
        debug!("i2c {}: command stream cleared mid command", self.id);
        self.state = State::WaitCmd;
      },
      _ => {},
    }
  }

  fn reset_state(&mut self) {
    self.state = State::WaitCmd;
    self.nack = false;
    self.pending.clear();
    self.pending_value_bits = 0;
    self.rd_bits = 0;
    self.repeat_count = 0;
    self.cfg_msb = None;
  }

  pub fn reset(&mut self) {
    self.clkdiv = 0;
    self.reset_state();
  }
}
