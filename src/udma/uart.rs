use log::{debug, trace, warn};
use crate::error::{Error, Result};
use crate::kernel::{IoReq, WireMaster};
use crate::register::{Bit, BitTwiddle};
use super::channel::{Channel, PendingWord};
use super::periph::{RX_CHANNEL, TX_CHANNEL};
use super::UdmaCore;

//offsets inside the custom window
pub const STATUS_OFFSET: u64 = 0x00;
pub const SETUP_OFFSET: u64 = 0x04;

pub const SETUP_PARITY_EN_BIT: u32 = 0;
pub const SETUP_STOP_BITS_BIT: u32 = 3;
pub const SETUP_ODD_PARITY_BIT: u32 = 4;
pub const SETUP_TX_EN_BIT: u32 = 8;
pub const SETUP_RX_EN_BIT: u32 = 9;
//8 data bits, TX and RX enabled, divider 0
pub const SETUP_RESET: u32 = 0x0306;

pub const STATUS_TX_BUSY_BIT: u32 = 0;
pub const STATUS_RX_BUSY_BIT: u32 = 1;
pub const STATUS_PARITY_ERR_BIT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
  Idle,
  Start,
  Data,
  Parity,
  Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
  WaitStart,
  Data,
  Parity,
  WaitStop,
}

pub struct Uart {
  id: usize,
  setup: u32,

  tx_state: TxState,
  tx_byte: u8,
  tx_bit: u32,
  tx_parity: u8,
  tx_stop_bits: u32,
  tx_pending: PendingWord,
  tx_itf: WireMaster<u8>,

  rx_state: RxState,
  rx_byte: u8,
  rx_bit: u32,
  rx_parity: u8,
  rx_parity_ok: bool,
  rx_stop_bits: u32,
  parity_error: bool,
}

impl Uart {
  pub fn new(id: usize) -> Self {
    Uart {
      id,
      setup: SETUP_RESET,
      tx_state: TxState::Idle,
      tx_byte: 0,
      tx_bit: 0,
      tx_parity: 0,
      tx_stop_bits: 0,
      tx_pending: PendingWord::default(),
      tx_itf: WireMaster::new(),
      rx_state: RxState::WaitStart,
      rx_byte: 0,
      rx_bit: 0,
      rx_parity: 0,
      rx_parity_ok: true,
      rx_stop_bits: 0,
      parity_error: false,
    }
  }

  //TX line, one sample per bit at the start of its period
  pub fn bind_tx(&mut self, sink: Box<dyn FnMut(u64, u8)>) {
    self.tx_itf.bind(sink);
  }

  pub fn setup(&self) -> u32 {
    self.setup
  }

  pub fn parity_enabled(&self) -> bool {
    self.setup.nth_bit_bool(SETUP_PARITY_EN_BIT)
  }

  pub fn data_bits(&self) -> u32 {
    5 + self.setup.range(1, 2)
  }

  pub fn stop_bits(&self) -> u32 {
    1 + self.setup.nth_bit(SETUP_STOP_BITS_BIT)
  }

  pub fn odd_parity(&self) -> bool {
    self.setup.nth_bit_bool(SETUP_ODD_PARITY_BIT)
  }

  pub fn tx_enabled(&self) -> bool {
    self.setup.nth_bit_bool(SETUP_TX_EN_BIT)
  }

  pub fn rx_enabled(&self) -> bool {
    self.setup.nth_bit_bool(SETUP_RX_EN_BIT)
  }

  //cycles per bit
  pub fn period(&self) -> u64 {
    self.setup.range(16, 31) as u64 + 1
  }

  pub fn is_tx_busy(&self) -> bool {
    self.tx_state != TxState::Idle
  }

  pub fn is_rx_busy(&self) -> bool {
    self.rx_state != RxState::WaitStart
  }

  pub fn custom_req(&mut self, req: &mut IoReq, offset: u64, core: &mut UdmaCore) -> Result<()> {
    match (offset, req.is_write) {
      (STATUS_OFFSET, false) => {
        let value = self.is_tx_busy().bit(STATUS_TX_BUSY_BIT) |
          self.is_rx_busy().bit(STATUS_RX_BUSY_BIT) |
          self.parity_error.bit(STATUS_PARITY_ERR_BIT);
        self.parity_error = false;
        req.set_data_u32(value);
      },
      (STATUS_OFFSET, true) => {
        trace!("uart {}: ignoring write to STATUS", self.id);
      },
      (SETUP_OFFSET, true) => {
        self.setup = req.data_u32();
        debug!("uart {}: setup {:#x} ({} data bits, parity {}, {} stop bits, period {})",
               self.id, self.setup, self.data_bits(), self.parity_enabled(), self.stop_bits(), self.period());
        if self.tx_enabled() {
          core.wake_periph(self.id);
        }
      },
      (SETUP_OFFSET, false) => req.set_data_u32(self.setup),
      _ => return Err(Error::Unmapped { offset }),
    }
    Ok(())
  }

  //emits the next TX bit and schedules the following one a bit period later
  pub fn tick(&mut self, channels: &mut [Channel], core: &mut UdmaCore) {
    if !self.tx_enabled() {
      return;
    }
    if self.tx_state == TxState::Idle {
      let channel = match channels.get_mut(TX_CHANNEL) {
        Some(channel) => channel,
        None => return,
      };
      match self.tx_pending.next_byte(channel, core) {
        Some(byte) => {
          trace!("uart {}: sending {:#04x}", self.id, byte);
          self.tx_byte = byte;
          self.tx_bit = 0;
          self.tx_parity = 0;
          self.tx_stop_bits = self.stop_bits();
          self.tx_state = TxState::Start;
        },
        None => return,
      }
    }
    let bit = match self.tx_state {
      TxState::Idle => return,
      TxState::Start => {
        self.tx_state = TxState::Data;
        0
      },
      TxState::Data => {
        let bit = (self.tx_byte >> self.tx_bit) & 1;
        self.tx_parity ^= bit;
        self.tx_bit += 1;
        if self.tx_bit == self.data_bits() {
          self.tx_state = if self.parity_enabled() { TxState::Parity } else { TxState::Stop };
        }
        bit
      },
      TxState::Parity => {
        self.tx_state = TxState::Stop;
        self.tx_parity ^ self.odd_parity() as u8
      },
      TxState::Stop => {
        self.tx_stop_bits -= 1;
        if self.tx_stop_bits == 0 {
          self.tx_state = TxState::Idle;
        }
        1
      },
    };
    self.tx_itf.sync(core.now(), bit);
    core.schedule_periph(self.id, self.period());
  }

  //one RX bit period with the line at `bit`
  pub fn rx_sync(&mut self, bit: u8, channels: &mut [Channel], core: &mut UdmaCore) {
    if !self.rx_enabled() {
      return;
    }
    let bit = bit & 1;
    match self.rx_state {
      RxState::WaitStart => {
        if bit == 0 {
          self.rx_byte = 0;
          self.rx_bit = 0;
          self.rx_parity = 0;
          self.rx_parity_ok = true;
          self.rx_state = RxState::Data;
        }
      },
      RxState::Data => {
        self.rx_byte |= bit << self.rx_bit;
        self.rx_parity ^= bit;
        self.rx_bit += 1;
        if self.rx_bit == self.data_bits() {
          self.rx_stop_bits = self.stop_bits();
          self.rx_state = if self.parity_enabled() { RxState::Parity } else { RxState::WaitStop };
        }
      },
      RxState::Parity => {
        self.rx_parity_ok = bit == self.rx_parity ^ self.odd_parity() as u8;
        self.rx_state = RxState::WaitStop;
      },
      RxState::WaitStop => {
        if bit == 0 {
          trace!("uart {}: framing error, dropping {:#04x}", self.id, self.rx_byte);
          self.rx_state = RxState::WaitStart;
          return;
        }
        self.rx_stop_bits -= 1;
        if self.rx_stop_bits > 0 {
          return;
        }
        self.rx_state = RxState::WaitStart;
        if !self.rx_parity_ok {
          warn!("uart {}: parity error, dropping {:#04x}", self.id, self.rx_byte);
          self.parity_error = true;
          return;
        }
        trace!("uart {}: received {:#04x}", self.id, self.rx_byte);
        if let Some(channel) = channels.get_mut(RX_CHANNEL) {
          channel.push_data(&[self.rx_byte], core);
        }
      },
    }
  }

  //the byte on the line finishes, what is left of its word is dropped
  pub fn channel_cleared(&mut self, slot: usize) {
    if slot == TX_CHANNEL {
      self.tx_pending.clear();
    }
  }

  pub fn reset(&mut self) {
    self.setup = SETUP_RESET;
    self.tx_state = TxState::Idle;
    self.tx_pending.clear();
    self.rx_state = RxState::WaitStart;
    self.parity_error = false;
  }
}

//decodes a sampled TX line back into bytes, one sample per bit period
pub fn decode_line(samples: &[(u64, u8)], data_bits: u32, parity: bool) -> Vec<(u64, u8)> {
  let mut bytes = vec![];
  let mut idx = 0;
  while idx < samples.len() {
    let (cycle, bit) = samples[idx];
    let frame_end = idx + 1 + data_bits as usize + parity as usize;
    if bit != 0 || frame_end >= samples.len() {
      idx += 1;
      continue;
    }
    let byte = samples[idx + 1..idx + 1 + data_bits as usize]
      .iter()
      .enumerate()
      .fold(0, |byte, (n, &(_, bit))| byte | bit << n);
    bytes.push((cycle, byte));
    idx = frame_end + 1;
  }
  bytes
}
