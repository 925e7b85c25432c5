use log::{debug, trace};
use crate::error::{Error, Result};
use crate::kernel::IoReq;
use crate::register::BitTwiddle;
use super::channel::Channel;
use super::periph::RX_CHANNEL;
use super::UdmaCore;

pub const GLOB_OFFSET: u64 = 0x00;
pub const LL_OFFSET: u64 = 0x04;
pub const UR_OFFSET: u64 = 0x08;
pub const SIZE_OFFSET: u64 = 0x0c;
pub const FILTER_OFFSET: u64 = 0x10;

pub const GLOB_FRAMEDROP_EN_BIT: u32 = 0;
pub const GLOB_FRAMESLICE_EN_BIT: u32 = 7;
pub const GLOB_EN_BIT: u32 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
  Rgb565,
  Rgb555,
  Rgb444,
  BypassLitEnd,
  BypassBigEnd,
}

impl Format {
  fn from_bits(bits: u32) -> Self {
    match bits {
      0 => Format::Rgb565,
      1 => Format::Rgb555,
      2 => Format::Rgb444,
      5 => Format::BypassBigEnd,
      _ => Format::BypassLitEnd,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Regs {
  glob: u32,
  ll: u32,
  ur: u32,
  size: u32,
  filter: u32,
}

impl Regs {
  fn enabled(&self) -> bool {
    self.glob.nth_bit_bool(GLOB_EN_BIT)
  }

  fn framedrop(&self) -> Option<u32> {
    match self.glob.nth_bit_bool(GLOB_FRAMEDROP_EN_BIT) {
      true => Some(self.glob.range(1, 6).max(1)),
      false => None,
    }
  }

  fn slice_enabled(&self) -> bool {
    self.glob.nth_bit_bool(GLOB_FRAMESLICE_EN_BIT)
  }

  fn format(&self) -> Format {
    Format::from_bits(self.glob.range(8, 10))
  }

  fn shift(&self) -> u32 {
    self.glob.range(11, 14)
  }

  fn row_len(&self) -> u32 {
    self.size.lowest_bits(16) + 1
  }

  fn in_slice(&self, x: u32, y: u32) -> bool {
    let (llx, lly) = (self.ll.lowest_bits(16), self.ll.range(16, 31));
    let (urx, ury) = (self.ur.lowest_bits(16), self.ur.range(16, 31));
    (llx..=urx).contains(&x) && (lly..=ury).contains(&y)
  }

  fn convert(&self, pixel: u16) -> u16 {
    let pixel = pixel as u32;
    let (r, g, b) = match self.format() {
      Format::Rgb565 => (pixel.range(11, 15), pixel.range(5, 10), pixel.range(0, 4)),
      Format::Rgb555 => (pixel.range(10, 14), pixel.range(5, 9), pixel.range(0, 4)),
      Format::Rgb444 => (pixel.range(8, 11), pixel.range(4, 7), pixel.range(0, 3)),
      Format::BypassLitEnd | Format::BypassBigEnd => return pixel as u16,
    };
    let gray = r * self.filter.range(16, 23) + g * self.filter.range(8, 15) + b * self.filter.range(0, 7);
    (gray >> self.shift()) as u16
  }
}

//camera parallel interface, a pixel pipeline fed by sampled sync signals
pub struct Cpi {
  id: usize,
  //latest register writes, only applied at the next vsync
  written: Regs,
  active: Regs,
  dirty: bool,

  last_pclk: bool,
  last_vsync: bool,
  last_href: bool,
  in_frame: bool,
  drop_frame: bool,
  frame_count: u32,
  current_line: u32,
  current_row: u32,
  high_byte: Option<u8>,
}

impl Cpi {
  pub fn new(id: usize) -> Self {
    Cpi {
      id,
      written: Regs::default(),
      active: Regs::default(),
      dirty: false,
      last_pclk: false,
      last_vsync: false,
      last_href: false,
      in_frame: false,
      drop_frame: false,
      frame_count: 0,
      current_line: 0,
      current_row: 0,
      high_byte: None,
    }
  }

  pub fn custom_req(&mut self, req: &mut IoReq, offset: u64) -> Result<()> {
    let reg = match offset {
      GLOB_OFFSET => &mut self.written.glob,
      LL_OFFSET => &mut self.written.ll,
      UR_OFFSET => &mut self.written.ur,
      SIZE_OFFSET => &mut self.written.size,
      FILTER_OFFSET => &mut self.written.filter,
      _ => return Err(Error::Unmapped { offset }),
    };
    if req.is_write {
      *reg = req.data_u32();
      self.dirty = true;
    } else {
      req.set_data_u32(*reg);
    }
    Ok(())
  }

  pub fn frame_count(&self) -> u32 {
    self.frame_count
  }

  pub fn sync(&mut self, pclk: bool, href: bool, vsync: bool, data: u8, channels: &mut [Channel], core: &mut UdmaCore) {
    let rising = pclk && !self.last_pclk;
    self.last_pclk = pclk;
    if !rising {
      return;
    }
    let vsync_rising = vsync && !self.last_vsync;
    self.last_vsync = vsync;
    let href_falling = !href && self.last_href;
    self.last_href = href;
    //a line never carries half a pixel into the next one
    if href_falling {
      if let Some(byte) = self.high_byte.take() {
        trace!("cpi {}: line {} ended on a lone byte {:#04x}", self.id, self.current_line, byte);
      }
    }
    if vsync_rising {
      self.start_frame();
      return;
    }
    if !href || !self.in_frame || !self.active.enabled() {
      return;
    }
    let high = match self.high_byte.take() {
      Some(high) => high,
      None => {
        self.high_byte = Some(data);
        return;
      },
    };
    let pixel = (high as u16) << 8 | data as u16;
    self.push_pixel(pixel, channels, core);
  }

  fn start_frame(&mut self) {
    if self.dirty {
      let was_enabled = self.active.enabled();
      self.active = self.written;
      self.dirty = false;
      if self.active.enabled() && !was_enabled {
        self.frame_count = 0;
      }
      debug!("cpi {}: new config {:?}", self.id, self.active);
    }
    self.current_line = 0;
    self.current_row = 0;
    self.high_byte = None;
    self.in_frame = self.active.enabled();
    if !self.in_frame {
      return;
    }
    self.drop_frame = match self.active.framedrop() {
      Some(nb) => self.frame_count % nb != 0,
      None => false,
    };
    trace!("cpi {}: frame {}{}", self.id, self.frame_count, if self.drop_frame { " dropped" } else { "" });
    self.frame_count += 1;
  }

  fn push_pixel(&mut self, pixel: u16, channels: &mut [Channel], core: &mut UdmaCore) {
    let (x, y) = (self.current_row, self.current_line);
    self.current_row += 1;
    if self.current_row == self.active.row_len() {
      self.current_row = 0;
      self.current_line += 1;
    }
    if self.drop_frame {
      return;
    }
    if self.active.slice_enabled() && !self.active.in_slice(x, y) {
      trace!("cpi {}: pixel ({}, {}) outside of the slice", self.id, x, y);
      return;
    }
    let value = self.active.convert(pixel);
    let bytes = match self.active.format() {
      Format::BypassBigEnd => value.to_be_bytes(),
      _ => value.to_le_bytes(),
    };
    if let Some(channel) = channels.get_mut(RX_CHANNEL) {
      channel.push_data(&bytes, core);
    }
  }

  pub fn reset(&mut self) {
    *self = Cpi::new(self.id);
  }
}
