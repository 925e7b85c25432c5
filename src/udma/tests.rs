use std::cell::RefCell;
use std::rc::Rc;
use crate::config::{PeriphKind, UdmaConfig};
use crate::kernel::{IoReq, IoReqStatus};
use super::channel::{CFG_CLR_BIT, CFG_CONT_BIT, CFG_EN_BIT, CFG_OFFSET, CHANNEL_SIZE, SADDR_OFFSET, SIZE_OFFSET, SIZE_START_BIT};
use super::hyper::{HyperRam, EXT_ADDR_OFFSET, STATUS_OFFSET as HYPER_STATUS_OFFSET, TIMING_OFFSET};
use super::i2c::{I2cLines, I2cSlave, CLKDIV_OFFSET, CMD_RD_NACK, CMD_START, CMD_STOP, CMD_WAIT, CMD_WR};
use super::periph::{CUSTOM_OFFSET, RX_CHANNEL, TX_CHANNEL};
use super::uart::{decode_line, SETUP_OFFSET, STATUS_OFFSET};
use super::*;

const START: u32 = 1 << SIZE_START_BIT;

fn udma(kinds: &[PeriphKind]) -> Udma {
  Udma::new(&UdmaConfig::with_periphs(kinds)).unwrap()
}

fn channel_base(periph: usize, slot: usize) -> u64 {
  periph_offset(periph) + slot as u64 * CHANNEL_SIZE
}

fn custom_base(periph: usize) -> u64 {
  periph_offset(periph) + CUSTOM_OFFSET
}

//datasize field for a unit of 1, 2 or 4 bytes
fn unit_cfg(unit: u32) -> u32 {
  match unit {
    1 => 0,
    2 => 1 << 1,
    _ => 2 << 1,
  }
}

fn arm(udma: &mut Udma, periph: usize, slot: usize, saddr: u32, size: u32, unit: u32, continuous: bool) {
  let base = channel_base(periph, slot);
  udma.write_reg(base + SADDR_OFFSET, saddr).unwrap();
  udma.write_reg(base + CFG_OFFSET, unit_cfg(unit) | (continuous as u32) << CFG_CONT_BIT).unwrap();
  udma.write_reg(base + SIZE_OFFSET, size | START).unwrap();
}

fn capture_events(udma: &mut Udma) -> Rc<RefCell<Vec<u32>>> {
  let events = Rc::new(RefCell::new(vec![]));
  let sink = events.clone();
  udma.bind_event(Box::new(move |_, event| sink.borrow_mut().push(event)));
  events
}

fn capture_uart_tx(udma: &mut Udma, id: usize) -> Rc<RefCell<Vec<(u64, u8)>>> {
  let line = Rc::new(RefCell::new(vec![]));
  let sink = line.clone();
  udma.uart_mut(id).unwrap().bind_tx(Box::new(move |cycle, bit| sink.borrow_mut().push((cycle, bit))));
  line
}

//8N1 frame, LSB first
fn send_uart_byte(udma: &mut Udma, id: usize, byte: u8) {
  udma.uart_rx_sync(id, 0).unwrap();
  for n in 0..8 {
    udma.uart_rx_sync(id, (byte >> n) & 1).unwrap();
  }
  udma.uart_rx_sync(id, 1).unwrap();
}

#[test]
fn uart_tx_end_to_end() {
  let mut udma = udma(&[PeriphKind::Uart]);
  let line = capture_uart_tx(&mut udma, 0);
  let events = capture_events(&mut udma);
  let message = [0x48, 0x49, 0x21, 0x0a];
  udma.load_l2(0x1000, &message).unwrap();
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  //divider 3, 4 cycles per bit
  udma.write_reg(custom_base(0) + SETUP_OFFSET, 0x0003_0306).unwrap();
  arm(&mut udma, 0, TX_CHANNEL, 0x1000, 4, 1, false);
  assert!(udma.run_until_idle(100_000));

  let line = line.borrow();
  assert_eq!(line.len(), 4 * 10);
  let bytes: Vec<u8> = decode_line(&line, 8, false).iter().map(|&(_, byte)| byte).collect();
  assert_eq!(bytes, message);
  for pair in line[..10].windows(2) {
    assert_eq!(pair[1].0 - pair[0].0, 4);
  }
  //start, 0x48 LSB first, stop
  let first: Vec<u8> = line[..10].iter().map(|&(_, bit)| bit).collect();
  assert_eq!(first, [0, 0, 0, 0, 1, 0, 0, 1, 0, 1]);
  assert_eq!(*events.borrow(), [ChannelId::new(0, TX_CHANNEL).event_id()]);
}

#[test]
fn uart_tx_line_for_0x41() {
  let mut udma = udma(&[PeriphKind::Uart]);
  let line = capture_uart_tx(&mut udma, 0);
  udma.load_l2(0x40, &[0x41]).unwrap();
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  arm(&mut udma, 0, TX_CHANNEL, 0x40, 1, 1, false);
  assert!(udma.run_until_idle(10_000));
  let bits: Vec<u8> = line.borrow().iter().map(|&(_, bit)| bit).collect();
  assert_eq!(bits, [0, 1, 0, 0, 0, 0, 0, 1, 0, 1]);
}

#[test]
fn uart_rx_reconstructs_byte() {
  let mut udma = udma(&[PeriphKind::Uart]);
  let events = capture_events(&mut udma);
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  arm(&mut udma, 0, RX_CHANNEL, 0x2000, 1, 1, false);
  send_uart_byte(&mut udma, 0, 0x41);
  assert!(udma.run_until_idle(10_000));
  assert_eq!(udma.read_l2(0x2000, 1).unwrap(), [0x41]);
  assert_eq!(*events.borrow(), [ChannelId::new(0, RX_CHANNEL).event_id()]);
  assert!(!udma.channel(ChannelId::new(0, RX_CHANNEL)).unwrap().is_busy());
}

#[test]
fn uart_rx_bad_frames_are_dropped() {
  let mut udma = udma(&[PeriphKind::Uart]);
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  //even parity, 8 data bits, RX enabled
  udma.write_reg(custom_base(0) + SETUP_OFFSET, 0x0207).unwrap();
  arm(&mut udma, 0, RX_CHANNEL, 0x2000, 1, 1, false);

  //0x03 has even parity, send a parity bit of 1
  udma.uart_rx_sync(0, 0).unwrap();
  for n in 0..8 {
    udma.uart_rx_sync(0, (0x03 >> n) & 1).unwrap();
  }
  udma.uart_rx_sync(0, 1).unwrap();
  udma.uart_rx_sync(0, 1).unwrap();
  let status = custom_base(0) + STATUS_OFFSET;
  assert_eq!(udma.read_reg(status).unwrap() & 0x4, 0x4);
  //sticky until read
  assert_eq!(udma.read_reg(status).unwrap() & 0x4, 0);

  //good parity but a 0 stop bit
  udma.uart_rx_sync(0, 0).unwrap();
  for n in 0..8 {
    udma.uart_rx_sync(0, (0x03 >> n) & 1).unwrap();
  }
  udma.uart_rx_sync(0, 0).unwrap();
  udma.uart_rx_sync(0, 0).unwrap();
  assert!(udma.run_until_idle(10_000));
  assert!(udma.channel(ChannelId::new(0, RX_CHANNEL)).unwrap().is_busy());
  assert_eq!(udma.read_reg(status).unwrap(), 0);
}

#[test]
fn continuous_mode_wraps() {
  let mut udma = udma(&[PeriphKind::Uart]);
  let events = capture_events(&mut udma);
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  arm(&mut udma, 0, RX_CHANNEL, 0x3000, 2, 1, true);
  for &byte in [0x11, 0x22, 0x33, 0x44, 0x55].iter() {
    send_uart_byte(&mut udma, 0, byte);
  }
  assert!(udma.run_until_idle(10_000));
  assert_eq!(udma.read_l2(0x3000, 2).unwrap(), [0x55, 0x44]);
  let id = ChannelId::new(0, RX_CHANNEL);
  assert_eq!(events.borrow().len(), 2);
  let channel = udma.channel(id).unwrap();
  assert!(channel.is_busy());
  assert_eq!(channel.stats().transfers_completed, 2);
  assert_eq!(udma.read_reg(channel_base(0, RX_CHANNEL) + SADDR_OFFSET).unwrap(), 0x3001);
  assert_eq!(udma.read_reg(channel_base(0, RX_CHANNEL) + SIZE_OFFSET).unwrap(), 1);
}

#[test]
fn received_size_matches_configured_size() {
  let mut udma = udma(&[PeriphKind::Uart]);
  let line = capture_uart_tx(&mut udma, 0);
  udma.load_l2(0x100, &[1, 2, 3, 4, 5, 6]).unwrap();
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  arm(&mut udma, 0, TX_CHANNEL, 0x100, 6, 4, false);
  let tx = channel_base(0, TX_CHANNEL);
  assert_eq!(udma.read_reg(tx + CFG_OFFSET).unwrap() >> CFG_EN_BIT & 1, 1);
  assert!(udma.run_until_idle(100_000));

  let channel = udma.channel(ChannelId::new(0, TX_CHANNEL)).unwrap();
  assert!(!channel.is_busy());
  assert_eq!(channel.last_transfer().unwrap().received_size, 6);
  assert_eq!(channel.stats().bytes_transferred, 6);
  assert_eq!(udma.read_reg(tx + SIZE_OFFSET).unwrap(), 0);
  assert_eq!(udma.read_reg(tx + CFG_OFFSET).unwrap() >> CFG_EN_BIT & 1, 0);
  let bytes: Vec<u8> = decode_line(&line.borrow(), 8, false).iter().map(|&(_, byte)| byte).collect();
  assert_eq!(bytes, [1, 2, 3, 4, 5, 6]);
}

#[test]
fn starts_while_busy_are_queued_then_dropped() {
  let mut udma = udma(&[PeriphKind::Uart]);
  let line = capture_uart_tx(&mut udma, 0);
  udma.load_l2(0x0, &[0xa0, 0xa1, 0xa2, 0xa3, 0xa4]).unwrap();
  for n in 0..5 {
    arm(&mut udma, 0, TX_CHANNEL, n, 1, 1, false);
  }
  let id = ChannelId::new(0, TX_CHANNEL);
  //one active, three queued, the fifth found no free descriptor
  assert_eq!(udma.channel(id).unwrap().current().unwrap().addr, 0);
  assert_eq!(udma.channel(id).unwrap().nb_pending(), 3);

  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  assert!(udma.run_until_idle(100_000));
  let bytes: Vec<u8> = decode_line(&line.borrow(), 8, false).iter().map(|&(_, byte)| byte).collect();
  assert_eq!(bytes, [0xa0, 0xa1, 0xa2, 0xa3]);
  assert_eq!(udma.channel(id).unwrap().stats().transfers_completed, 4);
}

#[test]
fn empty_transfer_is_ignored() {
  let mut udma = udma(&[PeriphKind::Uart]);
  arm(&mut udma, 0, TX_CHANNEL, 0x100, 0, 1, false);
  assert!(!udma.channel(ChannelId::new(0, TX_CHANNEL)).unwrap().is_busy());
}

#[test]
fn invalid_accesses_are_rejected() {
  let mut udma = udma(&[PeriphKind::Uart]);
  let saddr = channel_base(0, TX_CHANNEL) + SADDR_OFFSET;
  let mut req = IoReq::write(saddr, &[1, 2]);
  assert_eq!(udma.req(&mut req), IoReqStatus::Invalid);
  let mut req = IoReq::write_u32(saddr + 2, 0x1234);
  assert_eq!(udma.req(&mut req), IoReqStatus::Invalid);
  //past the last peripheral
  let mut req = IoReq::read(periph_offset(1), 4);
  assert_eq!(udma.req(&mut req), IoReqStatus::Invalid);
  //inside the global block but not a register
  let mut req = IoReq::read(0x10, 4);
  assert_eq!(udma.req(&mut req), IoReqStatus::Invalid);
  assert_eq!(udma.read_reg(saddr).unwrap(), 0);

  let mut req = IoReq::write_u32(saddr, 0x1234);
  assert_eq!(udma.req(&mut req), IoReqStatus::Ok);
  assert_eq!(udma.read_reg(saddr).unwrap(), 0x1234);
  //reserved word of the channel window
  assert_eq!(udma.read_reg(channel_base(0, TX_CHANNEL) + 0xc).unwrap(), 0);
}

#[test]
fn global_registers() {
  let mut udma = udma(&[PeriphKind::Uart, PeriphKind::I2c]);
  udma.write_reg(CONF_CG_OFFSET, 0x3).unwrap();
  udma.write_reg(CONF_EVTIN_OFFSET, 0xab).unwrap();
  assert_eq!(udma.read_reg(CONF_CG_OFFSET).unwrap(), 0x3);
  assert_eq!(udma.read_reg(CONF_EVTIN_OFFSET).unwrap(), 0xab);
  assert!(udma.periph(1).unwrap().is_on());
  udma.write_reg(CONF_CG_OFFSET, 0x1).unwrap();
  assert!(!udma.periph(1).unwrap().is_on());
  assert_eq!(udma.clock_gating(), 0x1);
}

#[test]
fn clock_gating_holds_the_protocol() {
  let mut udma = udma(&[PeriphKind::Uart]);
  let line = capture_uart_tx(&mut udma, 0);
  udma.load_l2(0x0, &[0x55, 0x66, 0x77, 0x88]).unwrap();
  arm(&mut udma, 0, TX_CHANNEL, 0x0, 4, 1, false);
  assert!(udma.run_until_idle(10_000));
  assert!(line.borrow().is_empty());
  assert!(udma.channel(ChannelId::new(0, TX_CHANNEL)).unwrap().is_busy());

  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  assert!(udma.run_until_idle(100_000));
  let bytes: Vec<u8> = decode_line(&line.borrow(), 8, false).iter().map(|&(_, byte)| byte).collect();
  assert_eq!(bytes, [0x55, 0x66, 0x77, 0x88]);
}

#[test]
fn channel_clear_drops_in_flight_data() {
  let mut udma = udma(&[PeriphKind::Uart]);
  let line = capture_uart_tx(&mut udma, 0);
  udma.load_l2(0x0, &[0x12, 0x34]).unwrap();
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  arm(&mut udma, 0, TX_CHANNEL, 0x0, 2, 1, false);
  //let the first fetch go out
  udma.run(2);
  udma.write_reg(channel_base(0, TX_CHANNEL) + CFG_OFFSET, 1 << CFG_CLR_BIT).unwrap();
  assert!(udma.run_until_idle(10_000));
  assert!(line.borrow().is_empty());
  assert!(!udma.channel(ChannelId::new(0, TX_CHANNEL)).unwrap().is_busy());
}

#[test]
fn channel_clear_drops_the_rest_of_the_word() {
  let mut udma = udma(&[PeriphKind::Uart]);
  let line = capture_uart_tx(&mut udma, 0);
  udma.load_l2(0x0, &[0x01, 0x02, 0x03, 0x04]).unwrap();
  udma.load_l2(0x10, &[0xaa]).unwrap();
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  //divider 9, 10 cycles per bit
  udma.write_reg(custom_base(0) + SETUP_OFFSET, 0x0009_0306).unwrap();
  arm(&mut udma, 0, TX_CHANNEL, 0x0, 4, 4, false);
  //first byte of the word is on the line
  udma.run(30);
  udma.write_reg(channel_base(0, TX_CHANNEL) + CFG_OFFSET, 1 << CFG_CLR_BIT).unwrap();
  arm(&mut udma, 0, TX_CHANNEL, 0x10, 1, 1, false);
  assert!(udma.run_until_idle(100_000));
  let bytes: Vec<u8> = decode_line(&line.borrow(), 8, false).iter().map(|&(_, byte)| byte).collect();
  assert_eq!(bytes, [0x01, 0xaa]);
}

#[test]
fn reset_clears_everything() {
  let mut udma = udma(&[PeriphKind::Uart]);
  let line = capture_uart_tx(&mut udma, 0);
  udma.load_l2(0x0, &[0xff; 8]).unwrap();
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  arm(&mut udma, 0, TX_CHANNEL, 0x0, 8, 1, false);
  udma.run(20);
  let emitted = line.borrow().len();
  assert!(emitted > 0);

  udma.reset();
  assert!(udma.run_until_idle(10_000));
  assert_eq!(line.borrow().len(), emitted);
  assert_eq!(udma.clock_gating(), 0);
  assert!(!udma.channel(ChannelId::new(0, TX_CHANNEL)).unwrap().is_busy());
  assert_eq!(udma.read_reg(channel_base(0, TX_CHANNEL) + SADDR_OFFSET).unwrap(), 0);
  assert_eq!(udma.read_reg(custom_base(0) + SETUP_OFFSET).unwrap(), 0x0306);
}

//acks every byte it is written and answers reads with `reply`
struct TestSlave {
  reply: u8,
  ack: bool,
  low_halves: u32,
}

impl I2cSlave for TestSlave {
  fn sync(&mut self, _cycle: u64, scl: bool, _sda: bool) -> bool {
    if !scl {
      self.low_halves += 1;
    }
    match self.low_halves {
      1..=8 => (self.reply >> (8 - self.low_halves)) & 1 != 0,
      9 => !self.ack,
      _ => true,
    }
  }
}

fn capture_i2c(udma: &mut Udma, id: usize) -> Rc<RefCell<Vec<(u64, u8, u8)>>> {
  let lines = Rc::new(RefCell::new(vec![]));
  let sink = lines.clone();
  udma.i2c_mut(id).unwrap().bind_lines(Box::new(move |cycle, lines: I2cLines| {
    sink.borrow_mut().push((cycle, lines.scl as u8, lines.sda as u8))
  }));
  lines
}

//(scl, sda) levels without the sample cycles
fn levels(samples: &[(u64, u8, u8)]) -> Vec<(u8, u8)> {
  samples.iter().map(|&(_, scl, sda)| (scl, sda)).collect()
}

#[test]
fn i2c_write_sequence() {
  //the whole command stream is fetched before the first sample goes out
  let mut config = UdmaConfig::with_periphs(&[PeriphKind::I2c]);
  config.tx_prefetch = 8;
  let mut udma = Udma::new(&config).unwrap();
  let lines = capture_i2c(&mut udma, 0);
  udma.i2c_mut(0).unwrap().bind_slave(Box::new(TestSlave { reply: 0xff, ack: true, low_halves: 0 }));
  //unknown commands are skipped
  udma.load_l2(0x100, &[CMD_START, CMD_WAIT, CMD_WR, 0xa5, CMD_STOP]).unwrap();
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  udma.write_reg(custom_base(0) + CLKDIV_OFFSET, 4).unwrap();
  arm(&mut udma, 0, TX_CHANNEL, 0x100, 5, 1, false);
  assert!(udma.run_until_idle(100_000));

  let mut expected = vec![(1, 1), (1, 0)];
  for n in (0..8).rev() {
    let bit = (0xa5 >> n) & 1;
    expected.push((0, bit));
    expected.push((1, bit));
  }
  expected.extend_from_slice(&[(0, 0), (1, 0)]);
  expected.extend_from_slice(&[(0, 0), (1, 0), (1, 1)]);
  let lines = lines.borrow();
  assert_eq!(levels(&lines), expected);
  //clkdiv 4, a sample every 5 cycles
  for pair in lines.windows(2) {
    assert_eq!(pair[1].0 - pair[0].0, 5);
  }
  assert_eq!(udma.read_reg(custom_base(0)).unwrap(), 0);
}

#[test]
fn i2c_write_without_slave_is_nacked() {
  let mut udma = udma(&[PeriphKind::I2c]);
  udma.load_l2(0x100, &[CMD_START, CMD_WR, 0x3c, CMD_STOP]).unwrap();
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  arm(&mut udma, 0, TX_CHANNEL, 0x100, 4, 1, false);
  assert!(udma.run_until_idle(100_000));
  assert_eq!(udma.read_reg(custom_base(0)).unwrap(), 0x2);
  assert!(udma.i2c_mut(0).unwrap().nack());
}

#[test]
fn i2c_read_byte() {
  let mut udma = udma(&[PeriphKind::I2c]);
  let lines = capture_i2c(&mut udma, 0);
  udma.i2c_mut(0).unwrap().bind_slave(Box::new(TestSlave { reply: 0x5a, ack: false, low_halves: 0 }));
  udma.load_l2(0x100, &[CMD_START, CMD_RD_NACK, CMD_STOP]).unwrap();
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  arm(&mut udma, 0, RX_CHANNEL, 0x200, 1, 1, false);
  arm(&mut udma, 0, TX_CHANNEL, 0x100, 3, 1, false);
  assert!(udma.run_until_idle(100_000));

  assert_eq!(udma.read_l2(0x200, 1).unwrap(), [0x5a]);
  let lines = levels(&lines.borrow());
  //the master's NACK clock
  assert_eq!(lines[2 + 16..2 + 18], [(0, 1), (1, 1)]);
}

#[test]
fn i2c_cfg_and_repeat_commands() {
  let mut udma = udma(&[PeriphKind::I2c]);
  let lines = capture_i2c(&mut udma, 0);
  //clkdiv 0x0102, then two STOP sequences through a repeat
  udma.load_l2(0x100, &[super::i2c::CMD_CFG, 0x01, 0x02, super::i2c::CMD_RPT, 2, CMD_STOP]).unwrap();
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  arm(&mut udma, 0, TX_CHANNEL, 0x100, 6, 1, false);
  assert!(udma.run_until_idle(100_000));
  assert_eq!(udma.read_reg(custom_base(0) + CLKDIV_OFFSET).unwrap(), 0x0102);
  assert_eq!(lines.borrow().len(), 6);
}

fn cpi_clock(udma: &mut Udma, id: usize, href: bool, vsync: bool, data: u8) {
  udma.cpi_sync(id, false, href, vsync, data).unwrap();
  udma.cpi_sync(id, true, href, vsync, data).unwrap();
}

//one vsync pulse then rows of 2-byte pixels, high byte first
fn send_frame(udma: &mut Udma, id: usize, pixels: &[u16]) {
  cpi_clock(udma, id, false, true, 0);
  cpi_clock(udma, id, false, false, 0);
  for &pixel in pixels {
    cpi_clock(udma, id, true, false, (pixel >> 8) as u8);
    cpi_clock(udma, id, true, false, pixel as u8);
  }
}

const CPI_GLOB: u64 = 0x00;
const CPI_LL: u64 = 0x04;
const CPI_UR: u64 = 0x08;
const CPI_SIZE: u64 = 0x0c;

#[test]
fn cpi_slice_keeps_window() {
  let mut udma = udma(&[PeriphKind::Cpi]);
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  let base = custom_base(0);
  udma.write_reg(base + CPI_GLOB, 1 << 31 | 4 << 8 | 1 << 7).unwrap();
  udma.write_reg(base + CPI_LL, 1 << 16 | 1).unwrap();
  udma.write_reg(base + CPI_UR, 2 << 16 | 2).unwrap();
  udma.write_reg(base + CPI_SIZE, 3).unwrap();
  arm(&mut udma, 0, RX_CHANNEL, 0x4000, 8, 4, false);

  let pixels: Vec<u16> = (0..4).flat_map(|y| (0..4).map(move |x| y << 8 | x)).collect();
  send_frame(&mut udma, 0, &pixels);
  assert!(udma.run_until_idle(10_000));
  assert_eq!(udma.read_l2(0x4000, 8).unwrap(), [0x01, 0x01, 0x02, 0x01, 0x01, 0x02, 0x02, 0x02]);
  assert!(!udma.channel(ChannelId::new(0, RX_CHANNEL)).unwrap().is_busy());
}

#[test]
fn cpi_drops_every_second_frame() {
  let mut udma = udma(&[PeriphKind::Cpi]);
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  let base = custom_base(0);
  udma.write_reg(base + CPI_GLOB, 1 << 31 | 4 << 8 | 2 << 1 | 1).unwrap();
  udma.write_reg(base + CPI_SIZE, 1).unwrap();
  arm(&mut udma, 0, RX_CHANNEL, 0x4000, 16, 1, false);

  for frame in 0..4u16 {
    send_frame(&mut udma, 0, &[frame << 8, frame << 8 | 1]);
  }
  assert!(udma.run_until_idle(10_000));
  assert_eq!(udma.read_l2(0x4000, 8).unwrap(), [0x00, 0x00, 0x01, 0x00, 0x00, 0x02, 0x01, 0x02]);
  let rx = channel_base(0, RX_CHANNEL);
  assert_eq!(udma.read_reg(rx + SIZE_OFFSET).unwrap(), 8);
}

#[test]
fn cpi_config_applies_at_vsync() {
  let mut udma = udma(&[PeriphKind::Cpi]);
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  arm(&mut udma, 0, RX_CHANNEL, 0x4000, 2, 1, false);
  //pixels before any enabled frame go nowhere
  send_frame(&mut udma, 0, &[0x1234]);
  udma.write_reg(custom_base(0) + CPI_GLOB, 1 << 31 | 5 << 8).unwrap();
  assert_eq!(udma.read_reg(custom_base(0) + CPI_GLOB).unwrap(), 1 << 31 | 5 << 8);
  send_frame(&mut udma, 0, &[0xabcd]);
  assert!(udma.run_until_idle(10_000));
  //big-endian bypass
  assert_eq!(udma.read_l2(0x4000, 2).unwrap(), [0xab, 0xcd]);
}

#[test]
fn cpi_lone_byte_does_not_shift_the_next_line() {
  let mut udma = udma(&[PeriphKind::Cpi]);
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  udma.write_reg(custom_base(0) + CPI_GLOB, 1 << 31 | 5 << 8).unwrap();
  arm(&mut udma, 0, RX_CHANNEL, 0x4000, 4, 1, false);
  send_frame(&mut udma, 0, &[0x1234]);
  cpi_clock(&mut udma, 0, true, false, 0x56);
  cpi_clock(&mut udma, 0, false, false, 0);
  cpi_clock(&mut udma, 0, true, false, 0xab);
  cpi_clock(&mut udma, 0, true, false, 0xcd);
  assert!(udma.run_until_idle(10_000));
  assert_eq!(udma.read_l2(0x4000, 4).unwrap(), [0x12, 0x34, 0xab, 0xcd]);
}

#[test]
fn frame_larger_than_the_l2_fifo_is_kept_whole() {
  let mut udma = udma(&[PeriphKind::Cpi]);
  let events = capture_events(&mut udma);
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  udma.write_reg(custom_base(0) + CPI_GLOB, 1 << 31 | 5 << 8).unwrap();
  arm(&mut udma, 0, RX_CHANNEL, 0x4000, 200, 1, false);
  //200 single-byte writes issued within one cycle
  let pixels: Vec<u16> = (0..100).map(|n| 0x8000 | n).collect();
  send_frame(&mut udma, 0, &pixels);
  assert!(udma.run_until_idle(100_000));

  let expected: Vec<u8> = pixels.iter().flat_map(|&pixel| vec![(pixel >> 8) as u8, pixel as u8]).collect();
  assert_eq!(udma.read_l2(0x4000, 200).unwrap(), expected);
  let rx = ChannelId::new(0, RX_CHANNEL);
  assert!(!udma.channel(rx).unwrap().is_busy());
  assert_eq!(udma.read_reg(channel_base(0, RX_CHANNEL) + CFG_OFFSET).unwrap() & 1 << CFG_EN_BIT, 0);
  assert_eq!(*events.borrow(), [rx.event_id()]);
}

fn hyper_setup() -> (Udma, Rc<RefCell<HyperRam>>) {
  let mut udma = udma(&[PeriphKind::Hyper]);
  let ram = Rc::new(RefCell::new(HyperRam::new(0x1000)));
  udma.hyper_mut(0).unwrap().bind_device(Box::new(ram.clone()));
  udma.write_reg(CONF_CG_OFFSET, 1).unwrap();
  (udma, ram)
}

#[test]
fn hyper_burst_keeps_chip_select() {
  let (mut udma, ram) = hyper_setup();
  let data: Vec<u8> = (0..16).collect();
  udma.load_l2(0x1000, &data).unwrap();
  let ext_addr = custom_base(0) + EXT_ADDR_OFFSET;
  udma.write_reg(ext_addr, 0x40).unwrap();
  arm(&mut udma, 0, TX_CHANNEL, 0x1000, 8, 4, false);
  udma.write_reg(ext_addr, 0x48).unwrap();
  arm(&mut udma, 0, TX_CHANNEL, 0x1008, 8, 4, false);
  assert_eq!(udma.read_reg(custom_base(0) + HYPER_STATUS_OFFSET).unwrap(), 1);
  assert!(udma.run_until_idle(100_000));

  let ram = ram.borrow();
  assert_eq!(&ram.contents()[0x40..0x50], data.as_slice());
  assert_eq!(ram.cs_assertions(), 1);
  assert_eq!(ram.commands().len(), 1);
  assert_eq!(udma.read_reg(custom_base(0) + HYPER_STATUS_OFFSET).unwrap(), 0);
}

#[test]
fn hyper_gap_reasserts_chip_select() {
  let (mut udma, ram) = hyper_setup();
  udma.load_l2(0x1000, &[0xaa; 8]).unwrap();
  let ext_addr = custom_base(0) + EXT_ADDR_OFFSET;
  udma.write_reg(ext_addr, 0x40).unwrap();
  arm(&mut udma, 0, TX_CHANNEL, 0x1000, 4, 1, false);
  udma.write_reg(ext_addr, 0x80).unwrap();
  arm(&mut udma, 0, TX_CHANNEL, 0x1004, 4, 1, false);
  assert!(udma.run_until_idle(100_000));
  let ram = ram.borrow();
  assert_eq!(ram.cs_assertions(), 2);
  assert_eq!(&ram.contents()[0x80..0x84], &[0xaa; 4]);
}

#[test]
fn hyper_read_streams_into_l2() {
  let (mut udma, ram) = hyper_setup();
  ram.borrow_mut().contents_mut()[0x20..0x28].copy_from_slice(&[8, 7, 6, 5, 4, 3, 2, 1]);
  udma.write_reg(custom_base(0) + EXT_ADDR_OFFSET, 0x20).unwrap();
  arm(&mut udma, 0, RX_CHANNEL, 0x3000, 8, 2, false);
  assert!(udma.run_until_idle(100_000));
  assert_eq!(udma.read_l2(0x3000, 8).unwrap(), [8, 7, 6, 5, 4, 3, 2, 1]);
  let ram = ram.borrow();
  assert_eq!(ram.commands().len(), 1);
  assert_eq!(ram.commands()[0] >> 47, 1);
}

#[test]
fn hyper_read_burst_keeps_chip_select() {
  let (mut udma, ram) = hyper_setup();
  let data: Vec<u8> = (0x10..0x20).collect();
  ram.borrow_mut().contents_mut()[0x20..0x30].copy_from_slice(&data);
  let ext_addr = custom_base(0) + EXT_ADDR_OFFSET;
  udma.write_reg(ext_addr, 0x20).unwrap();
  arm(&mut udma, 0, RX_CHANNEL, 0x3000, 8, 2, false);
  udma.write_reg(ext_addr, 0x28).unwrap();
  arm(&mut udma, 0, RX_CHANNEL, 0x3008, 8, 2, false);
  assert!(udma.run_until_idle(100_000));

  assert_eq!(udma.read_l2(0x3000, 16).unwrap(), data);
  let ram = ram.borrow();
  assert_eq!(ram.cs_assertions(), 1);
  assert_eq!(ram.commands().len(), 1);
  assert_eq!(udma.read_reg(custom_base(0) + HYPER_STATUS_OFFSET).unwrap(), 0);
}

#[test]
fn hyper_channel_clear_aborts_the_burst() {
  let (mut udma, ram) = hyper_setup();
  udma.load_l2(0x1000, &[0x11; 8]).unwrap();
  udma.load_l2(0x2000, &[0x22; 4]).unwrap();
  let base = custom_base(0);
  //17 cycles per byte, one cycle of chip-select settling
  udma.write_reg(base + TIMING_OFFSET, 0x0110).unwrap();
  udma.write_reg(base + EXT_ADDR_OFFSET, 0x40).unwrap();
  arm(&mut udma, 0, TX_CHANNEL, 0x1000, 8, 1, false);
  //a few data bytes are out
  udma.run(150);
  udma.write_reg(channel_base(0, TX_CHANNEL) + CFG_OFFSET, 1 << CFG_CLR_BIT).unwrap();
  assert!(udma.run_until_idle(100_000));
  assert_eq!(udma.read_reg(base + HYPER_STATUS_OFFSET).unwrap(), 0);

  udma.write_reg(base + EXT_ADDR_OFFSET, 0x80).unwrap();
  arm(&mut udma, 0, TX_CHANNEL, 0x2000, 4, 1, false);
  assert!(udma.run_until_idle(100_000));
  let ram = ram.borrow();
  assert_eq!(&ram.contents()[0x40..0x42], &[0x11; 2]);
  assert_eq!(&ram.contents()[0x44..0x48], &[0; 4]);
  assert_eq!(&ram.contents()[0x80..0x84], &[0x22; 4]);
  assert_eq!(ram.cs_assertions(), 2);
  assert_eq!(ram.commands().len(), 2);
}

#[test]
fn wrong_kind_is_an_error() {
  let mut udma = udma(&[PeriphKind::Uart]);
  assert!(udma.i2c_mut(0).is_err());
  assert!(udma.cpi_sync(0, true, false, false, 0).is_err());
  assert!(udma.uart_rx_sync(3, 0).is_err());
}
