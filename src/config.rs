use std::fs;
use std::path::Path;
use serde::Deserialize;
use crate::error::{Error, Result};
use crate::memory::MB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriphKind {
  Uart,
  I2c,
  Cpi,
  Hyper,
}

impl PeriphKind {
  pub fn name(&self) -> &'static str {
    match self {
      PeriphKind::Uart => "uart",
      PeriphKind::I2c => "i2c",
      PeriphKind::Cpi => "cpi",
      PeriphKind::Hyper => "hyper",
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeriphConfig {
  pub kind: PeriphKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UdmaConfig {
  //peripheral ids are the positions in this list
  pub periphs: Vec<PeriphConfig>,
  pub l2_base: u64,
  pub l2_size: usize,
  //cycles between a memory request being granted and its response
  pub l2_latency: u64,
  pub l2_read_fifo_size: usize,
  pub l2_write_fifo_size: usize,
  //depth of each channel's free transfer pool
  pub channel_depth: usize,
  //number of units a TX channel may fetch ahead of its protocol
  pub tx_prefetch: usize,
}

impl Default for UdmaConfig {
  fn default() -> Self {
    let periphs = [PeriphKind::Uart, PeriphKind::I2c, PeriphKind::Cpi, PeriphKind::Hyper]
      .iter()
      .map(|&kind| PeriphConfig { kind })
      .collect();
    UdmaConfig {
      periphs,
      l2_base: 0,
      l2_size: MB,
      l2_latency: 2,
      l2_read_fifo_size: 8,
      l2_write_fifo_size: 8,
      channel_depth: 4,
      tx_prefetch: 2,
    }
  }
}

impl UdmaConfig {
  //the clock-gating register has one bit per peripheral
  pub const MAX_PERIPHS: usize = 32;

  pub fn from_toml(text: &str) -> Result<Self> {
    let config: UdmaConfig = basic_toml::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
    let text = fs::read_to_string(path)?;
    UdmaConfig::from_toml(&text)
  }

  pub fn with_periphs(kinds: &[PeriphKind]) -> Self {
    UdmaConfig {
      periphs: kinds.iter().map(|&kind| PeriphConfig { kind }).collect(),
      ..Default::default()
    }
  }

  pub fn validate(&self) -> Result<()> {
    if self.periphs.is_empty() {
      return Err(Error::Config("at least one peripheral is needed".to_string()));
    }
    if self.periphs.len() > UdmaConfig::MAX_PERIPHS {
      return Err(Error::Config(format!("{} peripherals configured, at most {} are supported",
                                       self.periphs.len(), UdmaConfig::MAX_PERIPHS)));
    }
    let sizes = [
      ("l2_size", self.l2_size),
      ("l2_read_fifo_size", self.l2_read_fifo_size),
      ("l2_write_fifo_size", self.l2_write_fifo_size),
      ("channel_depth", self.channel_depth),
      ("tx_prefetch", self.tx_prefetch),
    ];
    match sizes.iter().find(|(_, size)| *size == 0) {
      Some((name, _)) => Err(Error::Config(format!("{} must not be zero", name))),
      None => Ok(()),
    }
  }
}
