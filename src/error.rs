use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid access size {size} at offset {offset:#x}, only 32-bit accesses are supported")]
  InvalidAccessSize { offset: u64, size: usize },
  #[error("misaligned access at offset {offset:#x}")]
  Misaligned { offset: u64 },
  #[error("offset {offset:#x} is not mapped")]
  Unmapped { offset: u64 },
  #[error("L2 access [{addr:#x}; {size}] is outside of memory")]
  L2OutOfRange { addr: u64, size: usize },
  #[error("no peripheral with id {0}")]
  NoSuchPeriph(usize),
  #[error("peripheral {id} is not a {expected} interface")]
  WrongPeriphKind { id: usize, expected: &'static str },
  #[error("invalid configuration: {0}")]
  Config(String),
  #[error("could not parse configuration")]
  ConfigSyntax(#[from] basic_toml::Error),
  #[error(transparent)]
  Io(#[from] io::Error),
}
