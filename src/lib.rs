pub mod common;
pub mod config;
pub mod error;
pub mod kernel;
pub mod memory;
pub mod register;
pub mod udma;

pub use config::{PeriphKind, UdmaConfig};
pub use error::{Error, Result};
pub use udma::{ChannelId, Udma};
