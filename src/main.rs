use std::cell::RefCell;
use std::fs::File;
use std::path::PathBuf;
use std::rc::Rc;
use anyhow::{bail, Context};
use clap::Parser;
use log::info;
use memmap::Mmap;
use udma_sim::config::PeriphKind;
use udma_sim::udma::channel::{CFG_OFFSET, CHANNEL_SIZE, SADDR_OFFSET, SIZE_OFFSET, SIZE_START_BIT};
use udma_sim::udma::periph::{CUSTOM_OFFSET, TX_CHANNEL};
use udma_sim::udma::{periph_offset, uart, CONF_CG_OFFSET};
use udma_sim::{Udma, UdmaConfig};

/// Runs a UART transmission out of an L2 image and prints what went out on the line
#[derive(Debug, Parser)]
#[command(name = "udma-sim", version)]
struct Args {
  /// Binary loaded into L2
  #[arg(short, long)]
  image: PathBuf,
  /// L2 address the image is loaded at
  #[arg(long, default_value_t = 0, value_parser = parse_u64)]
  load_addr: u64,
  /// TOML description of the subsystem, defaults to uart/i2c/cpi/hyper
  #[arg(short, long)]
  config: Option<PathBuf>,
  /// Id of the UART peripheral to transmit with
  #[arg(long, default_value_t = 0)]
  uart: usize,
  /// Start address of the TX transfer
  #[arg(long, value_parser = parse_u32)]
  saddr: u32,
  /// Size of the TX transfer in bytes
  #[arg(long, value_parser = parse_u32)]
  size: u32,
  /// Transfer unit in bytes (1, 2 or 4)
  #[arg(long, default_value_t = 1)]
  unit: u32,
  /// UART clock divider, a bit lasts clkdiv + 1 cycles
  #[arg(long, default_value_t = 0)]
  clkdiv: u32,
  /// Give up after this many cycles
  #[arg(long, default_value_t = 10_000_000)]
  cycles: u64,
  #[arg(short, long)]
  verbose: bool,
}

fn parse_u64(text: &str) -> Result<u64, String> {
  let parsed = match text.strip_prefix("0x") {
    Some(hex) => u64::from_str_radix(hex, 16),
    None => text.parse(),
  };
  parsed.map_err(|err| format!("{}: {}", text, err))
}

fn parse_u32(text: &str) -> Result<u32, String> {
  let value = parse_u64(text)?;
  if value > u32::MAX as u64 {
    return Err(format!("{} does not fit in 32 bits", text));
  }
  Ok(value as u32)
}

fn main() -> anyhow::Result<()> {
  let args = Args::parse();
  let level = if args.verbose { "debug" } else { "warn" };
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

  let config = match &args.config {
    Some(path) => UdmaConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
    None => UdmaConfig::default(),
  };
  match config.periphs.get(args.uart) {
    Some(periph) if periph.kind == PeriphKind::Uart => {},
    _ => bail!("peripheral {} is not a UART", args.uart),
  }
  let datasize = match args.unit {
    1 => 0,
    2 => 1,
    4 => 2,
    unit => bail!("unsupported transfer unit {}", unit),
  };
  let mut udma = Udma::new(&config).context("building the UDMA")?;

  let file = File::open(&args.image).with_context(|| format!("opening {}", args.image.display()))?;
  let image = unsafe { Mmap::map(&file) }.with_context(|| format!("mapping {}", args.image.display()))?;
  udma.load_l2(args.load_addr, &image).context("loading the image into L2")?;
  info!("loaded {} bytes at {:#x}", image.len(), args.load_addr);

  let line = Rc::new(RefCell::new(vec![]));
  let sink = line.clone();
  udma.uart_mut(args.uart)?.bind_tx(Box::new(move |cycle, bit| sink.borrow_mut().push((cycle, bit))));

  let uart_base = periph_offset(args.uart);
  let tx = uart_base + TX_CHANNEL as u64 * CHANNEL_SIZE;
  udma.write_reg(CONF_CG_OFFSET, 1 << args.uart)?;
  udma.write_reg(uart_base + CUSTOM_OFFSET + uart::SETUP_OFFSET, args.clkdiv << 16 | uart::SETUP_RESET)?;
  udma.write_reg(tx + SADDR_OFFSET, args.saddr)?;
  udma.write_reg(tx + CFG_OFFSET, datasize << 1)?;
  udma.write_reg(tx + SIZE_OFFSET, args.size | 1 << SIZE_START_BIT)?;

  if !udma.run_until_idle(args.cycles) {
    log::warn!("still running after {} cycles", args.cycles);
  }
  for (cycle, byte) in uart::decode_line(&line.borrow(), 8, false) {
    let printable = match byte {
      0x20..=0x7e => byte as char,
      _ => '.',
    };
    println!("{:>10} {:#04x} {}", cycle, byte, printable);
  }
  Ok(())
}
