//the pieces of the simulation kernel the UDMA model is driven by

pub mod clock;
pub mod io;
pub mod wire;

pub use clock::Scheduler;
pub use io::{IoReq, IoReqStatus};
pub use wire::WireMaster;
