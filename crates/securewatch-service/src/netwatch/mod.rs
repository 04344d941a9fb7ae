pub mod capture;
pub mod classifier;
pub mod parser;

pub use capture::{CaptureState, PacketMonitor};
pub use classifier::{classify, Protocol, TrafficDirection, Verdict};
pub use parser::{LineParser, PacketDescriptor};
