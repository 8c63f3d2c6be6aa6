pub mod capture;
pub mod decoder;
pub mod dns;
pub mod http;
pub mod hexdump;
pub mod analysis;
pub mod geo;
pub mod live;

#[cfg(test)]
pub(crate) mod fixtures;

pub use capture::{CaptureReader, CaptureWriter, Frame, ParsedCapture};
pub use decoder::{FrameDecoder, PacketRecord, Protocol};
pub use analysis::{AnalysisAggregator, AnalysisReport, Alert};
pub use geo::{GeoCache, GeoLocator, IpApiProvider};
pub use live::{LiveCaptureAdapter, PnetCaptureAdapter};
