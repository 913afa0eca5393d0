pub mod analysis;
pub mod config;
pub mod dns;
pub mod dnssec;
pub mod error;

pub use analysis::{AnalysisResult, DnssecAnalysis};
pub use config::ValidatorConfig;
pub use dns::DNSPacket;
pub use dnssec::ChainVerdict;
