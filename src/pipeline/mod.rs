pub mod batch;
pub mod retry;
pub mod shipper;

pub use batch::{BatchBuilder, BatchLimits, LogBatch, LogLine};
pub use shipper::{drain, LogShipper, ShipError, ShipReport};
