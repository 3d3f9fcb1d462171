//! Scan-level input data: frame timing and the shared scan context.

pub mod scan;
pub mod timing;

pub use scan::ScanContext;
pub use timing::FrameTiming;
