pub mod process;
pub mod status;

pub use process::{validate_name, ProcessRecord, Registry};
pub use status::{CleanReport, ProcessStatus, StartReport, StopReport};
