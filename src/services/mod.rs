pub mod expiry;
pub mod log_follower;
pub mod port_detector;
pub mod process_checker;
pub mod supervisor;
pub mod wait;

pub use port_detector::detect_ports_with_fallback;
pub use process_checker::is_running;
pub use supervisor::{CleanTarget, StartOptions, Supervisor};
