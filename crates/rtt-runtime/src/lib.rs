#![doc = "Periodic-task engine for measuring real-time wake-up latency."]

pub mod clock;
pub mod executor;
pub mod period;
pub mod realtime;
pub mod reporter;

pub use clock::*;
pub use executor::*;
pub use period::*;
pub use realtime::*;
pub use reporter::*;
