pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, CrawlerConfig};
pub use error::ReachGraphError;
pub use types::*;
