pub mod config_store;
pub mod revenue_file;
pub mod slideshow;

pub use config_store::ConfigStore;
pub use revenue_file::{CurrentRevenueFile, RevenueFileService};
pub use slideshow::{SlideshowKind, SlideshowService, SlideshowState};
