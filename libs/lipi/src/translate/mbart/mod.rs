mod config;
mod model;

pub use config::MBartConfig;
pub use model::MBartModel;
