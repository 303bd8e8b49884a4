pub mod autonomy;
pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod gates;
pub mod logging;
pub mod phase;
pub mod requirements;
pub mod review;
pub mod shutdown;
pub mod tracker;
pub mod ui;
pub mod util;
