pub mod bridge;
pub mod config;
pub mod error;
pub mod imu;
pub mod pose;
pub mod source;
pub mod state;
pub mod system;
