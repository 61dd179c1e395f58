pub mod collection;
pub mod config;
pub mod seed;
pub mod status;
