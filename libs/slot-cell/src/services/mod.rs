pub mod expiry;
pub mod generator;
