pub mod constants;
pub mod engine;
pub mod level;
pub mod protocol;
pub mod rng;
pub mod types;
