pub mod heart_rate;
pub mod phase;
