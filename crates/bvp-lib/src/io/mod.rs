pub mod recording;
pub mod tables;
