pub mod checkpoints;
pub mod health;
pub mod jobs;
pub mod trigger;
