pub mod pacing;
pub mod retry;
