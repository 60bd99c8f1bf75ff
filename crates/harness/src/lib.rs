pub mod fixture;

pub use fixture::{FlakyStore, TestTracker, snap};
