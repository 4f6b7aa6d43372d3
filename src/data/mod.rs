//! Sample handling, grid reconstruction and session storage.
pub mod grid;
pub mod sample;
pub mod storage;
