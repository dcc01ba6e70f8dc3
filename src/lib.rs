//! Administration client for buzz messaging senders.

pub mod api;
pub mod app;
pub mod contacts;
pub mod error;
pub mod pairing;
pub mod preferences;
pub mod storage;
pub mod utils;

#[cfg(feature = "gui")]
pub mod ui;
