//! Remote alarm control: an optimistic sync controller over a small HTTP alarm
//! store, plus the store backend itself.

pub mod alarm;
pub mod api;
pub mod controller;
pub mod store_client;
