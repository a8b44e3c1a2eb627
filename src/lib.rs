//! Watches a remote catalog's change stream for entries that can be claimed
//! at no cost and claims them on every enabled account, within each
//! account's filter rules, hourly limit and activity state.

pub mod accounts;
pub mod api;
pub mod classify;
pub mod commands;
pub mod config;
pub mod db;
pub mod host;
pub mod models;
pub mod stream;
