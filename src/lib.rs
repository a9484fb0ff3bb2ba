// ===============================
// src/lib.rs
// ===============================
pub mod breaker;
pub mod broker;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod domain;
pub mod health;
pub mod http;
pub mod ledger;
pub mod metrics;
pub mod notifier;
pub mod supervisor;
