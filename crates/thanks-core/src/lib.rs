//! Core of the Super Thanks upload watcher: channel registry, feed prober,
//! poll controller, dispatch queue and completion ledger.

pub mod actuator;
pub mod capture;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod ledger;
pub mod model;
pub mod platform;
pub mod probe;
pub mod registry;
pub mod resolver;
pub mod tracker;
