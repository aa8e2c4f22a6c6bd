//! The SPI hub broker.
//!
//! A single long-running process owns every SPI bus device node the host
//! exposes and multiplexes application traffic over them: applications
//! connect on a local stream socket, queue messages for individual devices,
//! and receive every device-originated message plus a device-list bootstrap
//! document on connect.
//!
//! # Crate structure
//!
//! - [`config`] — config file model and bus-path resolution
//! - [`identity`] — EEPROM-backed serial number and access code
//! - [`server`] — the socket server: ingress, bootstrap, broadcast
//! - [`broker`] — startup orchestration and the service loop
//! - [`logging`] / [`exit`] — CLI plumbing

pub mod broker;
pub mod config;
pub mod exit;
pub mod identity;
pub mod logging;
pub mod server;
