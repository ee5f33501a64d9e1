// mmx-rs: market-making trading core for a Bybit-style venue.
//
// Data flow: feeds -> shared state -> OMS -> order gateway -> venue.
// Execution acks flow back venue -> private feed -> state / event log.

pub mod config;
pub mod feeds;
pub mod gateway;
pub mod logger;
pub mod oms;
pub mod state;
pub mod strategy;
pub mod telemetry;
