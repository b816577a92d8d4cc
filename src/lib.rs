//! Hubcast - cluster-wide notification relay
//!
//! Events published on any node are buffered per node, flushed in batches
//! to that node's hub and fanned out to every subscribed observer. Observers
//! keep their subscriptions alive by resubscribing on an interval.

pub mod balance;
pub mod buffer;
pub mod config;
pub mod directory;
pub mod gateway;
pub mod hub;
pub mod model;
pub mod observer;
pub mod publisher;
pub mod runtime;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;
