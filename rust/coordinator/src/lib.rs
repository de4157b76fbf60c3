//! Cluster-wide bundle coordination.
//!
//! One master drives the local bundle lifecycle on every reachable node
//! through the [`client::NodeClient`] and merges the downloaded archives
//! into a single cluster bundle via [`coordinator::ClusterCoordinator`].

pub mod client;
pub mod coordinator;

pub use client::NodeClient;
pub use coordinator::{ClusterCoordinator, CoordinatorConfig};
