//! Versioned endpoint snapshots handed to the distributor
//!
//! A snapshot groups every registered endpoint under one cluster load
//! assignment. Endpoints are always sorted by address then port so that
//! rebuilding an unchanged registry yields an identical snapshot.

use crate::error::{Error, Result};
use crate::models::EndpointRecord;
use serde::{Deserialize, Serialize};

/// Transport protocol of a load-balanced endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Raw TCP
    Tcp,
}

/// One load-balanced endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbEndpoint {
    /// Host name or IP address
    pub address: String,
    /// Port number
    pub port: u16,
    /// Transport protocol
    pub protocol: Protocol,
}

/// All endpoints of one named cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLoadAssignment {
    /// Cluster the endpoints belong to
    pub cluster_name: String,
    /// Endpoints, sorted by address then port
    pub endpoints: Vec<LbEndpoint>,
}

/// Immutable, versioned resource bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Changes whenever the endpoint list changes
    pub version: u64,
    /// The single load assignment carried by this snapshot
    pub load_assignment: ClusterLoadAssignment,
}

impl Snapshot {
    /// Cluster name
    pub fn cluster_name(&self) -> &str {
        &self.load_assignment.cluster_name
    }

    /// Endpoints in deterministic order
    pub fn endpoints(&self) -> &[LbEndpoint] {
        &self.load_assignment.endpoints
    }

    /// `(address, port)` pairs in deterministic order
    pub fn addresses(&self) -> Vec<(String, u16)> {
        self.endpoints()
            .iter()
            .map(|e| (e.address.clone(), e.port))
            .collect()
    }

    /// Check the snapshot is fit for distribution
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name().is_empty() {
            return Err(Error::PublishFailure(format!(
                "snapshot version {} has an empty cluster name",
                self.version
            )));
        }
        Ok(())
    }
}

/// Build the snapshot for the given registry contents.
///
/// The version carries over from `previous` when the endpoint list is
/// unchanged and advances by one otherwise; the first snapshot is version 1.
pub fn build<'a>(
    cluster_name: &str,
    previous: Option<&Snapshot>,
    records: impl IntoIterator<Item = &'a EndpointRecord>,
) -> Snapshot {
    let mut endpoints: Vec<LbEndpoint> = records
        .into_iter()
        .map(|record| LbEndpoint {
            address: record.address.clone(),
            port: record.port,
            protocol: Protocol::Tcp,
        })
        .collect();
    endpoints.sort_by(|a, b| (&a.address, a.port).cmp(&(&b.address, b.port)));

    let load_assignment = ClusterLoadAssignment {
        cluster_name: cluster_name.to_string(),
        endpoints,
    };

    let version = match previous {
        Some(prev) if prev.load_assignment == load_assignment => prev.version,
        Some(prev) => prev.version + 1,
        None => 1,
    };

    Snapshot {
        version,
        load_assignment,
    }
}
