/// Point-in-time snapshot of the cluster's topology view.
///
/// Taken under a shared lock by [`Cluster::stats`](crate::Cluster::stats);
/// purely diagnostic, the counts may be stale by the time they are read.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterStats {
    /// Servers currently known, classified or not.
    pub servers: usize,
    /// Servers currently classified as writable masters.
    pub masters: usize,
    /// Servers currently classified as read-eligible slaves.
    pub slaves: usize,
    /// Known servers excluded from both role partitions.
    pub unclassified: usize,
    /// Idle pooled connections summed over all servers.
    pub idle_connections: usize,
    /// Whether a synchronization pass is in flight.
    pub syncing: bool,
    /// Outstanding logical owners of the topology.
    pub references: usize,
}
