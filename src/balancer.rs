//! Partitioning strategies for produced records

/// Decides which partition a produced record is routed to.
///
/// Each backend maps the strategies it supports onto its client library's
/// partitioner; unsupported strategies fall back to round-robin,
/// deterministically per backend. The fallback for each strategy is
/// documented on the backend modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalancerStrategy {
    /// Evenly distributes records across all partitions. Suited to
    /// high-throughput workloads where per-key ordering does not matter.
    #[default]
    RoundRobin,
    /// Hashes the record key so identical keys land on the same partition,
    /// preserving per-key ordering.
    Hash,
    /// Keeps writing to one partition until the batch fills, then switches.
    /// Improves batching efficiency on clients that support it.
    Sticky,
    /// Kafka's Java-compatible murmur2 key hash. Produces the same
    /// partition assignment as the Java and Python clients.
    Murmur2,
    /// Routes to the partition with the least buffered data.
    LeastBytes,
    /// The record carries its own partition assignment
    /// ([`ProduceMessage::with_partition`](crate::ProduceMessage::with_partition)).
    /// Records without one fall back to round-robin.
    Manual,
}

impl BalancerStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalancerStrategy::RoundRobin => "round_robin",
            BalancerStrategy::Hash => "hash",
            BalancerStrategy::Sticky => "sticky",
            BalancerStrategy::Murmur2 => "murmur2",
            BalancerStrategy::LeastBytes => "least_bytes",
            BalancerStrategy::Manual => "manual",
        }
    }
}

impl std::fmt::Display for BalancerStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
