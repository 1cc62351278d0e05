//! Group membership and shard ownership.
//!
//! Zones are spread over a fixed keyspace of [`SHARD_COUNT`] shards (see
//! [`crate::model::shard_of`]). Each live worker owns one contiguous range:
//!
//! ```text
//! members (sorted)   w-a          w-b          w-c
//! shards             0 ... 1364   1365 ... 2729 2730 ... 4095
//! ```
//!
//! For a given membership view the ranges are disjoint and together cover
//! every shard. When membership changes, workers recompute independently and
//! may briefly overlap; tasks are idempotent so that is harmless.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics;

/// Size of the zone keyspace.
pub const SHARD_COUNT: u16 = 4096;

/// The slice of the keyspace owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Partition {
    /// Owns nothing.
    Empty,
    /// Owns shards `first..=last`.
    Range {
        /// First owned shard.
        first: u16,
        /// Last owned shard (inclusive).
        last: u16,
    },
}

impl Partition {
    /// The whole keyspace.
    pub fn full() -> Self {
        Partition::Range {
            first: 0,
            last: SHARD_COUNT - 1,
        }
    }

    /// No shards.
    pub fn empty() -> Self {
        Partition::Empty
    }

    /// True if `shard` falls inside this partition.
    pub fn contains(&self, shard: u16) -> bool {
        match *self {
            Partition::Empty => false,
            Partition::Range { first, last } => (first..=last).contains(&shard),
        }
    }

    /// Number of owned shards.
    pub fn len(&self) -> usize {
        match *self {
            Partition::Empty => 0,
            Partition::Range { first, last } => usize::from(last - first) + 1,
        }
    }

    /// True if no shards are owned.
    pub fn is_empty(&self) -> bool {
        matches!(self, Partition::Empty)
    }
}

/// Compute the partition owned by `member_id` for a membership view.
///
/// Members are sorted and deduplicated so every worker derives the same
/// layout from the same view. A worker missing from the view owns nothing.
pub fn owned_range(member_id: &str, members: &[String]) -> Partition {
    let mut members: Vec<&str> = members.iter().map(String::as_str).collect();
    members.sort_unstable();
    members.dedup();

    let Some(index) = members.iter().position(|m| *m == member_id) else {
        return Partition::Empty;
    };

    let total = u32::from(SHARD_COUNT);
    let count = members.len() as u32;
    let index = index as u32;
    let first = index * total / count;
    let next = (index + 1) * total / count;

    if next == first {
        return Partition::Empty;
    }

    Partition::Range {
        first: first as u16,
        last: (next - 1) as u16,
    }
}

/// Source of the live worker set.
///
/// Failure detection belongs to the implementation; the assigner only maps
/// the reported view to shard ownership.
pub trait MembershipSource: Send + Sync {
    /// Current live members.
    fn members(&self) -> Vec<String>;

    /// Change feed of the member list.
    fn subscribe(&self) -> watch::Receiver<Vec<String>>;
}

/// Membership fixed by configuration, replaceable at runtime.
#[derive(Debug)]
pub struct StaticMembership {
    tx: watch::Sender<Vec<String>>,
}

impl StaticMembership {
    /// Create a source reporting `members`.
    pub fn new(members: Vec<String>) -> Self {
        let (tx, _) = watch::channel(members);
        Self { tx }
    }

    /// Replace the member list and notify subscribers.
    pub fn set_members(&self, members: Vec<String>) {
        self.tx.send_replace(members);
    }
}

impl MembershipSource for StaticMembership {
    fn members(&self) -> Vec<String> {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Vec<String>> {
        self.tx.subscribe()
    }
}

/// Tracks the partition owned by this worker.
#[derive(Clone)]
pub struct PartitionAssigner {
    member_id: String,
    source: Arc<dyn MembershipSource>,
    current: Arc<RwLock<Partition>>,
}

impl PartitionAssigner {
    /// Create an assigner and compute the initial partition.
    pub fn new(member_id: impl Into<String>, source: Arc<dyn MembershipSource>) -> Self {
        let member_id = member_id.into();
        let initial = owned_range(&member_id, &source.members());
        Self {
            member_id,
            source,
            current: Arc::new(RwLock::new(initial)),
        }
    }

    /// This worker's identity in the membership view.
    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    /// Last computed partition.
    pub fn current(&self) -> Partition {
        *self.current.read()
    }

    /// Recompute from an explicit view and store the result.
    pub fn refresh(&self, members: &[String]) -> Partition {
        let partition = owned_range(&self.member_id, members);
        let previous = std::mem::replace(&mut *self.current.write(), partition);

        if previous != partition {
            info!(
                member_id = %self.member_id,
                members = members.len(),
                ?partition,
                "partition reassigned"
            );
        }
        if partition.is_empty() {
            warn!(member_id = %self.member_id, "worker owns no shards");
        }
        metrics::record_partition(partition.len(), members.len());

        partition
    }

    /// Recompute on every membership change until cancelled.
    pub async fn run(self, token: CancellationToken) {
        let mut rx = self.source.subscribe();
        let members = rx.borrow_and_update().clone();
        self.refresh(&members);

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!("partition assigner shutting down");
                    return;
                }

                changed = rx.changed() => {
                    if changed.is_err() {
                        warn!("membership source closed, keeping last partition");
                        return;
                    }
                    let members = rx.borrow_and_update().clone();
                    self.refresh(&members);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn members(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn assert_exact_cover(view: &[String]) {
        let mut owners = vec![0u8; usize::from(SHARD_COUNT)];
        for member in view {
            let partition = owned_range(member, view);
            for shard in 0..SHARD_COUNT {
                if partition.contains(shard) {
                    owners[usize::from(shard)] += 1;
                }
            }
        }
        assert!(owners.iter().all(|&n| n == 1), "shards not covered exactly once");
    }

    #[test]
    fn test_single_member_owns_everything() {
        let view = members(&["w1"]);
        assert_eq!(owned_range("w1", &view), Partition::full());
    }

    #[test]
    fn test_ranges_are_disjoint_and_cover_keyspace() {
        for n in 1..=9 {
            let view: Vec<String> = (0..n).map(|i| format!("worker-{i}")).collect();
            assert_exact_cover(&view);
        }
    }

    #[test]
    fn test_order_and_duplicates_do_not_matter() {
        let a = members(&["w3", "w1", "w2"]);
        let b = members(&["w1", "w2", "w3", "w2"]);
        for m in ["w1", "w2", "w3"] {
            assert_eq!(owned_range(m, &a), owned_range(m, &b));
        }
    }

    #[test]
    fn test_absent_member_owns_nothing() {
        let view = members(&["w1", "w2"]);
        assert_eq!(owned_range("w9", &view), Partition::Empty);
        assert_eq!(owned_range("w1", &[]), Partition::Empty);
    }

    #[test]
    fn test_partition_len() {
        let view = members(&["a", "b"]);
        assert_eq!(owned_range("a", &view).len(), 2048);
        assert_eq!(Partition::empty().len(), 0);
        assert_eq!(Partition::full().len(), usize::from(SHARD_COUNT));
    }

    #[tokio::test]
    async fn test_assigner_recomputes_on_membership_change() {
        let source = Arc::new(StaticMembership::new(members(&["w1"])));
        let assigner = PartitionAssigner::new("w1", source.clone());
        assert_eq!(assigner.current(), Partition::full());

        let token = CancellationToken::new();
        let handle = tokio::spawn(assigner.clone().run(token.clone()));

        source.set_members(members(&["w1", "w2"]));

        let expected = owned_range("w1", &members(&["w1", "w2"]));
        for _ in 0..100 {
            if assigner.current() == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(assigner.current(), expected);

        token.cancel();
        handle.await.unwrap();
    }
}
