//! Maintenance tasks run by the [`Scheduler`](crate::scheduler::Scheduler).
//!
//! | name             | work per tick                                         |
//! |------------------|-------------------------------------------------------|
//! | `zone_purge`     | hard-delete zones soft-deleted longer than a threshold |
//! | `delayed_notify` | one propagation per flagged zone, then clear the flag  |
//! | `flatten_alias`  | refresh the A mirror of every ALIAS recordset          |

pub mod delayed_notify;
pub mod flatten_alias;
pub mod purge;

pub use delayed_notify::DelayedNotifyTask;
pub use flatten_alias::FlattenAliasTask;
pub use purge::DeletedZonePurgeTask;
