use bincode::{Decode, Encode};
pub use quotebot_core::Candidate;
use quotebot_core::Timestamp;
use serde::Serialize;

#[macro_export]
macro_rules! def_table {
    ($(#[$outer:meta])*
        $name:ident : $k:ty => $v:ty) => {
        #[allow(unused)]
        $(#[$outer])*
        pub mod $name {
            use super::*;
            pub type Key = $k;
            pub type Value = $v;
            pub type Definition<'a> = redb_bincode::TableDefinition<'a, Key, Value>;
            pub trait ReadableTable: redb_bincode::ReadableTable<Key, Value> {}
            impl<RT> ReadableTable for RT where RT: redb_bincode::ReadableTable<Key, Value> {}
            pub type Table<'a> = redb_bincode::Table<'a, Key, Value>;
            pub const TABLE: Definition = redb_bincode::TableDefinition::new(stringify!($name));
        }
    };
}

def_table! {
    /// Tracks database/schema version
    db_version: () => u64
}

def_table! {
    /// The singleton bot state record
    bot_state: () => BotState
}

def_table! {
    /// Every candidate ever enqueued, keyed by the external post id
    ///
    /// Used rows stay here (until pruned), so re-discovering an old post
    /// doesn't enqueue it again.
    candidates: String => Candidate
}

def_table! {
    /// Ids of candidates with `used_at` not set
    ///
    /// Keeps claiming and counting proportional to the live queue rather
    /// than to the whole history.
    candidates_pending: String => ()
}

def_table! {
    /// Ids that were successfully published, with the publication time
    posted: String => Timestamp
}

/// Cross-invocation bot state.
///
/// All fields are [`Timestamp::ZERO`] until first set.
#[derive(Debug, Encode, Decode, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BotState {
    pub last_posted_at: Timestamp,
    pub last_fetch_at: Timestamp,
    /// Refill searches are suppressed until this deadline, after a
    /// rate-limited search.
    pub next_fetch_at: Timestamp,
}

/// Partial update of [`BotState`]: `None` leaves a field unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BotStatePatch {
    pub last_posted_at: Option<Timestamp>,
    pub last_fetch_at: Option<Timestamp>,
    pub next_fetch_at: Option<Timestamp>,
}

impl BotStatePatch {
    pub fn is_empty(&self) -> bool {
        self.last_posted_at.is_none() && self.last_fetch_at.is_none() && self.next_fetch_at.is_none()
    }
}

impl BotState {
    pub fn apply(self, patch: BotStatePatch) -> Self {
        Self {
            last_posted_at: patch.last_posted_at.unwrap_or(self.last_posted_at),
            last_fetch_at: patch.last_fetch_at.unwrap_or(self.last_fetch_at),
            next_fetch_at: patch.next_fetch_at.unwrap_or(self.next_fetch_at),
        }
    }
}
