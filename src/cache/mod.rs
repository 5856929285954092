//! Folio catalog cache.
//!
//! One bounded LRU store per entity family, read-through lookups keyed by
//! scope and canonical options, and an event-driven fan-out that purges (and
//! optionally rewarms) every scope a committed mutation touches.
//!
//! ## Configuration
//!
//! Cache behavior is controlled via the `[cache]` section of `folio.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! fanout_policy = "purge_and_rewarm"
//! projects_capacity = 512
//! projects_ttl_secs = 3600
//! # ... see config.rs for all options
//! ```

mod config;
mod consumer;
mod events;
mod executor;
mod family;
mod keys;
pub(crate) mod lock;
mod planner;
mod store;
mod trigger;

pub use config::{CacheConfig, FamilyLimits, FanoutPolicy};
pub use consumer::{FanoutConsumer, Rewarm};
pub use events::{CacheEvent, Epoch, EventKind, EventQueue};
pub use executor::BackgroundTasks;
pub use family::{
    CacheFamily, CacheSlot, CatalogCaches, ChapterPayload, CoverPayload, EntityCache, Envelope,
    ProjectPayload,
};
pub use keys::{CompositeKey, KeyError, Scope, key_for, options_key, prefix_key, unit_key};
pub use planner::{FanoutPlan, Target};
pub use store::{CacheStats, KeyedLruStore};
pub use trigger::CacheTrigger;
