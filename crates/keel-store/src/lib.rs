//! keel-store — sled-backed persistent store for the keel ledger.
//!
//! The store is the write mediator: uniqueness is enforced through index
//! trees, immutable columns have no mutation API, and multi-row writes go
//! through a staged commit that validates and encodes every row (event-log
//! entry included) before the first insert.

mod db;
mod staged;

pub use db::StoreDb;
pub use staged::StagedWrite;
