//! Bundle data model: identities, metadata projections and full bundles.
mod block;
pub mod codec;
mod id;
mod meta;

pub use block::{Block, Bundle};
pub use id::{BundleId, Eid};
pub use meta::{MetaBundle, Priority, ProcFlags};
