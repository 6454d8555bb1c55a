//! Parallel checkpoint writer core.
//!
//! A group of workers writes its data into a small number of shared output
//! files. Each file (shard) is owned by a fixed chain of ranks that take
//! exclusive turns through a token passed over a [`GroupTransport`]. During
//! its turn a rank writes its datasets into the shard's container, resolving
//! a [`CompressionPlan`] per dataset, and streams the container image to an
//! [`ObjectStoreClient`].
//!
//! ```text
//! rank 0 ──token──▶ rank 2 ──token──▶ rank 4     shard 0
//! rank 1 ──token──▶ rank 3 ──token──▶ rank 5     shard 1
//! ```

mod backend;
mod coordinator;
mod data;
mod error;
mod image;
mod orchestrator;
mod plan;
mod registry;
mod transport;
mod upload;

pub use crate::backend::*;
pub use crate::coordinator::*;
pub use crate::data::*;
pub use crate::error::*;
pub use crate::image::*;
pub use crate::orchestrator::*;
pub use crate::plan::*;
pub use crate::registry::*;
pub use crate::transport::*;
pub use crate::upload::*;
