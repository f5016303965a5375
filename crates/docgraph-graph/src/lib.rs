//! docgraph Graph Library
//!
//! Neo4j client, batched sync executors and the queue-driven sync engine.

pub mod client;
pub mod control;
pub mod engine;
pub mod error;
pub mod queue;
pub mod schema;
pub mod statement;
pub mod sync;

#[cfg(test)]
mod testing;

pub use client::{GraphClient, GraphConfig, GraphConnector, GraphSession, GraphTransaction, Neo4jConnector};
pub use control::ControlPlane;
pub use engine::{Collaborators, EngineConfig, PendingCancel, SyncEngine};
pub use error::{GraphError, GraphResult};
pub use schema::initialize_schema;
pub use statement::{QuerySummary, Statement, StatementResult};
pub use sync::compute_batch_size;
