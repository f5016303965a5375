//! docgraph Core Library
//!
//! Domain models, mapping settings and shared state for mirroring
//! document front matter into a graph database.

pub mod convert;
pub mod error;
pub mod history;
pub mod item;
pub mod names;
pub mod settings;
pub mod source;
pub mod state;
pub mod validate;

pub use convert::{GraphValue, PropertyType, convert_value};
pub use error::{DocGraphError, DocGraphResult};
pub use history::{FileHistoryStore, HISTORY_LIMIT, HistoryEntry, HistoryStore, MemoryHistoryStore};
pub use item::model::{
    ErrorCategory, ItemStats, NameCounts, RowError, SyncItem, SyncKind, SyncOutcome, SyncScope,
    SyncStatus,
};
pub use item::progress::{Progress, ProgressPhase};
pub use names::NameSet;
pub use settings::{Direction, LabelMapping, PropertyMapping, RelationshipMapping, SyncSettings};
pub use source::{
    Credentials, CredentialProvider, DocumentRef, DocumentSource, FrontMatter, FrontMatterReader,
    InMemoryDocuments, LinkExtractor, StaticCredentials,
};
pub use state::{QueuePatch, QueueState, RunPatch, RunState, StateEvent, StateStore, SubscriptionId, Topic};
