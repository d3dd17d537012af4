// Vector store persistence module
// Flat inner-product index, its parallel metadata, and their on-disk generations

pub mod consistency;
pub mod index;
pub mod lock;
pub mod metadata;
pub mod snapshot;

pub use consistency::{ConsistencyReport, validate_consistency};
pub use index::{FlatIndex, Neighbor, VectorIndex};
pub use lock::{LockOptions, WriterLock};
pub use metadata::{ChunkRecord, MetadataStore};
pub use snapshot::{Snapshot, SnapshotStorage};
