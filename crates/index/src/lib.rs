//! DocChat Index
//!
//! Maps documents to persisted vector indices:
//! - [`vector_store`]: node embeddings with filtered nearest-neighbour search
//! - [`storage_context`]: docstore, index store and manifest persisted in the object store
//! - [`builder`]: load-or-rebuild of per-document and merged indices
//! - [`query_engine`]: document-scoped retrieval and answering over an index

pub mod builder;
pub mod index;
pub mod locks;
pub mod query_engine;
pub mod storage_context;
pub mod vector_store;

pub use builder::{IndexBuilder, RebuildAction, RebuildPolicy, StorageContextCache};
pub use index::VectorStoreIndex;
pub use locks::KeyedLocks;
pub use query_engine::{
    index_to_query_engine, index_to_query_engine_single, QueryEngine, QueryResponse,
    RetrieverQueryEngine,
};
pub use storage_context::{PersistLayout, StorageContext, FULLSTORE_INDEX_ID};
pub use vector_store::{
    create_vector_store, InMemoryVectorStore, MetadataFilter, PgVectorStore, VectorQuery,
    VectorRecord, VectorStore,
};
