pub mod audit_log;
pub mod embedding_store;

pub use audit_log::{AuditEntry, AuditLog, AuditSource, AuditSummary, FileAuditLog, MemoryAuditLog};
pub use embedding_store::{
    EmbeddingStore, EnrolledUser, Entries, FileEmbeddingStore, MemoryEmbeddingStore,
};
