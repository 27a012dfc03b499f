pub mod accounting;
pub mod cache;
pub mod documents;
pub mod fingerprint;
pub mod scheduler;
pub mod synthesis;

// Re-export commonly used types for convenience
pub use accounting::{AccessDenied, AllowAll, AuthorizationGate, LogUsage, QuotaLedger, UsageSink};
pub use cache::{CacheBackend, CacheError, CachedAudio, ResultCache};
pub use documents::{DocumentError, DocumentSource, InMemoryDocuments, LayeredDocuments};
pub use fingerprint::{AudioFormat, Fingerprint, RenderParams};
pub use scheduler::{
    BlockStatus, ErrorKind, PoolMode, RequestOutcome, Scheduler, SchedulerConfig, SchedulerError,
    StatusError, StatusUpdate, SynthesisRequest, WorkerPool,
};
pub use synthesis::{AcousticModel, SpeechRequest, SynthesisError, create_backend};
