pub mod archive;
pub mod dump;
pub mod locker;
pub mod retention;

// Re-export commonly used types (used by the orchestrator and tests)
pub use archive::Artifact;
pub use dump::{DumpAttempt, DumpRunner, RealDumpRunner};
pub use locker::RunLock;
