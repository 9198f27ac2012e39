// Kernel - core infrastructure with dependency injection
//
// The ControlKernel holds all control-plane dependencies (stores, KV, the
// deployment provider) and provides access via traits for testability.
//
// IMPORTANT: Kernel is for INFRASTRUCTURE only, not scaling logic.
// Scaling logic belongs in the autoscaler layer.

pub mod kernel;
pub mod kv;
pub mod lock;
pub mod test_dependencies;

pub use kernel::ControlKernel;
pub use kv::{KvStore, MemoryKv, RedisKv};
pub use lock::{LeaseLock, LockManager};
pub use test_dependencies::TestDependencies;
