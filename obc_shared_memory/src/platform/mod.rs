//! OS bindings for shared memory objects and named semaphores

pub mod linux;

pub use linux::{NamedSemaphore, SemaphoreGuard, attach_object, create_object, unlink_object};
