//! Dependency injection infrastructure.
//!
//! Services implement `FromRef<Context>` by cloning the handles they need out
//! of [`Context`](crate::context::Context). Tool handlers resolve them per call:
//!
//! ```ignore
//! let service: MemoryService = server.resolve();
//! ```

/// Trait for extracting a value from a reference to another type.
pub trait FromRef<T> {
    fn from_ref(input: &T) -> Self;
}

/// Blanket implementation: any Clone type can be extracted from itself.
impl<T: Clone> FromRef<T> for T {
    fn from_ref(input: &T) -> Self {
        input.clone()
    }
}
