pub type Result<T> = std::result::Result<T, DispatchError>;

/// Dispatch errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The admission pool was closed during shutdown
    #[error("admission pool is closed")]
    Closed,
}
