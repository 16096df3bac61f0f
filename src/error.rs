/// Type-erased error, used at the server boundary where protocol
/// specific errors have already been acted upon.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
