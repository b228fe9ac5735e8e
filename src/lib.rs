// Re-export needed modules for testing
pub mod error;
pub mod models;
pub mod wapi; // Bridge to the injected WAPI namespace

// Re-export main types for convenience
pub use error::{SessionError, WapiError};
pub use models::*;
pub use wapi::WhatsApi; // Expose the API facade directly
