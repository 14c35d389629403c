//! Core types shared by every steward component: the error enum, its
//! failure classes, and user-facing error formatting.

pub mod error;
pub mod error_formatting;

pub use error::{ErrorClass, ErrorContext, StewardError, classify, find_steward_error};
pub use error_formatting::{create_error_context, user_friendly_error};
