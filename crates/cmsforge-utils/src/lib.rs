pub mod error;
pub mod exit_codes;
pub mod line_window;
pub mod logging;
pub mod redaction;

pub use error::{CmsForgeError, ErrorCategory, UserFriendlyError};
pub use exit_codes::ExitCode;
pub use line_window::LineWindow;
