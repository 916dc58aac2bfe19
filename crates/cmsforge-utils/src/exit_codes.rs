//! Exit code constants for the cmsforge CLI.
//!
//! # Exit Code Table
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Operation completed successfully |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments or configuration |
//! | 3 | `PREFLIGHT` | Pre-flight check failed, nothing was created |
//! | 4 | `STEP_FAILED` | A provisioning step failed and rollback ran |
//! | 10 | `TIMEOUT` | A readiness or CI wait exhausted its budget |

/// Exit codes matching the documented exit code table.
///
/// Use the named constants, or [`as_i32()`](Self::as_i32) to get the numeric
/// value for `std::process::exit()`.
///
/// # Example
///
/// ```rust
/// use cmsforge_utils::ExitCode;
///
/// assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
/// assert_eq!(ExitCode::PREFLIGHT, ExitCode::from_i32(3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Success - operation completed successfully
    pub const SUCCESS: ExitCode = ExitCode(0);

    /// Internal error - general failure
    pub const INTERNAL: ExitCode = ExitCode(1);

    /// CLI arguments or configuration error
    pub const CLI_ARGS: ExitCode = ExitCode(2);

    /// Pre-flight check failed before any resource was created
    pub const PREFLIGHT: ExitCode = ExitCode(3);

    /// A provisioning step failed; compensation was attempted
    pub const STEP_FAILED: ExitCode = ExitCode(4);

    /// Readiness or CI wait timed out
    pub const TIMEOUT: ExitCode = ExitCode(10);

    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }

    /// Stable name for JSON output and logs
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.0 {
            0 => "SUCCESS",
            2 => "CLI_ARGS",
            3 => "PREFLIGHT",
            4 => "STEP_FAILED",
            10 => "TIMEOUT",
            _ => "INTERNAL",
        }
    }
}

impl From<i32> for ExitCode {
    fn from(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
        assert_eq!(ExitCode::INTERNAL.as_i32(), 1);
        assert_eq!(ExitCode::CLI_ARGS.as_i32(), 2);
        assert_eq!(ExitCode::PREFLIGHT.as_i32(), 3);
        assert_eq!(ExitCode::STEP_FAILED.as_i32(), 4);
        assert_eq!(ExitCode::TIMEOUT.as_i32(), 10);
    }

    #[test]
    fn test_exit_code_names() {
        assert_eq!(ExitCode::PREFLIGHT.name(), "PREFLIGHT");
        assert_eq!(ExitCode::from_i32(77).name(), "INTERNAL");
    }

    #[test]
    fn test_exit_code_conversions() {
        let code: ExitCode = 4.into();
        assert_eq!(code, ExitCode::STEP_FAILED);
        let raw: i32 = ExitCode::TIMEOUT.into();
        assert_eq!(raw, 10);
    }
}
