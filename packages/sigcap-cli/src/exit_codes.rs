/// Recording or discovery completed
pub const SUCCESS: i32 = 0;
/// Invalid arguments or configuration
pub const INPUT_ERROR: i32 = 2;
/// None of the requested stream types could be resolved
pub const NO_SOURCES: i32 = 3;
/// Failure while running (I/O, task failure, output)
pub const EXECUTION_ERROR: i32 = 4;

use sigcap::CaptureError;

/// Exit code for a library error
pub fn for_error(error: &CaptureError) -> i32 {
    match error {
        CaptureError::NoSources(_) => NO_SOURCES,
        CaptureError::Config(_) | CaptureError::UnknownStreamKind(_) => INPUT_ERROR,
        _ => EXECUTION_ERROR,
    }
}
