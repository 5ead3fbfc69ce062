//! Exit codes of the `podbench` binary.
//! Scripts driving benchmark runs branch on these, so they are stable.

use podbench_auth::AuthError;

pub const SUCCESS: i32 = 0;
pub const REQUEST_FAILED: i32 = 1; // Resource answered with a non-success status
pub const CONFIG_ERROR: i32 = 2; // Bad arguments, configuration or enrollment
pub const AUTHORIZATION_FAILED: i32 = 3; // Discovery, exchange or claim gathering failed
pub const NETWORK_ERROR: i32 = 5; // Transport failure
pub const STREAM_ERROR: i32 = 6; // Event stream or response handling failed

/// Exit code for a library error.
pub fn for_error(err: &AuthError) -> i32 {
    match err.exit_code() {
        2 => CONFIG_ERROR,
        3 => AUTHORIZATION_FAILED,
        5 => NETWORK_ERROR,
        _ => STREAM_ERROR,
    }
}
