use super::types::{AnomalyFunction, TimeUnit};

pub const ACCELERATED_WINDOW_SIZE: i32 = 7;
pub const ACCELERATED_WINDOW_UNIT: TimeUnit = TimeUnit::Days;
/// Mondays at midnight.
pub const ACCELERATED_CRON: &str = "0 0 0 ? * MON *";

/// Swaps the function's window and schedule for a 7-day lookback evaluated weekly.
/// Every native unit maps to the same cadence. Only applied to clones.
pub fn speed_up(function: &mut AnomalyFunction) {
    function.window_size = ACCELERATED_WINDOW_SIZE;
    function.window_unit = ACCELERATED_WINDOW_UNIT;
    function.cron = ACCELERATED_CRON.to_string();
}
