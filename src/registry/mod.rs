pub mod commands;
pub mod controller;

pub use commands::{AlarmEdit, EditOutcome};
pub use controller::AlarmRegistry;

use crate::error::{RegistryError, RegistryResult};
use crate::models::Alarm;

pub const MAX_LABEL_CHARS: usize = 80;

pub(crate) fn validate(alarm: &Alarm) -> RegistryResult<()> {
    if alarm.label.chars().count() > MAX_LABEL_CHARS {
        return Err(RegistryError::LabelTooLong {
            max: MAX_LABEL_CHARS,
        });
    }
    alarm
        .repeat_days
        .validate()
        .map_err(RegistryError::InvalidRepeatDay)?;
    if !alarm.smart.wake_window_is_valid() {
        return Err(RegistryError::InvalidWakeWindow(
            alarm.smart.wake_window_minutes,
        ));
    }
    Ok(())
}
