use std::time::Duration;

use crate::error::ValidationError;

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 3600;

/// Parses `<number><unit>` where unit is `ms`, `s`, `m` or `h`. A bare number
/// is seconds.
pub(crate) fn parse_duration(value: &str) -> Result<Duration, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::DurationEmpty);
    }
    let split = value
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    if digits.is_empty() {
        return Err(ValidationError::InvalidDurationFormat {
            value: value.to_owned(),
        });
    }
    let number: u64 = digits
        .parse()
        .map_err(|source| ValidationError::InvalidDurationNumber {
            value: value.to_owned(),
            source,
        })?;

    let duration = match unit.trim() {
        "ms" => Duration::from_millis(number),
        "" | "s" => Duration::from_secs(number),
        "m" => Duration::from_secs(
            number
                .checked_mul(SECS_PER_MINUTE)
                .ok_or(ValidationError::DurationOverflow)?,
        ),
        "h" => Duration::from_secs(
            number
                .checked_mul(SECS_PER_HOUR)
                .ok_or(ValidationError::DurationOverflow)?,
        ),
        other => {
            return Err(ValidationError::InvalidDurationUnit {
                unit: other.to_owned(),
            });
        }
    };
    if duration.is_zero() {
        return Err(ValidationError::DurationZero);
    }
    Ok(duration)
}
