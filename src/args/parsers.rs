use std::time::Duration;

use crate::config::parse_duration;
use crate::error::ValidationError;

pub(crate) fn parse_duration_arg(s: &str) -> Result<Duration, ValidationError> {
    parse_duration(s)
}
