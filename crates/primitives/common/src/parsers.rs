use anyhow::{bail, Context};
use std::time::Duration;

/// Parses a duration from a human readable string.
///
/// Accepted units are `ms`, `s`, `m` and `h`, e.g. `200ms`, `4s`, `1m`, `2h`. A bare number is read as milliseconds.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("Empty duration");
    }

    let split_at = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (value, unit) = s.split_at(split_at);
    let value: u64 = value.parse().with_context(|| format!("Invalid duration value in {s:?}"))?;

    let secs_per_unit = match unit.trim() {
        "" | "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        unit => bail!("Invalid duration unit {unit:?}, expected one of ms, s, m, h"),
    };
    let secs = value.checked_mul(secs_per_unit).with_context(|| format!("Duration {s:?} is too large"))?;
    Ok(Duration::from_secs(secs))
}
