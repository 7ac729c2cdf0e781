use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

static RETRY_AFTER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)retry[ _-]?after\D{0,3}?(\d+(?:\.\d+)?)\s*(milliseconds?|ms|minutes?|mins?|m|seconds?|secs?|s)?\b",
    )
    .ok()
});

/// Extract a retry hint from a transport error message.
///
/// Recognises `retry after 30s`, `retry after 2m`, `Retry-After: 15`
/// (seconds when no unit is given) and `retry after 500ms`.
pub fn parse_retry_after(text: &str) -> Option<Duration> {
    let re = RETRY_AFTER.as_ref()?;
    let caps = re.captures(text)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_default();

    let secs = match unit.as_str() {
        "ms" | "millisecond" | "milliseconds" => value / 1000.0,
        "m" | "min" | "mins" | "minute" | "minutes" => value * 60.0,
        _ => value,
    };
    Duration::try_from_secs_f64(secs).ok()
}

/// How long to back off after a rate-limit response.
///
/// The channel's own hint wins when it is shorter than `ceiling`; without a
/// hint the full ceiling is used.
pub fn rate_limit_backoff(hint: Option<Duration>, ceiling: Duration) -> Duration {
    hint.map_or(ceiling, |h| h.min(ceiling))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds_minutes_and_millis() {
        assert_eq!(
            parse_retry_after("rate limited: retry after 30s"),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("Rate limit hit, retry after 2m"),
            Some(Duration::from_secs(120))
        );
        assert_eq!(
            parse_retry_after("slow down, retry after 500ms"),
            Some(Duration::from_millis(500))
        );
        assert_eq!(
            parse_retry_after("retry after 5 seconds please"),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn bare_header_value_is_seconds() {
        assert_eq!(
            parse_retry_after("HTTP 429 Retry-After: 15"),
            Some(Duration::from_secs(15))
        );
    }

    #[test]
    fn no_hint_in_unrelated_text() {
        assert_eq!(parse_retry_after("connection reset by peer"), None);
    }

    #[test]
    fn backoff_is_capped() {
        let ceiling = Duration::from_secs(5);
        assert_eq!(
            rate_limit_backoff(Some(Duration::from_secs(120)), ceiling),
            ceiling
        );
        assert_eq!(
            rate_limit_backoff(Some(Duration::from_secs(2)), ceiling),
            Duration::from_secs(2)
        );
        assert_eq!(rate_limit_backoff(None, ceiling), ceiling);
    }
}
