use crate::error::ConfigError;
use indexmap::IndexMap;
use std::time::Duration;

/// Parse `key: value` pairs passed on the command line into ordered call metadata.
pub fn parse_metadata(pairs: &[String]) -> Result<IndexMap<String, String>, ConfigError> {
    let mut parsed = IndexMap::new();

    for pair in pairs {
        let parts: Vec<&str> = pair.splitn(2, ':').collect();
        if parts.len() != 2 || parts[0].trim().is_empty() {
            return Err(ConfigError::InvalidMetadata(format!(
                "expected 'key: value', got '{}'",
                pair
            )));
        }

        let key = parts[0].trim().to_ascii_lowercase();
        let value = parts[1].trim().to_string();
        parsed.insert(key, value);
    }

    Ok(parsed)
}

/// Parse a human duration such as `"100ms"`, `"30s"`, `"1m"`, `"2h"` or a bare
/// number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let trimmed = input.trim();
    let invalid = || ConfigError::InvalidDuration(input.to_string());

    if trimmed.is_empty() {
        return Err(invalid());
    }

    // "ms" must be checked before "s" and "m".
    let (number, unit_millis) = if let Some(n) = trimmed.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = trimmed.strip_suffix('s') {
        (n, 1_000.0)
    } else if let Some(n) = trimmed.strip_suffix('m') {
        (n, 60_000.0)
    } else if let Some(n) = trimmed.strip_suffix('h') {
        (n, 3_600_000.0)
    } else {
        (trimmed, 1_000.0)
    };

    let value: f64 = number.trim().parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }

    Ok(Duration::from_micros((value * unit_millis * 1_000.0).round() as u64))
}

/// Render a duration the way it would be written in a config file.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        "0s".to_string()
    } else if millis % 3_600_000 == 0 {
        format!("{}h", millis / 3_600_000)
    } else if millis % 60_000 == 0 {
        format!("{}m", millis / 60_000)
    } else if millis % 1_000 == 0 {
        format!("{}s", millis / 1_000)
    } else {
        format!("{}ms", millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration("0.5s").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for bad in ["", "abc", "-1s", "10x", "ms"] {
            assert!(parse_duration(bad).is_err(), "expected '{}' to be rejected", bad);
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_secs(60)), "1m");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn test_parse_metadata() {
        let parsed = parse_metadata(&["X-Region: eu".to_string(), "tenant:acme".to_string()])
            .unwrap();
        assert_eq!(parsed.get("x-region"), Some(&"eu".to_string()));
        assert_eq!(parsed.get("tenant"), Some(&"acme".to_string()));

        assert!(parse_metadata(&["no-separator".to_string()]).is_err());
        assert!(parse_metadata(&[": empty-key".to_string()]).is_err());
    }
}
