//! Input validators and search-query normalization.

use url::Url;

use crate::{Error, Result};

/// Longest accepted search query, in characters.
const MAX_QUERY_LEN: usize = 500;

/// Search prefix applied when no source is given.
const DEFAULT_SEARCH_SOURCE: &str = "ytsearch";

/// Whether `value` is a platform snowflake: 17 to 20 decimal digits.
pub fn is_snowflake(value: &str) -> bool {
    (17..=20).contains(&value.len()) && value.bytes().all(|b| b.is_ascii_digit())
}

pub fn validate_guild_id(value: &str) -> Result<()> {
    if is_snowflake(value) {
        Ok(())
    } else {
        Err(Error::InvalidGuild(value.to_string()))
    }
}

pub fn validate_channel_id(value: &str) -> Result<()> {
    if is_snowflake(value) {
        Ok(())
    } else {
        Err(Error::InvalidChannel(value.to_string()))
    }
}

/// Player volume: integer in `[0, 1000]`.
pub fn validate_volume(value: i64) -> Result<u16> {
    if (0..=1000).contains(&value) {
        Ok(value as u16)
    } else {
        Err(Error::InvalidVolume(value))
    }
}

/// Playback position or end time: non-negative integer milliseconds.
pub fn validate_position(value: i64) -> Result<u64> {
    if value >= 0 {
        Ok(value as u64)
    } else {
        Err(Error::InvalidPosition(value))
    }
}

/// Whether `value` is an http(s) URL.
pub fn is_url(value: &str) -> bool {
    matches!(Url::parse(value), Ok(url) if matches!(url.scheme(), "http" | "https"))
}

/// Equalizer band index `0..=14`, gain `-0.25..=1.0`.
pub fn validate_equalizer_band(band: u8, gain: f64) -> Result<()> {
    if band > 14 {
        return Err(Error::InvalidFilter(format!(
            "equalizer band {band} out of range 0..=14"
        )));
    }
    if !(-0.25..=1.0).contains(&gain) {
        return Err(Error::InvalidFilter(format!(
            "equalizer gain {gain} out of range -0.25..=1.0"
        )));
    }
    Ok(())
}

/// Timescale components must each be in `(0, 10]`.
pub fn validate_timescale(speed: f64, pitch: f64, rate: f64) -> Result<()> {
    for (name, value) in [("speed", speed), ("pitch", pitch), ("rate", rate)] {
        if !(value > 0.0 && value <= 10.0) {
            return Err(Error::InvalidFilter(format!(
                "timescale {name} {value} out of range (0, 10]"
            )));
        }
    }
    Ok(())
}

/// Filter volume multiplier: `[0, 5]`.
pub fn validate_filter_volume(value: f64) -> Result<()> {
    if (0.0..=5.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidFilter(format!(
            "filter volume {value} out of range 0..=5"
        )))
    }
}

/// Whether the query already names a source, e.g. `scsearch:query`.
fn has_source_prefix(query: &str) -> bool {
    match query.split_once(':') {
        Some((prefix, _)) => {
            !prefix.is_empty()
                && prefix.len() <= 16
                && prefix.bytes().all(|b| b.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// Trim and cap a search query, prefixing a search source when the query is
/// neither a URL nor already source-prefixed.
pub fn normalize_search_query(query: &str, default_source: Option<&str>) -> String {
    let trimmed = query.trim();
    let capped: String = trimmed.chars().take(MAX_QUERY_LEN).collect();
    if is_url(&capped) || has_source_prefix(&capped) {
        return capped;
    }
    let source = default_source.unwrap_or(DEFAULT_SEARCH_SOURCE);
    format!("{source}:{capped}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflakes() {
        assert!(is_snowflake("12345678901234567"));
        assert!(is_snowflake("12345678901234567890"));
        assert!(!is_snowflake("1234567890123456"));
        assert!(!is_snowflake("123456789012345678901"));
        assert!(!is_snowflake("12345678901234567a"));
        assert!(!is_snowflake("not-a-channel-id"));
    }

    #[test]
    fn volume_bounds() {
        assert_eq!(validate_volume(0).unwrap(), 0);
        assert_eq!(validate_volume(1000).unwrap(), 1000);
        assert!(validate_volume(-1).is_err());
        assert!(validate_volume(1001).is_err());
    }

    #[test]
    fn position_bounds() {
        assert_eq!(validate_position(0).unwrap(), 0);
        assert!(validate_position(-5).is_err());
    }

    #[test]
    fn url_detection() {
        assert!(is_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(is_url("http://example.com/track?x=1"));
        assert!(!is_url("never gonna give you up"));
        // A source prefix parses as a URL scheme but is not a web URL.
        assert!(!is_url("ytsearch:never gonna"));
    }

    #[test]
    fn timescale_bounds() {
        assert!(validate_timescale(1.0, 1.0, 1.0).is_ok());
        assert!(validate_timescale(10.0, 0.1, 1.0).is_ok());
        assert!(validate_timescale(0.0, 1.0, 1.0).is_err());
        assert!(validate_timescale(1.0, 10.5, 1.0).is_err());
    }

    #[test]
    fn equalizer_bounds() {
        assert!(validate_equalizer_band(0, -0.25).is_ok());
        assert!(validate_equalizer_band(14, 1.0).is_ok());
        assert!(validate_equalizer_band(15, 0.0).is_err());
        assert!(validate_equalizer_band(3, 1.2).is_err());
    }

    #[test]
    fn query_normalization() {
        assert_eq!(
            normalize_search_query("  hello world  ", None),
            "ytsearch:hello world"
        );
        assert_eq!(
            normalize_search_query("hello", Some("scsearch")),
            "scsearch:hello"
        );
        assert_eq!(
            normalize_search_query("scsearch:already prefixed", None),
            "scsearch:already prefixed"
        );
        let url = "https://youtu.be/abc";
        assert_eq!(normalize_search_query(url, None), url);
    }

    #[test]
    fn query_truncated_to_cap() {
        let long = "x".repeat(600);
        let normalized = normalize_search_query(&long, None);
        assert_eq!(normalized.len(), "ytsearch:".len() + 500);
    }
}
