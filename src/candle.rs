use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Timestamp layout used in the output files.
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One OHLCV candle enriched with an estimated market cap.
/// Field order here is the column order of the CSV files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub token: String,
    #[serde(with = "csv_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub marketcap: f64,
}

/// Serde adapter for `TS_FORMAT` (UTC, no offset suffix), so rows keep the
/// same timestamp layout the cleaner parses back.
pub mod csv_timestamp {
    use super::*;

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&ts.format(TS_FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, TS_FORMAT)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .map_err(serde::de::Error::custom)
    }
}

/// Estimator (a): circulating supply times the candle close.
///
/// The supply multiplier is sampled once per token from a current
/// (marketcap, price) quote and held constant across the whole lookback
/// window, so caps on older candles are approximate.
pub fn supply_marketcap(close: f64, circulating_supply: f64) -> f64 {
    close * circulating_supply
}

/// Estimator (b): cap-less proxy, mid price times traded volume.
/// Used where no supply source exists for the token.
pub fn volume_marketcap(high: f64, low: f64, volume: f64) -> f64 {
    ((high + low) / 2.0) * volume
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supply_estimator_scales_close() {
        assert_eq!(supply_marketcap(2.5, 1_000_000.0), 2_500_000.0);
    }

    #[test]
    fn volume_estimator_uses_mid_price() {
        // (40 + 20) / 2 * 10
        assert_eq!(volume_marketcap(40.0, 20.0, 10.0), 300.0);
    }

    #[test]
    fn timestamp_format_round_trips() {
        let ts = Utc.with_ymd_and_hms(2025, 4, 30, 12, 5, 0).unwrap();
        let formatted = ts.format(TS_FORMAT).to_string();
        assert_eq!(formatted, "2025-04-30 12:05:00");

        let parsed = NaiveDateTime::parse_from_str(&formatted, TS_FORMAT).unwrap();
        assert_eq!(Utc.from_utc_datetime(&parsed), ts);
    }
}
