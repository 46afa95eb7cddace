use crate::candle::{Candle, TS_FORMAT};
use crate::writer;
use anyhow::Result;
use chrono::{NaiveDateTime, TimeZone, Utc};
use log::{info, warn};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Expected columns after header normalization, in output order.
const REQUIRED_COLUMNS: &[&str] = &[
    "token", "timestamp", "open", "high", "low", "close", "volume", "marketcap",
];

/// Rewrites every raw CSV in `input_dir` as a cleaned copy in `output_dir`.
/// Originals are left untouched; per-file failures never stop the batch.
pub fn run(input_dir: &Path, output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)?;

    let mut paths: Vec<PathBuf> = fs::read_dir(input_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().and_then(|ext| ext.to_str()) == Some("csv")
                && !path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .is_some_and(|stem| stem.ends_with("_cleaned"))
        })
        .collect();
    paths.sort();

    for path in &paths {
        info!("processing {}", path.display());
        match clean_file(path, output_dir) {
            Ok(Some(cleaned)) => info!("saved cleaned file {}", cleaned.display()),
            Ok(None) => warn!("skipped {} (missing expected columns)", path.display()),
            Err(err) => warn!("failed to clean {}: {err}", path.display()),
        }
    }

    Ok(())
}

/// One file: normalize headers, coerce rows, drop zero-cap rows, sort newest
/// first, drop duplicate (token, timestamp) pairs keeping the first seen.
/// Returns `None` when the header is missing a required column.
fn clean_file(path: &Path, output_dir: &Path) -> Result<Option<PathBuf>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|name| name.trim().to_lowercase())
        .collect();
    let columns: Vec<usize> = match REQUIRED_COLUMNS
        .iter()
        .map(|wanted| headers.iter().position(|name| name == wanted))
        .collect()
    {
        Some(indices) => indices,
        None => return Ok(None),
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let Ok(record) = record else { continue };
        if let Some(candle) = coerce_row(&record, &columns) {
            rows.push(candle);
        }
    }

    rows.retain(|candle| candle.marketcap != 0.0);
    rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let mut seen = HashSet::new();
    rows.retain(|candle| seen.insert((candle.token.clone(), candle.timestamp)));

    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("output");
    let cleaned = writer::write_candles(output_dir, &format!("{stem}_cleaned"), rows)?;
    Ok(Some(cleaned))
}

/// Type coercion for one record; any unparseable or non-finite field drops
/// the row, not the file.
fn coerce_row(record: &csv::StringRecord, columns: &[usize]) -> Option<Candle> {
    let field = |i: usize| record.get(columns[i]).map(str::trim);
    let number = |i: usize| {
        field(i)?
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
    };

    let token = field(0)?.to_string();
    let naive = NaiveDateTime::parse_from_str(field(1)?, TS_FORMAT).ok()?;

    Some(Candle {
        token,
        timestamp: Utc.from_utc_datetime(&naive),
        open: number(2)?,
        high: number(3)?,
        low: number(4)?,
        close: number(5)?,
        volume: number(6)?,
        marketcap: number(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("candle-collector-{tag}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_raw(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn zero_cap_and_duplicate_rows_are_removed() {
        let dir = temp_dir("clean-dedup");
        let raw = write_raw(
            &dir,
            "BTC.csv",
            "token,timestamp,open,high,low,close,volume,marketcap\n\
             BTC,2025-04-30 00:10:00,1.0,2.0,0.5,1.5,10.0,150.0\n\
             BTC,2025-04-30 00:05:00,1.0,2.0,0.5,1.5,10.0,0.0\n\
             BTC,2025-04-30 00:10:00,9.0,9.0,9.0,9.0,9.0,9.0\n\
             BTC,2025-04-30 00:00:00,1.0,2.0,0.5,1.5,10.0,150.0\n",
        );

        let cleaned = clean_file(&raw, &dir).unwrap().unwrap();
        let contents = fs::read_to_string(cleaned).unwrap();
        let lines: Vec<&str> = contents.lines().collect();

        // Four data rows in, two dropped: the zero cap and the duplicate.
        assert_eq!(lines.len(), 3);
        // The first occurrence after the descending sort wins.
        assert!(lines[1].starts_with("BTC,2025-04-30 00:10:00,1.0"));
        assert!(lines[2].starts_with("BTC,2025-04-30 00:00:00"));
    }

    #[test]
    fn malformed_rows_are_dropped_not_fatal() {
        let dir = temp_dir("clean-coerce");
        let raw = write_raw(
            &dir,
            "GMT.csv",
            "token,timestamp,open,high,low,close,volume,marketcap\n\
             GMT,2025-04-30 00:05:00,1.0,2.0,0.5,1.5,10.0,150.0\n\
             GMT,not-a-timestamp,1.0,2.0,0.5,1.5,10.0,150.0\n\
             GMT,2025-04-30 00:00:00,oops,2.0,0.5,1.5,10.0,150.0\n\
             GMT,2025-04-29 23:55:00,1.0,2.0,0.5,1.5,10.0,NaN\n",
        );

        let cleaned = clean_file(&raw, &dir).unwrap().unwrap();
        let contents = fs::read_to_string(cleaned).unwrap();

        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("2025-04-30 00:05:00"));
    }

    #[test]
    fn headers_are_trimmed_and_lowercased() {
        let dir = temp_dir("clean-headers");
        let raw = write_raw(
            &dir,
            "HIGH.csv",
            " Token ,TIMESTAMP,Open,High,Low,Close,Volume,MarketCap\n\
             HIGH,2025-04-30 00:00:00,1.0,2.0,0.5,1.5,10.0,150.0\n",
        );

        let cleaned = clean_file(&raw, &dir).unwrap().unwrap();
        let contents = fs::read_to_string(cleaned).unwrap();

        assert!(contents.starts_with("token,timestamp,open,high,low,close,volume,marketcap\n"));
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn files_missing_a_column_are_skipped() {
        let dir = temp_dir("clean-missing");
        let raw = write_raw(
            &dir,
            "BAD.csv",
            "token,timestamp,open,high,low,close,volume\n\
             BAD,2025-04-30 00:00:00,1.0,2.0,0.5,1.5,10.0\n",
        );

        assert!(clean_file(&raw, &dir).unwrap().is_none());
    }

    #[test]
    fn cleaning_is_idempotent() {
        let dir = temp_dir("clean-idempotent");
        let raw = write_raw(
            &dir,
            "PAXG.csv",
            "token,timestamp,open,high,low,close,volume,marketcap\n\
             PAXG,2025-04-30 00:05:00,1.25,2.5,0.125,1.5,10.5,157.5\n\
             PAXG,2025-04-30 00:05:00,1.25,2.5,0.125,1.5,10.5,157.5\n\
             PAXG,2025-04-30 00:00:00,3.0,4.0,2.0,3.5,1.0,3.5\n",
        );

        let first = clean_file(&raw, &dir).unwrap().unwrap();
        let second = clean_file(&first, &dir).unwrap().unwrap();

        let first_bytes = fs::read(&first).unwrap();
        let second_bytes = fs::read(&second).unwrap();
        assert_eq!(first_bytes, second_bytes);
    }

    #[test]
    fn run_ignores_already_cleaned_files() {
        let dir = temp_dir("clean-run");
        let out = temp_dir("clean-run-out");
        write_raw(
            &dir,
            "BNB.csv",
            "token,timestamp,open,high,low,close,volume,marketcap\n\
             BNB,2025-04-30 00:00:00,1.0,2.0,0.5,1.5,10.0,150.0\n",
        );
        write_raw(
            &dir,
            "BNB_cleaned.csv",
            "token,timestamp,open,high,low,close,volume,marketcap\n\
             BNB,2025-04-30 00:00:00,1.0,2.0,0.5,1.5,10.0,150.0\n",
        );

        run(&dir, &out).unwrap();

        assert!(out.join("BNB_cleaned.csv").exists());
        assert!(!out.join("BNB_cleaned_cleaned.csv").exists());
    }
}
