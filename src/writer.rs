use crate::candle::Candle;
use anyhow::Result;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Persists one token's candles as `{dir}/{name}.csv`, newest first, with the
/// fixed column header. A rerun silently overwrites the previous file.
pub fn write_candles(dir: &Path, name: &str, mut candles: Vec<Candle>) -> Result<PathBuf> {
    candles.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let path = dir.join(format!("{name}.csv"));
    let file = File::create(&path)?;
    let mut wtr = csv::Writer::from_writer(file);
    for candle in &candles {
        wtr.serialize(candle)?;
    }
    wtr.flush()?;

    Ok(path)
}
