// =============================================================================
// CSV Replay — offline price history in the data-miner export format
// =============================================================================
//
// Header row names the columns (`Datetime,Open,High,Low,Close,Volume` from the
// miner, or already-normalized `time,open,...`). Each row becomes a RawCandle
// so it goes through the same normalizer as live data. Cells that parse as
// numbers become JSON numbers, everything else stays a string.
// =============================================================================

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Number, Value};
use tracing::info;

use super::candle::RawCandle;

/// Read every row of a CSV file as a raw candle.
pub fn read_raw_candles(path: impl AsRef<Path>) -> Result<Vec<RawCandle>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open replay CSV {}", path.display()))?;
    let rows = read_from(file).with_context(|| format!("failed to read {}", path.display()))?;
    info!(path = %path.display(), rows = rows.len(), "replay CSV loaded");
    Ok(rows)
}

/// Parse CSV content from any reader.
pub fn read_from(reader: impl Read) -> Result<Vec<RawCandle>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = rdr.headers().context("CSV has no header row")?.clone();

    let mut out = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("malformed CSV row {}", line + 2))?;
        let obj: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, cell)| (h.to_string(), cell_value(cell)))
            .collect();
        out.push(RawCandle(Value::Object(obj)));
    }
    Ok(out)
}

fn cell_value(cell: &str) -> Value {
    cell.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(cell.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::series::CandleSeries;
    use crate::market_data::PricePolicy;

    #[test]
    fn miner_export_normalizes() {
        let data = "\
Datetime,Open,High,Low,Close,Volume
2024-01-01 01:00:00+00:00,42.5,43.0,42.0,42.8,1200
2024-01-01 00:00:00+00:00,42.0,42.6,41.9,42.5,900
garbage,1,1,1,1,1
";
        let rows = read_from(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3);

        let (series, rejected) = CandleSeries::from_batch(&rows, PricePolicy::Reject, None);
        assert_eq!(rejected, 1);
        let v = series.to_vec();
        assert_eq!(v[0].time, 1_704_067_200);
        assert_eq!(v[1].time, 1_704_070_800);
        assert_eq!(v[1].close, 42.8);
    }

    #[test]
    fn numeric_epoch_column_is_kept_numeric() {
        let data = "time,open,high,low,close\n1545436800,75.16,82.84,36.16,45.72\n";
        let rows = read_from(data.as_bytes()).unwrap();
        let c = rows[0].normalize(PricePolicy::Reject).unwrap();
        assert_eq!(c.time, 1_545_436_800);
        assert_eq!(c.low, 36.16);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_raw_candles("/definitely/not/here.csv").is_err());
    }
}
