//! Series normalizer
//!
//! Turns upstream OHLC rows into `PricePoint`s. The last row of every
//! upstream array is the still-open bucket: its values keep changing until
//! the interval closes, so it is always dropped before conversion. A
//! response with 0 or 1 rows therefore has nothing closed to ingest yet.

use chrono::DateTime;

use crate::error::{CollectorError, CollectorResult};
use crate::types::price_point::{format_price, format_volume};
use crate::types::{PricePoint, RawBucketRow, RAW_ROW_WIDTH};

/// Normalize every closed bucket in `rows`.
///
/// Returns exactly `rows.len() - 1` points for two or more rows and an empty
/// vector otherwise. Any retained row that is not 7 fields wide fails the
/// whole batch; no partial result is returned.
pub fn normalize(rows: &[RawBucketRow]) -> CollectorResult<Vec<PricePoint>> {
    let closed = match rows.split_last() {
        Some((_open_bucket, closed)) => closed,
        None => return Ok(Vec::new()),
    };

    closed.iter().map(|row| to_price_point(row)).collect()
}

/// Convert a single closed row
pub fn to_price_point(row: &[f64]) -> CollectorResult<PricePoint> {
    if row.len() != RAW_ROW_WIDTH {
        return Err(malformed(row));
    }

    let unix_time = row[0];
    if !unix_time.is_finite() {
        return Err(malformed(row));
    }
    let unix_time = unix_time.trunc() as i64;
    let close_time = DateTime::from_timestamp(unix_time, 0).ok_or_else(|| malformed(row))?;

    Ok(PricePoint {
        unix_time,
        close_time,
        open_price: format_price(row[1]),
        high_price: format_price(row[2]),
        low_price: format_price(row[3]),
        close_price: format_price(row[4]),
        volume: format_volume(row[5]),
        quote_volume: format_volume(row[6]),
    })
}

fn malformed(row: &[f64]) -> CollectorError {
    CollectorError::MalformedRow {
        length: row.len(),
        row: row.to_vec(),
    }
}

/// Greatest `unix_time` in a batch, i.e. the watermark it advances to
pub fn batch_high_watermark(points: &[PricePoint]) -> Option<i64> {
    points.iter().map(|p| p.unix_time).max()
}

/// Whether the batch is strictly ascending by `unix_time`
pub fn is_time_ordered(points: &[PricePoint]) -> bool {
    points.windows(2).all(|w| w[0].unix_time < w[1].unix_time)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(t: f64, close: f64) -> RawBucketRow {
        vec![t, close - 1.0, close + 1.0, close - 2.0, close, 1.0, close]
    }

    #[test]
    fn test_empty_and_single_row_yield_nothing() {
        assert!(normalize(&[]).unwrap().is_empty());
        assert!(normalize(&[row(1000.0, 10.0)]).unwrap().is_empty());
    }

    #[test]
    fn test_single_malformed_row_is_the_open_bucket() {
        // The only row is the unstable tail and is never inspected
        let points = normalize(&[vec![1.0, 2.0]]).unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn test_drops_only_the_tail() {
        let rows: Vec<RawBucketRow> = (0..5).map(|i| row(1000.0 + 60.0 * i as f64, 10.0)).collect();
        let points = normalize(&rows).unwrap();

        assert_eq!(points.len(), 4);
        assert_eq!(points.first().unwrap().unix_time, 1000);
        assert_eq!(points.last().unwrap().unix_time, 1180);
    }

    #[test]
    fn test_field_mapping() {
        let rows = vec![
            vec![1000.0, 10.0, 12.0, 9.0, 11.0, 5.0, 50.0],
            vec![1060.0, 11.0, 13.0, 10.0, 12.0, 6.0, 60.0],
        ];
        let points = normalize(&rows).unwrap();
        let p = &points[0];

        assert_eq!(p.unix_time.to_string(), "1000");
        assert_eq!(p.close_time.timestamp(), 1000);
        assert_eq!(p.open_price, "10.00");
        assert_eq!(p.high_price, "12.00");
        assert_eq!(p.low_price, "9.00");
        assert_eq!(p.close_price, "11.00");
        assert_eq!(p.volume, "5.00000000");
        assert_eq!(p.quote_volume, "50.00000000");
    }

    #[test]
    fn test_rejects_short_and_long_rows() {
        for bad in [vec![1000.0, 1.0, 1.0, 1.0, 1.0, 1.0], vec![1000.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]] {
            let rows = vec![row(940.0, 10.0), bad.clone(), row(1120.0, 10.0)];
            match normalize(&rows) {
                Err(CollectorError::MalformedRow { length, row }) => {
                    assert_eq!(length, bad.len());
                    assert_eq!(row, bad);
                }
                other => panic!("expected MalformedRow, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_fractional_timestamp_truncates() {
        let rows = vec![row(1000.5, 10.0), row(1060.9, 10.0), row(1120.0, 10.0)];
        let points = normalize(&rows).unwrap();

        assert_eq!(points[0].unix_time, 1000);
        assert_eq!(points[0].close_time.timestamp(), 1000);
        assert_eq!(points[1].unix_time, 1060);
    }

    #[test]
    fn test_rejects_non_finite_timestamp() {
        let rows = vec![row(f64::NAN, 10.0), row(1060.0, 10.0)];
        assert!(matches!(
            normalize(&rows),
            Err(CollectorError::MalformedRow { length: 7, .. })
        ));
    }

    #[test]
    fn test_high_watermark_and_ordering() {
        let rows = vec![row(1000.0, 1.0), row(1060.0, 1.0), row(1120.0, 1.0)];
        let points = normalize(&rows).unwrap();

        assert_eq!(batch_high_watermark(&points), Some(1060));
        assert!(is_time_ordered(&points));
        assert_eq!(batch_high_watermark(&[]), None);
    }
}
