//! Date normalisation: one canonical `YYYY-MM-DD HH:MM:SS` string per row.
//!
//! Rows whose dates cannot be parsed get a null, they never fail the batch.

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;

use crate::error::Result;
use crate::tabular::text_column;

pub const LAST_UPDATE: &str = "LAST_UPDATE";
pub const LAST_UPDATE_DT: &str = "LAST_UPDATE_DT";
pub const LAST_TRADE_DATE: &str = "LAST_TRADE_DATE";
pub const LAST_TRADE_TIME: &str = "LAST_TRADE_TIME";
pub const TIMESTAMP_READ: &str = "timestamp_read_utc";

pub const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats tried for `timestamp_read_utc`, first match wins.
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

/// `YYYYMMDD`, exactly eight digits.
pub fn parse_compact_date(s: &str) -> Option<NaiveDateTime> {
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = s[0..4].parse().ok()?;
    let month = s[4..6].parse().ok()?;
    let day = s[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)
}

fn canonical(ts: NaiveDateTime) -> String {
    ts.format(CANONICAL_FORMAT).to_string()
}

/// Reconcile `LAST_UPDATE` with its date-only companion `LAST_UPDATE_DT`.
///
/// `primary` is expected with float artifacts already stripped. Without a
/// colon it is a compact date. With one it is either a full datetime or a
/// bare time that borrows its date from `companion`.
pub fn reconcile_last_update(primary: Option<&str>, companion: Option<&str>) -> Option<String> {
    let primary = primary?;
    if !primary.contains(':') {
        return parse_compact_date(primary).map(canonical);
    }
    NaiveDateTime::parse_from_str(primary, CANONICAL_FORMAT)
        .ok()
        .or_else(|| {
            let date = companion?;
            NaiveDateTime::parse_from_str(&format!("{date} {primary}"), CANONICAL_FORMAT).ok()
        })
        .map(canonical)
}

/// `LAST_TRADE_DATE LAST_TRADE_TIME`, only when both halves are present.
pub fn composite_last_trade(date: Option<&str>, time: Option<&str>) -> Option<String> {
    Some(format!("{} {}", date?, time?))
}

/// Parse a provider timestamp into canonical form. `T` separators are
/// accepted.
pub fn parse_read_timestamp(source: &str) -> Option<String> {
    let source = source.replace('T', " ");
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&source, fmt).ok())
        .or_else(|| parse_compact_date(&source))
        .map(canonical)
}

/// Prefer the reconciled `LAST_UPDATE`, fall back to the composite trade time.
pub fn read_timestamp(last_update: Option<&str>, last_trade: Option<&str>) -> Option<String> {
    parse_read_timestamp(last_update.or(last_trade)?)
}

/// Frame-level normaliser. Missing source columns read as all-null.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateNormalizer;

impl DateNormalizer {
    /// Rewrite `LAST_UPDATE` (when present) and add `timestamp_read_utc`.
    pub fn apply(&self, df: &mut DataFrame) -> Result<()> {
        let primary = text_column(df, LAST_UPDATE)?;
        let companion = text_column(df, LAST_UPDATE_DT)?;
        let trade_date = text_column(df, LAST_TRADE_DATE)?;
        let trade_time = text_column(df, LAST_TRADE_TIME)?;

        let last_update: Vec<Option<String>> = primary
            .iter()
            .zip(&companion)
            .map(|(p, c)| reconcile_last_update(p.as_deref(), c.as_deref()))
            .collect();

        let read: Vec<Option<String>> = last_update
            .iter()
            .zip(trade_date.iter().zip(&trade_time))
            .map(|(lu, (d, t))| {
                let trade = composite_last_trade(d.as_deref(), t.as_deref());
                read_timestamp(lu.as_deref(), trade.as_deref())
            })
            .collect();

        if df.column(LAST_UPDATE).is_ok() {
            df.with_column(Column::new(LAST_UPDATE.into(), last_update))?;
        }
        df.with_column(Column::new(TIMESTAMP_READ.into(), read))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular::records_to_frame;

    #[test]
    fn compact_last_update() {
        assert_eq!(
            reconcile_last_update(Some("20240115"), None).as_deref(),
            Some("2024-01-15 00:00:00")
        );
        assert_eq!(reconcile_last_update(Some("2024011"), None), None);
        assert_eq!(reconcile_last_update(Some("20241341"), None), None);
    }

    #[test]
    fn full_datetime_last_update() {
        assert_eq!(
            reconcile_last_update(Some("2024-01-15 09:30:00"), Some("2023-01-01")).as_deref(),
            Some("2024-01-15 09:30:00")
        );
    }

    #[test]
    fn time_only_last_update_borrows_companion_date() {
        assert_eq!(
            reconcile_last_update(Some("09:30:00"), Some("2024-01-15")).as_deref(),
            Some("2024-01-15 09:30:00")
        );
        assert_eq!(reconcile_last_update(Some("09:30:00"), None), None);
    }

    #[test]
    fn absent_last_update_is_null() {
        assert_eq!(reconcile_last_update(None, Some("2024-01-15")), None);
        assert_eq!(reconcile_last_update(None, None), None);
    }

    #[test]
    fn read_timestamp_formats_in_order() {
        assert_eq!(
            parse_read_timestamp("2024-01-15T09:30:00.123456").as_deref(),
            Some("2024-01-15 09:30:00")
        );
        assert_eq!(
            parse_read_timestamp("2024-01-15 09:30:00").as_deref(),
            Some("2024-01-15 09:30:00")
        );
        assert_eq!(
            parse_read_timestamp("20240115").as_deref(),
            Some("2024-01-15 00:00:00")
        );
        assert_eq!(parse_read_timestamp("N.A."), None);
    }

    #[test]
    fn falls_back_to_composite_trade_time() {
        let trade = composite_last_trade(Some("2024-01-15"), Some("09:30:00"));
        assert_eq!(
            read_timestamp(None, trade.as_deref()).as_deref(),
            Some("2024-01-15 09:30:00")
        );
        assert_eq!(composite_last_trade(Some("2024-01-15"), None), None);
        assert_eq!(read_timestamp(None, None), None);
    }

    #[test]
    fn frame_normalisation() {
        let mut df = records_to_frame(
            br#"[
                {"TICKER": "A", "LAST_UPDATE": 20240115.0, "LAST_UPDATE_DT": null,
                 "LAST_TRADE_DATE": null, "LAST_TRADE_TIME": null},
                {"TICKER": "B", "LAST_UPDATE": null, "LAST_UPDATE_DT": null,
                 "LAST_TRADE_DATE": "2024-01-15", "LAST_TRADE_TIME": "09:30:00"},
                {"TICKER": "C", "LAST_UPDATE": null, "LAST_UPDATE_DT": null,
                 "LAST_TRADE_DATE": null, "LAST_TRADE_TIME": null}
            ]"#,
        )
        .unwrap();
        DateNormalizer.apply(&mut df).unwrap();

        assert_eq!(
            text_column(&df, TIMESTAMP_READ).unwrap(),
            vec![
                Some("2024-01-15 00:00:00".to_string()),
                Some("2024-01-15 09:30:00".to_string()),
                None,
            ]
        );
        assert_eq!(
            text_column(&df, LAST_UPDATE).unwrap()[0].as_deref(),
            Some("2024-01-15 00:00:00")
        );
        assert_eq!(text_column(&df, "TICKER").unwrap()[2].as_deref(), Some("C"));
    }

    #[test]
    fn missing_source_columns_read_as_null() {
        let mut df = records_to_frame(br#"[{"TICKER": "A"}]"#).unwrap();
        DateNormalizer.apply(&mut df).unwrap();
        assert!(df.column(LAST_UPDATE).is_err());
        assert_eq!(df.column(TIMESTAMP_READ).unwrap().null_count(), 1);
    }
}
