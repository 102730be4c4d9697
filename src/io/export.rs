//! CSV export for monitor time series.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::models::monitor::MetricSeries;

/// Timestamp format of the `time` column.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Exports a metric series to a CSV file at the given path.
///
/// One row per distinct timestamp in ascending order, a leading `time`
/// column, then one column per attribute in name order. Cells without an
/// observation are left blank. Produces identical output for identical
/// series.
///
/// # Arguments
///
/// * `series` - Observations collected by a monitor
/// * `path` - Output file path
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(series: &MetricSeries, path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(series, buf)
}

/// Writes a metric series as CSV to any writer.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(series: &MetricSeries, writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    let attrs: Vec<&str> = series.attrs().collect();

    wtr.write_record(std::iter::once("time").chain(attrs.iter().copied()))?;

    for time in series.timestamps() {
        let mut row = Vec::with_capacity(attrs.len() + 1);
        row.push(time.format(TIME_FORMAT).to_string());
        for attr in &attrs {
            row.push(
                series
                    .get(attr, time)
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            );
        }
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::*;

    fn at(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, minute, 0)
            .unwrap()
    }

    fn render(series: &MetricSeries) -> String {
        let mut buf = Vec::new();
        write_csv(series, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn two_observations_become_two_rows() {
        let mut series = MetricSeries::new();
        series.record("p", at(0), 10.0.into()).unwrap();
        series.record("p", at(1), 12.0.into()).unwrap();

        assert_eq!(
            render(&series),
            "time,p\n2020-01-01 00:00:00,10\n2020-01-01 00:01:00,12\n"
        );
    }

    #[test]
    fn missing_cells_are_blank_and_columns_sorted() {
        let mut series = MetricSeries::new();
        series.record("solar", at(0), 1.5.into()).unwrap();
        series.record("mode", at(1), "normal".into()).unwrap();

        let output = render(&series);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "time,mode,solar");
        assert_eq!(lines[1], "2020-01-01 00:00:00,,1.5");
        assert_eq!(lines[2], "2020-01-01 00:01:00,normal,");
    }

    #[test]
    fn empty_series_writes_header_only() {
        assert_eq!(render(&MetricSeries::new()), "time\n");
    }

    #[test]
    fn export_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.csv");
        let mut series = MetricSeries::new();
        series.record("p", at(0), 1.0.into()).unwrap();
        export_csv(&series, &path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("time,p\n"));
    }
}
