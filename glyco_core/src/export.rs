//! CSV export of run output.
//!
//! Every file is written to a temporary file in the destination directory
//! and renamed into place, so readers never see a partial export.

use crate::output::RunOutput;
use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A row of `series.csv`
#[derive(Debug, Serialize)]
struct SeriesRow {
    series: String,
    time: String,
    value: Option<f64>,
}

/// Write one CSV file atomically
fn write_csv<T, I>(dir: &Path, name: &str, rows: I) -> Result<PathBuf>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let path = dir.join(name);
    let temp = NamedTempFile::new_in(dir)?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(temp.as_file());
    let mut count = 0usize;
    for row in rows {
        writer.serialize(row)?;
        count += 1;
    }
    writer.flush()?;
    drop(writer);

    temp.as_file().sync_all()?;
    temp.persist(&path).map_err(|e| Error::Io(e.error))?;

    tracing::debug!("Wrote {} rows to {:?}", count, path);
    Ok(path)
}

/// Export a run as CSV files in `dir`, returning the paths written
pub fn export_run(output: &RunOutput, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;

    let series_rows = output.series.iter().flat_map(|(name, points)| {
        points.iter().map(move |point| SeriesRow {
            series: name.to_string(),
            time: point.at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            value: point.value,
        })
    });

    let paths = vec![
        write_csv(dir, "series.csv", series_rows)?,
        write_csv(dir, "verdicts.csv", &output.verdicts)?,
        write_csv(dir, "basal_segments.csv", &output.segments)?,
        write_csv(dir, "suspensions.csv", &output.suspensions)?,
        write_csv(dir, "audits.csv", &output.audits)?,
        write_csv(dir, "daily_carbs.csv", &output.daily_carbs)?,
        write_csv(dir, "ratio_changes.csv", &output.ratio_changes)?,
        write_csv(dir, "meal_ratios.csv", &output.meal_ratios)?,
        write_csv(dir, "range_crossings.csv", &output.range_crossings)?,
    ];

    tracing::info!("Exported run '{}' to {:?}", output.label, dir);
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::engine::{run, RunParams};
    use chrono::NaiveDate;

    #[test]
    fn test_export_demo_run() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let timeline = crate::demo::synthetic_timeline(day);
        let output = run(&timeline, &RunParams::for_day(day, ModelConfig::default())).unwrap();

        let temp_dir = tempfile::tempdir().unwrap();
        let out_dir = temp_dir.path().join("export");
        let paths = export_run(&output, &out_dir).unwrap();
        assert_eq!(paths.len(), 9);

        let mut reader = csv::Reader::from_path(out_dir.join("series.csv")).unwrap();
        let headers: Vec<String> = reader
            .headers()
            .unwrap()
            .iter()
            .map(String::from)
            .collect();
        assert_eq!(headers, vec!["series", "time", "value"]);
        assert!(reader.records().count() > 288);

        let mut reader = csv::Reader::from_path(out_dir.join("audits.csv")).unwrap();
        assert_eq!(reader.records().count(), output.audits.len());

        let mut reader = csv::Reader::from_path(out_dir.join("range_crossings.csv")).unwrap();
        let headers: Vec<String> = reader
            .headers()
            .unwrap()
            .iter()
            .map(String::from)
            .collect();
        assert_eq!(headers, vec!["at", "crossing", "limit"]);
        let first = reader.records().next().unwrap().unwrap();
        assert_eq!(&first[1], "hyper_end");
    }

    #[test]
    fn test_export_replaces_previous_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut output = RunOutput::default();

        export_run(&output, temp_dir.path()).unwrap();
        output.label = "again".into();
        export_run(&output, temp_dir.path()).unwrap();

        let leftovers = std::fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(leftovers, 9);
    }
}
