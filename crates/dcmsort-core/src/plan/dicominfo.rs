use crate::error::Error;
use crate::grouping::{SeriesInfo, SERIES_INFO_COLUMNS};
use std::path::Path;

/// Dump one tab-separated row per series for human audit.
pub fn write_dicominfo(path: &Path, series: &[SeriesInfo]) -> Result<(), Error> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Necessary)
        .from_path(path)?;

    writer.write_record(SERIES_INFO_COLUMNS)?;
    for info in series {
        writer.write_record(info.tsv_row())?;
    }
    writer.flush()?;
    Ok(())
}
