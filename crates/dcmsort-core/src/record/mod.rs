pub mod extract;
pub mod model;

pub use extract::{extract_records, JsonRecordExtractor, RecordExtractor};
pub use model::SeriesRecord;
