pub mod grouper;
pub mod info;
pub mod key;
pub mod signature;

pub use grouper::{
    group_files, group_records, GroupedSeries, GroupingOptions, SeriesGroup, StudyGroup,
};
pub use info::{SeriesInfo, SERIES_INFO_COLUMNS};
pub use key::{GroupingMode, SeriesKey};
pub use signature::SeriesSignature;
