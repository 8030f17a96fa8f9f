pub mod cache;
pub mod dicominfo;
pub mod expand;
pub mod filegroup;
pub mod model;
pub mod paths;

pub use cache::{PlanCache, PlanCacheConfig, PlanSource, ResolvedPlan};
pub use dicominfo::write_dicominfo;
pub use expand::{conversion_items, ConversionItem};
pub use filegroup::{file_group_from_series, load_file_group, save_file_group, FileGroup};
pub use model::{PlanEntry, PlanItem, PlanMapping, PlanSlot};
pub use paths::{PlanPaths, INFO_ROOT};
