//! Source ingestion and table shaping: read, merge, align, gap-fill, join.

pub mod align;
pub mod fill;
pub mod gapfill;
pub mod join;
pub mod memo;
pub mod merge;
pub mod reader;

pub use align::{align, infer_frequency, AlignError, AlignInput, AlignmentSummary, SourceStats};
pub use fill::fill_nodata;
pub use gapfill::{
    fill_missing_days, GapFillError, GapFillOptions, DEFAULT_NUMERIC_SENTINEL,
    DEFAULT_STRING_SENTINEL,
};
pub use join::{join_sources, JoinError, JoinInput, JoinOptions};
pub use memo::FileMemo;
pub use merge::{merge_by_time, MergeError, MergeOptions, TAG_DB, TAG_LATEST};
pub use reader::{
    read_source, FieldMap, ReadError, SourceFormat, SourceKind, SourceSpec, PREFIX_PLACEHOLDER,
};
