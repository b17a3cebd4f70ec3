pub mod classification;
pub mod fields;
pub mod listing;

pub use classification::{ClassificationEntry, ClassificationLevel, MAX_CLASSIFICATIONS};
pub use fields::{FieldMap, FieldPath, FieldValue};
pub use listing::{ListingDetails, ListingRecord, ListingType, RecordError};
