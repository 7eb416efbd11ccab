//! Domain models.

mod dataset;
mod item;
mod task;

pub use dataset::Dataset;
pub use item::{
    ItemRecord, Price, PriceParseError, RawFields, RawRecords, RecordError, BUFF_PRICE,
    TODAY_CHANGE, UU_PRICE, WEEK_CHANGE,
};
pub use task::{PageTask, ScrollJob, ScrollState};
