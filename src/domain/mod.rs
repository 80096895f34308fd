//! Datasets, the row shapes that move between layers, and typed silver records.

pub mod entity;
pub mod rows;
pub mod silver;

pub use entity::{ColumnKind, ColumnSource, ColumnSpec, DatasetSpec, Entity, PromotionMode};
pub use rows::{CleanRow, RankedRow, RawRow};
pub use silver::{
    CompanyProfile, ExchangeRate, MacroObservation, OhlcvBar, SilverRecord, Violation,
};
