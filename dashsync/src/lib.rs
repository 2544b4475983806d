//! Filter-state to chart-spec synchronization for declarative chart dashboards.
//!
//! A dashboard loads a delimited dataset and a chart template, keeps a set of
//! checkbox / radio selections consistent, and re-derives a ready-to-render
//! chart specification from that state on every change. The crate is split
//! along that flow:
//!
//! - [`coerce`]: raw text to numbers / trimmed categories
//! - [`dataset`]: CSV records to cleaned rows plus dimension domains
//! - [`selection`]: the selection state store and its snapshots
//! - [`predicate`]: snapshot to row filter
//! - [`materialize`]: template + rows + scale parameters to a spec instance
//! - [`pipeline`]: readiness gate and per-render state machine
//! - [`dashboard`]: the controller adapters (CLI, browser) drive

use thiserror::Error;

pub mod coerce;
pub mod config;
pub mod dashboard;
pub mod dataset;
pub mod materialize;
pub mod pipeline;
pub mod predicate;
pub mod presets;
pub mod selection;

pub use coerce::{coerce_number, coerce_text, RawValue};
pub use config::{DashboardConfig, Messages};
pub use dashboard::{ControlView, Dashboard, OptionView};
pub use dataset::{
    clean, domain, load_dataset, parse_csv, CleanReport, CleanedRow, Dataset, DatasetSchema,
    DomainOrder, FieldKind, FieldSpec, FoldSpec, LabelSpec, RawRecord, RawTable,
};
pub use materialize::{
    materialize, CategoryMode, CategoryTarget, ChannelBinding, ChannelProperty, ChartTemplate,
    LayerRef, OverridePoints, Palette, ScaleParams, SpecInstance,
};
pub use pipeline::{
    Cycle, CycleState, Delivery, EmbedOptions, EmptyReason, Failure, Outcome, RenderPipeline,
    Renderer, RendererKind, ScalePlan,
};
pub use predicate::RowPredicate;
pub use selection::{
    Change, Dimension, DimensionKind, DimensionSelection, DimensionSpec, Selection,
    SelectionSnapshot, SelectionStore, StorePhase,
};

#[derive(Error, Debug)]
pub enum DashError {
    #[error("failed to load dataset: {0}")]
    DatasetLoad(String),
    #[error("failed to load chart specification: {0}")]
    SpecLoad(String),
    #[error("no usable rows after cleaning")]
    NoUsableRows,
    #[error("no value selected for dimension '{0}'")]
    EmptySelection(String),
    #[error("no rows match the current selection")]
    NoMatchingRows,
    #[error("renderer rejected the specification: {0}")]
    Render(String),
    #[error("invalid dashboard config: {0}")]
    InvalidConfig(String),
    #[error("unknown dimension '{0}'")]
    UnknownDimension(String),
    #[error("dimension '{dimension}' has no option '{value}'")]
    UnknownOption { dimension: String, value: String },
    #[error("dimension '{0}' is not a {1} dimension")]
    WrongDimensionKind(String, &'static str),
    #[error("dataset is not loaded yet")]
    NotReady,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = DashError> = std::result::Result<T, E>;
