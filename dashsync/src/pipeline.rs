//! Readiness gate and per-render state machine.
//!
//! `Idle -> Validating -> (Empty | Materializing) -> (Rendered | Failed)`.
//! Every call to [`RenderPipeline::begin`] starts a fresh cycle with a new
//! generation; only the latest generation's completion is reported.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::Messages;
use crate::dataset::Dataset;
use crate::materialize::{materialize, ChartTemplate, Palette, ScaleParams, SpecInstance};
use crate::predicate::RowPredicate;
use crate::selection::{Selection, SelectionSnapshot};
use crate::DashError;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RendererKind {
    #[default]
    Canvas,
    Svg,
}

impl fmt::Display for RendererKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RendererKind::Canvas => f.write_str("canvas"),
            RendererKind::Svg => f.write_str("svg"),
        }
    }
}

/// Options handed to the external renderer alongside the spec.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmbedOptions {
    pub actions: bool,
    pub renderer: RendererKind,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            actions: true,
            renderer: RendererKind::Canvas,
        }
    }
}

/// Which selections drive the scale overrides.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScalePlan {
    pub color_by: Option<String>,
    pub category_order: Option<Vec<String>>,
    /// Dimension behind each channel binding, in binding order.
    pub channel_dimensions: Vec<String>,
}

impl ScalePlan {
    pub fn params(&self, snapshot: &SelectionSnapshot) -> ScaleParams {
        ScaleParams {
            color_domain: self.color_by.as_deref().and_then(|d| snapshot.values(d)),
            category_order: self.category_order.clone(),
            channel_values: self
                .channel_dimensions
                .iter()
                .map(|d| snapshot.values(d).and_then(|v| v.into_iter().next()))
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    DatasetLoad(String),
    SpecLoad(String),
    NoUsableRows,
    Render(String),
}

impl Failure {
    pub fn detail(&self) -> String {
        match self {
            Failure::DatasetLoad(d) | Failure::SpecLoad(d) | Failure::Render(d) => d.clone(),
            Failure::NoUsableRows => DashError::NoUsableRows.to_string(),
        }
    }

    pub fn from_dataset_error(err: DashError) -> Self {
        match err {
            DashError::NoUsableRows => Failure::NoUsableRows,
            other => Failure::DatasetLoad(other.to_string()),
        }
    }

    /// Both resources loaded, yet no spec could be built for this cycle.
    pub fn from_materialize_error(err: DashError) -> Self {
        Failure::Render(err.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmptyReason {
    NoSelection {
        dimension: String,
        label: String,
        single: bool,
    },
    /// Selected values per dimension, joined with `, `.
    NoMatchingRows { selection: BTreeMap<String, String> },
}

impl EmptyReason {
    fn no_matching_rows(snapshot: &SelectionSnapshot) -> Self {
        let selection = snapshot
            .iter()
            .map(|d| {
                let values = snapshot.values(&d.name).unwrap_or_default();
                (d.name.clone(), values.join(", "))
            })
            .collect();
        EmptyReason::NoMatchingRows { selection }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Loading,
    Empty(EmptyReason),
    Rendered { generation: u64, fingerprint: String },
    Failed(Failure),
}

impl Outcome {
    pub fn is_rendered(&self) -> bool {
        matches!(self, Outcome::Rendered { .. })
    }

    /// Text to show in place of the chart; `None` once rendered.
    pub fn message(&self, messages: &Messages) -> Option<String> {
        let text = match self {
            Outcome::Rendered { .. } => return None,
            Outcome::Loading => messages.loading.clone(),
            Outcome::Empty(EmptyReason::NoSelection { label, single, .. }) => {
                let template = if *single {
                    &messages.no_single_selection
                } else {
                    &messages.no_selection
                };
                Messages::with_label(template, label)
            }
            Outcome::Empty(EmptyReason::NoMatchingRows { selection }) => {
                Messages::with_selection(&messages.no_matching_rows, selection)
            }
            Outcome::Failed(Failure::DatasetLoad(_)) => messages.dataset_load.clone(),
            Outcome::Failed(Failure::SpecLoad(_)) => messages.spec_load.clone(),
            Outcome::Failed(Failure::NoUsableRows) => messages.no_usable_rows.clone(),
            Outcome::Failed(Failure::Render(_)) => messages.render.clone(),
        };
        Some(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Validating,
    Empty,
    Materializing,
    Rendered,
    Failed,
}

#[derive(Debug)]
pub enum Slot<T> {
    Pending,
    Ready(T),
    Failed(Failure),
}

impl<T> Slot<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            Slot::Ready(value) => Some(value),
            _ => None,
        }
    }
}

/// A spec waiting to be handed to the external renderer.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub generation: u64,
    pub mount: String,
    pub spec: SpecInstance,
    pub options: EmbedOptions,
    pub rows: usize,
}

#[derive(Clone, Debug)]
pub enum Cycle {
    Settled(Outcome),
    Deliver(Delivery),
}

/// Synchronous handoff to whatever draws the chart.
pub trait Renderer {
    type Error: fmt::Display;

    fn render(
        &mut self,
        mount: &str,
        spec: &SpecInstance,
        options: &EmbedOptions,
    ) -> Result<(), Self::Error>;
}

pub struct RenderPipeline {
    mount: String,
    options: EmbedOptions,
    palette: Palette,
    plan: ScalePlan,
    dataset: Slot<Dataset>,
    template: Slot<ChartTemplate>,
    generation: u64,
    pending: Option<(u64, String)>,
    state: CycleState,
}

impl RenderPipeline {
    pub fn new(mount: &str, options: EmbedOptions, palette: Palette, plan: ScalePlan) -> Self {
        Self {
            mount: mount.to_string(),
            options,
            palette,
            plan,
            dataset: Slot::Pending,
            template: Slot::Pending,
            generation: 0,
            pending: None,
            state: CycleState::Idle,
        }
    }

    pub fn set_dataset(&mut self, dataset: Result<Dataset, Failure>) {
        self.dataset = match dataset {
            Ok(d) => Slot::Ready(d),
            Err(f) => {
                error!(mount = %self.mount, error = %f.detail(), "dataset unavailable");
                Slot::Failed(f)
            }
        };
    }

    pub fn set_template(&mut self, template: Result<ChartTemplate, Failure>) {
        self.template = match template {
            Ok(t) => Slot::Ready(t),
            Err(f) => {
                error!(mount = %self.mount, error = %f.detail(), "chart template unavailable");
                Slot::Failed(f)
            }
        };
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.ready()
    }

    pub fn template(&self) -> Option<&ChartTemplate> {
        self.template.ready()
    }

    pub fn is_ready(&self) -> bool {
        self.dataset().is_some() && self.template().is_some()
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn settle(&mut self, state: CycleState, outcome: Outcome) -> Cycle {
        self.state = state;
        self.pending = None;
        Cycle::Settled(outcome)
    }

    /// Start a render cycle for `snapshot`.
    pub fn begin(&mut self, snapshot: &SelectionSnapshot) -> Cycle {
        self.generation += 1;
        let generation = self.generation;

        if let Slot::Failed(f) = &self.dataset {
            let outcome = Outcome::Failed(f.clone());
            return self.settle(CycleState::Failed, outcome);
        }
        if let Slot::Failed(f) = &self.template {
            let outcome = Outcome::Failed(f.clone());
            return self.settle(CycleState::Failed, outcome);
        }
        let (Slot::Ready(dataset), Slot::Ready(template)) = (&self.dataset, &self.template) else {
            debug!(mount = %self.mount, generation, "render gated on pending fetches");
            return self.settle(CycleState::Idle, Outcome::Loading);
        };

        self.state = CycleState::Validating;
        if let Some(dim) = snapshot.first_empty() {
            warn!(mount = %self.mount, dimension = %dim.name, "nothing selected");
            let reason = EmptyReason::NoSelection {
                dimension: dim.name.clone(),
                label: dim.label.clone(),
                single: matches!(dim.selection, Selection::One(_)),
            };
            return self.settle(CycleState::Empty, Outcome::Empty(reason));
        }

        let rows = if template.binds_data() {
            RowPredicate::from_snapshot(snapshot).filter(&dataset.rows)
        } else {
            Vec::new()
        };
        if template.binds_data() && rows.is_empty() {
            warn!(mount = %self.mount, "selection matches no rows");
            let reason = EmptyReason::no_matching_rows(snapshot);
            return self.settle(CycleState::Empty, Outcome::Empty(reason));
        }

        let params = self.plan.params(snapshot);
        let row_count = rows.len();
        match materialize(template, &rows, &params, &self.palette) {
            Ok(spec) => {
                debug!(mount = %self.mount, generation, rows = row_count, "spec materialized");
                self.state = CycleState::Materializing;
                self.pending = Some((generation, spec.fingerprint()));
                Cycle::Deliver(Delivery {
                    generation,
                    mount: self.mount.clone(),
                    spec,
                    options: self.options.clone(),
                    rows: row_count,
                })
            }
            Err(err) => {
                error!(mount = %self.mount, error = %err, "materializing the chart spec failed");
                let outcome = Outcome::Failed(Failure::from_materialize_error(err));
                self.settle(CycleState::Failed, outcome)
            }
        }
    }

    /// Report the renderer's verdict for `generation`.
    ///
    /// Returns `None` when a newer cycle has started since, so the caller
    /// leaves the mount point to the newer render.
    pub fn finish(&mut self, generation: u64, result: Result<(), String>) -> Option<Outcome> {
        let fingerprint = match self.pending.take() {
            Some((pending, fingerprint)) if pending == generation => fingerprint,
            other => {
                self.pending = other;
                debug!(mount = %self.mount, generation, latest = self.generation, "discarding superseded render");
                return None;
            }
        };
        match result {
            Ok(()) => {
                self.state = CycleState::Rendered;
                Some(Outcome::Rendered {
                    generation,
                    fingerprint,
                })
            }
            Err(detail) => {
                error!(mount = %self.mount, generation, error = %detail, "renderer rejected the chart spec");
                self.state = CycleState::Failed;
                Some(Outcome::Failed(Failure::Render(detail)))
            }
        }
    }

    /// Begin a cycle and deliver it through a synchronous renderer.
    pub fn run<R: Renderer>(&mut self, snapshot: &SelectionSnapshot, renderer: &mut R) -> Outcome {
        match self.begin(snapshot) {
            Cycle::Settled(outcome) => outcome,
            Cycle::Deliver(delivery) => {
                let result = renderer
                    .render(&delivery.mount, &delivery.spec, &delivery.options)
                    .map_err(|e| e.to_string());
                self.finish(delivery.generation, result)
                    .unwrap_or(Outcome::Loading)
            }
        }
    }
}
