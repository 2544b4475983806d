//! The controller that adapters drive.
//!
//! Adapters feed fetch results and user events in, deliver the returned
//! [`Cycle`] to their renderer, and report back through [`Dashboard::finish`].

use serde::Serialize;
use tracing::{debug, info};

use crate::config::DashboardConfig;
use crate::dataset::{load_dataset, CleanReport, CleanedRow, Dataset};
use crate::materialize::ChartTemplate;
use crate::pipeline::{Cycle, Failure, Outcome, RenderPipeline, Renderer};
use crate::predicate::RowPredicate;
use crate::selection::{Change, DimensionKind, SelectionSnapshot, SelectionStore};
use crate::DashError;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct OptionView {
    pub value: String,
    pub checked: bool,
}

/// Render model of one filter control.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ControlView {
    pub name: String,
    pub label: String,
    pub kind: DimensionKind,
    /// State of the "All" box, when the dimension has one.
    pub all: Option<bool>,
    pub options: Vec<OptionView>,
}

pub struct Dashboard {
    config: DashboardConfig,
    pipeline: RenderPipeline,
    store: Option<SelectionStore>,
    outcome: Outcome,
}

impl Dashboard {
    /// A template-only dashboard starts with its dataset slot filled, so
    /// the template alone gates its first render.
    pub fn new(config: DashboardConfig) -> Result<Self, DashError> {
        config.validate()?;
        let mut pipeline = RenderPipeline::new(
            &config.mount,
            config.embed.clone(),
            config.palette.clone(),
            config.scale_plan(),
        );
        let mut store = None;
        if config.template_only() {
            pipeline.set_dataset(Ok(Dataset::default()));
            store = Some(SelectionStore::new(Vec::new()));
        }
        Ok(Self {
            config,
            pipeline,
            store,
            outcome: Outcome::Loading,
        })
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// Accept the dataset fetch result, `Err` carrying the transport detail.
    pub fn dataset_loaded(&mut self, fetched: Result<String, String>) -> Cycle {
        if self.config.template_only() {
            debug!(dashboard = %self.config.id, "template-only dashboard ignores its dataset");
            return self.refresh();
        }
        let dataset = fetched
            .map_err(Failure::DatasetLoad)
            .and_then(|text| {
                load_dataset(&text, &self.config.schema).map_err(Failure::from_dataset_error)
            });
        if let Ok(dataset) = &dataset {
            info!(
                dashboard = %self.config.id,
                raw = dataset.report.raw_rows,
                cleaned = dataset.report.cleaned_rows,
                "dataset cleaned"
            );
            self.store = Some(SelectionStore::from_rows(
                &self.config.dimensions,
                &dataset.rows,
            ));
        }
        self.pipeline.set_dataset(dataset);
        self.refresh()
    }

    pub fn template_loaded(&mut self, fetched: Result<String, String>) -> Cycle {
        let template = fetched.map_err(Failure::SpecLoad).and_then(|text| {
            ChartTemplate::parse(&text, &self.config.override_points).map_err(|e| match e {
                DashError::SpecLoad(detail) => Failure::SpecLoad(detail),
                other => Failure::SpecLoad(other.to_string()),
            })
        });
        self.pipeline.set_template(template);
        self.refresh()
    }

    /// Begin a cycle from the current selection without changing it.
    pub fn refresh(&mut self) -> Cycle {
        let snapshot = self.selection();
        let cycle = self.pipeline.begin(&snapshot);
        if let Cycle::Settled(outcome) = &cycle {
            self.outcome = outcome.clone();
        }
        cycle
    }

    fn apply(
        &mut self,
        mutate: impl FnOnce(&mut SelectionStore) -> Result<Change, DashError>,
    ) -> Result<Cycle, DashError> {
        let store = self.store.as_mut().ok_or(DashError::NotReady)?;
        let change = mutate(store)?;
        debug!(dashboard = %self.config.id, dimension = ?change.dimension, "selection changed");
        Ok(self.refresh())
    }

    pub fn toggle_individual(
        &mut self,
        dimension: &str,
        value: &str,
        on: bool,
    ) -> Result<Cycle, DashError> {
        self.apply(|store| store.toggle_individual(dimension, value, on))
    }

    pub fn toggle_all(&mut self, dimension: &str, on: bool) -> Result<Cycle, DashError> {
        self.apply(|store| store.toggle_all(dimension, on))
    }

    pub fn select_single(&mut self, dimension: &str, value: &str) -> Result<Cycle, DashError> {
        self.apply(|store| store.select_single(dimension, value))
    }

    pub fn reset(&mut self) -> Result<Cycle, DashError> {
        self.apply(|store| Ok(store.reset()))
    }

    /// Report the renderer's verdict. `None` if the generation is stale.
    pub fn finish(&mut self, generation: u64, result: Result<(), String>) -> Option<Outcome> {
        let outcome = self.pipeline.finish(generation, result)?;
        self.outcome = outcome.clone();
        Some(outcome)
    }

    /// Begin a cycle and deliver it through a synchronous renderer.
    pub fn run<R: Renderer>(&mut self, renderer: &mut R) -> Outcome {
        let snapshot = self.selection();
        let outcome = self.pipeline.run(&snapshot, renderer);
        self.outcome = outcome.clone();
        outcome
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// Text to show in place of the chart, if any.
    pub fn message(&self) -> Option<String> {
        self.outcome.message(&self.config.messages)
    }

    pub fn selection(&self) -> SelectionSnapshot {
        self.store
            .as_ref()
            .map(SelectionStore::snapshot)
            .unwrap_or_default()
    }

    pub fn store(&self) -> Option<&SelectionStore> {
        self.store.as_ref()
    }

    pub fn report(&self) -> Option<&CleanReport> {
        self.pipeline.dataset().map(|d| &d.report)
    }

    /// Rows the current selection lets through.
    pub fn filtered_rows(&self) -> Vec<&CleanedRow> {
        match self.pipeline.dataset() {
            Some(dataset) => RowPredicate::from_snapshot(&self.selection()).filter(&dataset.rows),
            None => Vec::new(),
        }
    }

    pub fn controls(&self) -> Vec<ControlView> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        store
            .dimensions()
            .iter()
            .map(|dim| ControlView {
                name: dim.name().to_string(),
                label: dim.spec().label().to_string(),
                kind: dim.kind(),
                all: dim.spec().aggregate.then(|| dim.all_checked()).flatten(),
                options: dim
                    .options()
                    .iter()
                    .map(|value| OptionView {
                        value: value.clone(),
                        checked: dim.is_checked(value),
                    })
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DatasetSchema, FieldSpec};
    use crate::materialize::{LayerRef, OverridePoints};
    use crate::selection::DimensionSpec;

    const CSV: &str = "pollutant,value,year\nCO,1.5,2018\nCO,1.7,2019\nNO2,20,2018\n";
    const TEMPLATE: &str = r#"{ "mark": "line", "encoding": { "color": { "field": "year" } } }"#;

    fn config() -> DashboardConfig {
        DashboardConfig {
            id: "air".into(),
            title: String::new(),
            dataset_url: String::new(),
            template_url: String::new(),
            mount: "#chart".into(),
            schema: DatasetSchema {
                fields: vec![
                    FieldSpec::categorical("pollutant"),
                    FieldSpec::numeric("value"),
                    FieldSpec::categorical("year"),
                ],
                labels: Vec::new(),
                fold: None,
            },
            dimensions: vec![
                DimensionSpec::single("pollutant", "pollutant"),
                DimensionSpec::multi("year", "year"),
            ],
            color_by: Some("year".into()),
            category_order: None,
            override_points: OverridePoints {
                color: Some(LayerRef::Root),
                ..OverridePoints::default()
            },
            palette: Default::default(),
            embed: Default::default(),
            messages: Default::default(),
        }
    }

    fn ready() -> Dashboard {
        let mut dash = Dashboard::new(config()).unwrap();
        let _ = dash.template_loaded(Ok(TEMPLATE.into()));
        let _ = dash.dataset_loaded(Ok(CSV.into()));
        dash
    }

    #[test]
    fn test_events_before_dataset_are_not_ready() {
        let mut dash = Dashboard::new(config()).unwrap();
        assert!(matches!(dash.reset(), Err(DashError::NotReady)));
        assert_eq!(dash.message().as_deref(), Some("Loading chart…"));
        assert!(dash.controls().is_empty());
    }

    #[test]
    fn test_controls_reflect_store() {
        let mut dash = ready();
        let _ = dash.toggle_individual("year", "2019", false).unwrap();
        let controls = dash.controls();
        assert_eq!(controls.len(), 2);
        assert_eq!(controls[0].all, None);
        assert_eq!(controls[0].options[0], OptionView { value: "CO".into(), checked: true });
        assert_eq!(controls[1].all, Some(false));
        assert!(!controls[1].options[1].checked);
    }

    #[test]
    fn test_event_begins_a_delivery_and_finish_settles_it() {
        let mut dash = ready();
        let Cycle::Deliver(delivery) = dash.select_single("pollutant", "NO2").unwrap() else {
            panic!("expected a delivery");
        };
        assert_eq!(delivery.rows, 1);
        assert_eq!(dash.filtered_rows().len(), 1);
        let outcome = dash.finish(delivery.generation, Ok(())).unwrap();
        assert!(outcome.is_rendered());
        assert_eq!(dash.message(), None);
    }

    #[test]
    fn test_unknown_option_leaves_state_alone() {
        let mut dash = ready();
        let before = dash.selection();
        assert!(dash.select_single("pollutant", "O3").is_err());
        assert_eq!(dash.selection(), before);
    }

    #[test]
    fn test_rejected_dataset_fetch_sets_failure_message() {
        let mut dash = Dashboard::new(config()).unwrap();
        let cycle = dash.dataset_loaded(Err("HTTP 404".into()));
        assert!(matches!(
            cycle,
            Cycle::Settled(Outcome::Failed(Failure::DatasetLoad(ref d))) if d == "HTTP 404"
        ));
        assert_eq!(dash.message().as_deref(), Some("Failed to load data."));
        let _ = dash.template_loaded(Ok(TEMPLATE.into()));
        assert_eq!(dash.message().as_deref(), Some("Failed to load data."));
    }

    #[test]
    fn test_template_only_dashboard_waits_for_the_template_alone() {
        let mut config = config();
        config.schema = DatasetSchema::default();
        config.dimensions.clear();
        config.color_by = None;
        config.override_points = OverridePoints {
            data: None,
            ..OverridePoints::default()
        };
        let mut dash = Dashboard::new(config).unwrap();
        assert!(matches!(dash.refresh(), Cycle::Settled(Outcome::Loading)));
        assert!(dash.controls().is_empty());
        assert!(matches!(
            dash.dataset_loaded(Err("never fetched".into())),
            Cycle::Settled(Outcome::Loading)
        ));

        let Cycle::Deliver(delivery) = dash.template_loaded(Ok(TEMPLATE.into())) else {
            panic!("expected a delivery");
        };
        assert_eq!(delivery.rows, 0);
        assert_eq!(
            delivery.spec.as_value(),
            &serde_json::from_str::<serde_json::Value>(TEMPLATE).unwrap()
        );
        let outcome = dash.finish(delivery.generation, Ok(())).unwrap();
        assert!(outcome.is_rendered());
        assert!(dash.report().is_some_and(|r| r.raw_rows == 0));
    }

    #[test]
    fn test_dataset_with_no_usable_rows() {
        let mut dash = Dashboard::new(config()).unwrap();
        let _ = dash.template_loaded(Ok(TEMPLATE.into()));
        let _ = dash.dataset_loaded(Ok("pollutant,value,year\n,,\n".into()));
        assert_eq!(
            dash.message().as_deref(),
            Some("No usable rows after cleaning.")
        );
    }
}
