//! Selection state for the filter controls of one dashboard.
//!
//! Multi-select dimensions carry an aggregate "All" control whose checked
//! state is always the AND of the individual options. Single-select
//! dimensions hold at most one chosen option. The store never renders:
//! every mutation hands back a [`Change`] that the caller routes to the
//! render pipeline.

use serde::{Deserialize, Serialize};

use crate::dataset::{domain, CleanedRow, DomainOrder};
use crate::DashError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DimensionKind {
    Multi,
    Single,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DimensionSpec {
    pub name: String,
    pub field: String,
    /// Noun used in controls and empty-state messages, defaults to `name`.
    #[serde(default)]
    pub label: Option<String>,
    pub kind: DimensionKind,
    /// Draw an "All" control for a multi-select dimension.
    #[serde(default = "default_aggregate")]
    pub aggregate: bool,
    #[serde(default)]
    pub valid_values: Option<Vec<String>>,
    /// Declared option list, used instead of the data domain.
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub order: DomainOrder,
}

fn default_aggregate() -> bool {
    true
}

impl DimensionSpec {
    pub fn multi(name: &str, field: &str) -> Self {
        Self {
            name: name.to_string(),
            field: field.to_string(),
            label: None,
            kind: DimensionKind::Multi,
            aggregate: true,
            valid_values: None,
            options: None,
            order: DomainOrder::Lexical,
        }
    }

    pub fn single(name: &str, field: &str) -> Self {
        Self {
            kind: DimensionKind::Single,
            aggregate: false,
            ..Self::multi(name, field)
        }
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = Some(options.iter().map(|o| o.to_string()).collect());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Control {
    Multi { checked: Vec<bool>, all: bool },
    Single { selected: Option<usize> },
}

impl Control {
    fn initial(kind: DimensionKind, options: usize) -> Self {
        match kind {
            DimensionKind::Multi => Control::Multi {
                checked: vec![true; options],
                all: options > 0,
            },
            DimensionKind::Single => Control::Single {
                selected: (options > 0).then_some(0),
            },
        }
    }
}

/// One filter dimension: its declaration, option list and control state.
#[derive(Clone, Debug, PartialEq)]
pub struct Dimension {
    spec: DimensionSpec,
    options: Vec<String>,
    control: Control,
}

impl Dimension {
    pub fn new(spec: DimensionSpec, options: Vec<String>) -> Self {
        let control = Control::initial(spec.kind, options.len());
        Self {
            spec,
            options,
            control,
        }
    }

    /// Build the dimension with its domain taken from cleaned rows, unless
    /// the spec declares its options.
    pub fn from_rows(spec: DimensionSpec, rows: &[CleanedRow]) -> Self {
        let options = match &spec.options {
            Some(declared) => declared.clone(),
            None => domain(
                rows,
                &spec.field,
                spec.valid_values.as_deref(),
                &spec.order,
            ),
        };
        Self::new(spec, options)
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &DimensionSpec {
        &self.spec
    }

    pub fn kind(&self) -> DimensionKind {
        self.spec.kind
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn is_checked(&self, value: &str) -> bool {
        let Some(idx) = self.index_of(value) else {
            return false;
        };
        match &self.control {
            Control::Multi { checked, .. } => checked[idx],
            Control::Single { selected } => *selected == Some(idx),
        }
    }

    /// State of the aggregate control; `None` for single-select dimensions.
    pub fn all_checked(&self) -> Option<bool> {
        match &self.control {
            Control::Multi { all, .. } => Some(*all),
            Control::Single { .. } => None,
        }
    }

    fn index_of(&self, value: &str) -> Option<usize> {
        self.options.iter().position(|o| o == value)
    }

    fn option_index(&self, value: &str) -> Result<usize, DashError> {
        self.index_of(value).ok_or_else(|| DashError::UnknownOption {
            dimension: self.spec.name.clone(),
            value: value.to_string(),
        })
    }

    fn selection(&self) -> Selection {
        match &self.control {
            Control::Multi { checked, .. } => Selection::Many(
                self.options
                    .iter()
                    .zip(checked)
                    .filter(|(_, on)| **on)
                    .map(|(o, _)| o.clone())
                    .collect(),
            ),
            Control::Single { selected } => {
                Selection::One(selected.map(|idx| self.options[idx].clone()))
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Checked values, in domain order.
    Many(Vec<String>),
    One(Option<String>),
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        match self {
            Selection::Many(values) => values.is_empty(),
            Selection::One(value) => value.is_none(),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct DimensionSelection {
    pub name: String,
    pub field: String,
    pub label: String,
    pub selection: Selection,
    /// Options the control offered when the snapshot was taken.
    pub option_count: usize,
}

/// Owned copy of every dimension's selection at one point in time.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct SelectionSnapshot {
    dimensions: Vec<DimensionSelection>,
}

impl SelectionSnapshot {
    pub fn iter(&self) -> impl Iterator<Item = &DimensionSelection> {
        self.dimensions.iter()
    }

    pub fn get(&self, name: &str) -> Option<&DimensionSelection> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    /// Selected values of a dimension, in domain order.
    pub fn values(&self, name: &str) -> Option<Vec<String>> {
        self.get(name).map(|d| match &d.selection {
            Selection::Many(values) => values.clone(),
            Selection::One(value) => value.iter().cloned().collect(),
        })
    }

    /// First dimension with options on offer but none chosen.
    ///
    /// A dimension without options has nothing to choose, so it is never
    /// reported here; its clause simply matches no rows.
    pub fn first_empty(&self) -> Option<&DimensionSelection> {
        self.dimensions
            .iter()
            .find(|d| d.option_count > 0 && d.selection.is_empty())
    }
}

/// Proof that the selection changed. Hand it to the render pipeline.
#[must_use = "a selection change must be followed by a render"]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    /// `None` when every dimension was reset.
    pub dimension: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorePhase {
    Initialized,
    Updated,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectionStore {
    dimensions: Vec<Dimension>,
    phase: StorePhase,
}

impl SelectionStore {
    pub fn new(dimensions: Vec<Dimension>) -> Self {
        Self {
            dimensions,
            phase: StorePhase::Initialized,
        }
    }

    pub fn from_rows(specs: &[DimensionSpec], rows: &[CleanedRow]) -> Self {
        Self::new(
            specs
                .iter()
                .cloned()
                .map(|spec| Dimension::from_rows(spec, rows))
                .collect(),
        )
    }

    pub fn phase(&self) -> StorePhase {
        self.phase
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.spec.name == name)
    }

    pub fn is_checked(&self, dimension: &str, value: &str) -> bool {
        self.dimension(dimension)
            .is_some_and(|d| d.is_checked(value))
    }

    pub fn all_checked(&self, dimension: &str) -> Option<bool> {
        self.dimension(dimension).and_then(Dimension::all_checked)
    }

    pub fn selected(&self, dimension: &str) -> Option<Selection> {
        self.dimension(dimension).map(Dimension::selection)
    }

    fn dimension_mut(&mut self, name: &str) -> Result<&mut Dimension, DashError> {
        self.dimensions
            .iter_mut()
            .find(|d| d.spec.name == name)
            .ok_or_else(|| DashError::UnknownDimension(name.to_string()))
    }

    fn changed(&mut self, dimension: &str) -> Change {
        self.phase = StorePhase::Updated;
        Change {
            dimension: Some(dimension.to_string()),
        }
    }

    /// Set one option, then recompute the aggregate as the AND of all options.
    pub fn toggle_individual(
        &mut self,
        dimension: &str,
        value: &str,
        on: bool,
    ) -> Result<Change, DashError> {
        let dim = self.dimension_mut(dimension)?;
        let idx = dim.option_index(value)?;
        match &mut dim.control {
            Control::Multi { checked, all } => {
                checked[idx] = on;
                *all = !checked.is_empty() && checked.iter().all(|c| *c);
            }
            Control::Single { .. } => {
                return Err(DashError::WrongDimensionKind(
                    dimension.to_string(),
                    "multi-select",
                ))
            }
        }
        Ok(self.changed(dimension))
    }

    /// Set every option and the aggregate control to `on`.
    pub fn toggle_all(&mut self, dimension: &str, on: bool) -> Result<Change, DashError> {
        let dim = self.dimension_mut(dimension)?;
        match &mut dim.control {
            Control::Multi { checked, all } => {
                checked.iter_mut().for_each(|c| *c = on);
                *all = on && !checked.is_empty();
            }
            Control::Single { .. } => {
                return Err(DashError::WrongDimensionKind(
                    dimension.to_string(),
                    "multi-select",
                ))
            }
        }
        Ok(self.changed(dimension))
    }

    pub fn select_single(&mut self, dimension: &str, value: &str) -> Result<Change, DashError> {
        let dim = self.dimension_mut(dimension)?;
        let idx = dim.option_index(value)?;
        match &mut dim.control {
            Control::Single { selected } => *selected = Some(idx),
            Control::Multi { .. } => {
                return Err(DashError::WrongDimensionKind(
                    dimension.to_string(),
                    "single-select",
                ))
            }
        }
        Ok(self.changed(dimension))
    }

    /// Back to the initial state: everything checked, first options chosen.
    pub fn reset(&mut self) -> Change {
        for dim in &mut self.dimensions {
            dim.control = Control::initial(dim.spec.kind, dim.options.len());
        }
        self.phase = StorePhase::Initialized;
        Change { dimension: None }
    }

    pub fn snapshot(&self) -> SelectionSnapshot {
        SelectionSnapshot {
            dimensions: self
                .dimensions
                .iter()
                .map(|d| DimensionSelection {
                    name: d.spec.name.clone(),
                    field: d.spec.field.clone(),
                    label: d.spec.label().to_string(),
                    selection: d.selection(),
                    option_count: d.options.len(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn years() -> Vec<String> {
        (2014..=2019).map(|y| y.to_string()).collect()
    }

    fn store() -> SelectionStore {
        SelectionStore::new(vec![
            Dimension::new(DimensionSpec::multi("year", "year"), years()),
            Dimension::new(
                DimensionSpec::single("pollutant", "pollutant"),
                vec!["CO".into(), "NO2".into(), "PM10".into()],
            ),
        ])
    }

    #[test]
    fn test_initial_state_checks_everything() {
        let store = store();
        assert_eq!(store.phase(), StorePhase::Initialized);
        assert_eq!(store.all_checked("year"), Some(true));
        assert!(years().iter().all(|y| store.is_checked("year", y)));
        assert!(store.is_checked("pollutant", "CO"));
        assert_eq!(store.all_checked("pollutant"), None);
    }

    #[test]
    fn test_unchecking_one_clears_all_and_rechecking_restores_it() {
        let mut store = store();
        let _ = store.toggle_individual("year", "2016", false).unwrap();
        assert_eq!(store.all_checked("year"), Some(false));
        assert_eq!(store.phase(), StorePhase::Updated);
        let _ = store.toggle_individual("year", "2016", true).unwrap();
        assert_eq!(store.all_checked("year"), Some(true));
    }

    #[test]
    fn test_toggle_all_round_trip() {
        let mut store = store();
        let _ = store.toggle_individual("year", "2015", false).unwrap();
        let _ = store.toggle_all("year", false).unwrap();
        assert!(years().iter().all(|y| !store.is_checked("year", y)));
        assert_eq!(store.all_checked("year"), Some(false));
        let _ = store.toggle_all("year", true).unwrap();
        assert!(years().iter().all(|y| store.is_checked("year", y)));
        assert_eq!(store.all_checked("year"), Some(true));
    }

    #[test]
    fn test_select_single_is_exclusive() {
        let mut store = store();
        let change = store.select_single("pollutant", "NO2").unwrap();
        assert_eq!(change.dimension.as_deref(), Some("pollutant"));
        assert!(store.is_checked("pollutant", "NO2"));
        assert!(!store.is_checked("pollutant", "CO"));
        assert_eq!(
            store.selected("pollutant"),
            Some(Selection::One(Some("NO2".into())))
        );
    }

    #[test]
    fn test_snapshot_is_fresh_and_in_domain_order() {
        let mut store = store();
        let before = store.snapshot();
        let _ = store.toggle_individual("year", "2014", false).unwrap();
        let _ = store.toggle_individual("year", "2019", false).unwrap();
        let after = store.snapshot();
        assert_ne!(before, after);
        assert_eq!(
            after.values("year").unwrap(),
            vec!["2015", "2016", "2017", "2018"]
        );
        assert_eq!(after.values("pollutant").unwrap(), vec!["CO"]);
        assert!(after.first_empty().is_none());
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut store = store();
        let _ = store.toggle_all("year", false).unwrap();
        let _ = store.select_single("pollutant", "PM10").unwrap();
        let change = store.reset();
        assert_eq!(change.dimension, None);
        assert_eq!(store.phase(), StorePhase::Initialized);
        assert_eq!(store.snapshot(), self::store().snapshot());
    }

    #[test]
    fn test_invalid_mutations_are_rejected() {
        let mut store = store();
        assert!(matches!(
            store.toggle_individual("month", "May", true),
            Err(DashError::UnknownDimension(_))
        ));
        assert!(matches!(
            store.toggle_individual("year", "1999", true),
            Err(DashError::UnknownOption { .. })
        ));
        assert!(matches!(
            store.toggle_all("pollutant", true),
            Err(DashError::WrongDimensionKind(_, "multi-select"))
        ));
        assert!(matches!(
            store.select_single("year", "2014"),
            Err(DashError::WrongDimensionKind(_, "single-select"))
        ));
        assert_eq!(store.phase(), StorePhase::Initialized);
    }

    #[test]
    fn test_empty_domain_is_never_all_checked() {
        let mut store =
            SelectionStore::new(vec![Dimension::new(DimensionSpec::multi("year", "year"), vec![])]);
        assert_eq!(store.all_checked("year"), Some(false));
        let _ = store.toggle_all("year", true).unwrap();
        assert_eq!(store.all_checked("year"), Some(false));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.values("year").unwrap(), Vec::<String>::new());
        assert!(snapshot.first_empty().is_none());
    }

    #[test]
    fn test_declared_options_replace_the_data_domain() {
        let spec = DimensionSpec::single("case_type", "case_type")
            .with_options(&["Respiratory", "Cardiovascular"]);
        let dim = Dimension::from_rows(spec, &[]);
        assert_eq!(dim.options(), ["Respiratory", "Cardiovascular"]);
        assert!(dim.is_checked("Respiratory"));
    }
}
