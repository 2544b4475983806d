use std::collections::HashSet;

use crate::dataset::CleanedRow;
use crate::selection::{Selection, SelectionSnapshot};

#[derive(Clone, Debug)]
enum Clause {
    Equals {
        field: String,
        value: Option<String>,
    },
    OneOf {
        field: String,
        values: HashSet<String>,
    },
}

impl Clause {
    fn matches(&self, row: &CleanedRow) -> bool {
        match self {
            Clause::Equals { field, value } => match (value, row.text(field)) {
                (Some(want), Some(have)) => want == have,
                _ => false,
            },
            Clause::OneOf { field, values } => row.text(field).is_some_and(|v| values.contains(v)),
        }
    }
}

/// AND of one clause per snapshot dimension. An empty selection matches nothing.
#[derive(Clone, Debug, Default)]
pub struct RowPredicate {
    clauses: Vec<Clause>,
}

impl RowPredicate {
    pub fn from_snapshot(snapshot: &SelectionSnapshot) -> Self {
        let clauses = snapshot
            .iter()
            .map(|d| match &d.selection {
                Selection::One(value) => Clause::Equals {
                    field: d.field.clone(),
                    value: value.clone(),
                },
                Selection::Many(values) => Clause::OneOf {
                    field: d.field.clone(),
                    values: values.iter().cloned().collect(),
                },
            })
            .collect();
        Self { clauses }
    }

    pub fn matches(&self, row: &CleanedRow) -> bool {
        self.clauses.iter().all(|c| c.matches(row))
    }

    /// Matching rows in input order.
    pub fn filter<'a>(&self, rows: &'a [CleanedRow]) -> Vec<&'a CleanedRow> {
        rows.iter().filter(|row| self.matches(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{load_dataset, DatasetSchema, FieldSpec};
    use crate::selection::{Dimension, DimensionSpec, SelectionStore};

    const AIR: &str = "\
pollutant,concentration,month,year
CO,1.1,January,2018
CO,1.3,February,2019
NO2,22,January,2018
NO2,25,February,2019
";

    fn rows() -> Vec<CleanedRow> {
        let schema = DatasetSchema {
            fields: vec![
                FieldSpec::categorical("pollutant"),
                FieldSpec::numeric("concentration"),
                FieldSpec::categorical("month"),
                FieldSpec::categorical("year"),
            ],
            labels: Vec::new(),
            fold: None,
        };
        load_dataset(AIR, &schema).unwrap().rows
    }

    fn store(rows: &[CleanedRow]) -> SelectionStore {
        SelectionStore::from_rows(
            &[
                DimensionSpec::single("pollutant", "pollutant"),
                DimensionSpec::multi("year", "year"),
            ],
            rows,
        )
    }

    #[test]
    fn test_single_and_multi_clauses_are_anded() {
        let rows = rows();
        let mut store = store(&rows);
        let _ = store.select_single("pollutant", "NO2").unwrap();
        let _ = store.toggle_individual("year", "2019", false).unwrap();
        let predicate = RowPredicate::from_snapshot(&store.snapshot());
        let matched = predicate.filter(&rows);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].number("concentration"), Some(22.0));
    }

    #[test]
    fn test_empty_multi_selection_matches_nothing() {
        let rows = rows();
        let mut store = store(&rows);
        let _ = store.toggle_all("year", false).unwrap();
        let predicate = RowPredicate::from_snapshot(&store.snapshot());
        assert!(predicate.filter(&rows).is_empty());
    }

    #[test]
    fn test_single_without_choice_matches_nothing() {
        let rows = rows();
        let store = SelectionStore::new(vec![Dimension::new(
            DimensionSpec::single("pollutant", "pollutant"),
            Vec::new(),
        )]);
        let predicate = RowPredicate::from_snapshot(&store.snapshot());
        assert!(predicate.filter(&rows).is_empty());
    }

    #[test]
    fn test_no_dimensions_matches_everything_in_order() {
        let rows = rows();
        let predicate = RowPredicate::from_snapshot(&SelectionSnapshot::default());
        let matched = predicate.filter(&rows);
        assert_eq!(matched.len(), rows.len());
        assert_eq!(matched[3].text("pollutant"), Some("NO2"));
    }
}
