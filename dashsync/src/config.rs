use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::dataset::{DatasetSchema, FieldKind};
use crate::materialize::{OverridePoints, Palette};
use crate::pipeline::{EmbedOptions, ScalePlan};
use crate::selection::{DimensionKind, DimensionSpec};
use crate::DashError;

/// User-visible strings. `{label}` is replaced with the dimension label;
/// in `no_matching_rows`, `{<dimension>}` is replaced with that dimension's
/// selected values.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Messages {
    pub loading: String,
    pub no_selection: String,
    pub no_single_selection: String,
    pub no_matching_rows: String,
    pub dataset_load: String,
    pub spec_load: String,
    pub no_usable_rows: String,
    pub render: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            loading: "Loading chart…".to_string(),
            no_selection: "Please select at least one {label}.".to_string(),
            no_single_selection: "Please select a {label}.".to_string(),
            no_matching_rows: "No data for the selected filters.".to_string(),
            dataset_load: "Failed to load data.".to_string(),
            spec_load: "Failed to load chart specification.".to_string(),
            no_usable_rows: "No usable rows after cleaning.".to_string(),
            render: "Error rendering chart. See console for details.".to_string(),
        }
    }
}

impl Messages {
    pub fn with_label(template: &str, label: &str) -> String {
        template.replace("{label}", label)
    }

    pub fn with_selection(template: &str, selection: &BTreeMap<String, String>) -> String {
        selection
            .iter()
            .fold(template.to_string(), |text, (name, values)| {
                text.replace(&format!("{{{name}}}"), values)
            })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DashboardConfig {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub dataset_url: String,
    #[serde(default)]
    pub template_url: String,
    #[serde(default = "default_mount")]
    pub mount: String,
    #[serde(default)]
    pub schema: DatasetSchema,
    #[serde(default)]
    pub dimensions: Vec<DimensionSpec>,
    /// Multi-select dimension whose checked values become the color domain.
    #[serde(default)]
    pub color_by: Option<String>,
    #[serde(default)]
    pub category_order: Option<Vec<String>>,
    #[serde(default)]
    pub override_points: OverridePoints,
    #[serde(default)]
    pub palette: Palette,
    #[serde(default)]
    pub embed: EmbedOptions,
    #[serde(default)]
    pub messages: Messages,
}

fn default_mount() -> String {
    "#chart".to_string()
}

impl DashboardConfig {
    pub fn from_json(text: &str) -> Result<Self, DashError> {
        let config: DashboardConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DashError> {
        let invalid = |msg: String| Err(DashError::InvalidConfig(format!("{}: {msg}", self.id)));

        let mut names = HashSet::new();
        for field in &self.schema.fields {
            if !names.insert(field.name.as_str()) {
                return invalid(format!("duplicate field '{}'", field.name));
            }
        }

        if let Some(fold) = &self.schema.fold {
            for name in &fold.fields {
                match self.schema.field(name) {
                    Some(f) if f.kind == FieldKind::Numeric => {}
                    _ => return invalid(format!("fold field '{name}' is not a numeric field")),
                }
            }
            for name in [&fold.key, &fold.value] {
                if names.contains(name.as_str()) {
                    return invalid(format!("fold output '{name}' shadows a schema field"));
                }
            }
        }

        if self.template_only() && !self.dimensions.is_empty() {
            return invalid("a template-only dashboard has no rows to filter".into());
        }

        let mut dims = HashSet::new();
        for dim in &self.dimensions {
            if !dims.insert(dim.name.as_str()) {
                return invalid(format!("duplicate dimension '{}'", dim.name));
            }
            if !self.schema.is_categorical(&dim.field) {
                return invalid(format!(
                    "dimension '{}' filters '{}', which is not a categorical field",
                    dim.name, dim.field
                ));
            }
        }

        if let Some(color_by) = &self.color_by {
            match self.dimensions.iter().find(|d| &d.name == color_by) {
                Some(d) if d.kind == DimensionKind::Multi => {}
                Some(_) => return invalid(format!("color_by '{color_by}' must be multi-select")),
                None => return invalid(format!("color_by names unknown dimension '{color_by}'")),
            }
            if self.override_points.color.is_none() {
                return invalid("color_by is set but override_points.color is not".into());
            }
        }

        if self.category_order.is_some() && self.override_points.category.is_none() {
            return invalid("category_order is set but override_points.category is not".into());
        }

        for binding in &self.override_points.channels {
            match self.dimensions.iter().find(|d| d.name == binding.dimension) {
                Some(d) if d.kind == DimensionKind::Single => {}
                Some(_) => {
                    return invalid(format!(
                        "channel binding on '{}' must use a single-select dimension",
                        binding.dimension
                    ))
                }
                None => {
                    return invalid(format!(
                        "channel binding names unknown dimension '{}'",
                        binding.dimension
                    ))
                }
            }
        }
        Ok(())
    }

    /// The template is embedded as authored; no dataset is fetched.
    pub fn template_only(&self) -> bool {
        !self.override_points.binds_data()
    }

    pub fn scale_plan(&self) -> ScalePlan {
        ScalePlan {
            color_by: self.color_by.clone(),
            category_order: self.category_order.clone(),
            channel_dimensions: self
                .override_points
                .channels
                .iter()
                .map(|b| b.dimension.clone())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r##"{
        "id": "ghg",
        "schema": {
            "fields": [
                { "name": "source", "kind": "categorical" },
                { "name": "emissions_num", "columns": ["emissions"], "kind": "numeric" },
                { "name": "year", "kind": "categorical" }
            ]
        },
        "dimensions": [ { "name": "year", "field": "year", "kind": "multi" } ],
        "color_by": "year",
        "override_points": { "color": "root" }
    }"##;

    #[test]
    fn test_defaults_fill_in() {
        let config = DashboardConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.mount, "#chart");
        assert_eq!(config.palette, Palette::default());
        assert!(config.embed.actions);
        assert!(config.dimensions[0].aggregate);
        assert_eq!(config.messages, Messages::default());
        assert_eq!(config.scale_plan().color_by.as_deref(), Some("year"));
    }

    #[test]
    fn test_label_substitution() {
        let messages = Messages::default();
        assert_eq!(
            Messages::with_label(&messages.no_selection, "year"),
            "Please select at least one year."
        );
    }

    #[test]
    fn test_validation_rejects_inconsistent_configs() {
        let mut config = DashboardConfig::from_json(MINIMAL).unwrap();
        config.override_points.color = None;
        assert!(config.validate().is_err());

        let mut config = DashboardConfig::from_json(MINIMAL).unwrap();
        config.dimensions[0].field = "emissions_num".into();
        assert!(matches!(
            config.validate(),
            Err(DashError::InvalidConfig(msg)) if msg.contains("not a categorical")
        ));

        let mut config = DashboardConfig::from_json(MINIMAL).unwrap();
        config.dimensions[0].kind = DimensionKind::Single;
        assert!(config.validate().is_err());

        let mut config = DashboardConfig::from_json(MINIMAL).unwrap();
        config.category_order = Some(vec!["energy".into()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_bindings_need_a_single_select_dimension() {
        let with_binding = |dimension: &str| {
            MINIMAL.replace(
                r#""override_points": { "color": "root" }"#,
                &format!(
                    r#""override_points": {{ "color": "root", "channels": [
                        {{ "dimension": "{dimension}", "channel": "y", "property": "title" }}
                    ] }}"#
                ),
            )
        };
        assert!(matches!(
            DashboardConfig::from_json(&with_binding("year")),
            Err(DashError::InvalidConfig(msg)) if msg.contains("single-select")
        ));
        assert!(DashboardConfig::from_json(&with_binding("month")).is_err());

        let mut config = DashboardConfig::from_json(MINIMAL).unwrap();
        config.dimensions.push(DimensionSpec::single("source", "source"));
        config.override_points = serde_json::from_str(
            r#"{ "color": "root", "channels": [
                { "dimension": "source", "channel": "y", "property": "title" }
            ] }"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.scale_plan().channel_dimensions, vec!["source"]);
    }

    #[test]
    fn test_template_only_config() {
        let text = r##"{
            "id": "world_map",
            "template_url": "world_map.vg.json",
            "override_points": { "data": null }
        }"##;
        let config = DashboardConfig::from_json(text).unwrap();
        assert!(config.template_only());
        assert!(config.schema.fields.is_empty());

        let mut filtered = config.clone();
        filtered.dimensions.push(DimensionSpec::single("month", "Month"));
        assert!(filtered.validate().is_err());
        assert!(!DashboardConfig::from_json(MINIMAL).unwrap().template_only());
    }

    #[test]
    fn test_fold_outputs_are_checked() {
        let text = MINIMAL.replace(
            r#""kind": "categorical" }
            ]"#,
            r#""kind": "categorical" }
            ],
            "fold": { "fields": ["emissions_num"], "key": "measure", "value": "year" }"#,
        );
        assert!(matches!(
            DashboardConfig::from_json(&text),
            Err(DashError::InvalidConfig(msg)) if msg.contains("shadows")
        ));
        let text = text.replace(r#""value": "year""#, r#""value": "amount""#);
        let config = DashboardConfig::from_json(&text).unwrap();
        assert!(config.schema.is_categorical("measure"));
    }

    #[test]
    fn test_empty_palette_is_rejected_on_load() {
        let text = MINIMAL.replace("\"color_by\"", "\"palette\": [], \"color_by\"");
        assert!(DashboardConfig::from_json(&text).is_err());
    }
}
