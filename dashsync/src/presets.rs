//! Dashboards that ship with the crate.

use crate::config::DashboardConfig;
use crate::materialize::ChartTemplate;
use crate::DashError;

#[derive(Clone, Copy, Debug)]
pub struct Preset {
    pub id: &'static str,
    config: &'static str,
    template: &'static str,
}

static PRESETS: [Preset; 5] = [
    Preset {
        id: "ghg_bar",
        config: include_str!("../presets/ghg_bar.json"),
        template: include_str!("../presets/ghg_bar.vg.json"),
    },
    Preset {
        id: "air_pollution_line",
        config: include_str!("../presets/air_pollution_line.json"),
        template: include_str!("../presets/air_pollution_line.vg.json"),
    },
    Preset {
        id: "malaysia_map",
        config: include_str!("../presets/malaysia_map.json"),
        template: include_str!("../presets/malaysia_map.vg.json"),
    },
    Preset {
        id: "scatterplot",
        config: include_str!("../presets/scatterplot.json"),
        template: include_str!("../presets/scatterplot.vg.json"),
    },
    Preset {
        id: "world_map",
        config: include_str!("../presets/world_map.json"),
        template: include_str!("../presets/world_map.vg.json"),
    },
];

impl Preset {
    pub fn config(&self) -> Result<DashboardConfig, DashError> {
        DashboardConfig::from_json(self.config)
    }

    pub fn template_text(&self) -> &'static str {
        self.template
    }

    /// Parse the bundled template against this preset's override points.
    pub fn template(&self) -> Result<ChartTemplate, DashError> {
        let config = self.config()?;
        ChartTemplate::parse(self.template, &config.override_points)
    }
}

pub fn all() -> &'static [Preset] {
    &PRESETS
}

pub fn get(id: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.id == id)
}

/// Template text of a preset.
pub fn template(id: &str) -> Option<&'static str> {
    get(id).map(Preset::template_text)
}
