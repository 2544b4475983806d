use dashsync::{
    coerce_number, load_dataset, materialize, presets, ChartTemplate, Cycle, Dashboard,
    DashError, EmbedOptions, EmptyReason, Failure, FieldKind, Outcome, OverridePoints, Palette,
    Renderer, ScaleParams, SpecInstance,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

const SOURCES: [&str; 4] = ["energy", "industrial_processes", "agriculture", "waste"];

fn ghg_csv() -> String {
    let mut csv = String::from("date,source,emissions,year\n");
    for year in 2014..=2019 {
        for (i, source) in SOURCES.iter().enumerate() {
            csv.push_str(&format!(
                "{year}-01-01,{source},\"{},{:03}\",{year}\n",
                i + 1,
                year - 2000
            ));
        }
    }
    csv
}

fn ghg_dashboard() -> Dashboard {
    let preset = presets::get("ghg_bar").unwrap();
    let mut dash = Dashboard::new(preset.config().unwrap()).unwrap();
    let _ = dash.dataset_loaded(Ok(ghg_csv()));
    let _ = dash.template_loaded(Ok(preset.template_text().to_string()));
    dash
}

#[derive(Default)]
struct Capture {
    specs: Vec<SpecInstance>,
}

impl Renderer for Capture {
    type Error = String;

    fn render(&mut self, _: &str, spec: &SpecInstance, _: &EmbedOptions) -> Result<(), String> {
        self.specs.push(spec.clone());
        Ok(())
    }
}

#[test]
fn coerce_number_is_idempotent() {
    for raw in ["1,234.5", " 7 ", "", "abc", "-0.25", "1e3", "NaN", "inf"] {
        match coerce_number(raw) {
            Some(n) => assert_eq!(coerce_number(n), Some(n)),
            None => assert_eq!(coerce_number(None::<f64>), None),
        }
    }
}

#[test]
fn cleaning_never_adds_rows_and_keeps_required_fields() {
    let preset = presets::get("ghg_bar").unwrap();
    let schema = preset.config().unwrap().schema;
    let mut csv = ghg_csv();
    csv.push_str("2020-01-01,total,1,2020\n2020-01-01,energy,,2020\n2020-01-01,,5,2020\n");
    let dataset = load_dataset(&csv, &schema).unwrap();
    assert!(dataset.report.cleaned_rows <= dataset.report.raw_rows);
    assert_eq!(dataset.report.raw_rows, 27);
    assert_eq!(dataset.rows.len(), 24);
    for row in &dataset.rows {
        for field in schema.fields.iter().filter(|f| f.required) {
            match field.kind {
                FieldKind::Numeric => assert!(row.number(&field.name).is_some_and(f64::is_finite)),
                FieldKind::Categorical => {
                    assert!(row.text(&field.name).is_some_and(|t| !t.is_empty()))
                }
            }
        }
    }
}

#[test]
fn all_control_round_trip() {
    let mut dash = ghg_dashboard();
    let _ = dash.toggle_all("year", false).unwrap();
    let _ = dash.toggle_all("year", true).unwrap();
    let store = dash.store().unwrap();
    assert_eq!(store.all_checked("year"), Some(true));
    for year in 2014..=2019 {
        assert!(store.is_checked("year", &year.to_string()));
    }
}

#[test]
fn individual_controls_drive_the_aggregate() {
    let mut dash = ghg_dashboard();
    let _ = dash.toggle_individual("year", "2016", false).unwrap();
    assert_eq!(dash.store().unwrap().all_checked("year"), Some(false));
    let _ = dash.toggle_individual("year", "2016", true).unwrap();
    assert_eq!(dash.store().unwrap().all_checked("year"), Some(true));
}

#[test]
fn materialize_leaves_template_untouched() {
    let preset = presets::get("ghg_bar").unwrap();
    let template = preset.template().unwrap();
    let before: Value = template.spec().clone();
    let rows = vec![json!({ "year": "2014", "source_label": "Energy", "emissions_num": 1.0 })];
    let params = ScaleParams {
        color_domain: Some(vec!["2014".into()]),
        category_order: Some(vec!["Energy".into()]),
        ..ScaleParams::default()
    };
    let _ = materialize(&template, &rows, &params, &Palette::default()).unwrap();
    assert_eq!(template.spec(), &before);
}

#[test]
fn palette_assignment_preserves_domain_order() {
    let template = ChartTemplate::from_value(
        json!({ "mark": "bar", "encoding": { "color": { "field": "year" } } }),
        &OverridePoints {
            color: Some(Default::default()),
            ..OverridePoints::default()
        },
    )
    .unwrap();
    let palette = Palette::default();
    let params = ScaleParams {
        color_domain: Some(vec!["2014".into(), "2015".into(), "2016".into()]),
        ..ScaleParams::default()
    };
    let rows: Vec<Value> = Vec::new();
    let spec = materialize(&template, &rows, &params, &palette).unwrap();
    assert_eq!(
        spec.as_value()["encoding"]["color"]["scale"]["range"],
        json!([palette.color(0), palette.color(1), palette.color(2)])
    );
}

#[test]
fn only_2018_selected_renders_exactly_those_rows() {
    let mut dash = ghg_dashboard();
    for year in [2014, 2015, 2016, 2017, 2019] {
        let _ = dash.toggle_individual("year", &year.to_string(), false).unwrap();
    }
    let filtered = dash.filtered_rows();
    assert_eq!(filtered.len(), SOURCES.len());
    assert!(filtered.iter().all(|r| r.text("year") == Some("2018")));

    let mut capture = Capture::default();
    let outcome = dash.run(&mut capture);
    assert!(outcome.is_rendered(), "{outcome:?}");
    let spec = capture.specs[0].as_value();
    let values = spec["data"]["values"].as_array().unwrap();
    assert_eq!(values.len(), 4);
    assert!(values.iter().all(|v| v["year"] == json!("2018")));
    assert_eq!(spec["encoding"]["color"]["scale"]["domain"], json!(["2018"]));
    assert_eq!(values[0]["emissions_num"], json!(1018.0));
}

#[test]
fn deselecting_every_year_is_empty_not_rendered() {
    let mut dash = ghg_dashboard();
    for year in 2014..=2019 {
        let cycle = dash.toggle_individual("year", &year.to_string(), false).unwrap();
        if year == 2019 {
            assert!(matches!(
                cycle,
                Cycle::Settled(Outcome::Empty(EmptyReason::NoSelection { .. }))
            ));
        }
    }
    let outcome = dash.run(&mut Capture::default());
    assert!(!outcome.is_rendered());
    assert_eq!(
        dash.message().as_deref(),
        Some("Please select at least one year.")
    );
}

#[test]
fn years_outside_the_valid_range_leave_nothing_to_match() {
    let preset = presets::get("ghg_bar").unwrap();
    let mut dash = Dashboard::new(preset.config().unwrap()).unwrap();
    let _ = dash.template_loaded(Ok(preset.template_text().to_string()));
    let cycle = dash.dataset_loaded(Ok(
        "date,source,emissions,year\n2012-01-01,energy,10,2012\n2012-01-01,waste,4,2012\n".into(),
    ));
    assert!(dash.store().unwrap().dimension("year").unwrap().options().is_empty());
    assert!(matches!(
        cycle,
        Cycle::Settled(Outcome::Empty(EmptyReason::NoMatchingRows { .. }))
    ));
    assert_eq!(dash.message().as_deref(), Some("No data for selected year(s)."));
}

#[test]
fn dataset_fetch_failure_beats_template_result() {
    let preset = presets::get("ghg_bar").unwrap();
    let templates: [Result<String, String>; 3] = [
        Ok(preset.template_text().to_string()),
        Err("HTTP 500".into()),
        Ok("{ not json".into()),
    ];
    for template in templates {
        let mut dash = Dashboard::new(preset.config().unwrap()).unwrap();
        let _ = dash.template_loaded(template);
        let _ = dash.dataset_loaded(Err("connection reset".into()));
        let outcome = dash.run(&mut Capture::default());
        assert_eq!(
            outcome,
            Outcome::Failed(Failure::DatasetLoad("connection reset".into()))
        );
        assert_eq!(dash.message().as_deref(), Some("Failed to load data."));
    }
}

#[test]
fn loading_until_both_fetches_resolve() {
    let preset = presets::get("ghg_bar").unwrap();
    let mut dash = Dashboard::new(preset.config().unwrap()).unwrap();
    assert!(matches!(dash.refresh(), Cycle::Settled(Outcome::Loading)));
    assert!(matches!(
        dash.dataset_loaded(Ok(ghg_csv())),
        Cycle::Settled(Outcome::Loading)
    ));
    assert!(matches!(
        dash.template_loaded(Ok(preset.template_text().to_string())),
        Cycle::Deliver(_)
    ));
}

#[test]
fn stale_render_completion_is_ignored() {
    let mut dash = ghg_dashboard();
    let Cycle::Deliver(first) = dash.toggle_individual("year", "2014", false).unwrap() else {
        panic!("expected a delivery");
    };
    let Cycle::Deliver(second) = dash.toggle_individual("year", "2015", false).unwrap() else {
        panic!("expected a delivery");
    };
    assert_eq!(dash.finish(first.generation, Err("late failure".into())), None);
    let outcome = dash.finish(second.generation, Ok(())).unwrap();
    assert!(outcome.is_rendered());
    assert_eq!(dash.message(), None);
}

#[test]
fn repeated_header_row_is_a_dataset_error() {
    let preset = presets::get("ghg_bar").unwrap();
    let schema = preset.config().unwrap().schema;
    let mut csv = ghg_csv();
    csv.push_str("date,source,emissions,year\n");
    assert!(matches!(
        load_dataset(&csv, &schema),
        Err(DashError::DatasetLoad(msg)) if msg.contains("repeats the header")
    ));
}

#[test]
fn missing_named_layer_is_a_spec_error() {
    let preset = presets::get("malaysia_map").unwrap();
    let mut dash = Dashboard::new(preset.config().unwrap()).unwrap();
    let _ = dash.dataset_loaded(Ok("Month,City,State,Latitude,Longitude\nJanuary,Ipoh,Perak,4.5,101.0\n".into()));
    let cycle = dash.template_loaded(Ok(r#"{ "layer": [ { "mark": "geoshape" } ] }"#.into()));
    assert!(matches!(
        cycle,
        Cycle::Settled(Outcome::Failed(Failure::SpecLoad(ref d))) if d.contains("aqi_points")
    ));
    assert_eq!(
        dash.message().as_deref(),
        Some("Failed to load map specification.")
    );
}
