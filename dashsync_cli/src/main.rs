use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use dashsync::{
    presets, CleanedRow, Dashboard, DashboardConfig, DimensionKind, EmbedOptions, Failure,
    Outcome, Renderer, SpecInstance,
};
use rayon::prelude::*;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Filter-synchronized chart spec renderer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Materialize chart specs for one or more dashboards
    Render(RenderArgs),
    /// Show the cleaning report and dimension domains of a dashboard
    Inspect(InspectArgs),
    /// List built-in dashboards
    Presets,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Dashboard config JSON files
    #[arg(value_hint = ValueHint::FilePath)]
    configs: Vec<PathBuf>,

    /// Built-in dashboard ids (see `presets`)
    #[arg(long)]
    preset: Vec<String>,

    /// Local CSV overriding the config's dataset location
    #[arg(long, value_hint = ValueHint::FilePath)]
    dataset: Option<PathBuf>,

    /// Local template overriding the config's template location
    #[arg(long, value_hint = ValueHint::FilePath)]
    template: Option<PathBuf>,

    /// Restrict a dimension, e.g. `year=2017,2018` or `pollutant=NO2`
    #[arg(long, value_name = "DIM=V1,V2")]
    select: Vec<String>,

    /// Uncheck single options, e.g. `year=2014`
    #[arg(long, value_name = "DIM=V")]
    uncheck: Vec<String>,

    /// Output spec path (`-` for stdout)
    #[arg(short, long, default_value = "spec.json", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Also write a standalone HTML page embedding the chart
    #[arg(long, value_hint = ValueHint::FilePath)]
    html: Option<PathBuf>,

    /// Directory for per-dashboard outputs when rendering several
    #[arg(long, value_hint = ValueHint::DirPath)]
    out_dir: Option<PathBuf>,

    /// Write the filtered rows as CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    rows_csv: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// Dashboard config JSON
    #[arg(value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Built-in dashboard id
    #[arg(long, conflicts_with = "config")]
    preset: Option<String>,

    /// Local CSV overriding the config's dataset location
    #[arg(long, value_hint = ValueHint::FilePath)]
    dataset: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Render(args) => args.verbose,
        Command::Inspect(args) => args.verbose,
        Command::Presets => false,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Render(args) => handle_render(args),
        Command::Inspect(args) => handle_inspect(args),
        Command::Presets => handle_presets(),
    }
}

#[derive(Debug, Clone)]
enum TemplateSource {
    Bundled(&'static str),
    File(PathBuf),
}

#[derive(Debug, Clone)]
struct Job {
    config: DashboardConfig,
    /// `None` for template-only dashboards.
    dataset: Option<PathBuf>,
    template: TemplateSource,
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn local_path(base: Option<&Path>, location: &str, what: &str, id: &str) -> Result<PathBuf> {
    if location.is_empty() {
        bail!("{id}: no {what} location configured; pass --{what}");
    }
    if is_remote(location) {
        bail!("{id}: {what} {location} is remote; download it and pass --{what}");
    }
    let path = PathBuf::from(location);
    Ok(match base {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path,
    })
}

fn load_config(path: &Path) -> Result<DashboardConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    DashboardConfig::from_json(&text)
        .with_context(|| format!("{} is not a valid dashboard config", path.display()))
}

fn dataset_path(
    config: &DashboardConfig,
    base: Option<&Path>,
    dataset: Option<&Path>,
) -> Result<Option<PathBuf>> {
    if config.template_only() {
        if dataset.is_some() {
            warn!("{}: template-only dashboard, ignoring --dataset", config.id);
        }
        return Ok(None);
    }
    match dataset {
        Some(p) => Ok(Some(p.to_path_buf())),
        None => local_path(base, &config.dataset_url, "dataset", &config.id).map(Some),
    }
}

fn config_job(path: &Path, dataset: Option<&Path>, template: Option<&Path>) -> Result<Job> {
    let config = load_config(path)?;
    let base = path.parent();
    let dataset = dataset_path(&config, base, dataset)?;
    let template = match template {
        Some(p) => TemplateSource::File(p.to_path_buf()),
        None => TemplateSource::File(local_path(
            base,
            &config.template_url,
            "template",
            &config.id,
        )?),
    };
    Ok(Job {
        config,
        dataset,
        template,
    })
}

fn preset_job(id: &str, dataset: Option<&Path>, template: Option<&Path>) -> Result<Job> {
    let preset = presets::get(id).ok_or_else(|| anyhow!("unknown preset '{id}'"))?;
    let config = preset.config()?;
    let dataset = dataset_path(&config, None, dataset)?;
    let template = match template {
        Some(p) => TemplateSource::File(p.to_path_buf()),
        None => TemplateSource::Bundled(preset.template_text()),
    };
    Ok(Job {
        config,
        dataset,
        template,
    })
}

fn collect_jobs(args: &RenderArgs) -> Result<Vec<Job>> {
    let total = args.configs.len() + args.preset.len();
    if total == 0 {
        bail!("no dashboards supplied; pass config files or --preset");
    }
    if total > 1 && (args.dataset.is_some() || args.template.is_some()) {
        bail!("--dataset and --template apply to a single dashboard");
    }
    let dataset = args.dataset.as_deref();
    let template = args.template.as_deref();
    let mut jobs = Vec::with_capacity(total);
    for path in &args.configs {
        jobs.push(config_job(path, dataset, template)?);
    }
    for id in &args.preset {
        jobs.push(preset_job(id, dataset, template)?);
    }
    Ok(jobs)
}

/// Feed both resources into a fresh dashboard, read failures included.
fn open_dashboard(job: &Job) -> Result<Dashboard> {
    let mut dash = Dashboard::new(job.config.clone())?;
    if let Some(path) = &job.dataset {
        let dataset = fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()));
        let _ = dash.dataset_loaded(dataset);
    }
    let template = match &job.template {
        TemplateSource::Bundled(text) => Ok(text.to_string()),
        TemplateSource::File(path) => fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display())),
    };
    let _ = dash.template_loaded(template);
    Ok(dash)
}

fn parse_assignment(input: &str) -> Result<(String, Vec<String>)> {
    let (dim, values) = input
        .split_once('=')
        .ok_or_else(|| anyhow!("invalid selection '{input}': expected DIM=V1,V2"))?;
    let dim = dim.trim();
    if dim.is_empty() {
        bail!("invalid selection '{input}': empty dimension name");
    }
    let values: Vec<String> = values
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    Ok((dim.to_string(), values))
}

fn apply_selections(dash: &mut Dashboard, select: &[String], uncheck: &[String]) -> Result<()> {
    for raw in select {
        let (dim, values) = parse_assignment(raw)?;
        let kind = dash
            .store()
            .and_then(|s| s.dimension(&dim))
            .map(|d| d.kind());
        match kind {
            Some(DimensionKind::Multi) => {
                let _ = dash.toggle_all(&dim, false)?;
                for value in &values {
                    let _ = dash.toggle_individual(&dim, value, true)?;
                }
            }
            Some(DimensionKind::Single) => {
                let [value] = values.as_slice() else {
                    bail!("--select {raw}: '{dim}' takes exactly one value");
                };
                let _ = dash.select_single(&dim, value)?;
            }
            None => {
                // let the store report the unknown dimension, or NotReady
                let _ = dash.toggle_all(&dim, true)?;
            }
        }
    }
    for raw in uncheck {
        let (dim, values) = parse_assignment(raw)?;
        for value in &values {
            let _ = dash.toggle_individual(&dim, value, false)?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
enum Target {
    Stdout,
    File(PathBuf),
}

impl Target {
    fn from_path(path: &Path) -> Self {
        if path.as_os_str() == "-" {
            Target::Stdout
        } else {
            Target::File(path.to_path_buf())
        }
    }
}

/// Writes the spec as JSON and, optionally, an HTML page that embeds it.
struct FileRenderer {
    spec: Target,
    html: Option<PathBuf>,
    title: String,
    render_message: String,
}

impl Renderer for FileRenderer {
    type Error = anyhow::Error;

    fn render(&mut self, mount: &str, spec: &SpecInstance, options: &EmbedOptions) -> Result<()> {
        let json = spec.to_json_pretty()?;
        match &self.spec {
            Target::Stdout => {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                writeln!(handle, "{json}").context("failed to write spec to stdout")?;
            }
            Target::File(path) => {
                fs::write(path, &json)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!("Spec written: {}", path.display());
            }
        }
        if let Some(path) = &self.html {
            let page = html_page(&self.title, mount, spec, options, &self.render_message)?;
            fs::write(path, page).with_context(|| format!("failed to write {}", path.display()))?;
            info!("HTML page written: {}", path.display());
        }
        Ok(())
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// JSON safe to inline in a `<script>` element.
fn script_json(value: &impl serde::Serialize) -> Result<String> {
    Ok(serde_json::to_string(value)?.replace("</", "<\\/"))
}

fn html_page(
    title: &str,
    mount: &str,
    spec: &SpecInstance,
    options: &EmbedOptions,
    render_message: &str,
) -> Result<String> {
    let element_id = mount.trim_start_matches('#');
    Ok(format!(
        r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8">
  <title>{title}</title>
  <script src="https://cdn.jsdelivr.net/npm/vega@5"></script>
  <script src="https://cdn.jsdelivr.net/npm/vega-lite@5"></script>
  <script src="https://cdn.jsdelivr.net/npm/vega-embed@6"></script>
</head>
<body>
  <h1>{title}</h1>
  <div id="{id}"></div>
  <script>
    vegaEmbed({mount}, {spec}, {options}).catch(err => {{
      console.error("vegaEmbed error:", err);
      document.querySelector({mount}).textContent = {message};
    }});
  </script>
</body>
</html>
"#,
        title = escape_html(title),
        id = escape_html(element_id),
        mount = script_json(&mount)?,
        spec = script_json(spec.as_value())?,
        options = script_json(options)?,
        message = script_json(&render_message)?,
    ))
}

fn cell(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn write_rows_csv(rows: &[&CleanedRow], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    let headers: Vec<&String> = match rows.first() {
        Some(row) => row.fields().map(|(name, _)| name).collect(),
        None => Vec::new(),
    };
    writer.write_record(&headers)?;
    for row in rows {
        writer.write_record(
            headers
                .iter()
                .map(|h| row.get(h).map(cell).unwrap_or_default()),
        )?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("Filtered rows written: {} ({} rows)", path.display(), rows.len());
    Ok(())
}

#[derive(Debug, Clone)]
struct Outputs {
    spec: Target,
    html: Option<PathBuf>,
    rows_csv: Option<PathBuf>,
}

fn outputs_for(args: &RenderArgs, job: &Job, many: bool) -> Result<Outputs> {
    match (&args.out_dir, many) {
        (Some(dir), _) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let id = &job.config.id;
            Ok(Outputs {
                spec: Target::File(dir.join(format!("{id}.vl.json"))),
                html: args.html.as_ref().map(|_| dir.join(format!("{id}.html"))),
                rows_csv: args.rows_csv.as_ref().map(|_| dir.join(format!("{id}.rows.csv"))),
            })
        }
        (None, true) => bail!("rendering several dashboards needs --out-dir"),
        (None, false) => Ok(Outputs {
            spec: Target::from_path(&args.output),
            html: args.html.clone(),
            rows_csv: args.rows_csv.clone(),
        }),
    }
}

fn run_job(job: &Job, outputs: &Outputs, select: &[String], uncheck: &[String]) -> Result<Outcome> {
    let id = job.config.id.clone();
    let mut dash = open_dashboard(job)?;
    if dash.store().is_some() {
        apply_selections(&mut dash, select, uncheck).with_context(|| format!("{id}: bad selection"))?;
    } else if !select.is_empty() || !uncheck.is_empty() {
        warn!("{id}: dataset unavailable, ignoring selections");
    }
    debug!("{id}: selection {:?}", dash.selection());

    let mut renderer = FileRenderer {
        spec: outputs.spec.clone(),
        html: outputs.html.clone(),
        title: if job.config.title.is_empty() {
            id.clone()
        } else {
            job.config.title.clone()
        },
        render_message: job.config.messages.render.clone(),
    };
    let outcome = dash.run(&mut renderer);
    let message = dash.message();
    match &outcome {
        Outcome::Rendered { fingerprint, .. } => {
            info!("{id}: rendered {} rows (spec {})", dash.filtered_rows().len(), &fingerprint[..12]);
            if let Some(path) = &outputs.rows_csv {
                write_rows_csv(&dash.filtered_rows(), path)?;
            }
            Ok(outcome)
        }
        Outcome::Failed(failure) => {
            let detail = match failure {
                Failure::NoUsableRows => String::new(),
                other => format!(" ({})", other.detail()),
            };
            Err(anyhow!("{id}: {}{detail}", message.unwrap_or_default()))
        }
        Outcome::Empty(_) | Outcome::Loading => {
            Err(anyhow!("{id}: {}", message.unwrap_or_default()))
        }
    }
}

fn handle_render(args: RenderArgs) -> Result<()> {
    let jobs = collect_jobs(&args)?;
    let many = jobs.len() > 1;
    let planned: Vec<(Job, Outputs)> = jobs
        .into_iter()
        .map(|job| {
            let outputs = outputs_for(&args, &job, many)?;
            Ok((job, outputs))
        })
        .collect::<Result<_>>()?;

    let results: Vec<Result<Outcome>> = planned
        .par_iter()
        .map(|(job, outputs)| run_job(job, outputs, &args.select, &args.uncheck))
        .collect();

    let mut failures = Vec::new();
    for result in results {
        if let Err(err) = result {
            failures.push(format!("{err:#}"));
        }
    }
    if failures.is_empty() {
        info!("{} dashboard(s) rendered", planned.len());
        Ok(())
    } else {
        Err(anyhow!(failures.join("\n")))
    }
}

fn handle_inspect(args: InspectArgs) -> Result<()> {
    let job = match (&args.config, &args.preset) {
        (Some(path), _) => config_job(path, args.dataset.as_deref(), None)?,
        (None, Some(id)) => preset_job(id, args.dataset.as_deref(), None)?,
        (None, None) => bail!("pass a config file or --preset"),
    };
    let dash = open_dashboard(&job)?;
    let report = inspect_report(&dash);
    if let Outcome::Failed(failure) = dash.outcome() {
        if dash.report().is_none() {
            bail!("{}: {}", job.config.id, failure.detail());
        }
    }
    print!("{report}");
    Ok(())
}

fn inspect_report(dash: &Dashboard) -> String {
    let config = dash.config();
    let mut out = format!("dashboard: {}\n", config.id);
    if let Some(report) = dash.report() {
        out.push_str(&format!(
            "rows: {} raw, {} cleaned\n",
            report.raw_rows, report.cleaned_rows
        ));
        if let Some(folded) = report.folded_rows {
            out.push_str(&format!("folded rows: {folded}\n"));
        }
        out.push_str("columns:\n");
        for (field, column) in &report.columns {
            out.push_str(&format!(
                "  {field} <- {}\n",
                column.as_deref().unwrap_or("(missing)")
            ));
        }
        if !report.dropped.is_empty() {
            out.push_str("dropped:\n");
            for (field, count) in &report.dropped {
                out.push_str(&format!("  {field}: {count}\n"));
            }
        }
    }
    let controls = dash.controls();
    if !controls.is_empty() {
        out.push_str("dimensions:\n");
        for control in controls {
            let values: Vec<&str> = control.options.iter().map(|o| o.value.as_str()).collect();
            out.push_str(&format!(
                "  {} ({:?}): {}\n",
                control.name,
                control.kind,
                values.join(", ")
            ));
        }
    }
    if let Some(message) = dash.message() {
        out.push_str(&format!("status: {message}\n"));
    }
    out
}

fn handle_presets() -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for preset in presets::all() {
        let config = preset.config()?;
        writeln!(handle, "{:<20} {}", preset.id, config.title)?;
        if config.template_only() {
            writeln!(handle, "{:<20} data: (inside the template)", "")?;
        } else {
            writeln!(handle, "{:<20} data: {}", "", config.dataset_url)?;
        }
    }
    Ok(())
}
