//! Chart templates and the structural-clone-plus-override materializer.
//!
//! The override points are typed configuration and are checked once when a
//! template is loaded, so a missing layer is a load error rather than a
//! guess at render time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::DashError;

/// Where an override lands: the top-level spec or one entry of `layer`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LayerRef {
    #[default]
    Root,
    Named(String),
    Index(usize),
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CategoryMode {
    /// `encoding.<channel>.scale.domain`
    #[default]
    ScaleDomain,
    /// `encoding.<channel>.sort`
    Sort,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryTarget {
    #[serde(default)]
    pub layer: LayerRef,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default)]
    pub mode: CategoryMode,
}

fn default_channel() -> String {
    "x".to_string()
}

impl Default for CategoryTarget {
    fn default() -> Self {
        Self {
            layer: LayerRef::Root,
            channel: default_channel(),
            mode: CategoryMode::ScaleDomain,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelProperty {
    /// `encoding.<channel>.value`
    Value,
    /// `encoding.<channel>.title`
    Title,
}

impl ChannelProperty {
    fn key(self) -> &'static str {
        match self {
            ChannelProperty::Value => "value",
            ChannelProperty::Title => "title",
        }
    }
}

/// A constant picked by the option chosen in a single-select dimension.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChannelBinding {
    pub dimension: String,
    #[serde(default)]
    pub layer: LayerRef,
    pub channel: String,
    pub property: ChannelProperty,
    /// Option -> constant. Options not listed are written as their own text.
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

impl ChannelBinding {
    pub fn value_for(&self, selected: &str) -> Value {
        self.values
            .get(selected)
            .cloned()
            .unwrap_or_else(|| Value::String(selected.to_string()))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OverridePoints {
    /// `null` embeds the template as authored, with no rows injected.
    #[serde(default = "default_data")]
    pub data: Option<LayerRef>,
    #[serde(default)]
    pub color: Option<LayerRef>,
    #[serde(default)]
    pub category: Option<CategoryTarget>,
    #[serde(default)]
    pub channels: Vec<ChannelBinding>,
}

fn default_data() -> Option<LayerRef> {
    Some(LayerRef::Root)
}

impl Default for OverridePoints {
    fn default() -> Self {
        Self {
            data: default_data(),
            color: None,
            category: None,
            channels: Vec::new(),
        }
    }
}

impl OverridePoints {
    pub fn binds_data(&self) -> bool {
        self.data.is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScaleParams {
    pub color_domain: Option<Vec<String>>,
    pub category_order: Option<Vec<String>>,
    /// Chosen option per entry of `OverridePoints::channels`, same order.
    pub channel_values: Vec<Option<String>>,
}

pub const SAFE_PALETTE: [&str; 7] = [
    "#1f77b4", "#ff7f0e", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f", "#17becf",
];

/// Ordered, non-empty list of colors.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Palette(Vec<String>);

impl Palette {
    pub fn new(colors: Vec<String>) -> Result<Self, DashError> {
        if colors.is_empty() {
            return Err(DashError::InvalidConfig("palette must not be empty".into()));
        }
        Ok(Self(colors))
    }

    pub fn color(&self, index: usize) -> &str {
        &self.0[index % self.0.len()]
    }

    /// The first `n` colors, cycling when `n` exceeds the palette.
    pub fn range_for(&self, n: usize) -> Vec<String> {
        (0..n).map(|i| self.color(i).to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self(SAFE_PALETTE.iter().map(|c| c.to_string()).collect())
    }
}

impl TryFrom<Vec<String>> for Palette {
    type Error = DashError;

    fn try_from(colors: Vec<String>) -> Result<Self, Self::Error> {
        Palette::new(colors)
    }
}

impl From<Palette> for Vec<String> {
    fn from(palette: Palette) -> Self {
        palette.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Resolved {
    data: Option<Option<usize>>,
    color: Option<Option<usize>>,
    category: Option<Option<usize>>,
    channels: Vec<Option<usize>>,
}

/// A loaded chart specification. Never mutated after construction.
#[derive(Clone, Debug, PartialEq)]
pub struct ChartTemplate {
    spec: Value,
    points: OverridePoints,
    resolved: Resolved,
}

impl ChartTemplate {
    pub fn parse(text: &str, points: &OverridePoints) -> Result<Self, DashError> {
        let spec: Value =
            serde_json::from_str(text).map_err(|e| DashError::SpecLoad(e.to_string()))?;
        Self::from_value(spec, points)
    }

    pub fn from_value(spec: Value, points: &OverridePoints) -> Result<Self, DashError> {
        if !spec.is_object() {
            return Err(DashError::SpecLoad("template is not a JSON object".into()));
        }
        let data = match &points.data {
            Some(layer) => Some(resolve_layer(&spec, layer)?),
            None => None,
        };
        let color = match &points.color {
            Some(layer) => {
                let idx = resolve_layer(&spec, layer)?;
                require_channel(&spec, idx, "color")?;
                Some(idx)
            }
            None => None,
        };
        let category = match &points.category {
            Some(target) => {
                let idx = resolve_layer(&spec, &target.layer)?;
                require_channel(&spec, idx, &target.channel)?;
                Some(idx)
            }
            None => None,
        };
        let mut channels = Vec::with_capacity(points.channels.len());
        for binding in &points.channels {
            let idx = resolve_layer(&spec, &binding.layer)?;
            require_channel(&spec, idx, &binding.channel)?;
            channels.push(idx);
        }
        Ok(Self {
            spec,
            points: points.clone(),
            resolved: Resolved {
                data,
                color,
                category,
                channels,
            },
        })
    }

    pub fn spec(&self) -> &Value {
        &self.spec
    }

    pub fn points(&self) -> &OverridePoints {
        &self.points
    }

    /// Whether rows are injected at all.
    pub fn binds_data(&self) -> bool {
        self.resolved.data.is_some()
    }
}

fn resolve_layer(spec: &Value, layer: &LayerRef) -> Result<Option<usize>, DashError> {
    let layers = || {
        spec.get("layer")
            .and_then(Value::as_array)
            .ok_or_else(|| DashError::SpecLoad("template has no layer array".into()))
    };
    match layer {
        LayerRef::Root => Ok(None),
        LayerRef::Named(name) => layers()?
            .iter()
            .position(|l| l.get("name").and_then(Value::as_str) == Some(name.as_str()))
            .map(Some)
            .ok_or_else(|| DashError::SpecLoad(format!("no layer named '{name}'"))),
        LayerRef::Index(idx) => match layers()?.get(*idx) {
            Some(l) if l.is_object() => Ok(Some(*idx)),
            _ => Err(DashError::SpecLoad(format!("no layer at index {idx}"))),
        },
    }
}

fn layer_ref(spec: &Value, index: Option<usize>) -> Option<&Value> {
    match index {
        None => Some(spec),
        Some(idx) => spec.get("layer")?.get(idx),
    }
}

fn require_channel(spec: &Value, index: Option<usize>, channel: &str) -> Result<(), DashError> {
    let found = layer_ref(spec, index)
        .and_then(|l| l.get("encoding"))
        .and_then(|e| e.get(channel))
        .is_some_and(Value::is_object);
    if found {
        Ok(())
    } else {
        Err(DashError::SpecLoad(format!(
            "template has no encoding.{channel} at its {} override point",
            index.map_or("root".to_string(), |i| format!("layer[{i}]"))
        )))
    }
}

fn target_mut(spec: &mut Value, index: Option<usize>) -> Result<&mut Map<String, Value>, DashError> {
    let target = match index {
        None => Some(spec),
        Some(idx) => spec.get_mut("layer").and_then(|l| l.get_mut(idx)),
    };
    target
        .and_then(Value::as_object_mut)
        .ok_or_else(|| DashError::SpecLoad("override point vanished from template".into()))
}

fn object_entry<'m>(map: &'m mut Map<String, Value>, key: &str) -> &'m mut Map<String, Value> {
    let slot = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(obj) => obj,
        _ => unreachable!("slot was just replaced with an object"),
    }
}

/// A finished, render-ready specification.
#[derive(Clone, Debug, PartialEq)]
pub struct SpecInstance {
    spec: Value,
}

impl SpecInstance {
    pub fn as_value(&self) -> &Value {
        &self.spec
    }

    pub fn into_value(self) -> Value {
        self.spec
    }

    pub fn to_json_pretty(&self) -> Result<String, DashError> {
        Ok(serde_json::to_string_pretty(&self.spec)?)
    }

    /// SHA-256 of the compact JSON encoding.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(&self.spec).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        let mut out = String::with_capacity(digest.len() * 2);
        for b in digest {
            use std::fmt::Write;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out
    }
}

/// Clone `template` and inject rows, color scale, category order and
/// channel constants.
///
/// `data` keeps any other keys of the target's data object except `url`,
/// which would otherwise shadow the inline values. A template without a
/// data point ignores `rows`.
pub fn materialize<R: Serialize>(
    template: &ChartTemplate,
    rows: &[R],
    params: &ScaleParams,
    palette: &Palette,
) -> Result<SpecInstance, DashError> {
    let mut spec = template.spec.clone();

    if let Some(idx) = template.resolved.data {
        let values = serde_json::to_value(rows)?;
        let target = target_mut(&mut spec, idx)?;
        let data = object_entry(target, "data");
        data.remove("url");
        data.insert("values".to_string(), values);
    }

    if let (Some(domain), Some(idx)) = (&params.color_domain, template.resolved.color) {
        let target = target_mut(&mut spec, idx)?;
        let color = object_entry(object_entry(target, "encoding"), "color");
        let scale = object_entry(color, "scale");
        scale.insert("domain".to_string(), json!(domain));
        scale.insert("range".to_string(), json!(palette.range_for(domain.len())));
    }

    if let (Some(order), Some(idx), Some(category)) = (
        &params.category_order,
        template.resolved.category,
        &template.points.category,
    ) {
        let target = target_mut(&mut spec, idx)?;
        let channel = object_entry(object_entry(target, "encoding"), &category.channel);
        match category.mode {
            CategoryMode::ScaleDomain => {
                object_entry(channel, "scale").insert("domain".to_string(), json!(order));
            }
            CategoryMode::Sort => {
                channel.insert("sort".to_string(), json!(order));
            }
        }
    }

    let bindings = template
        .points
        .channels
        .iter()
        .zip(&template.resolved.channels)
        .zip(&params.channel_values);
    for ((binding, idx), selected) in bindings {
        let Some(selected) = selected else {
            continue;
        };
        let target = target_mut(&mut spec, *idx)?;
        let channel = object_entry(object_entry(target, "encoding"), &binding.channel);
        channel.insert(binding.property.key().to_string(), binding.value_for(selected));
    }

    Ok(SpecInstance { spec })
}
