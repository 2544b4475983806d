use dashsync::{presets, ControlView, Cycle, Dashboard, DimensionKind, Outcome};
use leptos::*;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_COMMIT: &str = env!("GIT_COMMIT_HASH");
#[cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]
const DEFAULT_PRESET: &str = "ghg_bar";

#[cfg(feature = "chart_vega")]
mod browser {
    use dashsync::Delivery;
    use gloo_net::http::Request;
    use serde::Serialize;
    use wasm_bindgen::{JsCast, JsValue};
    use wasm_bindgen_futures::JsFuture;

    pub async fn fetch_text(url: &str) -> Result<String, String> {
        let resp = Request::get(url).send().await.map_err(|e| e.to_string())?;
        if !resp.ok() {
            return Err(format!("HTTP {} for {url}", resp.status()));
        }
        resp.text().await.map_err(|e| e.to_string())
    }

    fn js_detail(value: JsValue) -> String {
        if let Some(text) = value.as_string() {
            return text;
        }
        match value.dyn_ref::<js_sys::Error>() {
            Some(err) => String::from(err.message()),
            None => format!("{value:?}"),
        }
    }

    /// `vegaEmbed(mount, spec, options)`, resolved once the view is drawn.
    pub async fn vega_embed(delivery: &Delivery) -> Result<(), String> {
        let func = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str("vegaEmbed"))
            .ok()
            .and_then(|v| v.dyn_into::<js_sys::Function>().ok())
            .ok_or_else(|| "vegaEmbed is not loaded".to_string())?;
        let serializer = serde_wasm_bindgen::Serializer::json_compatible();
        let spec = delivery
            .spec
            .as_value()
            .serialize(&serializer)
            .map_err(|e| e.to_string())?;
        let options = delivery
            .options
            .serialize(&serializer)
            .map_err(|e| e.to_string())?;
        let returned = func
            .call3(
                &JsValue::NULL,
                &JsValue::from_str(&delivery.mount),
                &spec,
                &options,
            )
            .map_err(js_detail)?;
        let promise = returned
            .dyn_into::<js_sys::Promise>()
            .map_err(|_| "vegaEmbed did not return a promise".to_string())?;
        JsFuture::from(promise).await.map(|_| ()).map_err(js_detail)
    }

    pub fn log_error(detail: &str) {
        web_sys::console::error_1(&JsValue::from_str(detail));
    }

    pub fn clear_mount(mount: &str) {
        let element = web_sys::window()
            .and_then(|w| w.document())
            .and_then(|d| d.query_selector(mount).ok().flatten());
        if let Some(element) = element {
            element.set_inner_html("");
        }
    }

    pub fn location_search() -> String {
        web_sys::window()
            .and_then(|w| w.location().search().ok())
            .unwrap_or_default()
    }

    pub fn install_panic_hook() {
        console_error_panic_hook::set_once();
    }
}

#[cfg(not(feature = "chart_vega"))]
mod browser {
    use dashsync::Delivery;

    pub async fn fetch_text(url: &str) -> Result<String, String> {
        Err(format!("cannot fetch {url}: built without chart_vega"))
    }

    pub async fn vega_embed(_delivery: &Delivery) -> Result<(), String> {
        Err("built without chart_vega".to_string())
    }

    pub fn log_error(_detail: &str) {}

    pub fn clear_mount(_mount: &str) {}

    pub fn location_search() -> String {
        String::new()
    }

    pub fn install_panic_hook() {}
}

/// `?dashboard=<id>` from a location search string.
#[cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]
fn preset_from_query(search: &str) -> Option<&str> {
    search
        .trim_start_matches('?')
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "dashboard")
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

#[derive(Clone, Debug)]
enum UiEvent {
    Toggle {
        dimension: String,
        value: String,
        on: bool,
    },
    ToggleAll {
        dimension: String,
        on: bool,
    },
    Select {
        dimension: String,
        value: String,
    },
    Reset,
}

/// Handles shared by every control callback.
#[derive(Clone, Copy)]
struct Ctx {
    dash: StoredValue<Dashboard>,
    controls: RwSignal<Vec<ControlView>>,
    message: RwSignal<Option<String>>,
}

impl Ctx {
    fn mount(&self) -> String {
        self.dash.with_value(|d| d.config().mount.clone())
    }

    fn sync_view(&self) {
        self.dash.with_value(|d| {
            self.controls.set(d.controls());
            self.message.set(d.message());
        });
    }

    fn deliver(self, cycle: Cycle) {
        self.sync_view();
        match cycle {
            Cycle::Settled(outcome) => {
                if let Outcome::Failed(failure) = &outcome {
                    browser::log_error(&failure.detail());
                }
                if !outcome.is_rendered() {
                    browser::clear_mount(&self.mount());
                }
            }
            Cycle::Deliver(delivery) => {
                self.message.set(None);
                spawn_local(async move {
                    let result = browser::vega_embed(&delivery).await;
                    if let Err(detail) = &result {
                        browser::log_error(&format!(
                            "vegaEmbed error (render {}): {detail}",
                            delivery.generation
                        ));
                    }
                    let settled = self
                        .dash
                        .try_update_value(|d| d.finish(delivery.generation, result))
                        .flatten();
                    if let Some(outcome) = settled {
                        self.sync_view();
                        if !outcome.is_rendered() {
                            browser::clear_mount(&delivery.mount);
                        }
                    }
                });
            }
        }
    }

    fn dispatch(self, event: UiEvent) {
        let result = self.dash.try_update_value(|d| match &event {
            UiEvent::Toggle {
                dimension,
                value,
                on,
            } => d.toggle_individual(dimension, value, *on),
            UiEvent::ToggleAll { dimension, on } => d.toggle_all(dimension, *on),
            UiEvent::Select { dimension, value } => d.select_single(dimension, value),
            UiEvent::Reset => d.reset(),
        });
        match result {
            Some(Ok(cycle)) => self.deliver(cycle),
            Some(Err(err)) => browser::log_error(&format!("ignored {event:?}: {err}")),
            None => {}
        }
    }
}

fn control_view(ctx: Ctx, control: ControlView) -> impl IntoView {
    let name = control.name.clone();
    let all_box = control.all.map(|checked| {
        let dimension = name.clone();
        view! {
            <label class="option all">
                <input
                    type="checkbox"
                    prop:checked=checked
                    on:change=move |ev| ctx.dispatch(UiEvent::ToggleAll {
                        dimension: dimension.clone(),
                        on: event_target_checked(&ev),
                    })
                />
                " All"
            </label>
        }
    });
    let kind = control.kind;
    let options = control
        .options
        .into_iter()
        .map(|option| {
            let dimension = name.clone();
            let value = option.value.clone();
            let input = match kind {
                DimensionKind::Multi => view! {
                    <input
                        type="checkbox"
                        value=option.value.clone()
                        prop:checked=option.checked
                        on:change=move |ev| ctx.dispatch(UiEvent::Toggle {
                            dimension: dimension.clone(),
                            value: value.clone(),
                            on: event_target_checked(&ev),
                        })
                    />
                },
                DimensionKind::Single => view! {
                    <input
                        type="radio"
                        name=dimension.clone()
                        value=option.value.clone()
                        prop:checked=option.checked
                        on:change=move |_| ctx.dispatch(UiEvent::Select {
                            dimension: dimension.clone(),
                            value: value.clone(),
                        })
                    />
                },
            };
            view! { <label class="option">{input}" "{option.value}</label> }
        })
        .collect_view();
    view! {
        <fieldset class="control">
            <legend>{control.label}</legend>
            {all_box}
            {options}
        </fieldset>
    }
}

#[component]
pub fn App(#[prop(into)] preset: String) -> impl IntoView {
    let config = presets::get(&preset)
        .ok_or_else(|| format!("unknown dashboard '{preset}'"))
        .and_then(|p| p.config().map_err(|e| e.to_string()));
    let dashboard = config.and_then(|c| Dashboard::new(c).map_err(|e| e.to_string()));
    let dashboard = match dashboard {
        Ok(d) => d,
        Err(detail) => {
            browser::log_error(&detail);
            return view! { <main class="dashboard"><p class="status error">{detail}</p></main> }
                .into_view();
        }
    };

    let title = dashboard.config().title.clone();
    let mount_id = dashboard.config().mount.trim_start_matches('#').to_string();
    let dataset_url = dashboard.config().dataset_url.clone();
    let template_only = dashboard.config().template_only();
    let template_url = dashboard.config().template_url.clone();
    let initial_message = dashboard.message();

    let ctx = Ctx {
        dash: store_value(dashboard),
        controls: create_rw_signal(Vec::new()),
        message: create_rw_signal(initial_message),
    };

    // Both fetches run concurrently; the dashboard gates the first render.
    if !template_only {
        spawn_local(async move {
            let fetched = browser::fetch_text(&dataset_url).await;
            if let Some(cycle) = ctx.dash.try_update_value(|d| d.dataset_loaded(fetched)) {
                ctx.deliver(cycle);
            }
        });
    }
    spawn_local(async move {
        let fetched = browser::fetch_text(&template_url).await;
        if let Some(cycle) = ctx.dash.try_update_value(|d| d.template_loaded(fetched)) {
            ctx.deliver(cycle);
        }
    });

    let links = presets::all()
        .iter()
        .map(|p| view! { <a href=format!("?dashboard={}", p.id)>{p.id}</a>" " })
        .collect_view();

    view! {
        <main class="dashboard">
            <header>
                <h1>{title}</h1>
                <nav>{links}</nav>
            </header>
            <section class="controls">
                {move || ctx.controls.get().into_iter().map(|c| control_view(ctx, c)).collect_view()}
                <button on:click=move |_| ctx.dispatch(UiEvent::Reset)>"Reset"</button>
            </section>
            <p class="status" style:display=move || if ctx.message.get().is_some() { "block" } else { "none" }>
                {move || ctx.message.get().unwrap_or_default()}
            </p>
            <div id=mount_id class="chart"></div>
            <footer class="note">{format!("v{APP_VERSION} ({APP_COMMIT})")}</footer>
        </main>
    }
    .into_view()
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    browser::install_panic_hook();
    let search = browser::location_search();
    let preset = preset_from_query(&search)
        .unwrap_or(DEFAULT_PRESET)
        .to_string();
    leptos::mount_to_body(move || view! { <App preset=preset/> });
}
