use crate::choropleth::{build_choropleth, escape_html, MapState};
use crate::config::AppConfig;
use crate::processing::{available_departments, available_years, mean_price_by_region, municipality_series};
use crate::types::{AggregatedMunicipalitySeries, Dataset};
use anyhow::{anyhow, Context, Result};
use chrono::{Duration, NaiveDate};
use plotters::prelude::*;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::info;

const CHART_SIZE: (u32, u32) = (1000, 500);

const MAP_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8"/>
<title>__TITLE__</title>
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css"/>
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<style>
html, body, #map { height: 100%; margin: 0; }
.legend { position: absolute; bottom: 20px; right: 10px; z-index: 1000; background: rgba(255,255,255,0.85);
          padding: 6px 10px; font: 12px sans-serif; border-radius: 4px; }
.legend i { display: inline-block; width: 18px; height: 12px; margin-right: 6px; opacity: 0.7; }
</style>
</head>
<body>
<div id="map"></div>
__LEGEND__
<script>
const state = __STATE__;
const map = L.map("map").setView(state.center, state.zoom);
L.tileLayer("https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png", {
  attribution: "&copy; OpenStreetMap contributors"
}).addTo(map);
L.geoJSON(state.features, { style: f => f.properties.fill }).addTo(map);
for (const feature of state.features.features) {
  const props = feature.properties;
  const layer = L.geoJSON(feature, { style: () => props.border });
  layer.eachLayer(l => {
    l.on("mouseover", e => e.target.setStyle(props.highlight));
    l.on("mouseout", e => e.target.setStyle(props.border));
  });
  layer.bindTooltip(props.tooltip).addTo(map);
}
</script>
</body>
</html>
"#;

fn legend_html(state: &MapState) -> String {
    let mut html = format!(
        "<div class=\"legend\"><b>{} ({})</b>",
        escape_html(&state.legend.name),
        state.year
    );
    if let Some(scale) = &state.legend.scale {
        for (i, color) in scale.colors.iter().enumerate() {
            html.push_str(&format!(
                "<br><i style=\"background:{}\"></i>{:.2} – {:.2}",
                color,
                scale.edges[i],
                scale.edges[i + 1]
            ));
        }
    }
    html.push_str("</div>");
    html
}

/// Standalone Leaflet page for one year's choropleth.
pub fn render_map_document(state: &MapState) -> Result<String> {
    let payload = serde_json::json!({
        "center": state.center,
        "zoom": state.zoom,
        "features": state.to_feature_collection(),
    });
    // keep the payload from closing the script element
    let payload = serde_json::to_string(&payload)?.replace("</", "<\\/");

    Ok(MAP_TEMPLATE
        .replace("__TITLE__", &format!("{} {}", escape_html(&state.legend.name), state.year))
        .replace("__LEGEND__", &legend_html(state))
        .replace("__STATE__", &payload))
}

fn chart_err<E: std::fmt::Debug>(e: E) -> anyhow::Error {
    anyhow!("Failed to draw chart: {:?}", e)
}

fn padded<T: Copy + PartialOrd>(lo: T, hi: T, widen: impl Fn(T, T) -> (T, T)) -> (T, T) {
    if lo < hi { (lo, hi) } else { widen(lo, hi) }
}

/// SVG line chart, one line per municipality. Points without a mean are left
/// out; an empty series still yields a titled chart.
pub fn render_series_chart(department: &str, series: &[AggregatedMunicipalitySeries]) -> Result<String> {
    let title = format!("Evolución del Precio Promedio en {}", department);

    let mut lines: BTreeMap<&str, Vec<(NaiveDate, f64)>> = BTreeMap::new();
    for point in series {
        if let Some(price) = point.mean_price {
            lines.entry(point.municipality.as_str()).or_default().push((point.date, price));
        }
    }

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, CHART_SIZE).into_drawing_area();
        root.fill(&WHITE).map_err(chart_err)?;

        let all = lines.values().flatten();
        let dates = all.clone().map(|(d, _)| *d);
        let prices = all.map(|(_, p)| *p);

        let (Some(first), Some(last)) = (dates.clone().min(), dates.max()) else {
            root.titled(&title, ("sans-serif", 24)).map_err(chart_err)?;
            root.present().map_err(chart_err)?;
            drop(root);
            return Ok(svg);
        };
        let (low, high) = prices.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p), hi.max(p)));

        let (first, last) = padded(first, last, |a, b| (a - Duration::days(1), b + Duration::days(1)));
        let (low, high) = padded(low, high, |a, b| (a - 1.0, b + 1.0));
        let margin = (high - low) * 0.05;

        let mut chart = ChartBuilder::on(&root)
            .caption(&title, ("sans-serif", 24))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(70)
            .build_cartesian_2d(first..last, (low - margin)..(high + margin))
            .map_err(chart_err)?;

        chart
            .configure_mesh()
            .x_desc("Fecha")
            .y_desc("Precio Promedio")
            .draw()
            .map_err(chart_err)?;

        for (i, (municipality, points)) in lines.iter().enumerate() {
            let color = Palette99::pick(i).to_rgba();
            chart
                .draw_series(LineSeries::new(points.iter().copied(), color.stroke_width(2)))
                .map_err(chart_err)?
                .label(*municipality)
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
        }

        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(chart_err)?;

        root.present().map_err(chart_err)?;
    }

    Ok(svg)
}

/// File-name friendly form of a department name.
pub fn slug(name: &str) -> String {
    name.chars()
        .map(|c| match c.to_lowercase().next().unwrap_or(c) {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            'ñ' => 'n',
            c if c.is_ascii_alphanumeric() => c,
            _ => '_',
        })
        .collect()
}

/// Chart file name per department, in the same order. Departments whose slugs
/// collide get their position prefixed so no chart overwrites another.
pub fn chart_file_names(departments: &[String]) -> Vec<String> {
    let slugs: Vec<String> = departments.iter().map(|d| slug(d)).collect();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for s in &slugs {
        *counts.entry(s.as_str()).or_default() += 1;
    }

    slugs
        .iter()
        .enumerate()
        .map(|(i, s)| {
            if counts[s.as_str()] > 1 {
                format!("evolution_{}_{}.svg", i, s)
            } else {
                format!("evolution_{}.svg", s)
            }
        })
        .collect()
}

/// Writes `map_{year}.html`, `map_{year}.geojson` and one evolution chart per
/// department (see [`chart_file_names`]).
pub fn generate_artifacts(config: &AppConfig, dataset: &Dataset) -> Result<()> {
    let out_dir = &config.output.dir;
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", out_dir))?;

    let years = available_years(&dataset.records);
    info!("Rendering choropleth for {} years...", years.len());

    years.par_iter().try_for_each(|&year| -> Result<()> {
        let aggregates = mean_price_by_region(&dataset.records, year);
        let state = build_choropleth(&aggregates, &dataset.boundaries, year, &config.map);

        write(&out_dir.join(format!("map_{}.html", year)), &render_map_document(&state)?)?;
        write(
            &out_dir.join(format!("map_{}.geojson", year)),
            &serde_json::to_string(&state.to_feature_collection())?,
        )
    })?;

    let departments = available_departments(&dataset.records);
    info!("Rendering evolution charts for {} departments...", departments.len());

    let file_names = chart_file_names(&departments);

    departments.par_iter().zip(file_names.par_iter()).try_for_each(|(department, file_name)| -> Result<()> {
        let series = municipality_series(&dataset.records, department);
        let svg = render_series_chart(department, &series)?;
        write(&out_dir.join(file_name), &svg)
    })?;

    Ok(())
}

fn write(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))
}
