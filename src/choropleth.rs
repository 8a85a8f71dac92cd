//! Left join of yearly department means onto the boundary set, plus the
//! color scale and per-region overlays the map document is drawn from.

use crate::config::MapConfig;
use crate::types::{AggregatedRegionPrice, RegionBoundary};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject};
use serde::Serialize;
use std::collections::HashMap;

pub const UNAVAILABLE: &str = "No disponible";

const HIGHLIGHT_FILL: &str = "#ffaf00";

/// ColorBrewer YlGnBu, indexed by class count (3 to 9).
fn ylgnbu(classes: usize) -> &'static [&'static str] {
    match classes {
        0..=3 => &["#edf8b1", "#7fcdbb", "#2c7fb8"],
        4 => &["#ffffcc", "#a1dab4", "#41b6c4", "#225ea8"],
        5 => &["#ffffcc", "#a1dab4", "#41b6c4", "#2c7fb8", "#253494"],
        6 => &["#ffffcc", "#c7e9b4", "#7fcdbb", "#41b6c4", "#2c7fb8", "#253494"],
        7 => &["#ffffcc", "#c7e9b4", "#7fcdbb", "#41b6c4", "#1d91c0", "#225ea8", "#0c2c84"],
        8 => &["#ffffd9", "#edf8b1", "#c7e9b4", "#7fcdbb", "#41b6c4", "#1d91c0", "#225ea8", "#0c2c84"],
        _ => &["#ffffd9", "#edf8b1", "#c7e9b4", "#7fcdbb", "#41b6c4", "#1d91c0", "#225ea8", "#253494", "#081d58"],
    }
}

/// Stepped scale: `colors.len()` equal-width buckets between the smallest
/// and largest observed value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorScale {
    pub edges: Vec<f64>,
    pub colors: Vec<String>,
}

impl ColorScale {
    /// `None` when there is nothing to scale.
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I, palette: &[&str]) -> Option<Self> {
        let (min, max) = values
            .into_iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc: Option<(f64, f64)>, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })?;

        let bins = palette.len().max(1);
        let step = (max - min) / bins as f64;
        let edges = (0..=bins)
            .map(|i| if i == bins { max } else { min + step * i as f64 })
            .collect();

        Some(Self {
            edges,
            colors: palette.iter().map(|c| c.to_string()).collect(),
        })
    }

    /// Bucket `i` holds `(edges[i], edges[i + 1]]`; the minimum lands in the
    /// first bucket, anything outside the range is clamped.
    pub fn bucket(&self, value: f64) -> usize {
        let below = self.edges.iter().filter(|e| **e < value).count();
        below.saturating_sub(1).min(self.colors.len() - 1)
    }

    pub fn color_for(&self, value: f64) -> &str {
        &self.colors[self.bucket(value)]
    }
}

/// Leaflet path options. Field names serialize the way Leaflet reads them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathStyle {
    pub fill_color: String,
    pub fill_opacity: f64,
    pub color: String,
    pub weight: f64,
    pub opacity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionOverlay {
    pub name: String,
    pub price: Option<f64>,
    pub fill: PathStyle,
    pub border: PathStyle,
    pub highlight: PathStyle,
    pub tooltip: String,
    pub geometry: Geometry,
}

impl RegionOverlay {
    pub fn is_available(&self) -> bool {
        self.price.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Legend {
    pub name: String,
    pub scale: Option<ColorScale>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapState {
    pub year: i32,
    pub center: [f64; 2],
    pub zoom: u8,
    pub legend: Legend,
    pub regions: Vec<RegionOverlay>,
}

pub(crate) fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn tooltip(region: &str, price: Option<f64>) -> String {
    let price = match price {
        Some(p) => format!("{:.2}", p),
        None => UNAVAILABLE.to_string(),
    };
    format!("<b>{}</b><br>Precio Promedio: {}", escape_html(region), price)
}

/// Joins `aggregates` for `year` onto every boundary by exact name. Every
/// boundary yields one overlay, in boundary order; regions without a price
/// are marked unavailable and take the no-data fill.
pub fn build_choropleth(
    aggregates: &[AggregatedRegionPrice],
    boundaries: &[RegionBoundary],
    year: i32,
    config: &MapConfig,
) -> MapState {
    let prices: HashMap<&str, Option<f64>> = aggregates
        .iter()
        .filter(|a| a.year == year)
        .map(|a| (a.region.as_str(), a.mean_price))
        .collect();

    let joined: Vec<(&RegionBoundary, Option<f64>)> = boundaries
        .iter()
        .map(|b| (b, prices.get(b.name.as_str()).copied().flatten()))
        .collect();

    let scale = ColorScale::from_values(
        joined.iter().filter_map(|(_, price)| *price),
        ylgnbu(config.bins),
    );

    let regions = joined
        .into_iter()
        .map(|(boundary, price)| {
            let fill_color = match (price, &scale) {
                (Some(p), Some(scale)) => scale.color_for(p).to_string(),
                _ => config.nan_fill_color.clone(),
            };

            RegionOverlay {
                name: boundary.name.clone(),
                price,
                fill: PathStyle {
                    fill_color,
                    fill_opacity: config.fill_opacity,
                    color: "black".to_string(),
                    weight: 1.0,
                    opacity: config.line_opacity,
                },
                border: PathStyle {
                    fill_color: "transparent".to_string(),
                    fill_opacity: 0.0,
                    color: "black".to_string(),
                    weight: 1.0,
                    opacity: 1.0,
                },
                highlight: PathStyle {
                    fill_color: HIGHLIGHT_FILL.to_string(),
                    fill_opacity: 0.5,
                    color: "red".to_string(),
                    weight: 2.0,
                    opacity: 1.0,
                },
                tooltip: tooltip(&boundary.name, price),
                geometry: Geometry::new(geojson::Value::from(&boundary.geometry)),
            }
        })
        .collect();

    MapState {
        year,
        center: config.center,
        zoom: config.zoom_start,
        legend: Legend { name: config.legend_name.clone(), scale },
        regions,
    }
}

impl MapState {
    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .regions
            .iter()
            .map(|region| {
                let mut properties = JsonObject::new();
                properties.insert("name".to_string(), region.name.clone().into());
                properties.insert("price".to_string(), region.price.into());
                properties.insert("tooltip".to_string(), region.tooltip.clone().into());
                for (key, style) in [("fill", &region.fill), ("border", &region.border), ("highlight", &region.highlight)] {
                    properties.insert(key.to_string(), serde_json::to_value(style).unwrap_or_default());
                }

                Feature {
                    bbox: None,
                    geometry: Some(region.geometry.clone()),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::{mean_price_by_region, tests::{record, sample}};
    use geo::{polygon, MultiPolygon};

    fn boundary(name: &str) -> RegionBoundary {
        RegionBoundary {
            name: name.to_string(),
            geometry: MultiPolygon::new(vec![polygon![
                (x: -75.0, y: 10.0),
                (x: -74.0, y: 10.0),
                (x: -74.0, y: 11.0),
                (x: -75.0, y: 10.0),
            ]]),
        }
    }

    fn boundaries() -> Vec<RegionBoundary> {
        ["Atlántico", "Bolívar", "Córdoba", "ATLANTICO"].into_iter().map(boundary).collect()
    }

    #[test]
    fn scale_edges_span_observed_range() {
        let scale = ColorScale::from_values([3000.0, 4200.0, 3600.0], ylgnbu(6)).unwrap();

        assert_eq!(scale.edges.len(), 7);
        assert_eq!(scale.edges[0], 3000.0);
        assert_eq!(scale.edges[6], 4200.0);
        assert_eq!(scale.color_for(3000.0), "#ffffcc");
        assert_eq!(scale.color_for(4200.0), "#253494");
        // (3400, 3600]
        assert_eq!(scale.bucket(3600.0), 2);
        assert_eq!(scale.bucket(3600.1), 3);
    }

    #[test]
    fn single_value_scale_uses_first_color() {
        let scale = ColorScale::from_values([4100.0], ylgnbu(6)).unwrap();
        assert_eq!(scale.color_for(4100.0), "#ffffcc");
        assert!(ColorScale::from_values(std::iter::empty(), ylgnbu(6)).is_none());
    }

    #[test]
    fn palette_follows_requested_class_count() {
        assert_eq!(ylgnbu(4).len(), 4);
        assert_eq!(ylgnbu(9).len(), 9);
        assert_eq!(ylgnbu(1).len(), 3);
        assert_eq!(ylgnbu(20).len(), 9);
    }

    #[test]
    fn left_join_keeps_every_boundary() {
        let aggregates = mean_price_by_region(&sample(), 2023);
        let state = build_choropleth(&aggregates, &boundaries(), 2023, &MapConfig::default());

        assert_eq!(state.regions.len(), 4);
        let by_name: HashMap<&str, &RegionOverlay> =
            state.regions.iter().map(|r| (r.name.as_str(), r)).collect();

        assert_eq!(by_name["Atlántico"].price, Some(4100.0));
        assert_eq!(by_name["Atlántico"].tooltip, "<b>Atlántico</b><br>Precio Promedio: 4100.00");
        assert_eq!(by_name["Bolívar"].price, Some(3900.0));

        // no price data for 2023, and no accent-insensitive match
        for name in ["Córdoba", "ATLANTICO"] {
            let region = by_name[name];
            assert!(!region.is_available());
            assert!(region.tooltip.ends_with(UNAVAILABLE));
            assert_eq!(region.fill.fill_color, "black");
        }
    }

    #[test]
    fn matched_regions_get_scale_colors() {
        let aggregates = mean_price_by_region(&sample(), 2023);
        let state = build_choropleth(&aggregates, &boundaries(), 2023, &MapConfig::default());

        let scale = state.legend.scale.as_ref().unwrap();
        assert_eq!(scale.edges.first(), Some(&3900.0));
        assert_eq!(scale.edges.last(), Some(&4100.0));
        assert_eq!(state.regions[0].fill.fill_color, "#253494");
        assert_eq!(state.regions[1].fill.fill_color, "#ffffcc");
        assert_eq!(state.regions[0].fill.fill_opacity, 0.7);
        assert_eq!(state.regions[0].fill.opacity, 0.2);
    }

    #[test]
    fn absent_year_marks_every_region_unavailable() {
        let aggregates = mean_price_by_region(&sample(), 1999);
        assert!(aggregates.is_empty());

        let state = build_choropleth(&aggregates, &boundaries(), 1999, &MapConfig::default());

        assert_eq!(state.regions.len(), 4);
        assert!(state.regions.iter().all(|r| r.price.is_none()));
        assert!(state.regions.iter().all(|r| r.tooltip.contains(UNAVAILABLE)));
        assert!(state.legend.scale.is_none());
    }

    #[test]
    fn all_missing_group_is_unavailable() {
        let aggregates = mean_price_by_region(&sample(), 2024);
        let state = build_choropleth(&aggregates, &boundaries(), 2024, &MapConfig::default());
        let cordoba = state.regions.iter().find(|r| r.name == "Córdoba").unwrap();
        assert!(!cordoba.is_available());
    }

    #[test]
    fn tooltip_rounds_and_escapes() {
        assert_eq!(
            tooltip("San Andrés <Islas>", Some(4123.456)),
            "<b>San Andrés &lt;Islas&gt;</b><br>Precio Promedio: 4123.46"
        );
    }

    #[test]
    fn inputs_are_left_untouched() {
        let records = vec![record("2023-01-01", "Atlántico", "Barranquilla", Some(4000.0))];
        let aggregates = mean_price_by_region(&records, 2023);
        let before = aggregates.clone();
        let bounds = boundaries();
        let _ = build_choropleth(&aggregates, &bounds, 2023, &MapConfig::default());
        assert_eq!(aggregates, before);
        assert_eq!(bounds.len(), 4);
    }

    #[test]
    fn feature_collection_carries_styles_and_null_price() {
        let state = build_choropleth(&[], &boundaries(), 2023, &MapConfig::default());
        let fc = state.to_feature_collection();

        assert_eq!(fc.features.len(), 4);
        let props = fc.features[0].properties.as_ref().unwrap();
        assert_eq!(props["name"], "Atlántico");
        assert!(props["price"].is_null());
        assert_eq!(props["highlight"]["fillColor"], "#ffaf00");
        assert_eq!(props["border"]["fillColor"], "transparent");
    }
}
