use crate::config::{AppConfig, ColumnConfig};
use crate::types::{Dataset, PriceRecord, RegionBoundary};
use anyhow::{Context, Result, anyhow};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord};
use geo::MultiPolygon;
use geojson::GeoJson;
use shapefile::Reader;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{info, warn};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

// `%.f` also matches when the fractional part is absent.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M:%S",
];

pub fn load_data(config: &AppConfig) -> Result<Dataset> {
    info!("Loading data...");

    let file = File::open(&config.input.prices_csv)
        .with_context(|| format!("Failed to open CSV file: {:?}", config.input.prices_csv))?;
    let records = load_records(file, &config.columns)
        .with_context(|| format!("Failed to read CSV file: {:?}", config.input.prices_csv))?;
    info!("Loaded {} price records", records.len());

    let boundaries = load_boundaries(&config.input.boundaries, &config.input.region_property)?;
    info!("Loaded {} region boundaries", boundaries.len());

    Ok(Dataset { records, boundaries })
}

/// Parses a price date the way the published exports write it. Slash dates
/// are read month first.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

struct ColumnIndices {
    date: usize,
    department: usize,
    municipality: usize,
    price: usize,
    station_name: Option<usize>,
    fuel_type: Option<usize>,
    municipality_code: Option<usize>,
    latitude: Option<usize>,
    longitude: Option<usize>,
}

impl ColumnIndices {
    fn resolve(headers: &StringRecord, columns: &ColumnConfig) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| anyhow!("Column '{}' not found in CSV", name))
        };

        Ok(Self {
            date: require(columns.date.as_str())?,
            department: require(columns.department.as_str())?,
            municipality: require(columns.municipality.as_str())?,
            price: require(columns.price.as_str())?,
            station_name: find(columns.station_name.as_str()),
            fuel_type: find(columns.fuel_type.as_str()),
            municipality_code: find(columns.municipality_code.as_str()),
            latitude: find(columns.latitude.as_str()),
            longitude: find(columns.longitude.as_str()),
        })
    }
}

/// Reads price rows. Rows whose date cannot be parsed are skipped; empty or
/// NaN prices are kept as missing.
pub fn load_records<R: Read>(reader: R, columns: &ColumnConfig) -> Result<Vec<PriceRecord>> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = rdr.headers()?.clone();
    let idx = ColumnIndices::resolve(&headers, columns)?;

    let text = |record: &StringRecord, i: Option<usize>| {
        i.and_then(|i| record.get(i)).unwrap_or("").to_string()
    };

    let mut records = Vec::new();
    let mut skipped = 0usize;

    for result in rdr.records() {
        let record = result?;

        let Some(date) = record.get(idx.date).and_then(parse_date) else {
            skipped += 1;
            continue;
        };

        records.push(PriceRecord {
            date,
            year: date.year(),
            department: text(&record, Some(idx.department)),
            municipality: text(&record, Some(idx.municipality)),
            station_name: text(&record, idx.station_name),
            price: record.get(idx.price).and_then(parse_number),
            fuel_type: text(&record, idx.fuel_type),
            municipality_code: text(&record, idx.municipality_code),
            latitude: idx.latitude.and_then(|i| record.get(i)).and_then(parse_number),
            longitude: idx.longitude.and_then(|i| record.get(i)).and_then(parse_number),
        });
    }

    if skipped > 0 {
        warn!("Skipped {} rows with an unreadable date", skipped);
    }

    Ok(records)
}

pub fn load_boundaries(path: &Path, region_property: &str) -> Result<Vec<RegionBoundary>> {
    let extension = path.extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Boundary file has no extension"))?;

    match extension.as_str() {
        "shp" => load_shapefile_boundaries(path, region_property),
        "json" | "geojson" => {
            info!("Loading GeoJSON from {:?}...", path);
            let file = File::open(path)
                .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
            // Loads the whole collection into memory.
            let geojson = GeoJson::from_reader(BufReader::new(file))
                .with_context(|| format!("Failed to parse GeoJSON: {:?}", path))?;
            boundaries_from_geojson(geojson, region_property)
        }
        _ => Err(anyhow!("Unsupported geometry format: {}", extension)),
    }
}

pub fn boundaries_from_geojson(geojson: GeoJson, region_property: &str) -> Result<Vec<RegionBoundary>> {
    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    let mut boundaries = Vec::new();

    for feature in collection.features {
        let name = match feature.properties.as_ref().and_then(|props| props.get(region_property)) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => continue,
        };

        let geometry = match feature.geometry {
            Some(geom) => {
                let geom: geo::Geometry<f64> = geom.value.try_into()
                    .map_err(|e| anyhow!("Failed to convert geometry of '{}': {:?}", name, e))?;
                match geom {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => continue,
                }
            }
            None => continue,
        };

        boundaries.push(RegionBoundary { name, geometry });
    }

    Ok(boundaries)
}

fn load_shapefile_boundaries(path: &Path, region_property: &str) -> Result<Vec<RegionBoundary>> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut boundaries = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let name = match record.get(region_property) {
            Some(shapefile::dbase::FieldValue::Character(Some(s))) => s.trim().to_string(),
            Some(shapefile::dbase::FieldValue::Character(None)) => continue,
            Some(_) => return Err(anyhow!("Shapefile column '{}' must be a string", region_property)),
            None => return Err(anyhow!("Column '{}' not found in Shapefile", region_property)),
        };

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygon: {:?}", e))?,
            shapefile::Shape::PolygonM(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygonM: {:?}", e))?,
            shapefile::Shape::PolygonZ(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygonZ: {:?}", e))?,
            _ => continue,
        };

        boundaries.push(RegionBoundary { name, geometry });
    }

    Ok(boundaries)
}
