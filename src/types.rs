use chrono::NaiveDate;
use geo::MultiPolygon;
use serde::Serialize;

/// One published price row. `year` is derived from `date` at load time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceRecord {
    pub date: NaiveDate,
    pub year: i32,
    pub department: String,
    pub municipality: String,
    pub station_name: String,
    pub price: Option<f64>, // None for empty / NaN cells
    pub fuel_type: String,
    pub municipality_code: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RegionBoundary {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedRegionPrice {
    pub region: String,
    pub year: i32,
    // None when every matching record lacked a price
    pub mean_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedMunicipalitySeries {
    pub date: NaiveDate,
    pub municipality: String,
    pub mean_price: Option<f64>,
}

/// Everything loaded at startup. Read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub records: Vec<PriceRecord>,
    pub boundaries: Vec<RegionBoundary>,
}
