use crate::types::{AggregatedMunicipalitySeries, AggregatedRegionPrice, PriceRecord};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

// Running sum over the prices that are present. `count` stays 0 for groups
// made only of missing prices; their mean is absent.
#[derive(Default)]
struct MeanAccumulator {
    sum: f64,
    count: usize,
}

impl MeanAccumulator {
    fn push(&mut self, price: Option<f64>) {
        if let Some(p) = price.filter(|p| p.is_finite()) {
            self.sum += p;
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Mean published price per department for one year, ordered by department.
/// An absent year gives an empty result.
pub fn mean_price_by_region(records: &[PriceRecord], year: i32) -> Vec<AggregatedRegionPrice> {
    let mut groups: BTreeMap<&str, MeanAccumulator> = BTreeMap::new();

    for record in records.iter().filter(|r| r.year == year && !r.department.is_empty()) {
        groups.entry(record.department.as_str()).or_default().push(record.price);
    }

    groups
        .into_iter()
        .map(|(region, acc)| AggregatedRegionPrice {
            region: region.to_string(),
            year,
            mean_price: acc.mean(),
        })
        .collect()
}

/// Mean price per (date, municipality) inside one department, ordered by
/// date then municipality.
pub fn municipality_series(records: &[PriceRecord], department: &str) -> Vec<AggregatedMunicipalitySeries> {
    let mut groups: BTreeMap<(NaiveDate, &str), MeanAccumulator> = BTreeMap::new();

    for record in records
        .iter()
        .filter(|r| r.department == department && !r.municipality.is_empty())
    {
        groups
            .entry((record.date, record.municipality.as_str()))
            .or_default()
            .push(record.price);
    }

    groups
        .into_iter()
        .map(|((date, municipality), acc)| AggregatedMunicipalitySeries {
            date,
            municipality: municipality.to_string(),
            mean_price: acc.mean(),
        })
        .collect()
}

pub fn available_years(records: &[PriceRecord]) -> Vec<i32> {
    records.iter().map(|r| r.year).collect::<BTreeSet<_>>().into_iter().collect()
}

pub fn available_departments(records: &[PriceRecord]) -> Vec<String> {
    records
        .iter()
        .filter(|r| !r.department.is_empty())
        .map(|r| r.department.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}
