use crate::types::PriceRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableColumn {
    Date,
    Year,
    Department,
    Municipality,
    StationName,
    Price,
    FuelType,
    MunicipalityCode,
    Latitude,
    Longitude,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableQuery {
    pub search: Option<String>,
    pub sort: Option<TableColumn>,
    #[serde(default)]
    pub desc: bool,
    #[serde(default)]
    pub page: usize, // zero-based
    pub page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TablePage<'a> {
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub rows: Vec<&'a PriceRecord>,
}

fn displayed_values(record: &PriceRecord) -> [String; 10] {
    let num = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
    [
        record.date.format("%Y-%m-%d").to_string(),
        record.year.to_string(),
        record.department.clone(),
        record.municipality.clone(),
        record.station_name.clone(),
        num(record.price),
        record.fuel_type.clone(),
        record.municipality_code.clone(),
        num(record.latitude),
        num(record.longitude),
    ]
}

fn matches(record: &PriceRecord, needle: &str) -> bool {
    displayed_values(record)
        .iter()
        .any(|value| value.to_lowercase().contains(needle))
}

// Missing numbers go last in either direction.
fn compare_numbers(a: Option<f64>, b: Option<f64>, desc: bool) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => {
            let ord = x.total_cmp(&y);
            if desc { ord.reverse() } else { ord }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare(a: &PriceRecord, b: &PriceRecord, column: TableColumn, desc: bool) -> Ordering {
    let ord = match column {
        TableColumn::Price => return compare_numbers(a.price, b.price, desc),
        TableColumn::Latitude => return compare_numbers(a.latitude, b.latitude, desc),
        TableColumn::Longitude => return compare_numbers(a.longitude, b.longitude, desc),
        TableColumn::Date => a.date.cmp(&b.date),
        TableColumn::Year => a.year.cmp(&b.year),
        TableColumn::Department => a.department.cmp(&b.department),
        TableColumn::Municipality => a.municipality.cmp(&b.municipality),
        TableColumn::StationName => a.station_name.cmp(&b.station_name),
        TableColumn::FuelType => a.fuel_type.cmp(&b.fuel_type),
        TableColumn::MunicipalityCode => a.municipality_code.cmp(&b.municipality_code),
    };
    if desc { ord.reverse() } else { ord }
}

/// Filters, sorts and pages the records. Sorting is stable, so ties keep
/// load order.
pub fn query_table<'a>(records: &'a [PriceRecord], query: &TableQuery, default_page_size: usize) -> TablePage<'a> {
    let needle = query
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let mut rows: Vec<&PriceRecord> = match &needle {
        Some(needle) => records.iter().filter(|r| matches(r, needle)).collect(),
        None => records.iter().collect(),
    };

    if let Some(column) = query.sort {
        rows.sort_by(|a, b| compare(a, b, column, query.desc));
    }

    let total = rows.len();
    let page_size = query.page_size.unwrap_or(default_page_size).max(1);
    let rows = rows
        .into_iter()
        .skip(query.page.saturating_mul(page_size))
        .take(page_size)
        .collect();

    TablePage { total, page: query.page, page_size, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::tests::{record, sample};

    #[test]
    fn no_query_returns_first_page() {
        let records = sample();
        let page = query_table(&records, &TableQuery::default(), 4);

        assert_eq!(page.total, 6);
        assert_eq!(page.rows.len(), 4);
        assert_eq!(page.rows[0], &records[0]);
    }

    #[test]
    fn search_is_case_insensitive_across_columns() {
        let records = sample();

        let by_municipality = TableQuery { search: Some("soLEDad".into()), ..Default::default() };
        assert_eq!(query_table(&records, &by_municipality, 10).total, 1);

        let by_year = TableQuery { search: Some("2024".into()), ..Default::default() };
        assert_eq!(query_table(&records, &by_year, 10).total, 2);

        let blank = TableQuery { search: Some("   ".into()), ..Default::default() };
        assert_eq!(query_table(&records, &blank, 10).total, 6);
    }

    #[test]
    fn price_sort_puts_missing_last_both_ways() {
        let records = sample();

        let asc = TableQuery { sort: Some(TableColumn::Price), ..Default::default() };
        let prices: Vec<Option<f64>> = query_table(&records, &asc, 10).rows.iter().map(|r| r.price).collect();
        assert_eq!(prices, vec![Some(3900.0), Some(4000.0), Some(4200.0), Some(4500.0), None, None]);

        let desc = TableQuery { sort: Some(TableColumn::Price), desc: true, ..Default::default() };
        let prices: Vec<Option<f64>> = query_table(&records, &desc, 10).rows.iter().map(|r| r.price).collect();
        assert_eq!(prices, vec![Some(4500.0), Some(4200.0), Some(4000.0), Some(3900.0), None, None]);
    }

    #[test]
    fn text_sort_descending() {
        let records = sample();
        let query = TableQuery { sort: Some(TableColumn::Department), desc: true, ..Default::default() };
        let page = query_table(&records, &query, 10);
        assert_eq!(page.rows[0].department, "Córdoba");
        assert_eq!(page.rows[5].department, "Atlántico");
    }

    #[test]
    fn out_of_range_page_is_empty_with_total() {
        let records = sample();
        let query = TableQuery { page: 7, page_size: Some(2), ..Default::default() };
        let page = query_table(&records, &query, 10);
        assert_eq!(page.total, 6);
        assert!(page.rows.is_empty());
    }

    #[test]
    fn second_page_continues_the_sort() {
        let records: Vec<PriceRecord> = (1..=12)
            .map(|d| record(&format!("2023-01-{d:02}"), "Atlántico", "Barranquilla", Some(4000.0 + d as f64)))
            .collect();
        let query = TableQuery { sort: Some(TableColumn::Date), desc: true, page: 1, ..Default::default() };
        let page = query_table(&records, &query, 10);

        assert_eq!(page.page_size, 10);
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.rows[0].price, Some(4002.0));
        assert_eq!(page.rows[1].price, Some(4001.0));
    }

    #[test]
    fn column_names_deserialize_in_snake_case() {
        let col: TableColumn = serde_json::from_str("\"station_name\"").unwrap();
        assert_eq!(col, TableColumn::StationName);
    }
}
