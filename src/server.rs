use crate::choropleth::{build_choropleth, tooltip, MapState};
use crate::config::AppConfig;
use crate::processing::{available_departments, available_years, mean_price_by_region, municipality_series};
use crate::render::{render_map_document, render_series_chart};
use crate::table::{query_table, TableQuery};
use crate::types::{AggregatedMunicipalitySeries, Dataset};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::{Point, Rect};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, info};

const INDEX_HTML: &str = include_str!("../static/index.html");

// Boundary bounding box in the R-tree, pointing back into `dataset.boundaries`.
pub struct BoundaryIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for BoundaryIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Shared read-only state. Nothing writes to it after startup.
pub struct AppState {
    pub dataset: Dataset,
    pub tree: RTree<BoundaryIndex>,
    pub config: AppConfig,
    pub years: Vec<i32>,
    pub departments: Vec<String>,
}

impl AppState {
    pub fn new(config: AppConfig, dataset: Dataset) -> Self {
        debug!("Building spatial index for {} boundaries...", dataset.boundaries.len());
        let items: Vec<BoundaryIndex> = dataset.boundaries.iter().enumerate().map(|(i, boundary)| {
            let rect = boundary.geometry.bounding_rect().unwrap_or(
                Rect::new(
                    geo::Coord { x: 0.0, y: 0.0 },
                    geo::Coord { x: 0.0, y: 0.0 }
                )
            );
            BoundaryIndex {
                index: i,
                aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
            }
        }).collect();

        Self {
            tree: RTree::bulk_load(items),
            years: available_years(&dataset.records),
            departments: available_departments(&dataset.records),
            dataset,
            config,
        }
    }

    /// Earliest year, the map selector's initial value.
    fn default_year(&self) -> i32 {
        self.years.first().copied().unwrap_or_default()
    }

    /// Department of the first loaded record, the chart selector's initial value.
    fn default_department(&self) -> String {
        self.dataset.records.first().map(|r| r.department.clone()).unwrap_or_default()
    }

    fn map_state(&self, year: i32) -> MapState {
        let aggregates = mean_price_by_region(&self.dataset.records, year);
        let map = build_choropleth(&aggregates, &self.dataset.boundaries, year, &self.config.map);
        debug!(
            "year {}: {} of {} regions without a price",
            year,
            map.regions.iter().filter(|r| !r.is_available()).count(),
            map.regions.len()
        );
        map
    }
}

pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", self.0)).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Deserialize)]
pub struct YearParams {
    year: Option<i32>,
}

#[derive(Deserialize)]
pub struct DepartmentParams {
    department: Option<String>,
}

#[derive(Deserialize)]
pub struct PointParams {
    lat: f64,
    lon: f64,
    year: Option<i32>,
}

/// Initial selector values, mirroring the first-load behavior of the map and
/// chart endpoints.
#[derive(Debug, Serialize)]
pub struct DefaultsResponse {
    year: i32,
    department: String,
}

#[derive(Debug, Serialize)]
pub struct PointResponse {
    region: String,
    year: i32,
    mean_price: Option<f64>,
    tooltip: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    let output_service = ServeDir::new(&state.config.output.dir);

    Router::new()
        .route("/", get(index_handler))
        .route("/api/years", get(years_handler))
        .route("/api/departments", get(departments_handler))
        .route("/api/defaults", get(defaults_handler))
        .route("/api/choropleth", get(choropleth_handler))
        .route("/map", get(map_handler))
        .route("/api/evolution", get(evolution_handler))
        .route("/chart", get(chart_handler))
        .route("/api/records", get(records_handler))
        .route("/api/query", get(query_handler))
        .nest_service("/output", output_service)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig, dataset: Dataset) -> Result<()> {
    let port = config.server.port;
    let state = Arc::new(AppState::new(config, dataset));
    info!("Spatial index built.");

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn years_handler(State(state): State<Arc<AppState>>) -> Json<Vec<i32>> {
    Json(state.years.clone())
}

async fn departments_handler(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.departments.clone())
}

async fn defaults_handler(State(state): State<Arc<AppState>>) -> Json<DefaultsResponse> {
    Json(DefaultsResponse {
        year: state.default_year(),
        department: state.default_department(),
    })
}

async fn choropleth_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<YearParams>,
) -> Json<MapState> {
    Json(state.map_state(params.year.unwrap_or_else(|| state.default_year())))
}

async fn map_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<YearParams>,
) -> Result<Html<String>, AppError> {
    let map = state.map_state(params.year.unwrap_or_else(|| state.default_year()));
    Ok(Html(render_map_document(&map)?))
}

async fn evolution_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DepartmentParams>,
) -> Json<Vec<AggregatedMunicipalitySeries>> {
    let department = params.department.unwrap_or_else(|| state.default_department());
    Json(municipality_series(&state.dataset.records, &department))
}

async fn chart_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DepartmentParams>,
) -> Result<Response, AppError> {
    let department = params.department.unwrap_or_else(|| state.default_department());
    let series = municipality_series(&state.dataset.records, &department);
    let svg = render_series_chart(&department, &series)?;
    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response())
}

async fn records_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TableQuery>,
) -> Response {
    let page = query_table(&state.dataset.records, &query, state.config.server.page_size);
    Json(page).into_response()
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PointParams>,
) -> Json<Option<PointResponse>> {
    let point = Point::new(params.lon, params.lat);
    let envelope = AABB::from_point([params.lon, params.lat]);

    let Some(boundary) = state
        .tree
        .locate_in_envelope_intersecting(&envelope)
        .filter_map(|candidate| state.dataset.boundaries.get(candidate.index))
        .find(|boundary| boundary.geometry.contains(&point))
    else {
        return Json(None);
    };

    let year = params.year.unwrap_or_else(|| state.default_year());
    let mean_price = mean_price_by_region(&state.dataset.records, year)
        .into_iter()
        .find(|agg| agg.region == boundary.name)
        .and_then(|agg| agg.mean_price);

    Json(Some(PointResponse {
        region: boundary.name.clone(),
        year,
        mean_price,
        tooltip: tooltip(&boundary.name, mean_price),
    }))
}
