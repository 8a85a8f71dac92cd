use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{Context, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub columns: ColumnConfig,
    #[serde(default)]
    pub map: MapConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub prices_csv: PathBuf,
    pub boundaries: PathBuf, // .geojson / .json / .shp
    #[serde(default = "default_region_property")]
    pub region_property: String,
}

/// CSV header names. Only `date`, `department`, `municipality` and `price`
/// must be present in the file.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ColumnConfig {
    pub date: String,
    pub department: String,
    pub municipality: String,
    pub station_name: String,
    pub price: String,
    pub fuel_type: String,
    pub municipality_code: String,
    pub latitude: String,
    pub longitude: String,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            date: "FECHA_PRECIO".to_string(),
            department: "DEPARTAMENTO_EDS".to_string(),
            municipality: "MUNICIPIO_EDS".to_string(),
            station_name: "NOMBRE_COMERCIAL_EDS".to_string(),
            price: "PRECIO_PROMEDIO_PUBLICADO".to_string(),
            fuel_type: "TIPO_COMBUSTIBLE".to_string(),
            municipality_code: "CODIGO_MUNICIPIO_DANE".to_string(),
            latitude: "LATITUD_MUNICIPIO".to_string(),
            longitude: "LONGITUD_MUNICIPIO".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MapConfig {
    pub center: [f64; 2], // [lat, lon]
    pub zoom_start: u8,
    pub bins: usize,
    pub fill_opacity: f64,
    pub line_opacity: f64,
    pub nan_fill_color: String,
    pub legend_name: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center: [4.0, -72.0],
            zoom_start: 5,
            bins: 6,
            fill_opacity: 0.7,
            line_opacity: 0.2,
            nan_fill_color: "black".to_string(),
            legend_name: "Precio Promedio GNCV".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub page_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8050, page_size: 10 }
    }
}

fn default_region_property() -> String {
    "NOMBRE_DPT".to_string()
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_takes_dashboard_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [input]
            prices_csv = "prices.csv"
            boundaries = "colombia.geo.json"

            [output]
            dir = "out"
            "#,
        )
        .unwrap();

        assert_eq!(config.input.region_property, "NOMBRE_DPT");
        assert_eq!(config.columns.price, "PRECIO_PROMEDIO_PUBLICADO");
        assert_eq!(config.map.bins, 6);
        assert_eq!(config.map.center, [4.0, -72.0]);
        assert_eq!(config.server.page_size, 10);
    }

    #[test]
    fn partial_sections_override_single_fields() {
        let config = AppConfig::from_toml(
            r#"
            [input]
            prices_csv = "prices.csv"
            boundaries = "deps.shp"
            region_property = "DPTO"

            [columns]
            price = "PRECIO"

            [map]
            bins = 4

            [output]
            dir = "out"

            [server]
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.input.region_property, "DPTO");
        assert_eq!(config.columns.price, "PRECIO");
        assert_eq!(config.columns.date, "FECHA_PRECIO");
        assert_eq!(config.map.bins, 4);
        assert_eq!(config.map.zoom_start, 5);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.page_size, 10);
    }

    #[test]
    fn missing_input_section_is_an_error() {
        assert!(AppConfig::from_toml("[output]\ndir = \"out\"\n").is_err());
    }
}
