//! Department geography: boundaries, centroids and display names.

use super::department::{DepartmentCode, DepartmentError, DEPARTMENT_COL};
use super::loader::{DataLoader, LoadOptions, LoaderError};
use super::processor::{DataProcessor, ProcessorError};
use geo::{Centroid, MultiPolygon};
use geojson::{Feature, GeoJson};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeoError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("Expected a FeatureCollection of departments")]
    NotACollection,
    #[error("Feature {index} has no {property:?} property")]
    MissingProperty { index: usize, property: String },
    #[error(transparent)]
    Department(#[from] DepartmentError),
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

/// Property names of the boundary file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureKeys {
    pub code: String,
    pub name: String,
}

impl Default for FeatureKeys {
    fn default() -> Self {
        Self {
            code: "code".to_string(),
            name: "nom".to_string(),
        }
    }
}

/// A department's reference data.
#[derive(Debug, Clone, PartialEq)]
pub struct Department {
    pub code: DepartmentCode,
    pub name: String,
    /// `[longitude, latitude]`
    pub centroid: Option<[f64; 2]>,
    pub boundary: Option<MultiPolygon<f64>>,
}

/// Static department reference keyed by canonical code.
#[derive(Debug, Clone, Default)]
pub struct GeoReference {
    departments: BTreeMap<DepartmentCode, Department>,
}

impl GeoReference {
    /// Load a GeoJSON FeatureCollection of department boundaries.
    pub fn load_geojson(path: &Path, keys: &FeatureKeys) -> Result<Self, GeoError> {
        let text = std::fs::read_to_string(path).map_err(|source| GeoError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let reference = Self::from_geojson_str(&text, keys)?;
        log::info!(
            "Loaded {} department boundaries from {}",
            reference.len(),
            path.display()
        );
        Ok(reference)
    }

    pub fn from_geojson_str(text: &str, keys: &FeatureKeys) -> Result<Self, GeoError> {
        let GeoJson::FeatureCollection(collection) = text.parse::<GeoJson>()? else {
            return Err(GeoError::NotACollection);
        };

        let mut departments = BTreeMap::new();
        for (index, feature) in collection.features.iter().enumerate() {
            let department = parse_feature(index, feature, keys)?;
            departments.insert(department.code.clone(), department);
        }

        Ok(Self { departments })
    }

    /// Build a reference from a names table only (no boundaries).
    pub fn from_names(names: impl IntoIterator<Item = (DepartmentCode, String)>) -> Self {
        let departments = names
            .into_iter()
            .map(|(code, name)| {
                let department = Department {
                    code: code.clone(),
                    name,
                    centroid: None,
                    boundary: None,
                };
                (code, department)
            })
            .collect();
        Self { departments }
    }

    /// Read a comma separated `code,name` reference table.
    pub fn load_names(
        path: &Path,
        code_column: &str,
        name_column: &str,
    ) -> Result<Vec<(DepartmentCode, String)>, GeoError> {
        let df = DataLoader::load_csv(path, &LoadOptions::department_names(code_column))?;
        let codes = DataProcessor::strings(&df, DEPARTMENT_COL)?;
        let names = DataProcessor::strings(&df, name_column)?;

        let mut pairs = Vec::new();
        for (code, name) in codes.into_iter().zip(names) {
            if let (Some(code), Some(name)) = (code, name) {
                pairs.push((DepartmentCode::parse(&code)?, name));
            }
        }
        Ok(pairs)
    }

    /// Overwrite display names from a reference table. Codes without a
    /// boundary are added without geometry.
    pub fn merge_names(&mut self, names: impl IntoIterator<Item = (DepartmentCode, String)>) {
        for (code, name) in names {
            self.departments
                .entry(code.clone())
                .and_modify(|d| d.name = name.clone())
                .or_insert(Department {
                    code,
                    name,
                    centroid: None,
                    boundary: None,
                });
        }
    }

    pub fn get(&self, code: &DepartmentCode) -> Option<&Department> {
        self.departments.get(code)
    }

    pub fn contains(&self, code: &DepartmentCode) -> bool {
        self.departments.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.departments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.departments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Department> {
        self.departments.values()
    }
}

fn property_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_feature(index: usize, feature: &Feature, keys: &FeatureKeys) -> Result<Department, GeoError> {
    let missing = |property: &str| GeoError::MissingProperty {
        index,
        property: property.to_string(),
    };

    let raw_code = feature
        .property(&keys.code)
        .and_then(property_text)
        .ok_or_else(|| missing(&keys.code))?;
    let name = feature
        .property(&keys.name)
        .and_then(property_text)
        .ok_or_else(|| missing(&keys.name))?;

    let boundary = feature.geometry.clone().and_then(to_multipolygon);
    if boundary.is_none() {
        log::warn!("Department {} has no polygon geometry", raw_code);
    }
    let centroid = boundary
        .as_ref()
        .and_then(|mp| mp.centroid())
        .map(|p| [p.x(), p.y()]);

    Ok(Department {
        code: DepartmentCode::parse(&raw_code)?,
        name,
        centroid,
        boundary,
    })
}

/// Polygon and MultiPolygon geometries; anything else is ignored.
fn to_multipolygon(geometry: geojson::Geometry) -> Option<MultiPolygon<f64>> {
    let geo_geom: geo::Geometry<f64> = geometry.try_into().ok()?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}
