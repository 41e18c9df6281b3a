//! Data module - CSV loading, grouping and department joins

pub mod department;
pub mod geo;
pub mod loader;
pub mod processor;

pub use department::{
    DepartmentCode, DepartmentError, DepartmentJoiner, DepartmentSelector, MapCell,
    DEPARTMENT_COL,
};
pub use geo::{Department, FeatureKeys, GeoError, GeoReference};
pub use loader::{parse_locale_decimal, DataLoader, DateSource, LoadOptions, LoaderError};
pub use processor::{
    date_column, Bounds, DataProcessor, DateWindow, ProcessorError, Reduction, DATE_COL,
};
