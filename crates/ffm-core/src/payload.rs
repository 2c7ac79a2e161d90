//! Recognition pipeline payload.
//!
//! The table recognizer emits one payload per photographed sheet: the
//! target date, store-wide customers per hour, and a series of hourly
//! counters per product. Hours and values are kept raw (`i64`) on the wire
//! so that bad readings surface as typed [`ModelError`]s during conversion
//! instead of as opaque deserialization failures.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::date::parse_date;
use crate::models::{hourly, HourlyValues, Metric, MetricGrid, ModelError};

/// Raw hour → count readings as produced by recognition.
pub type RawByHour = BTreeMap<i64, i64>;

fn default_version() -> String {
    "1.0".to_string()
}

/// One sheet's worth of recognized counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportPayload {
    /// Payload schema version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Target date in any format [`parse_date`] accepts.
    pub date: String,
    #[serde(default)]
    pub customers_by_hour: RawByHour,
    #[serde(default)]
    pub products: Vec<ProductSeries>,
    /// Free-form provenance (image id, confidence, source).
    #[serde(default)]
    pub meta: Map<String, Value>,
}

/// Hourly counters for one product, keyed by metric name or recognizer alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSeries {
    pub name: String,
    #[serde(default)]
    pub by_metric: BTreeMap<String, RawByHour>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ImportPayload {
    /// The normalized target date, `None` when the date text is not a date.
    pub fn target_date(&self) -> Option<NaiveDate> {
        parse_date(&self.date)
    }

    pub fn customers(&self) -> Result<HourlyValues, ModelError> {
        hourly(self.customers_by_hour.iter().map(|(h, v)| (*h, *v)))
    }
}

impl ProductSeries {
    /// Convert to a typed grid. Series for the same metric under different
    /// aliases are merged, later names winning per hour.
    pub fn to_grid(&self) -> Result<MetricGrid, ModelError> {
        let mut grid = MetricGrid::new();
        for (name, by_hour) in &self.by_metric {
            let metric = Metric::from_alias(name)
                .ok_or_else(|| ModelError::UnknownMetric(name.clone()))?;
            let values = hourly(by_hour.iter().map(|(h, v)| (*h, *v)))?;
            grid.get_mut(metric).extend(values);
        }
        Ok(grid)
    }
}
