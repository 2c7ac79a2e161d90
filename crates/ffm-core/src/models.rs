//! Core data models for the FFM ledger.
//!
//! Hourly facts are carried as a [`MetricGrid`]: a record with one sparse
//! [`HourlyValues`] map per [`Metric`]. The metric set is fixed, so a grid
//! can never hold a metric the store does not know about, and the hour type
//! can never hold a value outside `0..=23`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failures for values entering the typed model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("hour {0} is outside 0..=23")]
    InvalidHour(i64),

    #[error("negative or oversized count {value} at hour {hour}")]
    InvalidValue { hour: i64, value: i64 },

    #[error("unknown {kind} '{value}'")]
    UnknownVariant { kind: &'static str, value: String },
}

/// Per-item operational counter tracked hourly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Units prepared (additive).
    Prepared,
    /// Units sold (additive).
    Sold,
    /// Units discarded (additive).
    Discarded,
    /// Units on display. A level, not a flow: the daily value is the latest reading.
    Stock,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::Prepared,
        Metric::Sold,
        Metric::Discarded,
        Metric::Stock,
    ];

    /// Column value stored in `fact_hourly_long.metric`.
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Prepared => "prepared",
            Metric::Sold => "sold",
            Metric::Discarded => "discarded",
            Metric::Stock => "stock",
        }
    }

    pub fn is_additive(self) -> bool {
        !matches!(self, Metric::Stock)
    }

    /// Lenient lookup used at the recognition boundary.
    ///
    /// Accepts the canonical names plus the labels emitted by the table
    /// recognizer (`prep`, `sales`, `waste`, `display`).
    pub fn from_alias(name: &str) -> Option<Metric> {
        match name.trim().to_ascii_lowercase().as_str() {
            "prepared" | "prep" => Some(Metric::Prepared),
            "sold" | "sales" => Some(Metric::Sold),
            "discarded" | "waste" => Some(Metric::Discarded),
            "stock" | "display" => Some(Metric::Stock),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict parse: only the exact stored names are accepted.
impl FromStr for Metric {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ModelError::UnknownMetric(s.to_string()))
    }
}

/// Hour of day, guaranteed to be in `0..=23`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Hour(u8);

impl Hour {
    pub const COUNT: u8 = 24;

    pub fn new(hour: u8) -> Option<Hour> {
        (hour < Self::COUNT).then_some(Hour(hour))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// All 24 hours in ascending order.
    pub fn all() -> impl Iterator<Item = Hour> {
        (0..Self::COUNT).map(Hour)
    }
}

impl TryFrom<u8> for Hour {
    type Error = ModelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Hour::new(value).ok_or(ModelError::InvalidHour(i64::from(value)))
    }
}

impl TryFrom<i64> for Hour {
    type Error = ModelError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .and_then(Hour::new)
            .ok_or(ModelError::InvalidHour(value))
    }
}

impl From<Hour> for u8 {
    fn from(hour: Hour) -> u8 {
        hour.0
    }
}

impl fmt::Display for Hour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sparse hour → count map.
///
/// Fetches only return hours that have a recorded row. A missing hour means
/// zero; consumers that need all 24 slots should use [`value_at`] or iterate
/// [`Hour::all`] with `get(..).unwrap_or(0)`.
pub type HourlyValues = BTreeMap<Hour, u32>;

/// Zero-filled read from a sparse hourly map.
pub fn value_at(values: &HourlyValues, hour: Hour) -> u32 {
    values.get(&hour).copied().unwrap_or(0)
}

/// Build an [`HourlyValues`] map from raw `(hour, value)` pairs.
///
/// Fails on the first hour outside `0..=23` or value that is negative or
/// does not fit a `u32`. Nothing is dropped silently.
pub fn hourly<I>(pairs: I) -> Result<HourlyValues, ModelError>
where
    I: IntoIterator<Item = (i64, i64)>,
{
    let mut out = HourlyValues::new();
    for (hour, value) in pairs {
        let h = Hour::try_from(hour)?;
        let v = u32::try_from(value).map_err(|_| ModelError::InvalidValue { hour, value })?;
        out.insert(h, v);
    }
    Ok(out)
}

/// One item's (or the whole store's) hourly facts for a single date.
///
/// Every metric is always present; absent hours are empty maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricGrid {
    #[serde(default)]
    pub prepared: HourlyValues,
    #[serde(default)]
    pub sold: HourlyValues,
    #[serde(default)]
    pub discarded: HourlyValues,
    #[serde(default)]
    pub stock: HourlyValues,
}

impl MetricGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, metric: Metric) -> &HourlyValues {
        match metric {
            Metric::Prepared => &self.prepared,
            Metric::Sold => &self.sold,
            Metric::Discarded => &self.discarded,
            Metric::Stock => &self.stock,
        }
    }

    pub fn get_mut(&mut self, metric: Metric) -> &mut HourlyValues {
        match metric {
            Metric::Prepared => &mut self.prepared,
            Metric::Sold => &mut self.sold,
            Metric::Discarded => &mut self.discarded,
            Metric::Stock => &mut self.stock,
        }
    }

    pub fn set(&mut self, metric: Metric, hour: Hour, value: u32) {
        self.get_mut(metric).insert(hour, value);
    }

    /// Builder-style variant of [`set`](Self::set) for a whole series.
    pub fn with(mut self, metric: Metric, values: HourlyValues) -> Self {
        *self.get_mut(metric) = values;
        self
    }

    pub fn value_at(&self, metric: Metric, hour: Hour) -> u32 {
        value_at(self.get(metric), hour)
    }

    /// Iterate the four series in [`Metric::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (Metric, &HourlyValues)> + '_ {
        Metric::ALL.into_iter().map(move |m| (m, self.get(m)))
    }

    /// Flatten to `(metric, hour, value)` cells.
    pub fn cells(&self) -> impl Iterator<Item = (Metric, Hour, u32)> + '_ {
        self.iter()
            .flat_map(|(m, values)| values.iter().map(move |(h, v)| (m, *h, *v)))
    }

    pub fn cell_count(&self) -> usize {
        self.iter().map(|(_, values)| values.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cell_count() == 0
    }

    /// Sum of a metric across all recorded hours.
    pub fn total(&self, metric: Metric) -> u64 {
        self.get(metric).values().map(|v| u64::from(*v)).sum()
    }

    /// Value at the latest recorded hour of a metric.
    pub fn latest(&self, metric: Metric) -> Option<u32> {
        self.get(metric).last_key_value().map(|(_, v)| *v)
    }

    /// Overlay another grid; cells in `other` replace cells in `self`.
    pub fn merge(&mut self, other: &MetricGrid) {
        for (metric, hour, value) in other.cells() {
            self.set(metric, hour, value);
        }
    }
}

/// Sales class of a catalog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalesClass {
    #[default]
    Normal,
    Limited,
}

impl SalesClass {
    pub fn as_str(self) -> &'static str {
        match self {
            SalesClass::Normal => "normal",
            SalesClass::Limited => "limited",
        }
    }
}

impl FromStr for SalesClass {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(SalesClass::Normal),
            "limited" => Ok(SalesClass::Limited),
            other => Err(ModelError::UnknownVariant {
                kind: "sales class",
                value: other.to_string(),
            }),
        }
    }
}

/// Handling category of a catalog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    #[default]
    Ambient,
    Heated,
    Chukaman,
    Oden,
}

impl ItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Ambient => "ambient",
            ItemType::Heated => "heated",
            ItemType::Chukaman => "chukaman",
            ItemType::Oden => "oden",
        }
    }
}

impl FromStr for ItemType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ambient" => Ok(ItemType::Ambient),
            "heated" => Ok(ItemType::Heated),
            "chukaman" => Ok(ItemType::Chukaman),
            "oden" => Ok(ItemType::Oden),
            other => Err(ModelError::UnknownVariant {
                kind: "item type",
                value: other.to_string(),
            }),
        }
    }
}

/// A catalog row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub item_id: i64,
    pub item_name: String,
    pub price: i64,
    /// Shelf life in hours.
    pub freshness: Option<i64>,
    pub sales_class: SalesClass,
    pub item_type: ItemType,
    pub is_active: bool,
}

/// Fields for creating or updating a catalog row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub item_name: String,
    pub price: i64,
    pub freshness: Option<i64>,
    pub sales_class: SalesClass,
    pub item_type: ItemType,
    pub is_active: bool,
}

impl NewItem {
    /// An active, normal, ambient item with no shelf life set.
    pub fn named(name: impl Into<String>, price: i64) -> Self {
        Self {
            item_name: name.into(),
            price,
            freshness: None,
            sales_class: SalesClass::default(),
            item_type: ItemType::default(),
            is_active: true,
        }
    }
}

/// Materialized per-item daily row (`fact_daily`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyProductSummary {
    pub date: NaiveDate,
    pub item_id: i64,
    pub prepared: u64,
    pub sold: u64,
    pub discarded: u64,
    pub stock_end: u64,
}

impl DailyProductSummary {
    /// Reduce one item's hourly grid to its daily row.
    ///
    /// Flows are summed; `stock_end` is the stock reading at the latest
    /// recorded hour, 0 when no stock was recorded.
    pub fn from_grid(date: NaiveDate, item_id: i64, grid: &MetricGrid) -> Self {
        Self {
            date,
            item_id,
            prepared: grid.total(Metric::Prepared),
            sold: grid.total(Metric::Sold),
            discarded: grid.total(Metric::Discarded),
            stock_end: grid.latest(Metric::Stock).map(u64::from).unwrap_or(0),
        }
    }
}

/// Materialized store-wide daily customer total (`fact_daily_customer`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyCustomerSummary {
    pub date: NaiveDate,
    pub customer_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_metric_strict_parse() {
        assert_eq!("sold".parse::<Metric>().unwrap(), Metric::Sold);
        assert_eq!(
            "foo".parse::<Metric>(),
            Err(ModelError::UnknownMetric("foo".to_string()))
        );
        // Aliases are not valid stored names.
        assert!("sales".parse::<Metric>().is_err());
    }

    #[test]
    fn test_metric_aliases() {
        assert_eq!(Metric::from_alias("prep"), Some(Metric::Prepared));
        assert_eq!(Metric::from_alias("Sales"), Some(Metric::Sold));
        assert_eq!(Metric::from_alias("waste"), Some(Metric::Discarded));
        assert_eq!(Metric::from_alias(" display "), Some(Metric::Stock));
        assert_eq!(Metric::from_alias("stock"), Some(Metric::Stock));
        assert_eq!(Metric::from_alias("returns"), None);
    }

    #[test]
    fn test_hour_bounds() {
        assert!(Hour::new(0).is_some());
        assert!(Hour::new(23).is_some());
        assert!(Hour::new(24).is_none());
        assert_eq!(Hour::try_from(-1i64), Err(ModelError::InvalidHour(-1)));
        assert_eq!(Hour::all().count(), 24);
    }

    #[test]
    fn test_hourly_rejects_bad_input() {
        assert_eq!(hourly([(9, 1), (24, 1)]), Err(ModelError::InvalidHour(24)));
        assert_eq!(
            hourly([(9, -3)]),
            Err(ModelError::InvalidValue { hour: 9, value: -3 })
        );
        let ok = hourly([(9, 12), (10, 9)]).unwrap();
        assert_eq!(ok.len(), 2);
    }

    #[test]
    fn test_grid_zero_fill_and_totals() {
        let grid = MetricGrid::new().with(Metric::Sold, hourly([(9, 12), (10, 9), (11, 9)]).unwrap());
        assert_eq!(grid.total(Metric::Sold), 30);
        assert_eq!(grid.value_at(Metric::Sold, Hour::new(12).unwrap()), 0);
        assert!(grid.get(Metric::Discarded).is_empty());
        assert_eq!(grid.cell_count(), 3);
    }

    #[test]
    fn test_grid_merge_replaces_cells() {
        let mut grid = MetricGrid::new().with(Metric::Sold, hourly([(9, 5), (10, 1)]).unwrap());
        let patch = MetricGrid::new().with(Metric::Sold, hourly([(9, 7)]).unwrap());
        grid.merge(&patch);
        assert_eq!(grid.value_at(Metric::Sold, Hour::new(9).unwrap()), 7);
        assert_eq!(grid.value_at(Metric::Sold, Hour::new(10).unwrap()), 1);
    }

    #[test]
    fn test_stock_end_takes_latest_hour() {
        let grid = MetricGrid::new().with(Metric::Stock, hourly([(9, 12), (14, 7)]).unwrap());
        let row = DailyProductSummary::from_grid(date("2025-01-01"), 1, &grid);
        assert_eq!(row.stock_end, 7);
    }

    #[test]
    fn test_summary_reduction() {
        let grid = MetricGrid::new()
            .with(Metric::Prepared, hourly([(9, 12), (10, 10)]).unwrap())
            .with(Metric::Sold, hourly([(9, 11), (10, 9)]).unwrap())
            .with(Metric::Discarded, hourly([(10, 1)]).unwrap())
            .with(Metric::Stock, hourly([(9, 12), (10, 10)]).unwrap());
        let row = DailyProductSummary::from_grid(date("2025-01-01"), 1, &grid);
        assert_eq!((row.prepared, row.sold, row.discarded, row.stock_end), (22, 20, 1, 10));

        let empty = DailyProductSummary::from_grid(date("2025-01-01"), 1, &MetricGrid::new());
        assert_eq!(empty.stock_end, 0);
    }

    #[test]
    fn test_enum_round_trip_names() {
        for class in [SalesClass::Normal, SalesClass::Limited] {
            assert_eq!(class.as_str().parse::<SalesClass>().unwrap(), class);
        }
        assert!("seasonal".parse::<ItemType>().is_err());
        assert_eq!("oden".parse::<ItemType>().unwrap(), ItemType::Oden);
    }
}
