use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

pub const WEEKDAYS: u8 = 7;
pub const HOURS: u8 = 24;
pub const BUCKET_COUNT: usize = WEEKDAYS as usize * HOURS as usize;

const WEEKDAY_NAMES: [&str; WEEKDAYS as usize] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Weekday 0 is Monday.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawBucket")]
pub struct Bucket {
    weekday: u8,
    hour: u8,
}

#[derive(Deserialize)]
struct RawBucket {
    weekday: u8,
    hour: u8,
}

impl TryFrom<RawBucket> for Bucket {
    type Error = String;

    fn try_from(raw: RawBucket) -> Result<Self, Self::Error> {
        Self::new(raw.weekday, raw.hour).map_err(|err| err.to_string())
    }
}

impl Bucket {
    pub fn new(weekday: u8, hour: u8) -> Result<Self> {
        if weekday >= WEEKDAYS {
            bail!("weekday {weekday} is outside 0-6");
        }
        if hour >= HOURS {
            bail!("hour {hour} is outside 0-23");
        }
        Ok(Self { weekday, hour })
    }

    pub fn weekday(self) -> u8 {
        self.weekday
    }

    pub fn hour(self) -> u8 {
        self.hour
    }

    fn index(self) -> usize {
        self.weekday as usize * HOURS as usize + self.hour as usize
    }

    fn from_index(index: usize) -> Self {
        Self {
            weekday: (index / HOURS as usize) as u8,
            hour: (index % HOURS as usize) as u8,
        }
    }

    pub fn weekday_name(self) -> &'static str {
        WEEKDAY_NAMES[self.weekday as usize]
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:02}:00", self.weekday_name(), self.hour)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<BTreeMap<String, f64>>", into = "Vec<BTreeMap<String, f64>>")]
pub struct BucketTable {
    cells: Vec<BTreeMap<String, f64>>,
}

impl Default for BucketTable {
    fn default() -> Self {
        Self {
            cells: vec![BTreeMap::new(); BUCKET_COUNT],
        }
    }
}

impl TryFrom<Vec<BTreeMap<String, f64>>> for BucketTable {
    type Error = String;

    fn try_from(cells: Vec<BTreeMap<String, f64>>) -> Result<Self, Self::Error> {
        if cells.len() != BUCKET_COUNT {
            return Err(format!(
                "bucket table must hold {BUCKET_COUNT} cells, found {}",
                cells.len()
            ));
        }
        Ok(Self { cells })
    }
}

impl From<BucketTable> for Vec<BTreeMap<String, f64>> {
    fn from(table: BucketTable) -> Self {
        table.cells
    }
}

impl BucketTable {
    pub fn get(&self, bucket: Bucket, metric: &str) -> Option<f64> {
        self.cells[bucket.index()].get(metric).copied()
    }

    pub fn metrics(&self, bucket: Bucket) -> &BTreeMap<String, f64> {
        &self.cells[bucket.index()]
    }

    pub fn insert(&mut self, bucket: Bucket, metric: &str, value: f64) {
        self.cells[bucket.index()].insert(metric.to_string(), value);
    }

    pub fn occupied_buckets(&self) -> usize {
        self.cells.iter().filter(|cell| !cell.is_empty()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Bucket, &BTreeMap<String, f64>)> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(index, cell)| (Bucket::from_index(index), cell))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_rejects_out_of_range_components() {
        assert!(Bucket::new(7, 0).is_err());
        assert!(Bucket::new(0, 24).is_err());
        assert!(Bucket::new(6, 23).is_ok());
    }

    #[test]
    fn bucket_display_names_weekday_and_hour() {
        let bucket = Bucket::new(1, 9).expect("valid bucket");
        assert_eq!(bucket.to_string(), "Tuesday 09:00");
    }

    #[test]
    fn table_iterates_in_weekday_then_hour_order() {
        let mut table = BucketTable::default();
        table.insert(Bucket::new(3, 1).expect("bucket"), "spend", 1.0);
        table.insert(Bucket::new(0, 22).expect("bucket"), "spend", 2.0);
        table.insert(Bucket::new(0, 5).expect("bucket"), "spend", 3.0);

        let order: Vec<(u8, u8)> = table
            .iter()
            .map(|(bucket, _)| (bucket.weekday(), bucket.hour()))
            .collect();
        assert_eq!(order, vec![(0, 5), (0, 22), (3, 1)]);
        assert_eq!(table.occupied_buckets(), 3);
    }

    #[test]
    fn table_deserialization_rejects_wrong_cell_count() {
        let raw = serde_json::to_string(&vec![BTreeMap::<String, f64>::new(); 3])
            .expect("serialize");
        let parsed: std::result::Result<BucketTable, _> = serde_json::from_str(&raw);
        assert!(parsed.is_err());
    }
}
