//! The static chip-geometry table.
//!
//! The catalog is a delimited text file with one row per chip and the columns
//! `PATCH, CHIP, RAMIN, RAMAX, DECMIN, DECMAX`. Right ascension is stored in
//! hours and converted to degrees here, once, so every consumer of
//! [`ChipRecord`] works in degrees.

use std::fs::File;
use std::io::Read;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::domain::ChipId;
use crate::error::StampError;

const REQUIRED_COLUMNS: [&str; 6] = ["PATCH", "CHIP", "RAMIN", "RAMAX", "DECMIN", "DECMAX"];
const HOURS_TO_DEGREES: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChipRecord {
    pub patch: u32,
    pub chip_code: u32,
    pub ra_min: f64,
    pub ra_max: f64,
    pub dec_min: f64,
    pub dec_max: f64,
}

impl ChipRecord {
    pub fn chip_id(&self) -> Result<ChipId, StampError> {
        ChipId::from_code(self.patch, self.chip_code)
    }

    pub fn contains(&self, ra_deg: f64, dec_deg: f64) -> bool {
        self.ra_min <= ra_deg
            && ra_deg <= self.ra_max
            && self.dec_min <= dec_deg
            && dec_deg <= self.dec_max
    }
}

#[derive(Debug, Deserialize)]
struct RawChipRow {
    #[serde(rename = "PATCH")]
    patch: u32,
    #[serde(rename = "CHIP")]
    chip: u32,
    #[serde(rename = "RAMIN")]
    ra_min_hours: f64,
    #[serde(rename = "RAMAX")]
    ra_max_hours: f64,
    #[serde(rename = "DECMIN")]
    dec_min: f64,
    #[serde(rename = "DECMAX")]
    dec_max: f64,
}

impl RawChipRow {
    fn normalize(self, row: usize) -> Result<ChipRecord, StampError> {
        let record = ChipRecord {
            patch: self.patch,
            chip_code: self.chip,
            ra_min: self.ra_min_hours * HOURS_TO_DEGREES,
            ra_max: self.ra_max_hours * HOURS_TO_DEGREES,
            dec_min: self.dec_min,
            dec_max: self.dec_max,
        };
        let bounds = [record.ra_min, record.ra_max, record.dec_min, record.dec_max];
        if bounds.iter().any(|value| !value.is_finite()) {
            return Err(StampError::CatalogParse(format!(
                "row {row}: non-finite bound"
            )));
        }
        if record.ra_min > record.ra_max || record.dec_min > record.dec_max {
            return Err(StampError::CatalogParse(format!(
                "row {row}: inverted bounding box for patch {} chip {}",
                record.patch, record.chip_code
            )));
        }
        Ok(record)
    }
}

#[derive(Debug, Clone)]
pub struct ChipCatalog {
    records: Vec<ChipRecord>,
}

impl ChipCatalog {
    /// Loads a catalog, picking tab as the delimiter for `.tsv`/`.txt` files
    /// and comma otherwise.
    pub fn load(path: &Utf8Path) -> Result<Self, StampError> {
        let delimiter = match path.extension() {
            Some("tsv") | Some("txt") => b'\t',
            _ => b',',
        };
        Self::load_with_delimiter(path, delimiter)
    }

    pub fn load_with_delimiter(path: &Utf8Path, delimiter: u8) -> Result<Self, StampError> {
        let file = File::open(path.as_std_path()).map_err(|err| StampError::CatalogRead {
            path: path.to_owned(),
            message: err.to_string(),
        })?;
        let catalog = Self::from_reader(file, delimiter)?;
        tracing::debug!(path = %path, records = catalog.len(), "loaded chip catalog");
        Ok(catalog)
    }

    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self, StampError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_reader(reader);

        let headers = reader
            .headers()
            .map_err(|err| StampError::CatalogParse(err.to_string()))?
            .iter()
            .map(|name| name.to_ascii_uppercase())
            .collect::<csv::StringRecord>();
        let missing = REQUIRED_COLUMNS
            .iter()
            .filter(|column| !headers.iter().any(|name| name == **column))
            .copied()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(StampError::CatalogParse(format!(
                "missing required columns: {}",
                missing.join(", ")
            )));
        }
        reader.set_headers(headers);

        let mut records = Vec::new();
        for row in reader.deserialize::<RawChipRow>() {
            let row = row.map_err(|err| StampError::CatalogParse(err.to_string()))?;
            records.push(row.normalize(records.len() + 1)?);
        }

        Self::from_records(records)
    }

    /// Builds a catalog from records already in degrees.
    pub fn from_records(records: Vec<ChipRecord>) -> Result<Self, StampError> {
        if records.is_empty() {
            return Err(StampError::EmptyCatalog);
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[ChipRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn converts_ra_hours_to_degrees() {
        let csv = "PATCH,CHIP,RAMIN,RAMAX,DECMIN,DECMAX\n47,101,1.0,1.5,-2.0,-1.0\n";
        let catalog = ChipCatalog::from_reader(csv.as_bytes(), b',').unwrap();
        let record = catalog.records()[0];
        assert_eq!(record.ra_min, 15.0);
        assert_eq!(record.ra_max, 22.5);
        assert_eq!(record.dec_min, -2.0);
        assert_eq!(record.chip_code, 101);
    }

    #[test]
    fn headers_are_case_insensitive_and_extra_columns_ignored() {
        let csv = "patch\tchip\tramin\tramax\tdecmin\tdecmax\tnote\n\
                   47\t0\t1.0\t1.5\t-2.0\t-1.0\tfoo\n\
                   # comment line\n\
                   47\t101\t1.2\t1.7\t-2.0\t-1.0\tbar\n";
        let catalog = ChipCatalog::from_reader(csv.as_bytes(), b'\t').unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.records()[1].chip_code, 101);
    }

    #[test]
    fn missing_column_is_rejected() {
        let csv = "PATCH,CHIP,RAMIN,RAMAX,DECMIN\n47,0,1.0,1.5,-2.0\n";
        let err = ChipCatalog::from_reader(csv.as_bytes(), b',').unwrap_err();
        assert_matches!(err, StampError::CatalogParse(message) if message.contains("DECMAX"));
    }

    #[test]
    fn empty_catalog_is_rejected() {
        let csv = "PATCH,CHIP,RAMIN,RAMAX,DECMIN,DECMAX\n";
        let err = ChipCatalog::from_reader(csv.as_bytes(), b',').unwrap_err();
        assert_matches!(err, StampError::EmptyCatalog);
    }

    #[test]
    fn inverted_box_is_rejected() {
        let csv = "PATCH,CHIP,RAMIN,RAMAX,DECMIN,DECMAX\n47,0,1.5,1.0,-2.0,-1.0\n";
        let err = ChipCatalog::from_reader(csv.as_bytes(), b',').unwrap_err();
        assert_matches!(err, StampError::CatalogParse(_));
    }

    #[test]
    fn unreadable_path_is_reported() {
        let err = ChipCatalog::load(Utf8Path::new("/nonexistent/rcs2map_chip.csv")).unwrap_err();
        assert_matches!(err, StampError::CatalogRead { .. });
    }
}
