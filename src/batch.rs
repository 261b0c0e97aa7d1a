use std::fs::File;
use std::io::Read;

use camino::Utf8Path;
use serde::Deserialize;

use crate::error::StampError;
use crate::query::{QueryMode, RegionQuery};

const ARCSEC_PER_ARCMIN: f64 = 60.0;

/// One row of a candidate list: `Name, RA_deg, DEC_deg, Aperture_arcsec`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchTarget {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "RA_deg")]
    pub ra_deg: f64,
    #[serde(rename = "DEC_deg")]
    pub dec_deg: f64,
    #[serde(rename = "Aperture_arcsec")]
    pub aperture_arcsec: f64,
}

impl BatchTarget {
    /// The aperture is the full field size of the stamp.
    pub fn query(&self, mode: QueryMode) -> RegionQuery {
        RegionQuery::from_field_size(
            self.ra_deg,
            self.dec_deg,
            self.aperture_arcsec / ARCSEC_PER_ARCMIN,
            mode,
        )
    }

    /// Directory name for this target's stamps: the name with whitespace
    /// dropped and path separators replaced.
    pub fn out_name(&self) -> String {
        let name = self
            .name
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .map(|ch| if matches!(ch, '/' | '\\') { '_' } else { ch })
            .collect::<String>();
        match name.as_str() {
            "" | "." | ".." => format!("target_{:.5}_{:+.5}", self.ra_deg, self.dec_deg),
            _ => name,
        }
    }
}

pub fn read_targets(path: &Utf8Path) -> Result<Vec<BatchTarget>, StampError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| StampError::Batch(format!("{path}: {err}")))?;
    read_targets_from(file)
}

pub fn read_targets_from<R: Read>(reader: R) -> Result<Vec<BatchTarget>, StampError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    reader
        .deserialize::<BatchTarget>()
        .enumerate()
        .map(|(index, row)| {
            row.map_err(|err| StampError::Batch(format!("row {}: {err}", index + 1)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_candidate_list() {
        let csv = "Name,RA_deg,DEC_deg,Aperture_arcsec\n\
                   SDSS J1459 +1023,224.75,10.3833,120\n\
                   blob-2,51.8625,-13.4397,60\n";
        let targets = read_targets_from(csv.as_bytes()).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].out_name(), "SDSSJ1459+1023");

        let query = targets[0].query(QueryMode::OverlapsWindow);
        assert_eq!(query.radius_arcmin, 1.0);
        assert_eq!(query.ra_deg, 224.75);
    }

    #[test]
    fn bad_row_is_reported_with_its_number() {
        let csv = "Name,RA_deg,DEC_deg,Aperture_arcsec\nA,1,2,3\nB,x,2,3\n";
        let err = read_targets_from(csv.as_bytes()).unwrap_err();
        assert_matches!(err, StampError::Batch(message) if message.starts_with("row 2"));
    }

    #[test]
    fn unsafe_names_are_sanitized() {
        let target = BatchTarget {
            name: "../x y".to_string(),
            ra_deg: 1.0,
            dec_deg: -2.0,
            aperture_arcsec: 60.0,
        };
        assert_eq!(target.out_name(), ".._xy");

        let blank = BatchTarget {
            name: " ".to_string(),
            ..target
        };
        assert_eq!(blank.out_name(), "target_1.00000_-2.00000");
    }
}
