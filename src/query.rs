//! Which chips cover a sky position.
//!
//! Two selection modes are supported:
//! - [`QueryMode::ContainsCenter`] keeps chips whose box contains the center.
//! - [`QueryMode::OverlapsWindow`] builds a box of half-size `radius` around
//!   the center and keeps chips whose box overlaps it.
//!
//! The window is a flat RA/Dec box. Its RA half-width is widened by
//! `1 / cos(max(|dec1|, |dec2|))`, which over-covers on the equator side of
//! the window. Windows that reach a pole have an unbounded RA width and are
//! not supported; they are logged, not clamped.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::catalog::{ChipCatalog, ChipRecord};
use crate::error::StampError;

const ARCMIN_PER_DEGREE: f64 = 60.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum QueryMode {
    ContainsCenter,
    #[default]
    OverlapsWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueryWindow {
    pub ra1: f64,
    pub ra2: f64,
    pub dec1: f64,
    pub dec2: f64,
}

impl QueryWindow {
    pub fn around(ra_deg: f64, dec_deg: f64, radius_arcmin: f64) -> Self {
        let radius_deg = radius_arcmin / ARCMIN_PER_DEGREE;
        let dec1 = dec_deg - radius_deg;
        let dec2 = dec_deg + radius_deg;
        let widest = dec1.abs().max(dec2.abs());
        let dra = radius_deg / widest.to_radians().cos();
        Self {
            ra1: ra_deg - dra,
            ra2: ra_deg + dra,
            dec1,
            dec2,
        }
    }

    pub fn reaches_pole(&self) -> bool {
        self.dec1 <= -90.0 || self.dec2 >= 90.0
    }

    /// Strict on three edges and inclusive on the chip's lower Dec edge,
    /// matching the selections the archive has always produced.
    pub fn overlaps(&self, record: &ChipRecord) -> bool {
        self.ra1 < record.ra_max
            && self.ra2 > record.ra_min
            && self.dec1 < record.dec_max
            && self.dec2 >= record.dec_min
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegionQuery {
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub radius_arcmin: f64,
    pub mode: QueryMode,
}

impl RegionQuery {
    /// Builds a query from a full field size, searching half of it around the center.
    pub fn from_field_size(ra_deg: f64, dec_deg: f64, size_arcmin: f64, mode: QueryMode) -> Self {
        Self {
            ra_deg,
            dec_deg,
            radius_arcmin: size_arcmin / 2.0,
            mode,
        }
    }

    pub fn validate(&self) -> Result<(), StampError> {
        if !self.ra_deg.is_finite() {
            return Err(StampError::InvalidQuery(format!("RA {} is not finite", self.ra_deg)));
        }
        if !self.dec_deg.is_finite() || self.dec_deg.abs() > 90.0 {
            return Err(StampError::InvalidQuery(format!(
                "Dec {} is outside [-90, 90]",
                self.dec_deg
            )));
        }
        if !self.radius_arcmin.is_finite() || self.radius_arcmin < 0.0 {
            return Err(StampError::InvalidQuery(format!(
                "radius {} arcmin must be a non-negative number",
                self.radius_arcmin
            )));
        }
        Ok(())
    }

    pub fn window(&self) -> QueryWindow {
        QueryWindow::around(self.ra_deg, self.dec_deg, self.radius_arcmin)
    }

    pub fn select<'a>(&self, catalog: &'a ChipCatalog) -> Vec<&'a ChipRecord> {
        select(
            catalog,
            self.ra_deg,
            self.dec_deg,
            self.radius_arcmin,
            self.mode,
        )
    }
}

/// Returns the catalog records covering the position, in catalog order.
pub fn select(
    catalog: &ChipCatalog,
    ra_deg: f64,
    dec_deg: f64,
    radius_arcmin: f64,
    mode: QueryMode,
) -> Vec<&ChipRecord> {
    match mode {
        QueryMode::ContainsCenter => catalog
            .records()
            .iter()
            .filter(|record| record.contains(ra_deg, dec_deg))
            .collect(),
        QueryMode::OverlapsWindow => {
            let window = QueryWindow::around(ra_deg, dec_deg, radius_arcmin);
            if window.reaches_pole() {
                tracing::warn!(
                    dec1 = window.dec1,
                    dec2 = window.dec2,
                    "query window reaches a pole; RA bounds are unbounded"
                );
            }
            catalog
                .records()
                .iter()
                .filter(|record| window.overlaps(record))
                .collect()
        }
    }
}
