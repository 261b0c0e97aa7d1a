use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::StampError;

/// Row letters of the MegaCam mosaic, indexed by the thousands digit of a chip code.
pub const ROW_LETTERS: [char; 10] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J'];

static POINTING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})([A-J])(\d)[:_\s]+(\d{1,2})$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    G,
    R,
    I,
    Z,
}

impl Filter {
    pub const ALL: [Filter; 4] = [Filter::G, Filter::R, Filter::I, Filter::Z];

    pub fn as_str(self) -> &'static str {
        match self {
            Filter::G => "g",
            Filter::R => "r",
            Filter::I => "i",
            Filter::Z => "z",
        }
    }

    /// Filename prefix of the packed archive. The z-band files were
    /// re-reduced and carry an `ss` marker the other bands do not.
    pub fn archive_prefix(self) -> &'static str {
        match self {
            Filter::Z => "ss",
            Filter::G | Filter::R | Filter::I => "",
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Filter {
    type Err = StampError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "g" => Ok(Filter::G),
            "r" => Ok(Filter::R),
            "i" => Ok(Filter::I),
            "z" => Ok(Filter::Z),
            _ => Err(StampError::InvalidFilter(value.to_string())),
        }
    }
}

/// The three small integers packed into a catalog `CHIP` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChipParts {
    pub row: u8,
    pub column: u8,
    pub extension: u8,
}

impl ChipParts {
    /// Splits a packed chip code as `row * 1000 + column * 100 + extension`.
    pub fn decode(code: u32) -> Result<Self, StampError> {
        let row = code / 1000;
        let column = (code % 1000) / 100;
        let extension = code % 100;
        if row as usize >= ROW_LETTERS.len() {
            return Err(StampError::InvalidChipCode { code, row });
        }
        Ok(Self {
            row: row as u8,
            column: column as u8,
            extension: extension as u8,
        })
    }

    pub fn encode(self) -> u32 {
        encode(self.row, self.column, self.extension)
    }

    pub fn row_letter(self) -> char {
        ROW_LETTERS[self.row as usize]
    }
}

pub fn encode(row: u8, column: u8, extension: u8) -> u32 {
    u32::from(row) * 1000 + u32::from(column) * 100 + u32::from(extension)
}

/// A chip addressed the way the archive names it: `0047A0` plus extension `00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChipId {
    pub patch: u32,
    pub parts: ChipParts,
}

impl ChipId {
    pub fn from_code(patch: u32, code: u32) -> Result<Self, StampError> {
        Ok(Self {
            patch,
            parts: ChipParts::decode(code)?,
        })
    }

    pub fn patch_label(&self) -> String {
        format!("{:04}", self.patch)
    }

    pub fn pointing(&self) -> String {
        format!(
            "{:04}{}{}",
            self.patch,
            self.parts.row_letter(),
            self.parts.column
        )
    }

    pub fn extension_label(&self) -> String {
        format!("{:02}", self.parts.extension)
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.pointing(), self.extension_label())
    }
}

impl FromStr for ChipId {
    type Err = StampError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let caps = POINTING_RE
            .captures(trimmed)
            .ok_or_else(|| StampError::InvalidPointing(value.to_string()))?;
        let invalid = || StampError::InvalidPointing(value.to_string());

        let patch = caps[1].parse::<u32>().map_err(|_| invalid())?;
        let row = ROW_LETTERS
            .iter()
            .position(|letter| caps[2].starts_with(*letter))
            .ok_or_else(invalid)? as u8;
        let column = caps[3].parse::<u8>().map_err(|_| invalid())?;
        let extension = caps[4].parse::<u8>().map_err(|_| invalid())?;

        Ok(Self {
            patch,
            parts: ChipParts {
                row,
                column,
                extension,
            },
        })
    }
}
