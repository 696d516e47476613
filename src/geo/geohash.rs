//! Geohash spatial keys.
//!
//! A geohash interleaves longitude and latitude bisection bits and renders
//! them in a 32-character alphabet, so nearby points share prefixes and a
//! prefix range query finds neighbours. Records are keyed at
//! [`DEFAULT_PRECISION`] characters (cells of roughly 38 m × 19 m).
//!
//! Coordinates are quantised to 32-bit integers before interleaving, so the
//! output depends only on the input bits and never on the order of
//! floating-point operations.
//!
//! ```
//! use noise_mapper::geo::geohash;
//!
//! let key = geohash::encode(57.64911, 10.40744, 8).unwrap();
//! assert_eq!(key, "u4pruydq");
//! ```

use thiserror::Error;

/// Key length used for stored records.
pub const DEFAULT_PRECISION: usize = 8;

/// Longest supported key (60 bits).
pub const MAX_PRECISION: usize = 12;

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeohashError {
    #[error("coordinate out of range: ({lat}, {lng})")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("precision must be within 1..={MAX_PRECISION}, got {0}")]
    InvalidPrecision(usize),

    #[error("invalid geohash character {0:?}")]
    InvalidCharacter(char),
}

/// Cell bounds returned by [`decode`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeohashCell {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl GeohashCell {
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lng..=self.max_lng).contains(&lng)
    }
}

/// Map `value` in `[min, min + span]` onto `[0, 2^32)`.
fn quantize(value: f64, min: f64, span: f64) -> u64 {
    let scaled = ((value - min) / span * 4_294_967_296.0).floor();
    // The upper bound itself (lat = 90 / lng = 180) belongs to the last cell.
    scaled.clamp(0.0, 4_294_967_295.0) as u64
}

/// Encode `(lat, lng)` as a geohash of `precision` characters.
pub fn encode(lat: f64, lng: f64, precision: usize) -> Result<String, GeohashError> {
    if !(1..=MAX_PRECISION).contains(&precision) {
        return Err(GeohashError::InvalidPrecision(precision));
    }
    if !lat.is_finite()
        || !lng.is_finite()
        || !(-90.0..=90.0).contains(&lat)
        || !(-180.0..=180.0).contains(&lng)
    {
        return Err(GeohashError::InvalidCoordinate { lat, lng });
    }

    let lat_q = quantize(lat, -90.0, 180.0);
    let lng_q = quantize(lng, -180.0, 360.0);

    // Interleave from the most significant bit, longitude first.
    let total_bits = precision * 5;
    let mut bits: u64 = 0;
    for i in 0..total_bits {
        let source = if i % 2 == 0 { lng_q } else { lat_q };
        let bit = (source >> (31 - i / 2)) & 1;
        bits = (bits << 1) | bit;
    }

    let key = (0..precision)
        .rev()
        .map(|chunk| BASE32[((bits >> (chunk * 5)) & 0x1f) as usize] as char)
        .collect();
    Ok(key)
}

/// Bounding box of the cell named by `key`.
pub fn decode(key: &str) -> Result<GeohashCell, GeohashError> {
    if key.is_empty() || key.len() > MAX_PRECISION {
        return Err(GeohashError::InvalidPrecision(key.len()));
    }

    let mut cell = GeohashCell {
        min_lat: -90.0,
        max_lat: 90.0,
        min_lng: -180.0,
        max_lng: 180.0,
    };
    let mut even = true;

    for ch in key.chars() {
        let idx = BASE32
            .iter()
            .position(|&b| b as char == ch.to_ascii_lowercase())
            .ok_or(GeohashError::InvalidCharacter(ch))?;
        for shift in (0..5).rev() {
            let bit = (idx >> shift) & 1;
            if even {
                let mid = (cell.min_lng + cell.max_lng) / 2.0;
                if bit == 1 {
                    cell.min_lng = mid;
                } else {
                    cell.max_lng = mid;
                }
            } else {
                let mid = (cell.min_lat + cell.max_lat) / 2.0;
                if bit == 1 {
                    cell.min_lat = mid;
                } else {
                    cell.max_lat = mid;
                }
            }
            even = !even;
        }
    }

    Ok(cell)
}
