//! Great-circle and ellipsoidal distance between two coordinates.
//!
//! [`haversine_m`] treats the Earth as a sphere of mean radius; at city scale
//! its error against the ellipsoid stays within a few tenths of a percent.
//! [`vincenty_m`] solves the inverse geodesic problem on WGS-84 and is
//! accurate to well under a millimetre, at the cost of an iteration that can
//! fail to converge for nearly antipodal points (it then falls back to
//! haversine).

use serde::{Deserialize, Serialize};

/// IUGG mean Earth radius in metres.
pub const MEAN_EARTH_RADIUS_M: f64 = 6_371_008.8;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);

const VINCENTY_MAX_ITERATIONS: usize = 200;
const VINCENTY_EPSILON: f64 = 1e-12;

/// Which formula the [`MovementGate`](super::MovementGate) measures with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceFormula {
    /// Spherical great-circle distance.
    #[default]
    Haversine,
    /// Vincenty inverse on the WGS-84 ellipsoid.
    Vincenty,
}

impl DistanceFormula {
    /// Distance in metres between `(lat1, lng1)` and `(lat2, lng2)`.
    pub fn distance_m(self, lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
        match self {
            DistanceFormula::Haversine => haversine_m(lat1, lng1, lat2, lng2),
            DistanceFormula::Vincenty => vincenty_m(lat1, lng1, lat2, lng2),
        }
    }
}

/// Great-circle distance in metres using the haversine formula.
///
/// ```
/// use noise_mapper::geo::haversine_m;
///
/// let d = haversine_m(0.0, 0.0, 0.0, 0.0018);
/// assert!((d - 200.15).abs() < 0.05);
/// ```
pub fn haversine_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // min() guards against a > 1.0 from rounding on near-antipodal input.
    let c = 2.0 * a.sqrt().min(1.0).asin();

    MEAN_EARTH_RADIUS_M * c
}

/// Ellipsoidal distance in metres (Vincenty inverse, WGS-84).
///
/// Falls back to [`haversine_m`] if the iteration does not converge.
pub fn vincenty_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    if lat1 == lat2 && lng1 == lng2 {
        return 0.0;
    }

    let l = (lng2 - lng1).to_radians();
    let u1 = ((1.0 - WGS84_F) * lat1.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * lat2.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..VINCENTY_MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            return 0.0;
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        // Equatorial line: cos²α = 0.
        let cos_2sigma_m = if cos_sq_alpha == 0.0 {
            0.0
        } else {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        };
        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let lambda_prev = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));

        if (lambda - lambda_prev).abs() < VINCENTY_EPSILON {
            let u_sq = cos_sq_alpha * (WGS84_A.powi(2) - WGS84_B.powi(2)) / WGS84_B.powi(2);
            let a = 1.0
                + u_sq / 16_384.0 * (4_096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let b = u_sq / 1_024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = b
                * sin_sigma
                * (cos_2sigma_m
                    + b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                            - b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma.powi(2))
                                * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));
            return WGS84_B * a * (sigma - delta_sigma);
        }
    }

    log::debug!("geo: vincenty did not converge, using haversine");
    haversine_m(lat1, lng1, lat2, lng2)
}
