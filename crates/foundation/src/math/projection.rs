//! Map projections used by the shapefiles we ingest.
//!
//! Formulas follow Snyder, "Map Projections: A Working Manual" (USGS PP 1395).
//! All angles cross the API in degrees; easting/northing are in meters.

use core::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use super::Ellipsoid;

/// Transverse Mercator (Snyder 8-9..8-25). Millimetre accuracy within a few
/// degrees of the central meridian, which covers every UTM zone.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TransverseMercator {
    pub ellipsoid: Ellipsoid,
    pub lat0_deg: f64,
    pub lon0_deg: f64,
    pub k0: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

impl TransverseMercator {
    pub fn utm(zone: u8, north: bool, ellipsoid: Ellipsoid) -> Self {
        Self {
            ellipsoid,
            lat0_deg: 0.0,
            lon0_deg: -183.0 + 6.0 * f64::from(zone),
            k0: 0.9996,
            false_easting: 500_000.0,
            false_northing: if north { 0.0 } else { 10_000_000.0 },
        }
    }

    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> [f64; 2] {
        let ell = &self.ellipsoid;
        let ep2 = ell.ep2();
        let phi = lat_deg.to_radians();
        let (sin_p, cos_p) = phi.sin_cos();
        let tan_p = sin_p / cos_p;

        let n = ell.prime_vertical_radius(phi);
        let t = tan_p * tan_p;
        let c = ep2 * cos_p * cos_p;
        let a = (lon_deg - self.lon0_deg).to_radians() * cos_p;
        let a2 = a * a;

        let m = ell.meridian_arc(phi);
        let m0 = ell.meridian_arc(self.lat0_deg.to_radians());

        let x = self.k0
            * n
            * (a + (1.0 - t + c) * a * a2 / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a * a2 * a2 / 120.0);
        let y = self.k0
            * (m - m0
                + n * tan_p
                    * (a2 / 2.0
                        + (5.0 - t + 9.0 * c + 4.0 * c * c) * a2 * a2 / 24.0
                        + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a2 * a2 * a2
                            / 720.0));

        [self.false_easting + x, self.false_northing + y]
    }

    /// Returns `[lon_deg, lat_deg]`.
    pub fn inverse(&self, x: f64, y: f64) -> [f64; 2] {
        let ell = &self.ellipsoid;
        let e2 = ell.e2();
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        let ep2 = ell.ep2();

        let m = ell.meridian_arc(self.lat0_deg.to_radians()) + (y - self.false_northing) / self.k0;
        let mu = m / (ell.a * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
        let sq = (1.0 - e2).sqrt();
        let e1 = (1.0 - sq) / (1.0 + sq);

        // Footpoint latitude.
        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let (sin1, cos1) = phi1.sin_cos();
        let tan1 = sin1 / cos1;
        let c1 = ep2 * cos1 * cos1;
        let t1 = tan1 * tan1;
        let w = 1.0 - e2 * sin1 * sin1;
        let n1 = ell.a / w.sqrt();
        let r1 = ell.a * (1.0 - e2) / (w * w.sqrt());
        let d = (x - self.false_easting) / (n1 * self.k0);
        let d2 = d * d;

        let phi = phi1
            - (n1 * tan1 / r1)
                * (d2 / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d2 * d2 / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                        * d2
                        * d2
                        * d2
                        / 720.0);
        let lam = (d - (1.0 + 2.0 * t1 + c1) * d * d2 / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d * d2 * d2
                / 120.0)
            / cos1;

        [self.lon0_deg + lam.to_degrees(), phi.to_degrees()]
    }
}

/// Lambert Conformal Conic. With `lat1_deg == lat2_deg` this is the
/// one-standard-parallel variant and `k0` applies; otherwise `k0` is 1.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LambertConformalConic {
    pub ellipsoid: Ellipsoid,
    pub lat1_deg: f64,
    pub lat2_deg: f64,
    pub lat0_deg: f64,
    pub lon0_deg: f64,
    pub k0: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

struct ConeConstants {
    n: f64,
    af: f64,
    rho0: f64,
}

impl LambertConformalConic {
    fn m(&self, phi: f64) -> f64 {
        let s = phi.sin();
        phi.cos() / (1.0 - self.ellipsoid.e2() * s * s).sqrt()
    }

    fn t(&self, phi: f64) -> f64 {
        let e = self.ellipsoid.e();
        let es = e * phi.sin();
        (FRAC_PI_4 - phi / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(e / 2.0)
    }

    fn cone(&self) -> ConeConstants {
        let p1 = self.lat1_deg.to_radians();
        let p2 = self.lat2_deg.to_radians();
        let (m1, t1) = (self.m(p1), self.t(p1));
        let n = if (p1 - p2).abs() < 1e-12 {
            p1.sin()
        } else {
            (m1.ln() - self.m(p2).ln()) / (t1.ln() - self.t(p2).ln())
        };
        let af = self.ellipsoid.a * self.k0 * m1 / (n * t1.powf(n));
        let rho0 = af * self.t(self.lat0_deg.to_radians()).powf(n);
        ConeConstants { n, af, rho0 }
    }

    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> [f64; 2] {
        let k = self.cone();
        let rho = k.af * self.t(lat_deg.to_radians()).powf(k.n);
        let theta = k.n * (lon_deg - self.lon0_deg).to_radians();
        [
            self.false_easting + rho * theta.sin(),
            self.false_northing + k.rho0 - rho * theta.cos(),
        ]
    }

    /// Returns `[lon_deg, lat_deg]`.
    pub fn inverse(&self, x: f64, y: f64) -> [f64; 2] {
        let k = self.cone();
        let e = self.ellipsoid.e();
        let dx = x - self.false_easting;
        let dy = k.rho0 - (y - self.false_northing);
        let sign = k.n.signum();
        let rho = sign * (dx * dx + dy * dy).sqrt();
        let theta = (sign * dx).atan2(sign * dy);
        let t = (rho / k.af).powf(1.0 / k.n);

        let mut phi = FRAC_PI_2 - 2.0 * t.atan();
        for _ in 0..15 {
            let es = e * phi.sin();
            let next = FRAC_PI_2 - 2.0 * (t * ((1.0 - es) / (1.0 + es)).powf(e / 2.0)).atan();
            let done = (next - phi).abs() < 1e-14;
            phi = next;
            if done {
                break;
            }
        }

        [self.lon0_deg + (theta / k.n).to_degrees(), phi.to_degrees()]
    }
}

/// Spherical ("web") Mercator on the WGS84 semi-major axis.
pub mod web_mercator {
    use super::FRAC_PI_4;
    use crate::math::WGS84_A;

    pub fn forward(lon_deg: f64, lat_deg: f64) -> [f64; 2] {
        let y = (FRAC_PI_4 + lat_deg.to_radians() / 2.0).tan().ln();
        [WGS84_A * lon_deg.to_radians(), WGS84_A * y]
    }

    pub fn inverse(x: f64, y: f64) -> [f64; 2] {
        [
            (x / WGS84_A).to_degrees(),
            (y / WGS84_A).sinh().atan().to_degrees(),
        ]
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Projection {
    /// Longitude/latitude in degrees; no planar projection.
    Geographic,
    TransverseMercator(TransverseMercator),
    LambertConformalConic(LambertConformalConic),
    WebMercator,
}

impl Projection {
    /// Longitude/latitude (degrees) to projected meters.
    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> [f64; 2] {
        match self {
            Projection::Geographic => [lon_deg, lat_deg],
            Projection::TransverseMercator(p) => p.forward(lon_deg, lat_deg),
            Projection::LambertConformalConic(p) => p.forward(lon_deg, lat_deg),
            Projection::WebMercator => web_mercator::forward(lon_deg, lat_deg),
        }
    }

    /// Projected meters to `[lon_deg, lat_deg]`.
    pub fn inverse(&self, x: f64, y: f64) -> [f64; 2] {
        match self {
            Projection::Geographic => [x, y],
            Projection::TransverseMercator(p) => p.inverse(x, y),
            Projection::LambertConformalConic(p) => p.inverse(x, y),
            Projection::WebMercator => web_mercator::inverse(x, y),
        }
    }
}
