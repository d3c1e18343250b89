/// WGS84 semi-major axis (meters).
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 inverse flattening.
pub const WGS84_INV_F: f64 = 298.257_223_563;
/// GRS80 inverse flattening (same semi-major axis as WGS84).
pub const GRS80_INV_F: f64 = 298.257_222_101;

/// Reference ellipsoid described by semi-major axis and inverse flattening.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ellipsoid {
    pub a: f64,
    pub inv_f: f64,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid::new(WGS84_A, WGS84_INV_F);
    pub const GRS80: Ellipsoid = Ellipsoid::new(WGS84_A, GRS80_INV_F);
    pub const CLARKE_1866: Ellipsoid = Ellipsoid::new(6_378_206.4, 294.978_698_2);
    pub const INTERNATIONAL_1924: Ellipsoid = Ellipsoid::new(6_378_388.0, 297.0);

    pub const fn new(a: f64, inv_f: f64) -> Self {
        Self { a, inv_f }
    }

    /// Flattening. An `inv_f` of zero denotes a sphere.
    pub fn f(&self) -> f64 {
        if self.inv_f == 0.0 { 0.0 } else { 1.0 / self.inv_f }
    }

    /// First eccentricity squared.
    pub fn e2(&self) -> f64 {
        let f = self.f();
        f * (2.0 - f)
    }

    pub fn e(&self) -> f64 {
        self.e2().sqrt()
    }

    /// Second eccentricity squared.
    pub fn ep2(&self) -> f64 {
        let e2 = self.e2();
        e2 / (1.0 - e2)
    }

    /// Meridian arc length from the equator to `lat_rad` (Snyder 3-21).
    pub fn meridian_arc(&self, lat_rad: f64) -> f64 {
        let e2 = self.e2();
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        self.a
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat_rad
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat_rad).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat_rad).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * lat_rad).sin())
    }

    /// Radius of curvature in the prime vertical.
    pub fn prime_vertical_radius(&self, lat_rad: f64) -> f64 {
        let s = lat_rad.sin();
        self.a / (1.0 - self.e2() * s * s).sqrt()
    }

    /// True when the two ellipsoids agree to about a millimetre at the surface
    /// (WGS84 and GRS80 compare equal).
    pub fn approx_eq(&self, other: &Ellipsoid) -> bool {
        (self.a - other.a).abs() < 1e-3 && (self.f() - other.f()).abs() < 1e-10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64, eps: f64) {
        let diff = (a - b).abs();
        assert!(diff <= eps, "expected {a} ~= {b} (diff {diff})");
    }

    #[test]
    fn wgs84_eccentricity() {
        assert_close(Ellipsoid::WGS84.e2(), 0.006_694_379_990_14, 1e-12);
        assert!(Ellipsoid::WGS84.approx_eq(&Ellipsoid::GRS80));
        assert!(!Ellipsoid::WGS84.approx_eq(&Ellipsoid::CLARKE_1866));
    }

    #[test]
    fn meridian_arc_to_pole_matches_quarter_meridian() {
        // WGS84 quarter meridian is 10_001_965.729 m.
        let q = Ellipsoid::WGS84.meridian_arc(std::f64::consts::FRAC_PI_2);
        assert_close(q, 10_001_965.729, 1e-2);
        assert_close(Ellipsoid::WGS84.meridian_arc(0.0), 0.0, 1e-9);
    }

    #[test]
    fn sphere_has_no_eccentricity() {
        let s = Ellipsoid::new(6_371_000.0, 0.0);
        assert_eq!(s.e2(), 0.0);
        assert_close(s.prime_vertical_radius(1.0), 6_371_000.0, 1e-9);
    }
}
