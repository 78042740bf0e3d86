//! Geodetic anchor for the local NED frame.
//!
//! The origin is latched from the first accepted GNSS fix and maps between
//! geodetic coordinates and local NED offsets. A spherical equirectangular
//! projection is plenty for the few-kilometre footprint this filter serves.

const EARTH_RADIUS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct Origin {
    lat_deg: f64,
    lon_deg: f64,
    alt_m: f64,
    xy_initialized: bool,
    alt_initialized: bool,
    xy_timestamp: u64,
    alt_timestamp: u64,
}

impl Origin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn xy_initialized(&self) -> bool {
        self.xy_initialized
    }

    pub fn alt_initialized(&self) -> bool {
        self.alt_initialized
    }

    /// Latch the horizontal reference. Only the first call has any effect.
    pub fn xy_initialize(&mut self, lat_deg: f64, lon_deg: f64, timestamp: u64) {
        if self.xy_initialized {
            return;
        }
        self.lat_deg = lat_deg;
        self.lon_deg = lon_deg;
        self.xy_timestamp = timestamp;
        self.xy_initialized = true;
    }

    /// Latch the altitude reference. Only the first call has any effect.
    pub fn alt_initialize(&mut self, alt_m: f64, timestamp: u64) {
        if self.alt_initialized {
            return;
        }
        self.alt_m = alt_m;
        self.alt_timestamp = timestamp;
        self.alt_initialized = true;
    }

    /// Geodetic coordinates to local NED offsets from the origin.
    pub fn global_to_local(&self, lat_deg: f64, lon_deg: f64, alt_m: f64) -> (f64, f64, f64) {
        let n = (lat_deg - self.lat_deg).to_radians() * EARTH_RADIUS;
        let e = (lon_deg - self.lon_deg).to_radians()
            * EARTH_RADIUS
            * self.lat_deg.to_radians().cos();
        let d = self.alt_m - alt_m;
        (n, e, d)
    }

    /// Local NED offsets back to geodetic coordinates.
    pub fn local_to_global(&self, pos_n: f64, pos_e: f64, pos_d: f64) -> (f64, f64, f64) {
        let lat_deg = self.lat_deg + (pos_n / EARTH_RADIUS).to_degrees();
        let lon_deg = self.lon_deg
            + (pos_e / (EARTH_RADIUS * self.lat_deg.to_radians().cos())).to_degrees();
        let alt_m = self.alt_m - pos_d;
        (lat_deg, lon_deg, alt_m)
    }

    pub fn lat_deg(&self) -> f64 {
        self.lat_deg
    }

    pub fn lon_deg(&self) -> f64 {
        self.lon_deg
    }

    pub fn alt(&self) -> f64 {
        self.alt_m
    }

    pub fn xy_timestamp(&self) -> u64 {
        self.xy_timestamp
    }

    pub fn alt_timestamp(&self) -> u64 {
        self.alt_timestamp
    }
}
