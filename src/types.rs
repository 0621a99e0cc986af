use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Polarization channels of Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl FromStr for Polarization {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            other => Err(SarError::InvalidFormat(format!("Unknown polarization: {}", other))),
        }
    }
}

/// Parse a SNAP style polarisation list such as `"VV, VH"`
pub fn parse_polarizations(list: &str) -> SarResult<Vec<Polarization>> {
    list.split(',')
        .filter(|p| !p.trim().is_empty())
        .map(Polarization::from_str)
        .collect()
}

/// Sentinel-1 acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionMode {
    IW, // Interferometric Wide swath
    EW, // Extra Wide swath
    SM(u8), // StripMap beams S1..S6
    WV, // Wave
}

impl AcquisitionMode {
    pub fn from_code(code: &str) -> SarResult<Self> {
        match code {
            "IW" => Ok(AcquisitionMode::IW),
            "EW" => Ok(AcquisitionMode::EW),
            "WV" => Ok(AcquisitionMode::WV),
            s if s.len() == 2 && s.starts_with('S') => {
                let beam = s[1..]
                    .parse::<u8>()
                    .map_err(|_| SarError::InvalidFormat(format!("Unknown beam mode: {}", s)))?;
                if (1..=6).contains(&beam) {
                    Ok(AcquisitionMode::SM(beam))
                } else {
                    Err(SarError::InvalidFormat(format!("Unknown stripmap beam: {}", s)))
                }
            }
            other => Err(SarError::InvalidFormat(format!("Unknown beam mode: {}", other))),
        }
    }

    pub fn long_name(&self) -> &'static str {
        match self {
            AcquisitionMode::IW => "Interferometric Wide Swath",
            AcquisitionMode::EW => "Extra-Wide swath",
            AcquisitionMode::SM(_) => "Stripmap",
            AcquisitionMode::WV => "Wave",
        }
    }
}

impl std::fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionMode::IW => write!(f, "IW"),
            AcquisitionMode::EW => write!(f, "EW"),
            AcquisitionMode::SM(beam) => write!(f, "S{}", beam),
            AcquisitionMode::WV => write!(f, "WV"),
        }
    }
}

/// Level-1/0 product type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductType {
    GRD,
    SLC,
    OCN,
    RAW,
}

impl ProductType {
    pub fn long_name(&self) -> &'static str {
        match self {
            ProductType::GRD => "Ground Range Detected (GRD)",
            ProductType::SLC => "Single-Look Complex (SLC)",
            ProductType::OCN => "Ocean (OCN)",
            ProductType::RAW => "Raw Data (RAW)",
        }
    }
}

impl std::fmt::Display for ProductType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProductType::GRD => "GRD",
            ProductType::SLC => "SLC",
            ProductType::OCN => "OCN",
            ProductType::RAW => "RAW",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ProductType {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches('_').to_uppercase().as_str() {
            "GRD" => Ok(ProductType::GRD),
            "SLC" => Ok(ProductType::SLC),
            "OCN" => Ok(ProductType::OCN),
            "RAW" => Ok(ProductType::RAW),
            other => Err(SarError::InvalidFormat(format!("Unknown product type: {}", other))),
        }
    }
}

/// Sentinel-1 platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mission {
    S1A,
    S1B,
}

impl Mission {
    pub fn from_code(code: &str) -> SarResult<Self> {
        match code {
            "S1A" => Ok(Mission::S1A),
            "S1B" => Ok(Mission::S1B),
            other => Err(SarError::InvalidFormat(format!("Unsupported mission: {}", other))),
        }
    }

    pub fn satellite_name(&self) -> &'static str {
        match self {
            Mission::S1A => "Sentinel-1A",
            Mission::S1B => "Sentinel-1B",
        }
    }

    /// Offset between absolute and relative orbit counters
    pub fn orbit_offset(&self) -> u32 {
        match self {
            Mission::S1A => 73,
            Mission::S1B => 27,
        }
    }

    /// Directory tag used by the ASF data pool
    pub fn asf_tag(&self) -> &'static str {
        match self {
            Mission::S1A => "SA",
            Mission::S1B => "SB",
        }
    }
}

impl std::fmt::Display for Mission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mission::S1A => write!(f, "S1A"),
            Mission::S1B => write!(f, "S1B"),
        }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn from_points(points: &[(f64, f64)]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = BoundingBox {
            min_lon: first.0,
            max_lon: first.0,
            min_lat: first.1,
            max_lat: first.1,
        };
        for &(lon, lat) in points.iter().skip(1) {
            bbox.min_lon = bbox.min_lon.min(lon);
            bbox.max_lon = bbox.max_lon.max(lon);
            bbox.min_lat = bbox.min_lat.min(lat);
            bbox.max_lat = bbox.max_lat.max(lat);
        }
        Some(bbox)
    }

    /// Closed WKT polygon of the box
    pub fn to_wkt(&self) -> String {
        format!(
            "POLYGON (({0} {2}, {1} {2}, {1} {3}, {0} {3}, {0} {2}))",
            self.min_lon, self.max_lon, self.min_lat, self.max_lat
        )
    }
}

/// Error types for SAR preprocessing
#[derive(Debug, thiserror::Error)]
pub enum SarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{step} exited with code {code}, see {}", logfile.display())]
    GptRuntime {
        step: String,
        code: i32,
        logfile: PathBuf,
    },

    #[error("Output check failed: {0}")]
    NotValidFile(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Download error: {0}")]
    Download(String),
}

/// Result type for SAR operations
pub type SarResult<T> = Result<T, SarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polarization_list() {
        let pols = parse_polarizations("VV, VH, HH, HV").unwrap();
        assert_eq!(pols, vec![Polarization::VV, Polarization::VH, Polarization::HH, Polarization::HV]);
        assert!(parse_polarizations("VV, XX").is_err());
    }

    #[test]
    fn stripmap_beams() {
        assert_eq!(AcquisitionMode::from_code("S3").unwrap(), AcquisitionMode::SM(3));
        assert!(AcquisitionMode::from_code("S9").is_err());
        assert_eq!(AcquisitionMode::SM(3).long_name(), "Stripmap");
    }

    #[test]
    fn bbox_wkt_is_closed() {
        let bbox = BoundingBox::from_points(&[(10.0, 50.0), (12.0, 51.0), (11.0, 49.5)]).unwrap();
        assert_eq!(bbox.min_lat, 49.5);
        assert_eq!(
            bbox.to_wkt(),
            "POLYGON ((10 49.5, 12 49.5, 12 51, 10 51, 10 49.5))"
        );
    }
}
