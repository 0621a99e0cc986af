//! Reading `manifest.safe` from zipped or unpacked SAFE products

use crate::types::{BoundingBox, Polarization, SarError, SarResult};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

/// The parts of a SAFE manifest the workflows need
#[derive(Debug, Clone, PartialEq)]
pub struct SafeManifest {
    /// Footprint corners as (lon, lat)
    pub footprint: Vec<(f64, f64)>,
    pub polarizations: Vec<Polarization>,
}

impl SafeManifest {
    /// Open the manifest of a `.zip` or `.SAFE` product.
    ///
    /// Polarisations are taken from the annotation file names; the manifest
    /// tags are only used for products without annotation files.
    pub fn open<P: AsRef<Path>>(product: P) -> SarResult<Self> {
        let product = product.as_ref();
        let xml = read_manifest_xml(product)?;
        let mut manifest = Self::from_xml(&xml)?;
        let annotated = annotation_polarisations(&product_file_names(product)?);
        if !annotated.is_empty() {
            manifest.polarizations = annotated;
        }
        Ok(manifest)
    }

    pub fn from_xml(xml: &str) -> SarResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut footprint = Vec::new();
        let mut polarizations = Vec::new();
        let mut current: Option<Vec<u8>> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    current = Some(e.local_name().as_ref().to_vec());
                }
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map_err(|e| SarError::XmlParsing(format!("manifest text: {}", e)))?;
                    match current.as_deref() {
                        Some(b"coordinates") if footprint.is_empty() => {
                            footprint = parse_gml_coordinates(&text)?;
                        }
                        Some(b"transmitterReceiverPolarisation") => {
                            let pol: Polarization = text.parse()?;
                            if !polarizations.contains(&pol) {
                                polarizations.push(pol);
                            }
                        }
                        _ => {}
                    }
                }
                Ok(Event::End(_)) => current = None,
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(SarError::XmlParsing(format!(
                        "manifest at position {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
            }
        }

        if footprint.is_empty() {
            return Err(SarError::Metadata("No footprint found in manifest".to_string()));
        }

        Ok(Self {
            footprint,
            polarizations,
        })
    }

    pub fn bounding_box(&self) -> SarResult<BoundingBox> {
        BoundingBox::from_points(&self.footprint)
            .ok_or_else(|| SarError::Metadata("Empty footprint".to_string()))
    }

    /// Mean latitude of the footprint corners
    pub fn center_lat(&self) -> f64 {
        let sum: f64 = self.footprint.iter().map(|&(_, lat)| lat).sum();
        sum / self.footprint.len() as f64
    }

    /// Closed WKT polygon of the footprint
    pub fn footprint_wkt(&self) -> String {
        let mut coords: Vec<String> = self
            .footprint
            .iter()
            .map(|(lon, lat)| format!("{} {}", lon, lat))
            .collect();
        if let Some(first) = coords.first().cloned() {
            if coords.last() != Some(&first) {
                coords.push(first);
            }
        }
        format!("POLYGON (({}))", coords.join(", "))
    }
}

/// `gml:coordinates` hold space separated `lat,lon` pairs
fn parse_gml_coordinates(text: &str) -> SarResult<Vec<(f64, f64)>> {
    text.split_whitespace()
        .map(|pair| {
            let mut parts = pair.split(',');
            let lat = parts.next().and_then(|v| v.parse::<f64>().ok());
            let lon = parts.next().and_then(|v| v.parse::<f64>().ok());
            match (lat, lon) {
                (Some(lat), Some(lon)) => Ok((lon, lat)),
                _ => Err(SarError::Metadata(format!("Bad footprint coordinate: {}", pair))),
            }
        })
        .collect()
}

/// Polarisations of `annotation/s1?-<swath>-<type>-<pol>-...xml` entries
pub fn annotation_polarisations(names: &[String]) -> Vec<Polarization> {
    let mut pols = Vec::new();
    for name in names {
        let mut parts = name.trim_end_matches('/').rsplit('/');
        let (file, dir) = match (parts.next(), parts.next()) {
            (Some(file), Some(dir)) => (file, dir),
            _ => continue,
        };
        if dir != "annotation" || !file.starts_with("s1") || !file.ends_with(".xml") {
            continue;
        }
        let pol = file
            .split('-')
            .nth(3)
            .and_then(|p| p.to_uppercase().parse::<Polarization>().ok());
        if let Some(pol) = pol {
            if !pols.contains(&pol) {
                pols.push(pol);
            }
        }
    }
    pols
}

/// Entry names of a zipped product, or the annotation files of a SAFE directory
fn product_file_names(product: &Path) -> SarResult<Vec<String>> {
    if product.is_dir() {
        let annotation = product.join("annotation");
        if !annotation.is_dir() {
            return Ok(Vec::new());
        }
        return Ok(std::fs::read_dir(annotation)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().map(|n| format!("annotation/{}", n)))
            .collect());
    }
    let archive = ZipArchive::new(File::open(product)?)
        .map_err(|e| SarError::InvalidFormat(format!("Failed to open {}: {}", product.display(), e)))?;
    Ok(archive.file_names().map(str::to_string).collect())
}

fn read_manifest_xml(product: &Path) -> SarResult<String> {
    if product.is_dir() {
        let path = product.join("manifest.safe");
        log::debug!("Reading manifest {}", path.display());
        return Ok(std::fs::read_to_string(path)?);
    }

    let file = File::open(product)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| SarError::InvalidFormat(format!("Failed to open {}: {}", product.display(), e)))?;

    let entry = archive
        .file_names()
        .find(|name| name.ends_with(".SAFE/manifest.safe") || *name == "manifest.safe")
        .map(|name| name.to_string())
        .ok_or_else(|| SarError::Metadata(format!("No manifest.safe in {}", product.display())))?;

    let mut manifest = archive
        .by_name(&entry)
        .map_err(|e| SarError::InvalidFormat(format!("Failed to read {}: {}", entry, e)))?;
    let mut xml = String::new();
    manifest.read_to_string(&mut xml)?;
    Ok(xml)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xfdu:XFDU xmlns:xfdu="urn:ccsds:schema:xfdu:1" xmlns:gml="http://www.opengis.net/gml" xmlns:s1sarl1="http://www.esa.int/safe/sentinel-1.0/sentinel-1/sar/level-1">
  <metadataSection>
    <metadataObject ID="generalProductInformation">
      <s1sarl1:transmitterReceiverPolarisation>VV</s1sarl1:transmitterReceiverPolarisation>
      <s1sarl1:transmitterReceiverPolarisation>VH</s1sarl1:transmitterReceiverPolarisation>
    </metadataObject>
    <metadataObject ID="measurementFrameSet">
      <safe:footPrint xmlns:safe="http://www.esa.int/safe/sentinel-1.0">
        <gml:coordinates>61.0,10.0 61.5,14.0 59.9,14.5 59.5,10.5</gml:coordinates>
      </safe:footPrint>
    </metadataObject>
  </metadataSection>
</xfdu:XFDU>"#;

    #[test]
    fn footprint_and_polarisations() {
        let manifest = SafeManifest::from_xml(MANIFEST).unwrap();
        assert_eq!(manifest.footprint[0], (10.0, 61.0));
        assert_eq!(manifest.polarizations, vec![Polarization::VV, Polarization::VH]);
        assert!((manifest.center_lat() - 60.475).abs() < 1e-9);

        let bbox = manifest.bounding_box().unwrap();
        assert_eq!(bbox.min_lon, 10.0);
        assert_eq!(bbox.max_lat, 61.5);
        assert!(manifest.footprint_wkt().ends_with("10 61))"));
    }

    #[test]
    fn polarisations_from_annotation_names() {
        let names: Vec<String> = [
            "S1A_IW_GRDH.SAFE/annotation/s1a-iw-grd-vh-20200115t054302-20200115t054327-030796-0387e6-002.xml",
            "S1A_IW_GRDH.SAFE/annotation/s1a-iw-grd-vv-20200115t054302-20200115t054327-030796-0387e6-001.xml",
            "S1A_IW_GRDH.SAFE/annotation/calibration/calibration-s1a-iw-grd-vv-20200115t054302.xml",
            "S1A_IW_GRDH.SAFE/measurement/s1a-iw-grd-hh-20200115t054302.tiff",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(annotation_polarisations(&names), vec![Polarization::VH, Polarization::VV]);
    }

    #[test]
    fn zipped_product_uses_annotation_files() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("product.zip");
        {
            let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
            let options = zip::write::FileOptions::default();
            zip.start_file("S1B_EW_GRDM.SAFE/manifest.safe", options).unwrap();
            zip.write_all(MANIFEST.as_bytes()).unwrap();
            zip.start_file("S1B_EW_GRDM.SAFE/annotation/s1b-ew-grd-hh-20200115t054302-001.xml", options)
                .unwrap();
            zip.write_all(b"<product/>").unwrap();
            zip.finish().unwrap();
        }
        let manifest = SafeManifest::open(&path).unwrap();
        assert_eq!(manifest.polarizations, vec![Polarization::HH]);
        assert_eq!(manifest.footprint.len(), 4);
    }

    #[test]
    fn missing_footprint_is_an_error() {
        assert!(SafeManifest::from_xml("<a><b>1</b></a>").is_err());
    }
}
