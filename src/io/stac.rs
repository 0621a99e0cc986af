//! Minimal STAC catalog handling for the preprocessing entry point

use crate::types::{BoundingBox, SarError, SarResult};
use chrono::NaiveDateTime;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

const STAC_VERSION: &str = "1.0.0";
const ZIP_MEDIA_TYPE: &str = "application/zip";

fn read_json(path: &Path) -> SarResult<Value> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn resolve_href(base: &Path, href: &str) -> PathBuf {
    let href = href.trim_start_matches("./");
    let dir = base.parent().unwrap_or_else(|| Path::new("."));
    dir.join(href)
}

/// Find the single zipped product referenced by a STAC catalog directory
pub fn zip_from_stac<P: AsRef<Path>>(catalog_dir: P) -> SarResult<PathBuf> {
    let catalog_path = catalog_dir.as_ref().join("catalog.json");
    let catalog = read_json(&catalog_path)?;

    let items: Vec<&str> = catalog["links"]
        .as_array()
        .map(|links| {
            links
                .iter()
                .filter(|l| l["rel"] == "item")
                .filter_map(|l| l["href"].as_str())
                .collect()
        })
        .unwrap_or_default();

    let item_href = match items.as_slice() {
        [single] => *single,
        _ => {
            return Err(SarError::InvalidFormat(format!(
                "Expected exactly one item in {}, found {}",
                catalog_path.display(),
                items.len()
            )))
        }
    };

    let item_path = resolve_href(&catalog_path, item_href);
    let item = read_json(&item_path)?;

    let zips: Vec<&str> = item["assets"]
        .as_object()
        .map(|assets| {
            assets
                .values()
                .filter(|a| a["type"] == ZIP_MEDIA_TYPE)
                .filter_map(|a| a["href"].as_str())
                .collect()
        })
        .unwrap_or_default();

    match zips.as_slice() {
        [single] => Ok(resolve_href(&item_path, single)),
        _ => Err(SarError::InvalidFormat(format!(
            "Expected exactly one {} asset in {}, found {}",
            ZIP_MEDIA_TYPE,
            item_path.display(),
            zips.len()
        ))),
    }
}

fn media_type(product: &Path) -> &'static str {
    match product.extension().and_then(|e| e.to_str()) {
        Some("tif") | Some("tiff") => "image/tiff; application=geotiff",
        Some("dim") => "application/dimap",
        Some("vrt") => "application/xml",
        _ => "application/octet-stream",
    }
}

/// Write `catalog.json` plus one item describing `product` into `out_dir`
pub fn write_stac_for_product(
    out_dir: &Path,
    item_id: &str,
    product: &Path,
    datetime: NaiveDateTime,
    bbox: Option<BoundingBox>,
) -> SarResult<PathBuf> {
    let item_dir = out_dir.join(item_id);
    std::fs::create_dir_all(&item_dir)?;

    let asset_href = pathdiff(product, &item_dir);
    let (geometry, bbox_value) = match bbox {
        Some(b) => (
            json!({
                "type": "Polygon",
                "coordinates": [[
                    [b.min_lon, b.min_lat], [b.max_lon, b.min_lat],
                    [b.max_lon, b.max_lat], [b.min_lon, b.max_lat],
                    [b.min_lon, b.min_lat]
                ]]
            }),
            json!([b.min_lon, b.min_lat, b.max_lon, b.max_lat]),
        ),
        None => (Value::Null, Value::Null),
    };

    let mut item = json!({
        "type": "Feature",
        "stac_version": STAC_VERSION,
        "id": item_id,
        "geometry": geometry,
        "properties": {
            "datetime": format!("{}Z", datetime.format("%Y-%m-%dT%H:%M:%S")),
        },
        "assets": {
            "data": {
                "href": asset_href,
                "type": media_type(product),
                "roles": ["data"],
            }
        },
        "links": [
            {"rel": "root", "href": "../catalog.json", "type": "application/json"},
            {"rel": "parent", "href": "../catalog.json", "type": "application/json"},
        ],
    });
    if !bbox_value.is_null() {
        item["bbox"] = bbox_value;
    }

    let item_path = item_dir.join(format!("{}.json", item_id));
    std::fs::write(&item_path, serde_json::to_string_pretty(&item)?)?;

    let catalog = json!({
        "type": "Catalog",
        "stac_version": STAC_VERSION,
        "id": "catalog",
        "description": "Sentinel-1 analysis ready data",
        "links": [
            {"rel": "root", "href": "./catalog.json", "type": "application/json"},
            {"rel": "item", "href": format!("./{}/{}.json", item_id, item_id), "type": "application/json"},
        ],
    });
    let catalog_path = out_dir.join("catalog.json");
    std::fs::write(&catalog_path, serde_json::to_string_pretty(&catalog)?)?;

    log::info!("Wrote STAC catalog {}", catalog_path.display());
    Ok(catalog_path)
}

/// Relative href from `base` to `target` when target lies below base's parent
fn pathdiff(target: &Path, base: &Path) -> String {
    if let Some(parent) = base.parent() {
        if let Ok(rel) = target.strip_prefix(parent) {
            return format!("../{}", rel.display());
        }
    }
    target.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_finds_catalog_entries() {
        let dir = tempfile::tempdir().unwrap();
        let product = dir.path().join("scene.zip");
        std::fs::write(&product, b"zip").unwrap();

        // a catalog written for a zip asset is readable as an input catalog
        let catalog = write_stac_for_product(
            dir.path(),
            "scene",
            &product,
            NaiveDateTime::parse_from_str("20200101T101010", "%Y%m%dT%H%M%S").unwrap(),
            None,
        )
        .unwrap();
        assert!(catalog.exists());

        let item_path = dir.path().join("scene").join("scene.json");
        let mut item = read_json(&item_path).unwrap();
        item["assets"]["data"]["type"] = json!(ZIP_MEDIA_TYPE);
        std::fs::write(&item_path, item.to_string()).unwrap();

        let found = zip_from_stac(dir.path()).unwrap();
        assert_eq!(found.canonicalize().unwrap(), product.canonicalize().unwrap());
    }
}
