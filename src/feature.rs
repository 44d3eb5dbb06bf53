use crate::category::OrbitDirection;
use crate::error::CatalogError;
use regex::Regex;
use serde::Deserialize;
use url::Url;

/// One remotely available file as described by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    pub id: String,
    pub title: String,
    pub start_date: Option<String>,
    pub orbit_direction: Option<OrbitDirection>,
    pub product_type: Option<String>,
    pub relative_orbit: Option<u32>,
    pub orbit_number: Option<u32>,
    pub download_locator: Url,
    pub size: Option<u64>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct RawFeature {
    id: String,
    properties: RawProperties,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RawProperties {
    title: Option<String>,
    start_date: Option<String>,
    orbit_direction: Option<String>,
    product_type: Option<String>,
    relative_orbit_number: Option<u32>,
    orbit_number: Option<u32>,
    services: Option<Services>,
}

#[derive(Deserialize, Debug)]
struct Services {
    download: Option<DownloadService>,
}

#[derive(Deserialize, Debug)]
struct DownloadService {
    url: String,
    size: Option<u64>,
}

impl TryFrom<RawFeature> for Feature {
    type Error = CatalogError;

    fn try_from(raw: RawFeature) -> Result<Self, Self::Error> {
        let RawFeature { id, properties } = raw;

        let download = properties
            .services
            .and_then(|s| s.download)
            .ok_or_else(|| CatalogError::Malformed(format!("feature {id} has no download url")))?;
        let download_locator = Url::parse(&download.url)
            .map_err(|e| CatalogError::Malformed(format!("feature {id}: {e}")))?;

        let orbit_direction = properties
            .orbit_direction
            .as_deref()
            .and_then(|d| match d.to_ascii_uppercase().as_str() {
                "ASCENDING" => Some(OrbitDirection::Ascending),
                "DESCENDING" => Some(OrbitDirection::Descending),
                _ => None,
            });

        let title = properties.title.unwrap_or_default();
        let orbit_number = properties
            .orbit_number
            .or_else(|| absolute_orbit_from_title(&title));

        Ok(Self {
            id,
            title,
            start_date: properties.start_date,
            orbit_direction,
            product_type: properties.product_type,
            relative_orbit: properties.relative_orbit_number,
            orbit_number,
            download_locator,
            size: download.size,
        })
    }
}

impl Feature {
    /// Name of the file written for this feature. SAFE products arrive zipped.
    pub fn file_name(&self) -> String {
        let base = if self.title.trim().is_empty() {
            self.id.as_str()
        } else {
            self.title.trim()
        };
        let name = match base.strip_suffix(".SAFE") {
            Some(stem) => format!("{stem}.zip"),
            None => base.to_string(),
        };
        name.replace(['/', '\\'], "_")
    }

    pub fn summary(&self) -> String {
        let mut line = self.title.clone();
        if let Some(relative) = self.relative_orbit {
            line.push_str(&format!(" relative_orbit={relative}"));
        }
        if let Some(absolute) = self.orbit_number {
            line.push_str(&format!(" orbit={absolute}"));
        }
        if let Some(direction) = self.orbit_direction {
            line.push_str(&format!(" direction={direction}"));
        }
        line
    }
}

/// Absolute orbit number embedded in a Sentinel-1 product name,
/// e.g. `S1A_IW_SLC__1SDV_20251221T052512_20251221T052539_062345_07C2A1_1F2B.SAFE`
pub fn absolute_orbit_from_title(title: &str) -> Option<u32> {
    let re = Regex::new(r"^S1[A-D]_[A-Z0-9]{2}_[A-Z_]{4}_[A-Z0-9]{4}_\d{8}T\d{6}_\d{8}T\d{6}_(?<orbit>\d{6})_")
        .expect("Regex pattern should always compile");
    let captures = re.captures(title)?;
    captures["orbit"].parse().ok()
}
