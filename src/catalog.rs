//! Client for the Copernicus Data Space OpenSearch (resto) catalog.
use crate::category::OrbitDirection;
use crate::error::CatalogError;
use crate::feature::{Feature, RawFeature};
use futures_util::{stream, Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_CATALOG_URL: &str = "https://catalogue.dataspace.copernicus.eu/resto/api/collections";
pub const SENTINEL1: &str = "Sentinel1";

const DEFAULT_PAGE_SIZE: u32 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Search constraints. Keys left as `None` are not sent and therefore not applied.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilterSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_orbit_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orbit_direction: Option<OrbitDirection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<String>,
    /// Area of interest as WKT
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

#[derive(Deserialize, Debug)]
struct SearchResponse {
    features: Vec<RawFeature>,
    properties: Option<SearchProperties>,
}

#[derive(Deserialize, Debug)]
struct SearchProperties {
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Deserialize, Debug)]
struct Link {
    rel: String,
}

#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    page_size: u32,
}

impl CatalogClient {
    pub fn new(base_url: &str) -> Result<Self, CatalogError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn search_url(&self, collection: &str) -> Result<Url, CatalogError> {
        let url = format!("{}/{}/search.json", self.base_url, collection);
        Url::parse(&url).map_err(|e| CatalogError::Malformed(format!("{url}: {e}")))
    }

    /// Lazily page through the search results. Nothing is requested until the
    /// stream is polled, and every call starts a fresh search.
    pub fn query<'a>(
        &'a self,
        collection: &'a str,
        filter: &'a FilterSet,
    ) -> impl Stream<Item = Result<Feature, CatalogError>> + 'a {
        stream::try_unfold(Some(1_u32), move |page| async move {
            let Some(page) = page else {
                return Ok::<_, CatalogError>(None);
            };
            let (features, more) = self.fetch_page(collection, filter, page).await?;
            let next = more.then_some(page + 1);
            let features = features.into_iter().map(Ok::<Feature, CatalogError>);
            Ok(Some((stream::iter(features), next)))
        })
        .try_flatten()
    }

    pub async fn query_all(
        &self,
        collection: &str,
        filter: &FilterSet,
    ) -> Result<Vec<Feature>, CatalogError> {
        self.query(collection, filter).try_collect().await
    }

    async fn fetch_page(
        &self,
        collection: &str,
        filter: &FilterSet,
        page: u32,
    ) -> Result<(Vec<Feature>, bool), CatalogError> {
        let url = self.search_url(collection)?;
        debug!(%url, page, "Querying catalog");

        let response = self
            .http
            .get(url)
            .query(filter)
            .query(&[("maxRecords", self.page_size), ("page", page)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        let body = response.text().await?;
        let search: SearchResponse = serde_json::from_str(&body)?;

        let has_next = match &search.properties {
            Some(p) if !p.links.is_empty() => p.links.iter().any(|l| l.rel == "next"),
            _ => true,
        };
        let count = search.features.len();
        let more = count > 0 && count >= self.page_size as usize && has_next;

        let features = search
            .features
            .into_iter()
            .map(Feature::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(page, count, more, "Catalog page received");

        Ok((features, more))
    }
}
