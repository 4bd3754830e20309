// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Remote source of truth for app, space and org records.
//!
//! [`AppDirectory`] is what the metadata cache consumes.
//! [`CloudControllerClient`] implements it against the Cloud Controller v2 API.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use crate::errors::DirectoryError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppRecord {
    pub guid: String,
    pub name: String,
    pub space_guid: String,
    /// User-provided environment of the app
    pub environment: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpaceRecord {
    pub guid: String,
    pub name: String,
    pub org_guid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrgRecord {
    pub guid: String,
    pub name: String,
}

/// Options of a bulk app listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppQuery {
    /// List the most recently updated apps first
    pub order_descending: bool,
    pub results_per_page: Option<usize>,
}

#[async_trait]
pub trait AppDirectory: Send + Sync {
    /// Lists apps, reading at most `page_cap` pages (0 reads every page).
    async fn list_apps(
        &self,
        query: &AppQuery,
        page_cap: usize,
    ) -> Result<Vec<AppRecord>, DirectoryError>;

    async fn get_app(&self, guid: &str) -> Result<AppRecord, DirectoryError>;

    async fn get_space(&self, guid: &str) -> Result<SpaceRecord, DirectoryError>;

    async fn get_org(&self, guid: &str) -> Result<OrgRecord, DirectoryError>;
}

#[derive(Debug, Deserialize)]
struct Resource<T> {
    metadata: Metadata,
    entity: T,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    guid: String,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default)]
    next_url: Option<String>,
    #[serde(default = "Vec::new")]
    resources: Vec<Resource<T>>,
}

#[derive(Debug, Deserialize)]
struct AppEntity {
    name: String,
    #[serde(default)]
    space_guid: String,
    #[serde(default)]
    environment_json: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct SpaceEntity {
    name: String,
    #[serde(default)]
    organization_guid: String,
}

#[derive(Debug, Deserialize)]
struct OrgEntity {
    name: String,
}

impl From<Resource<AppEntity>> for AppRecord {
    fn from(resource: Resource<AppEntity>) -> Self {
        AppRecord {
            guid: resource.metadata.guid,
            name: resource.entity.name,
            space_guid: resource.entity.space_guid,
            environment: resource.entity.environment_json.unwrap_or_default(),
        }
    }
}

/// Cloud Controller v2 client authenticating with a static bearer token.
#[derive(Clone)]
pub struct CloudControllerClient {
    client: reqwest::Client,
    api_endpoint: String,
    token: String,
}

impl CloudControllerClient {
    pub fn new(client: reqwest::Client, api_endpoint: &str, token: &str) -> Self {
        Self {
            client,
            api_endpoint: api_endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path_and_query: &str,
        query: &[(&str, String)],
    ) -> Result<T, DirectoryError> {
        let url = format!("{}{}", self.api_endpoint, path_and_query);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|source| DirectoryError::Http {
                url: url.clone(),
                source,
            })?;

        match resp.status() {
            status if status.is_success() => {
                resp.json::<T>()
                    .await
                    .map_err(|source| DirectoryError::Http { url, source })
            }
            StatusCode::NOT_FOUND => Err(DirectoryError::NotFound(url)),
            status => Err(DirectoryError::Status { url, status }),
        }
    }
}

impl std::fmt::Debug for CloudControllerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudControllerClient")
            .field("api_endpoint", &self.api_endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AppDirectory for CloudControllerClient {
    async fn list_apps(
        &self,
        query: &AppQuery,
        page_cap: usize,
    ) -> Result<Vec<AppRecord>, DirectoryError> {
        let mut params = vec![("inline-relations-depth", "0".to_string())];
        if query.order_descending {
            params.push(("order-direction", "desc".to_string()));
        }
        if let Some(per_page) = query.results_per_page {
            params.push(("results-per-page", per_page.to_string()));
        }

        let mut apps = Vec::new();
        let mut pages = 0;
        let mut page: Page<AppEntity> = self.get_json("/v2/apps", &params).await?;
        loop {
            pages += 1;
            apps.extend(page.resources.into_iter().map(AppRecord::from));

            let next_url = match page.next_url {
                Some(next_url) if !next_url.is_empty() => next_url,
                _ => break,
            };
            if page_cap > 0 && pages >= page_cap {
                break;
            }
            // next_url already carries the query string
            page = self.get_json(&next_url, &[]).await?;
        }

        debug!("Listed {} apps over {pages} page(s)", apps.len());
        Ok(apps)
    }

    async fn get_app(&self, guid: &str) -> Result<AppRecord, DirectoryError> {
        let resource: Resource<AppEntity> =
            self.get_json(&format!("/v2/apps/{guid}"), &[]).await?;
        Ok(resource.into())
    }

    async fn get_space(&self, guid: &str) -> Result<SpaceRecord, DirectoryError> {
        let resource: Resource<SpaceEntity> =
            self.get_json(&format!("/v2/spaces/{guid}"), &[]).await?;
        Ok(SpaceRecord {
            guid: resource.metadata.guid,
            name: resource.entity.name,
            org_guid: resource.entity.organization_guid,
        })
    }

    async fn get_org(&self, guid: &str) -> Result<OrgRecord, DirectoryError> {
        let resource: Resource<OrgEntity> =
            self.get_json(&format!("/v2/organizations/{guid}"), &[]).await?;
        Ok(OrgRecord {
            guid: resource.metadata.guid,
            name: resource.entity.name,
        })
    }
}
