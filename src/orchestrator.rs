use crate::catalog::{CatalogClient, FilterSet, SENTINEL1};
use crate::category::{Category, CategoryRouter};
use crate::config::RunConfig;
use crate::credentials::Credentials;
use crate::error::{CatalogError, ConfigError};
use crate::feature::Feature;
use crate::fetch::{BatchFetcher, BatchReport, FetchOptions};
use crate::monitor::Monitor;
use crate::sort::{dedup_by_id, sort_by_start_date};
use crate::transport::Transport;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// One catalog query and the folder its results go to.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub label: String,
    pub category: Category,
    pub filter: FilterSet,
}

/// Orbit file groups first, then one group per product track.
pub fn plan_groups(config: &RunConfig, aoi: Option<String>) -> Vec<Group> {
    let mut groups = vec![];

    for kind in &config.orbit_files {
        let category = Category::OrbitFile(*kind);
        let mut filter = config.base_filter();
        category.apply(&mut filter);
        groups.push(Group {
            label: category.to_string(),
            category,
            filter,
        });
    }

    if let Some(products) = &config.products {
        for track in &products.tracks {
            let category = Category::Product(track.direction);
            let mut filter = config.base_filter();
            filter.product_type = Some(products.product_type.clone());
            filter.sensor_mode = products.sensor_mode.clone();
            filter.processing_level = products.processing_level.clone();
            filter.relative_orbit_number = track.relative_orbit;
            filter.geometry = aoi.clone();
            category.apply(&mut filter);

            let label = match track.relative_orbit {
                Some(orbit) => format!("{category} (relative orbit {orbit})"),
                None => category.to_string(),
            };
            groups.push(Group {
                label,
                category,
                filter,
            });
        }
    }
    groups
}

#[derive(Debug)]
pub enum GroupOutcome {
    Completed(BatchReport),
    Failed(String),
}

#[derive(Debug)]
pub struct GroupReport {
    pub label: String,
    pub category: Category,
    pub outcome: GroupOutcome,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub groups: Vec<GroupReport>,
    /// Groups never started because the run was cancelled
    pub skipped_groups: Vec<String>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.skipped_groups.is_empty()
            && self.groups.iter().all(|g| match &g.outcome {
                GroupOutcome::Completed(report) => report.is_clean(),
                GroupOutcome::Failed(_) => false,
            })
    }

    pub fn log(&self) {
        for group in &self.groups {
            match &group.outcome {
                GroupOutcome::Completed(report) => info!(
                    group = %group.label,
                    downloaded = report.downloaded,
                    skipped = report.skipped,
                    failed = report.failed,
                    cancelled = report.cancelled,
                    "Group summary"
                ),
                GroupOutcome::Failed(e) => {
                    error!(group = %group.label, error = %e, "Group failed")
                }
            }
        }
        for label in &self.skipped_groups {
            warn!(group = %label, "Group not started");
        }
    }
}

pub struct Orchestrator<T> {
    groups: Vec<Group>,
    fail_fast: bool,
    client: CatalogClient,
    router: CategoryRouter,
    fetcher: BatchFetcher<T>,
    options: FetchOptions,
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(
        config: RunConfig,
        client: CatalogClient,
        transport: T,
        monitor: Arc<dyn Monitor>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let aoi = config.resolve_aoi()?;
        let options = FetchOptions::new(config.concurrency()?, monitor).retry(config.retry.clone());

        Ok(Self {
            groups: plan_groups(&config, aoi),
            fail_fast: config.fail_fast,
            client,
            router: CategoryRouter::new(&config.output_dir),
            fetcher: BatchFetcher::new(transport),
            options,
        })
    }

    pub fn credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.options = self.options.credentials(credentials);
        self
    }

    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.options = self.options.cancel(cancel);
        self
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Query, deduplicate and sort one group's features.
    async fn collect(&self, group: &Group) -> Result<Vec<Feature>, CatalogError> {
        let features = self.client.query_all(SENTINEL1, &group.filter).await?;
        Ok(sort_by_start_date(dedup_by_id(features)))
    }

    /// The features every group would download, without downloading anything.
    pub async fn preview(&self) -> Vec<(String, Result<Vec<Feature>, CatalogError>)> {
        let mut previews = vec![];
        for group in &self.groups {
            previews.push((group.label.clone(), self.collect(group).await));
        }
        previews
    }

    async fn run_group(&self, group: &Group) -> Result<BatchReport> {
        info!(group = %group.label, "Querying catalog");
        let features = self
            .collect(group)
            .await
            .with_context(|| format!("catalog query for {} failed", group.label))?;
        info!(group = %group.label, count = features.len(), "Features found");
        for feature in &features {
            info!("{}", feature.summary());
        }

        let destination = self.router.resolve(group.category);
        self.router.ensure(&destination).await?;

        let results = self
            .fetcher
            .fetch_all(features, &destination, &self.options)
            .await;
        let report = BatchReport::from_results(&results);
        report.log(&group.label);
        Ok(report)
    }

    /// Run every group in order. A failing group is recorded and the next one
    /// starts, unless `fail_fast` is set.
    pub async fn run(&self) -> Result<RunReport> {
        let mut report = RunReport::default();

        for group in &self.groups {
            if self.options.cancel.is_cancelled() {
                report.skipped_groups.push(group.label.clone());
                continue;
            }

            match self.run_group(group).await {
                Ok(batch) => report.groups.push(GroupReport {
                    label: group.label.clone(),
                    category: group.category,
                    outcome: GroupOutcome::Completed(batch),
                }),
                Err(e) if self.fail_fast => return Err(e.context("aborting run (fail_fast)")),
                Err(e) => {
                    let message = format!("{e:#}");
                    error!(group = %group.label, error = %message, "Group failed, continuing");
                    report.groups.push(GroupReport {
                        label: group.label.clone(),
                        category: group.category,
                        outcome: GroupOutcome::Failed(message),
                    });
                }
            }
        }
        Ok(report)
    }
}
