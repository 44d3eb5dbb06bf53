#![allow(async_fn_in_trait)]
pub mod catalog;
pub mod category;
pub mod config;
pub mod credentials;
pub mod error;
pub mod feature;
pub mod fetch;
pub mod monitor;
pub mod orchestrator;
pub mod retry;
pub mod sort;
pub mod transport;

pub use catalog::{CatalogClient, FilterSet};
pub use category::{Category, CategoryRouter, OrbitDirection, OrbitFileType};
pub use config::RunConfig;
pub use credentials::Credentials;
pub use error::{CatalogError, ConfigError, FilesystemError, TransferError};
pub use feature::Feature;
pub use fetch::{BatchFetcher, BatchReport, FetchOptions, FetchResult, FetchStatus};
pub use monitor::{LogMonitor, Monitor, NullMonitor, Phase, ProgressEvent};
pub use orchestrator::{Orchestrator, RunReport};
pub use transport::{HttpTransport, Transport};
