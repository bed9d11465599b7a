//! Turning a [`LoadRequest`] into catalogued, built volumes.

use std::{fmt::Write as _, future::Future};

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;

use crate::{
    bus::{LoadDecision, message::LoadRequest, record::SliceTarget},
    catalog::VolumeInfo,
    dicomweb::{self, DicomWebClient},
    grouper::{GroupError, VolumeKey},
    selection,
    store::{DicomStore, StoreError},
    tags::{DataUnit, TagDecoder},
    volume_loader::ImageBuilder,
};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
}

/// Retrieves the unit behind a URL.
pub trait SourceFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<DataUnit, FetchError>>;
}

/// Reads local paths and `file://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl SourceFetcher for FileFetcher {
    async fn fetch(&self, url: &str) -> Result<DataUnit, FetchError> {
        let path = match url.split_once("://") {
            None => url,
            Some(("file", path)) => path,
            Some((scheme, _)) => return Err(FetchError::UnsupportedScheme(scheme.to_string())),
        };
        let bytes = tokio::fs::read(path).await?;
        Ok(DataUnit::from_bytes(url, bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadFailure {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOutcome {
    /// Volumes the load touched, in order of first appearance.
    pub volume_keys: Vec<VolumeKey>,
    /// The volume to show first.
    pub primary: Option<VolumeKey>,
    /// A PET volume to overlay on a CT primary.
    pub layer: Option<VolumeKey>,
    pub segmentations: Vec<VolumeKey>,
    /// The slice the request asked for, when it names one.
    pub target: Option<SliceTarget>,
    /// Layout the host should switch to, when the request allows it.
    pub layout: Option<String>,
    /// Answered from already loaded volumes.
    pub cache_hit: bool,
    pub failures: Vec<LoadFailure>,
}

impl LoadOutcome {
    /// One message listing every failed source, or `None` if all loaded.
    pub fn failure_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let mut summary = String::from("These files failed to load:");
        for failure in &self.failures {
            let _ = write!(summary, "\n- {}: {}", failure.name, failure.message);
        }
        Some(summary)
    }
}

/// Load what a request names, into its namespace if it has one.
///
/// Requests whose slice is already loaded are answered without fetching.
/// Sources that fail to fetch or volumes that fail to build are reported in
/// [`LoadOutcome::failures`]; the rest of the batch still loads.
pub async fn load<D, B, F, C>(
    store: &mut DicomStore<D, B>,
    request: LoadRequest,
    fetcher: &F,
    dicomweb: &C,
) -> Result<LoadOutcome, StoreError>
where
    D: TagDecoder,
    B: ImageBuilder + 'static,
    F: SourceFetcher,
    C: DicomWebClient,
{
    if let LoadDecision::CacheHit(target) = store.bus_mut().begin_load(&request) {
        log::debug!("cache hit: {} slice {}", target.volume_key, target.slice);
        return Ok(LoadOutcome {
            target: Some(target),
            cache_hit: true,
            ..Default::default()
        });
    }

    let result = load_sources(store, &request, fetcher, dicomweb).await;
    if let Some(namespace) = request.namespace() {
        store.bus_mut().finish(namespace);
    }
    result
}

async fn load_sources<D, B, F, C>(
    store: &mut DicomStore<D, B>,
    request: &LoadRequest,
    fetcher: &F,
    dicomweb: &C,
) -> Result<LoadOutcome, StoreError>
where
    D: TagDecoder,
    B: ImageBuilder + 'static,
    F: SourceFetcher,
    C: DicomWebClient,
{
    let mut outcome = LoadOutcome::default();

    let units = if request.dicom_web_url.is_some() {
        dicomweb::fetch_units(dicomweb, request).await
    } else {
        let fetched = join_all(request.urls.iter().map(|url| fetcher.fetch(url))).await;
        let mut units = Vec::with_capacity(fetched.len());
        for (index, result) in fetched.into_iter().enumerate() {
            match result {
                Ok(unit) => units.push(unit),
                Err(err) => {
                    let name = request.name_of(index);
                    log::error!("{name}: {err}");
                    outcome.failures.push(LoadFailure {
                        name,
                        message: err.to_string(),
                    });
                }
            }
        }
        units
    };

    if units.is_empty() {
        if outcome.failures.is_empty() {
            return Err(GroupError::NoVolumesFound.into());
        }
        return Ok(outcome);
    }

    let keys = store.import_units(units, request.namespace()).await?;
    for key in &keys {
        if let Err(err) = store.build_volume(key, false).await {
            outcome.failures.push(LoadFailure {
                name: store
                    .catalog()
                    .volume(key)
                    .map(VolumeInfo::display_name)
                    .unwrap_or_else(|| key.to_string()),
                message: err.to_string(),
            });
        }
    }

    let catalog = store.catalog();
    outcome.primary = selection::find_base_volume(catalog, &keys);
    if let Some(primary) = &outcome.primary {
        outcome.layer = selection::find_layer_candidate(catalog, primary, &keys);
        outcome.segmentations = selection::find_segmentations(catalog, primary, &keys);
    }
    if let Some(namespace) = request.namespace() {
        let record = store.bus().record(namespace);
        outcome.target = record.and_then(|record| record.resolve(request));
        outcome.layout = outcome
            .primary
            .as_ref()
            .and_then(|primary| record?.volume(primary)?.layout_name.clone())
            .filter(|_| request.changes_layout());
        if let Some(target) = &outcome.target {
            if let Some(view) = request.view().or(target.view) {
                store.bus_mut().set_default_slice(namespace, view, target.slice);
            }
        }
    }
    outcome.volume_keys = keys;
    Ok(outcome)
}
