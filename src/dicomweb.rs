//! DICOMweb retrieval boundary.
//!
//! The HTTP client itself lives outside the crate. [`fetch_units`] turns the
//! identifiers of a [`LoadRequest`] into data units, dropping whatever the
//! server fails to deliver.

use std::future::Future;

use thiserror::Error;

use crate::bus::message::LoadRequest;
use crate::tags::DataUnit;

#[derive(Debug, Error)]
pub enum DicomWebError {
    #[error("DICOMweb request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("DICOMweb load needs a study and a series instance UID")]
    MissingIdentifiers,
}

/// Where a deep DICOMweb URL points.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DicomWebLocation {
    /// Service root, without the `studies/...` path.
    pub host: String,
    pub study: Option<String>,
    pub series: Option<String>,
}

/// Split `http://host/dicom-web/studies/<id>/series/<id>` into the service
/// root and the identifiers it carries. Either level may be absent.
pub fn parse_url(url: &str) -> DicomWebLocation {
    let trimmed = url.strip_suffix('/').unwrap_or(url);
    let mut segments: Vec<&str> = trimmed.split('/').collect();
    let mut location = DicomWebLocation::default();

    for level in ["series", "studies"] {
        let len = segments.len();
        if len >= 2 && segments[len - 2] == level {
            let id = Some(segments[len - 1].to_string());
            if level == "series" {
                location.series = id;
            } else {
                location.study = id;
            }
            segments.truncate(len - 2);
        }
    }
    location.host = segments.join("/");
    location
}

pub trait DicomWebClient {
    /// Every instance of a series. Instances the server fails to deliver come
    /// back as individual errors.
    fn fetch_series(
        &self,
        root: &str,
        study: &str,
        series: &str,
    ) -> impl Future<Output = Result<Vec<Result<Vec<u8>, DicomWebError>>, DicomWebError>>;

    fn fetch_instance(
        &self,
        root: &str,
        study: &str,
        series: &str,
        sop: &str,
    ) -> impl Future<Output = Result<Vec<u8>, DicomWebError>>;
}

/// Fetch the series or single instance a request names. Failures are logged
/// and yield fewer (or no) units.
pub async fn fetch_units<C: DicomWebClient>(client: &C, request: &LoadRequest) -> Vec<DataUnit> {
    let Some(url) = request.dicom_web_url.as_deref() else {
        return Vec::new();
    };
    let location = parse_url(url);
    let study = request.study_instance_uid.clone().or(location.study);
    let series = request.series_instance_uid.clone().or(location.series);
    let (Some(study), Some(series)) = (study, series) else {
        log::error!("{url}: {}", DicomWebError::MissingIdentifiers);
        return Vec::new();
    };
    let root = location.host;

    if let Some(sop) = request.sop_instance_uid.as_deref() {
        return match client.fetch_instance(&root, &study, &series, sop).await {
            Ok(bytes) => vec![DataUnit::from_bytes(
                format!("dicom-web/{study}/{series}/{sop}.dcm"),
                bytes,
            )],
            Err(err) => {
                log::error!("{err}");
                Vec::new()
            }
        };
    }

    match client.fetch_series(&root, &study, &series).await {
        Ok(instances) => {
            log::info!("fetched {} instances of series {series}", instances.len());
            instances
                .into_iter()
                .enumerate()
                .filter_map(|(index, instance)| match instance {
                    Ok(bytes) => Some(DataUnit::from_bytes(
                        format!("dicom-web/{study}/{series}/{}.dcm", index + 1),
                        bytes,
                    )),
                    Err(err) => {
                        log::warn!("{err}");
                        None
                    }
                })
                .collect()
        }
        Err(err) => {
            log::error!("{err}");
            Vec::new()
        }
    }
}
