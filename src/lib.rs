//! # DICOM volume sync library
//!
//! This crate assembles loose DICOM data units (in-memory objects, encoded
//! buffers or files) into volumes and keeps a per-namespace projection of
//! them that an embedding page can drive over a message bus.
//!
//! It builds on the dicom-rs ecosystem. A batch of units goes through:
//!  - tag extraction ([`tags`])
//!  - grouping into volumes by Series Instance UID ([`grouper`])
//!  - ordering by Instance Number ([`sorter`])
//!  - VOI LUT windowing analysis ([`windowing`])
//!  - the Patient → Study → Volume catalog ([`catalog`])
//!
//! Loads that carry a namespace (`volumeKeySuffix`) are additionally tracked
//! in the [`bus`] projection: which slices arrived, the layout and camera each
//! volume was given, whether per-slice windowing applies, and which slice the
//! host last looked at. Volume keys then take the form `<series uid>#<namespace>`.
//!
//! Pixel data is assembled into an [`ndarray`] volume on demand and can be
//! sliced in the three medical axes:
//!  - Axial
//!  - Coronal
//!  - Sagittal
//!
//! DICOM files are assumed to be single frame (the first frame is used).
//!
//! # Examples
//!
//! ## Loading a directory into a namespace
//!
//! ```no_run
//! # use dicom_volume_sync::{DicomStore, DicomTagDecoder, VolumeLoader, SyncConfig, Orientation};
//! # use dicom_volume_sync::{tags::DataUnit, volume_loader::collect_dicom_paths};
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = DicomStore::new(DicomTagDecoder, VolumeLoader, SyncConfig::default());
//! let units = collect_dicom_paths("dicom")?
//!     .into_iter()
//!     .map(DataUnit::from_path)
//!     .collect();
//! let keys = store.import_units(units, Some("ns1")).await?;
//! let slice = store.get_volume_slice(&keys[0], 1, Orientation::Axial).await?;
//! println!("{:?}", slice.dim());
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod catalog;
pub mod config;
pub mod dicomweb;
pub mod enums;
pub mod grouper;
pub mod loader;
pub mod selection;
pub mod sorter;
pub mod store;
pub mod tags;
pub mod volume;
pub mod volume_loader;
pub mod windowing;

pub use bus::BusProjection;
pub use config::SyncConfig;
pub use enums::Orientation;
pub use grouper::VolumeKey;
pub use store::{DicomStore, StoreError};
pub use tags::DicomTagDecoder;
pub use volume::Volume;
pub use volume_loader::VolumeLoader;
