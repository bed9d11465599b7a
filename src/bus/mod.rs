//! The "loaded by bus" projection.
//!
//! Hosts embedding the viewer address their loads by namespace (the volume key
//! suffix). For every namespace a [`BusRecord`] mirrors which volumes arrived,
//! how their slices are ordered, which layout and camera they were given and
//! whether their windowing has been applied. Slice changes on tracked volumes
//! flow back to the host as debounced `slicing` notifications.

pub mod camera;
pub mod debounce;
pub mod message;
pub mod record;
pub mod transport;

use std::collections::HashMap;

use thiserror::Error;
use web_time::Instant;

use crate::config::{SlicingPayload, SyncConfig};
use crate::enums::Orientation;
use crate::grouper::VolumeKey;
use crate::sorter::SliceOrderMap;
use crate::volume::LpsOrientation;
use crate::windowing::Window;

use camera::CameraHint;
use debounce::Debouncer;
use message::{BusMessage, LoadRequest, MessageKind, SlicePosition, SlicingEvent};
use record::{BusRecord, LoadState, SliceInput, SliceTarget};
use transport::Transport;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Malformed bus message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bus message {0:?} requires a payload")]
    MissingPayload(MessageKind),

    #[error("Bus transport disconnected")]
    Disconnected,
}

/// Outcome of announcing a load request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadDecision {
    /// The requested slice is already loaded; just show it.
    CacheHit(SliceTarget),
    Load,
}

/// Windowing to apply to a viewport after a slice change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowUpdate {
    pub view: Orientation,
    pub window: Window,
}

#[derive(Debug)]
pub struct BusProjection {
    records: HashMap<String, BusRecord>,
    /// Volume key → namespace it was loaded into.
    data_ids: HashMap<VolumeKey, String>,
    notifier: Debouncer<SlicingEvent>,
    payload: SlicingPayload,
    obliquity_tolerance: f64,
}

impl Default for BusProjection {
    fn default() -> Self {
        Self::new(&SyncConfig::default())
    }
}

impl BusProjection {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            records: HashMap::new(),
            data_ids: HashMap::new(),
            notifier: Debouncer::new(config.debounce()),
            payload: config.slicing_payload,
            obliquity_tolerance: config.obliquity_tolerance,
        }
    }

    pub fn record(&self, namespace: &str) -> Option<&BusRecord> {
        self.records.get(namespace)
    }

    pub fn records(&self) -> impl Iterator<Item = (&str, &BusRecord)> {
        self.records
            .iter()
            .map(|(namespace, record)| (namespace.as_str(), record))
    }

    pub fn namespace_of(&self, key: &VolumeKey) -> Option<&str> {
        self.data_ids.get(key).map(String::as_str)
    }

    /// Store the options of a request, creating the record on first use.
    pub fn set_options(&mut self, namespace: &str, options: LoadRequest) -> &mut BusRecord {
        let record = self.records.entry(namespace.to_string()).or_default();
        record.options = options;
        record
    }

    /// Announce a load. Requests whose slice already resolves against the
    /// namespace's volumes are answered from the record.
    pub fn begin_load(&mut self, request: &LoadRequest) -> LoadDecision {
        let Some(namespace) = request.namespace() else {
            return LoadDecision::Load;
        };
        let record = self.set_options(namespace, request.clone());
        if !record.volume_keys.is_empty() {
            // A slice is only reachable once its volume has a view.
            if let Some(target) = record.resolve(request).filter(|target| target.view.is_some()) {
                record.state = LoadState::Idle;
                return LoadDecision::CacheHit(target);
            }
        }
        record.state = LoadState::Loading;
        LoadDecision::Load
    }

    /// Record the sorted slices of a volume loaded under a namespace. Keys
    /// without a namespace are not tracked.
    pub fn update_volume(
        &mut self,
        key: &VolumeKey,
        slices: Vec<SliceInput>,
        wl_differs: bool,
        order: Option<SliceOrderMap>,
    ) {
        let Some(namespace) = key.suffix() else {
            return;
        };
        let record = self.records.entry(namespace.to_string()).or_default();
        record.set_slices(key, slices, wl_differs, order);
        if matches!(record.state, LoadState::Idle | LoadState::Loading) {
            record.state = LoadState::PartiallyPopulated;
        }
        self.data_ids.insert(key.clone(), namespace.to_string());
    }

    /// Give a built volume its layout and camera. Returns the layout name when
    /// the volume is tracked.
    pub fn assign_view(&mut self, key: &VolumeKey, orientation: &LpsOrientation) -> Option<String> {
        let namespace = key.suffix()?;
        let record = self.records.get_mut(namespace)?;
        let volume = record.volumes.get_mut(key)?;

        if volume.camera.is_none() {
            volume.camera = CameraHint::for_volume(orientation, self.obliquity_tolerance);
        }
        let requested = &record.options.layout_name;
        let layout_name = volume
            .layout_name
            .get_or_insert_with(|| {
                requested
                    .clone()
                    .unwrap_or_else(|| orientation.primary().layout_name())
            })
            .clone();
        record.state = LoadState::Ready;
        Some(layout_name)
    }

    /// Remember `slice` as where `view` opens, unless the view already has one.
    pub fn set_default_slice(&mut self, namespace: &str, view: Orientation, slice: usize) {
        if let Some(record) = self.records.get_mut(namespace) {
            record.default_slices.entry(view).or_insert(slice);
        }
    }

    pub fn default_slice(&self, key: &VolumeKey, view: Orientation) -> Option<usize> {
        self.records
            .get(key.suffix()?)?
            .default_slices
            .get(&view)
            .copied()
    }

    /// Loading stopped, finished or failed.
    pub fn finish(&mut self, namespace: &str) {
        if let Some(record) = self.records.get_mut(namespace) {
            record.state = LoadState::Idle;
        }
    }

    pub fn release(&mut self, namespace: &str) -> Option<BusRecord> {
        self.data_ids.retain(|_, owner| owner != namespace);
        self.records.remove(namespace)
    }

    /// Release the namespace a volume was loaded into.
    pub fn release_volume(&mut self, key: &VolumeKey) -> Option<BusRecord> {
        let namespace = self.data_ids.get(key)?.clone();
        self.release(&namespace)
    }

    /// Drop a deleted volume from its namespace, keeping the namespace.
    pub fn remove_volume(&mut self, key: &VolumeKey) {
        if let Some(namespace) = self.data_ids.remove(key) {
            if let Some(record) = self.records.get_mut(&namespace) {
                record.remove_volume(key);
            }
        }
    }

    /// The user picked a window by hand; stop applying per-slice windowing.
    pub fn set_user_windowing(&mut self, key: &VolumeKey, by_user: bool) {
        if let Some(volume) = self.volume_mut(key) {
            volume.wl_configed_by_user = by_user;
        }
    }

    fn volume_mut(&mut self, key: &VolumeKey) -> Option<&mut record::BusVolume> {
        self.records.get_mut(key.suffix()?)?.volumes.get_mut(key)
    }

    /// React to a slice change in `view`. Returns the windowing to apply, if
    /// any, and queues a slicing notification for the host.
    pub fn on_slice_changed(
        &mut self,
        view: Orientation,
        key: &VolumeKey,
        slice: usize,
        now: Instant,
    ) -> Option<WindowUpdate> {
        let namespace = key.suffix()?.to_string();
        let payload = self.payload;
        let volume = self.volume_mut(key)?;
        if volume.view() != Some(view) {
            return None;
        }

        let configured = volume.wl_configed.get(&view).copied().unwrap_or(false);
        let update = match volume.slices.get(slice).and_then(|record| record.window()) {
            Some(window) if !volume.wl_configed_by_user && (volume.wl_differs || !configured) => {
                volume.wl_configed.insert(view, true);
                Some(WindowUpdate { view, window })
            }
            _ => None,
        };

        let position = match payload {
            SlicingPayload::InstanceIndex => volume
                .slices
                .get(slice)
                .map(|record| SlicePosition::Instance {
                    n: record.n,
                    i: record.i,
                }),
            SlicingPayload::File => volume.sources.get(slice).cloned().map(SlicePosition::File),
        }
        .or_else(|| u32::try_from(slice).ok().map(|s| SlicePosition::Absolute { s }));

        if let Some(position) = position {
            self.notifier.push(
                SlicingEvent {
                    uid: namespace,
                    slice: position,
                },
                now,
            );
        }
        update
    }

    /// Next notification, once the debounce window has passed.
    pub fn take_notification(&mut self, now: Instant) -> Option<SlicingEvent> {
        self.notifier.take_settled(now)
    }

    /// Send the pending notification if it has settled. Returns whether one was sent.
    pub fn emit_settled<T: Transport>(&mut self, transport: &mut T, now: Instant) -> Result<bool, BusError> {
        match self.take_notification(now) {
            Some(event) => {
                transport.send(BusMessage::Slicing(event).into_envelope(None, None)?)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Wait for the pending notification to settle and send it.
    pub async fn emit_when_settled<T: Transport>(&mut self, transport: &mut T) -> Result<bool, BusError> {
        match self.notifier.settle().await {
            Some(event) => {
                transport.send(BusMessage::Slicing(event).into_envelope(None, None)?)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
