//! The in-memory DICOM database.
//!
//! [`DicomStore`] owns everything that outlives a single import: the catalog,
//! the sorted units of every volume, built volumes and the bus projection.
//! Imports are incremental. Units that arrive later for a known volume are
//! merged and re-sorted, and the built volume is marked stale. Units are kept
//! in the order they arrived so a re-sort always starts from acquisition order.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use futures::future::{FutureExt, LocalBoxFuture, Shared};
use ndarray::Array2;
use serde::Serialize;
use thiserror::Error;

use crate::{
    bus::{BusProjection, record::SliceInput},
    catalog::{Catalog, PatientInfo, StudyInfo, VolumeInfo},
    config::SyncConfig,
    enums::Orientation,
    grouper::{GroupError, TaggedUnit, VolumeGroup, VolumeKey, categorize},
    sorter::{SliceOrderMap, parse_instance_number, sort_by_instance_number},
    tags::{DataUnit, TagDecoder, TagMap, TagName},
    volume::{DataRange, Volume},
    volume_loader::{ImageBuilder, VolumeLoaderError},
    windowing::{WindowingSummary, analyze},
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No files found for volume {0}")]
    FileNotFoundForVolumeKey(VolumeKey),

    #[error("Volume {0} not found")]
    VolumeNotFound(VolumeKey),

    #[error("Slice {index} out of bounds for volume {key} with {count} slices")]
    SliceIndexOutOfBounds {
        key: VolumeKey,
        index: usize,
        count: usize,
    },

    #[error("Failed to build volume: {0}")]
    Build(#[from] Arc<VolumeLoaderError>),

    #[error(transparent)]
    Group(#[from] GroupError),
}

/// Ordering and windowing facts about a volume's slices.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SliceInfo {
    /// Sticky: once a volume arrived reversed it stays reversed.
    pub reversed: bool,
    pub resorted: bool,
    /// Arrival index of each sorted slice.
    pub order: SliceOrderMap,
    pub windowing: WindowingSummary,
    /// Pixel range of each slice, known once the volume is built.
    pub data_ranges: Option<Vec<DataRange>>,
}

type BuildResult = Result<Arc<Volume>, Arc<VolumeLoaderError>>;

/// A volume build that can be awaited by several callers at once.
#[derive(Clone)]
pub struct PendingBuild {
    key: VolumeKey,
    future: Shared<LocalBoxFuture<'static, BuildResult>>,
}

impl PendingBuild {
    pub fn key(&self) -> &VolumeKey {
        &self.key
    }

    pub fn is_same(&self, other: &PendingBuild) -> bool {
        self.future.ptr_eq(&other.future)
    }

    pub async fn wait(&self) -> BuildResult {
        self.future.clone().await
    }
}

type SliceCacheKey = (VolumeKey, Orientation, usize);

pub struct DicomStore<D, B> {
    decoder: D,
    builder: Arc<B>,
    config: SyncConfig,
    catalog: Catalog,
    /// Units of each volume in arrival order.
    files: HashMap<VolumeKey, Vec<TaggedUnit>>,
    slices_info: HashMap<VolumeKey, SliceInfo>,
    volumes: HashMap<VolumeKey, Arc<Volume>>,
    needs_rebuild: HashSet<VolumeKey>,
    pending: HashMap<VolumeKey, PendingBuild>,
    slice_cache: HashMap<SliceCacheKey, Arc<Array2<u16>>>,
    bus: BusProjection,
}

impl<D: TagDecoder, B: ImageBuilder + 'static> DicomStore<D, B> {
    pub fn new(decoder: D, builder: B, config: SyncConfig) -> Self {
        Self {
            decoder,
            builder: Arc::new(builder),
            bus: BusProjection::new(&config),
            config,
            catalog: Catalog::new(),
            files: HashMap::new(),
            slices_info: HashMap::new(),
            volumes: HashMap::new(),
            needs_rebuild: HashSet::new(),
            pending: HashMap::new(),
            slice_cache: HashMap::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn bus(&self) -> &BusProjection {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut BusProjection {
        &mut self.bus
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn slice_info(&self, key: &VolumeKey) -> Option<&SliceInfo> {
        self.slices_info.get(key)
    }

    /// Units of a volume in slice order.
    pub fn units_of(&self, key: &VolumeKey) -> impl Iterator<Item = &DataUnit> {
        self.sorted_units(key).map(|tagged| &tagged.unit)
    }

    fn sorted_units(&self, key: &VolumeKey) -> impl Iterator<Item = &TaggedUnit> {
        let units = self.files.get(key).map(Vec::as_slice).unwrap_or_default();
        self.slices_info
            .get(key)
            .into_iter()
            .flat_map(|info| info.order.originals())
            .filter_map(move |arrival| units.get(arrival))
    }

    /// Tags of the first sorted slice of a volume.
    pub fn first_slice_tags(&self, key: &VolumeKey) -> Option<&TagMap> {
        self.sorted_units(key).next().map(|tagged| &tagged.tags)
    }

    pub fn needs_rebuild(&self, key: &VolumeKey) -> bool {
        self.needs_rebuild.contains(key)
    }

    /// Decode, group, sort and catalog a batch of units. Returns the keys of
    /// the volumes touched, in order of first appearance.
    pub async fn import_units(
        &mut self,
        units: Vec<DataUnit>,
        suffix: Option<&str>,
    ) -> Result<Vec<VolumeKey>, StoreError> {
        let groups = categorize(&self.decoder, units, suffix).await?;
        Ok(groups
            .into_iter()
            .map(|group| self.merge_group(group))
            .collect())
    }

    fn merge_group(&mut self, group: VolumeGroup) -> VolumeKey {
        let key = group.key;
        let mut units = self.files.remove(&key).unwrap_or_default();
        let mut seen: HashSet<_> = units.iter().map(|t| t.unit.source().clone()).collect();
        for tagged in group.units {
            if seen.insert(tagged.unit.source().clone()) {
                units.push(tagged);
            } else {
                log::debug!("{}: already imported into {key}", tagged.unit.source());
            }
        }

        let sorted = sort_by_instance_number((0..units.len()).collect::<Vec<usize>>(), |&arrival| {
            parse_instance_number(units[arrival].tags.get(TagName::InstanceNumber))
        });
        let windowing = analyze(sorted.items.iter().map(|&arrival| {
            let tags = &units[arrival].tags;
            (tags.get(TagName::WindowWidth), tags.get(TagName::WindowLevel))
        }));
        let count = sorted.items.len();
        let reversed = sorted.reversed
            || self.slices_info.get(&key).is_some_and(|info| info.reversed);

        if self.catalog.contains_volume(&key) {
            self.catalog.update_slice_count(&key, count);
            self.catalog.update_windowing(&key, windowing.differs);
        } else if let Some(&first) = sorted.items.first() {
            let tags = &units[first].tags;
            let mut volume = VolumeInfo::from_tags(tags, key.clone(), count);
            volume.windowing_differs = windowing.differs;
            self.catalog
                .upsert(PatientInfo::from_tags(tags), StudyInfo::from_tags(tags), volume);
        }

        let slices = sorted
            .items
            .iter()
            .zip(&sorted.instance_numbers)
            .zip(&windowing.windows)
            .map(|((&arrival, &instance_number), window)| SliceInput {
                instance_number,
                window: *window,
                source: units[arrival].unit.source().to_string(),
            })
            .collect();
        let order = reversed.then(|| sorted.order.clone());
        self.bus
            .update_volume(&key, slices, windowing.differs, order);

        log::debug!(
            "{key}: {count} slices (reversed: {reversed}, resorted: {}, windowing differs: {})",
            sorted.resorted,
            windowing.differs
        );
        self.slices_info.insert(
            key.clone(),
            SliceInfo {
                reversed,
                resorted: sorted.resorted,
                order: sorted.order,
                windowing,
                data_ranges: None,
            },
        );
        self.files.insert(key.clone(), units);
        self.needs_rebuild.insert(key.clone());
        self.invalidate_slices(&key);
        key
    }

    fn invalidate_slices(&mut self, key: &VolumeKey) {
        self.slice_cache.retain(|(cached, _, _), _| cached != key);
    }

    /// Start building a volume, or join the build already in flight.
    ///
    /// A stale volume (new units since the last build) or `force` starts a new
    /// build. While a build is in flight it is never replaced; a forced
    /// rebuild is deferred to the next call instead.
    pub fn begin_build(&mut self, key: &VolumeKey, force: bool) -> Result<PendingBuild, StoreError> {
        if !self.catalog.contains_volume(key) {
            return Err(StoreError::VolumeNotFound(key.clone()));
        }
        if let Some(pending) = self.pending.get(key) {
            if force {
                self.needs_rebuild.insert(key.clone());
            }
            return Ok(pending.clone());
        }

        if !force && !self.needs_rebuild.contains(key) {
            if let Some(volume) = self.volumes.get(key) {
                let built: BuildResult = Ok(Arc::clone(volume));
                return Ok(PendingBuild {
                    key: key.clone(),
                    future: futures::future::ready(built).boxed_local().shared(),
                });
            }
        }

        let units: Vec<DataUnit> = self.units_of(key).cloned().collect();
        if units.is_empty() {
            return Err(StoreError::FileNotFoundForVolumeKey(key.clone()));
        }
        let builder = Arc::clone(&self.builder);
        let future = async move {
            builder
                .build_image(&units)
                .await
                .map(Arc::new)
                .map_err(Arc::new)
        }
        .boxed_local()
        .shared();

        let pending = PendingBuild {
            key: key.clone(),
            future,
        };
        self.needs_rebuild.remove(key);
        self.pending.insert(key.clone(), pending.clone());
        Ok(pending)
    }

    /// Record the outcome of a build started by [`Self::begin_build`].
    pub fn finish_build(
        &mut self,
        build: &PendingBuild,
        result: BuildResult,
    ) -> Result<Arc<Volume>, StoreError> {
        let key = build.key();
        if self
            .pending
            .get(key)
            .is_some_and(|pending| pending.is_same(build))
        {
            self.pending.remove(key);
        }

        let volume = match result {
            Ok(volume) => volume,
            Err(err) => {
                log::error!("{key}: {err}");
                if self.catalog.contains_volume(key) {
                    // Whatever is cached predates the failed build.
                    self.needs_rebuild.insert(key.clone());
                }
                return Err(err.into());
            }
        };
        if !self.catalog.contains_volume(key) {
            // Deleted while building.
            return Ok(volume);
        }
        if self
            .volumes
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, &volume))
        {
            return Ok(volume);
        }

        self.volumes.insert(key.clone(), Arc::clone(&volume));
        self.invalidate_slices(key);

        if let Some(info) = self.slices_info.get_mut(key) {
            info.data_ranges = (self.config.track_data_ranges && info.windowing.differs)
                .then(|| volume.slice_ranges());
        }
        if let Some(layout) = self.bus.assign_view(key, &volume.lps_orientation()) {
            log::debug!("{key}: shown in {layout}");
        }
        Ok(volume)
    }

    pub async fn build_volume(&mut self, key: &VolumeKey, force: bool) -> Result<Arc<Volume>, StoreError> {
        let build = self.begin_build(key, force)?;
        let result = build.wait().await;
        self.finish_build(&build, result)
    }

    /// Slice `slice_number` (1-based) of a volume as seen from `orientation`.
    pub async fn get_volume_slice(
        &mut self,
        key: &VolumeKey,
        slice_number: usize,
        orientation: Orientation,
    ) -> Result<Arc<Array2<u16>>, StoreError> {
        let volume = self.build_volume(key, false).await?;
        let count = volume.slice_count(orientation);
        let out_of_bounds = || StoreError::SliceIndexOutOfBounds {
            key: key.clone(),
            index: slice_number,
            count,
        };
        if slice_number == 0 || slice_number > count {
            return Err(out_of_bounds());
        }

        let cache_key = (key.clone(), orientation, slice_number);
        if let Some(slice) = self.slice_cache.get(&cache_key) {
            return Ok(Arc::clone(slice));
        }
        let slice = volume
            .get_slice_from_axis(slice_number - 1, orientation)
            .map(|view| Arc::new(view.to_owned()))
            .ok_or_else(out_of_bounds)?;
        self.slice_cache.insert(cache_key, Arc::clone(&slice));
        Ok(slice)
    }

    /// Slice index a view opens on: the namespace's default for that view,
    /// clamped to the volume, else the middle slice.
    pub fn initial_slice(&self, key: &VolumeKey, view: Orientation) -> Option<usize> {
        let last = self.volumes.get(key)?.slice_count(view).checked_sub(1)?;
        Some(match self.bus.default_slice(key, view) {
            Some(slice) => slice.min(last),
            None => last.div_ceil(2),
        })
    }

    /// The middle slice of a volume in its acquisition view.
    pub async fn get_volume_thumbnail(&mut self, key: &VolumeKey) -> Result<Arc<Array2<u16>>, StoreError> {
        let volume = self.build_volume(key, false).await?;
        let orientation = volume.lps_orientation().primary();
        let middle = volume.slice_count(orientation).div_ceil(2);
        self.get_volume_slice(key, middle, orientation).await
    }

    /// Remove a volume and everything cached for it. Empty studies and
    /// patients go with it.
    pub fn delete_volume(&mut self, key: &VolumeKey) -> Result<(), StoreError> {
        if !self.catalog.delete_volume(key) {
            return Err(StoreError::VolumeNotFound(key.clone()));
        }
        self.files.remove(key);
        self.slices_info.remove(key);
        self.volumes.remove(key);
        self.needs_rebuild.remove(key);
        self.pending.remove(key);
        self.invalidate_slices(key);
        self.bus.remove_volume(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use dicom::core::VR;
    use dicom_dictionary_std::tags;
    use ndarray::Array3;

    use super::*;
    use crate::tags::DicomTagDecoder;
    use crate::tags::testing::{slice_unit, slice_unit_with};

    /// Builds a volume with one 2x2 slice per unit filled with its index.
    #[derive(Default)]
    struct FakeBuilder {
        calls: Rc<Cell<usize>>,
    }

    impl ImageBuilder for FakeBuilder {
        async fn build_image(&self, units: &[DataUnit]) -> Result<Volume, VolumeLoaderError> {
            self.calls.set(self.calls.get() + 1);
            if units.is_empty() {
                return Err(VolumeLoaderError::NoValidImages);
            }
            let data = Array3::from_shape_fn((units.len(), 2, 2), |(k, _, _)| k as u16 * 10);
            Ok(Volume::new(data, (1.0, 1.0, 1.0)))
        }
    }

    struct FailingAfter {
        successes: Cell<usize>,
    }

    impl ImageBuilder for FailingAfter {
        async fn build_image(&self, units: &[DataUnit]) -> Result<Volume, VolumeLoaderError> {
            match self.successes.get() {
                0 => Err(VolumeLoaderError::NoValidImages),
                left => {
                    self.successes.set(left - 1);
                    Ok(Volume::new(Array3::zeros((units.len(), 2, 2)), (1.0, 1.0, 1.0)))
                }
            }
        }
    }

    fn store() -> (DicomStore<DicomTagDecoder, FakeBuilder>, Rc<Cell<usize>>) {
        let builder = FakeBuilder::default();
        let calls = Rc::clone(&builder.calls);
        (
            DicomStore::new(DicomTagDecoder, builder, SyncConfig::default()),
            calls,
        )
    }

    #[tokio::test]
    async fn later_units_merge_into_the_volume() {
        let (mut store, _) = store();
        let key = VolumeKey::from("S1");
        store
            .import_units(vec![slice_unit("b", "S1", "2")], None)
            .await
            .unwrap();
        store
            .import_units(vec![slice_unit("a", "S1", "1"), slice_unit("b", "S1", "2")], None)
            .await
            .unwrap();

        assert_eq!(store.catalog().volume(&key).unwrap().number_of_slices, 2);
        let sources: Vec<_> = store.units_of(&key).map(|unit| unit.source().to_string()).collect();
        assert_eq!(sources, vec!["a", "b"]);
        assert!(store.slice_info(&key).unwrap().resorted);
    }

    #[tokio::test]
    async fn reimporting_keeps_the_acquisition_order() {
        let (mut store, _) = store();
        let key = VolumeKey::from("S1#ns");
        let units = || {
            ["3", "2", "1"]
                .into_iter()
                .map(|instance| slice_unit(instance, "S1", instance))
                .collect::<Vec<_>>()
        };
        store.import_units(units(), Some("ns")).await.unwrap();
        store.import_units(units(), Some("ns")).await.unwrap();

        let info = store.slice_info(&key).unwrap();
        assert!(info.reversed);
        assert_eq!(info.order.original_of(0), Some(2));
        let sources: Vec<_> = store.units_of(&key).map(|unit| unit.source().to_string()).collect();
        assert_eq!(sources, vec!["1", "2", "3"]);

        // A late slice appended after a reversed series keeps the mapping.
        store
            .import_units(vec![slice_unit("4", "S1", "4")], Some("ns"))
            .await
            .unwrap();
        let volume = store.bus().record("ns").unwrap().volume(&key).unwrap();
        assert!(store.slice_info(&key).unwrap().reversed);
        assert_eq!(volume.original_index(0), Some(2));
        assert_eq!(volume.original_index(3), Some(3));
    }

    #[tokio::test]
    async fn later_chunks_do_not_grow_the_catalog() {
        let (mut store, _) = store();
        store
            .import_units(vec![slice_unit("b", "S1", "2")], None)
            .await
            .unwrap();
        let stray = slice_unit_with("a", "S1", "1", &[(tags::PATIENT_ID, VR::LO, "P2")]);
        store.import_units(vec![stray], None).await.unwrap();

        assert_eq!(store.catalog().patient_count(), 1);
        assert!(store.catalog().patient("P2").is_none());
        assert_eq!(
            store.catalog().volume(&VolumeKey::from("S1")).unwrap().number_of_slices,
            2
        );
    }

    #[tokio::test]
    async fn failed_rebuild_leaves_the_volume_stale() {
        let builder = FailingAfter {
            successes: Cell::new(1),
        };
        let mut store = DicomStore::new(DicomTagDecoder, builder, SyncConfig::default());
        let key = VolumeKey::from("S1");
        store
            .import_units(vec![slice_unit("a", "S1", "1")], None)
            .await
            .unwrap();
        store.build_volume(&key, false).await.unwrap();

        assert!(matches!(
            store.build_volume(&key, true).await,
            Err(StoreError::Build(_))
        ));
        assert!(store.needs_rebuild(&key));
    }

    #[tokio::test]
    async fn builds_are_shared_while_in_flight() {
        let (mut store, calls) = store();
        let key = VolumeKey::from("S1");
        store
            .import_units(vec![slice_unit("a", "S1", "1")], None)
            .await
            .unwrap();

        let first = store.begin_build(&key, false).unwrap();
        let second = store.begin_build(&key, false).unwrap();
        assert!(first.is_same(&second));

        let (a, b) = futures::join!(first.wait(), second.wait());
        assert!(Arc::ptr_eq(a.as_ref().unwrap(), b.as_ref().unwrap()));
        store.finish_build(&first, a).unwrap();
        store.finish_build(&second, b).unwrap();
        assert_eq!(calls.get(), 1);

        store.build_volume(&key, false).await.unwrap();
        assert_eq!(calls.get(), 1);
        store.build_volume(&key, true).await.unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn rebuilds_requested_mid_build_run_next_time() {
        let (mut store, calls) = store();
        let key = VolumeKey::from("S1");
        store
            .import_units(vec![slice_unit("a", "S1", "1")], None)
            .await
            .unwrap();

        let build = store.begin_build(&key, false).unwrap();
        store
            .import_units(vec![slice_unit("b", "S1", "2")], None)
            .await
            .unwrap();
        let joined = store.begin_build(&key, true).unwrap();
        assert!(build.is_same(&joined));

        let result = build.wait().await;
        let first = store.finish_build(&build, result).unwrap();
        assert_eq!(first.dim().0, 1);
        assert!(store.needs_rebuild(&key));

        let second = store.build_volume(&key, false).await.unwrap();
        assert_eq!(second.dim().0, 2);
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn new_units_mark_the_volume_stale() {
        let (mut store, calls) = store();
        let key = VolumeKey::from("S1");
        store
            .import_units(vec![slice_unit("a", "S1", "1")], None)
            .await
            .unwrap();
        store.build_volume(&key, false).await.unwrap();
        assert!(!store.needs_rebuild(&key));

        store
            .import_units(vec![slice_unit("b", "S1", "2")], None)
            .await
            .unwrap();
        assert!(store.needs_rebuild(&key));
        let volume = store.build_volume(&key, false).await.unwrap();
        assert_eq!(volume.dim().0, 2);
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn slices_are_one_based() {
        let (mut store, _) = store();
        let key = VolumeKey::from("S1");
        store
            .import_units(
                vec![
                    slice_unit("a", "S1", "1"),
                    slice_unit("b", "S1", "2"),
                    slice_unit("c", "S1", "3"),
                ],
                None,
            )
            .await
            .unwrap();

        let slice = store
            .get_volume_slice(&key, 3, Orientation::Axial)
            .await
            .unwrap();
        assert_eq!(slice[[0, 0]], 20);

        assert!(matches!(
            store.get_volume_slice(&key, 0, Orientation::Axial).await,
            Err(StoreError::SliceIndexOutOfBounds { count: 3, .. })
        ));
        assert!(matches!(
            store.get_volume_slice(&key, 4, Orientation::Axial).await,
            Err(StoreError::SliceIndexOutOfBounds { .. })
        ));

        let thumbnail = store.get_volume_thumbnail(&key).await.unwrap();
        assert_eq!(thumbnail[[1, 1]], 10);
    }

    #[tokio::test]
    async fn unknown_volumes_are_errors() {
        let (mut store, _) = store();
        let key = VolumeKey::from("missing");
        assert!(matches!(
            store.build_volume(&key, false).await,
            Err(StoreError::VolumeNotFound(_))
        ));
        assert!(matches!(
            store.delete_volume(&key),
            Err(StoreError::VolumeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn differing_windowing_records_data_ranges() {
        let (mut store, _) = store();
        let key = VolumeKey::from("S1");
        store
            .import_units(
                vec![
                    slice_unit_with(
                        "a",
                        "S1",
                        "1",
                        &[(tags::WINDOW_WIDTH, VR::DS, "400"), (tags::WINDOW_CENTER, VR::DS, "40")],
                    ),
                    slice_unit_with(
                        "b",
                        "S1",
                        "2",
                        &[(tags::WINDOW_WIDTH, VR::DS, "80"), (tags::WINDOW_CENTER, VR::DS, "35")],
                    ),
                ],
                None,
            )
            .await
            .unwrap();
        assert!(store.catalog().volume(&key).unwrap().windowing_differs);

        store.build_volume(&key, false).await.unwrap();
        let ranges = store.slice_info(&key).unwrap().data_ranges.clone().unwrap();
        assert_eq!(ranges[1], DataRange { min: 10, max: 10 });
    }

    #[tokio::test]
    async fn nothing_to_group_is_an_error() {
        let (mut store, _) = store();
        assert!(matches!(
            store.import_units(Vec::new(), None).await,
            Err(StoreError::Group(GroupError::NoVolumesFound))
        ));
    }
}
