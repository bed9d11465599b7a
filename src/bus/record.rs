use std::collections::HashMap;

use serde::Serialize;

use super::camera::CameraHint;
use super::message::LoadRequest;
use crate::enums::Orientation;
use crate::grouper::VolumeKey;
use crate::sorter::SliceOrderMap;
use crate::windowing::Window;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SliceRecord {
    /// Instance number.
    pub n: i32,
    /// Dense index across all volumes of the namespace.
    pub i: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
}

impl SliceRecord {
    pub fn window(&self) -> Option<Window> {
        Some(Window {
            width: self.width?,
            level: self.level?,
        })
    }
}

/// One sorted slice as handed over by the import pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceInput {
    pub instance_number: i32,
    pub window: Option<Window>,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    PartiallyPopulated,
    Ready,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusVolume {
    pub layout_name: Option<String>,
    pub slices: Vec<SliceRecord>,
    /// Source identity of each sorted slice.
    pub sources: Vec<String>,
    pub camera: Option<CameraHint>,
    pub wl_differs: bool,
    /// Views that already received their automatic windowing.
    pub wl_configed: HashMap<Orientation, bool>,
    pub wl_configed_by_user: bool,
    /// Recorded when the slices arrived in reverse acquisition order.
    pub order: Option<SliceOrderMap>,
}

impl BusVolume {
    pub fn view(&self) -> Option<Orientation> {
        self.layout_name
            .as_deref()
            .and_then(Orientation::from_layout_name)
            .or(self.camera.map(|camera| camera.view))
    }

    /// Acquisition index of sorted slice `s`.
    pub fn original_index(&self, s: usize) -> Option<usize> {
        if s >= self.slices.len() {
            return None;
        }
        match &self.order {
            Some(order) => order.original_of(s),
            None => Some(s),
        }
    }

    /// Sorted index of the slice acquired at `original`.
    pub fn sorted_index(&self, original: usize) -> Option<usize> {
        if original >= self.slices.len() {
            return None;
        }
        match &self.order {
            Some(order) => order.sorted_of(original),
            None => Some(original),
        }
    }
}

/// Where a load request points: a slice of one volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceTarget {
    pub volume_key: VolumeKey,
    pub slice: usize,
    pub view: Option<Orientation>,
}

/// One namespace's view of loading and display decisions.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusRecord {
    pub options: LoadRequest,
    pub volumes: HashMap<VolumeKey, BusVolume>,
    /// Volumes in the order they were first grouped.
    pub volume_keys: Vec<VolumeKey>,
    pub state: LoadState,
    /// Slice each view opens on, set by the first load that lands in it.
    pub default_slices: HashMap<Orientation, usize>,
}

impl BusRecord {
    pub fn volume(&self, key: &VolumeKey) -> Option<&BusVolume> {
        self.volumes.get(key)
    }

    pub fn volume_mut(&mut self, key: &VolumeKey) -> Option<&mut BusVolume> {
        self.volumes.get_mut(key)
    }

    pub fn ordered_volumes(&self) -> impl Iterator<Item = (&VolumeKey, &BusVolume)> {
        self.volume_keys
            .iter()
            .filter_map(|key| self.volumes.get(key).map(|volume| (key, volume)))
    }

    /// Replace a volume's slices with a freshly sorted list. The layout,
    /// camera and windowing overrides already decided for it are kept.
    pub fn set_slices(
        &mut self,
        key: &VolumeKey,
        slices: Vec<SliceInput>,
        wl_differs: bool,
        order: Option<SliceOrderMap>,
    ) {
        if !self.volumes.contains_key(key) {
            self.volume_keys.push(key.clone());
        }
        let volume = self.volumes.entry(key.clone()).or_default();
        volume.wl_differs = wl_differs;
        volume.order = order;
        volume.sources = slices.iter().map(|slice| slice.source.clone()).collect();
        volume.slices = slices
            .into_iter()
            .map(|slice| SliceRecord {
                n: slice.instance_number,
                i: 0,
                width: slice.window.map(|window| window.width),
                level: slice.window.map(|window| window.level),
            })
            .collect();
        self.reindex();
    }

    /// Assign dense indices across volumes in volume order.
    fn reindex(&mut self) {
        let mut offset = 0u32;
        for key in &self.volume_keys {
            if let Some(volume) = self.volumes.get_mut(key) {
                for slice in volume.slices.iter_mut() {
                    slice.i = offset;
                    offset += 1;
                }
            }
        }
    }

    pub fn remove_volume(&mut self, key: &VolumeKey) -> bool {
        let removed = self.volumes.remove(key).is_some();
        self.volume_keys.retain(|existing| existing != key);
        if removed {
            self.reindex();
        }
        removed
    }

    pub fn slice_count(&self) -> usize {
        self.volumes.values().map(|volume| volume.slices.len()).sum()
    }

    /// Resolve the `s`, `n` or `i` of a request against the known volumes,
    /// searching them in volume order.
    pub fn resolve(&self, request: &LoadRequest) -> Option<SliceTarget> {
        if let Some(s) = request.slice_index() {
            self.find_slice(|volume| (s < volume.slices.len()).then_some(s))
        } else if let Some(n) = request.n {
            self.find_slice(|volume| volume.slices.iter().position(|slice| slice.n == n))
        } else if let Some(i) = request.i {
            self.find_slice(|volume| volume.slices.iter().position(|slice| slice.i == i))
        } else {
            None
        }
    }

    fn find_slice(&self, matches: impl Fn(&BusVolume) -> Option<usize>) -> Option<SliceTarget> {
        self.ordered_volumes().find_map(|(key, volume)| {
            matches(volume).map(|slice| SliceTarget {
                volume_key: key.clone(),
                slice,
                view: volume.view(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(numbers: &[i32]) -> Vec<SliceInput> {
        numbers
            .iter()
            .map(|&n| SliceInput {
                instance_number: n,
                window: None,
                source: format!("{n}.dcm"),
            })
            .collect()
    }

    #[test]
    fn dense_indices_span_volumes() {
        let mut record = BusRecord::default();
        record.set_slices(&VolumeKey::from("A#ns"), inputs(&[1, 2, 3]), false, None);
        record.set_slices(&VolumeKey::from("B#ns"), inputs(&[1, 2]), false, None);

        let b = record.volume(&VolumeKey::from("B#ns")).unwrap();
        let indices: Vec<_> = b.slices.iter().map(|slice| slice.i).collect();
        assert_eq!(indices, vec![3, 4]);
        assert_eq!(record.slice_count(), 5);
    }

    #[test]
    fn regrouping_replaces_instead_of_appending() {
        let mut record = BusRecord::default();
        let key = VolumeKey::from("A#ns");
        record.set_slices(&key, inputs(&[1, 2]), false, None);
        record.volume_mut(&key).unwrap().layout_name = Some("Axial Only".to_string());
        record.set_slices(&key, inputs(&[1, 2, 3]), true, None);

        let volume = record.volume(&key).unwrap();
        assert_eq!(volume.slices.len(), 3);
        assert_eq!(volume.layout_name.as_deref(), Some("Axial Only"));
        assert_eq!(record.volume_keys.len(), 1);
    }

    #[test]
    fn resolves_instance_number_and_dense_index() {
        let mut record = BusRecord::default();
        record.set_slices(&VolumeKey::from("A#ns"), inputs(&[1, 2]), false, None);
        record.set_slices(&VolumeKey::from("B#ns"), inputs(&[7, 8, 9]), false, None);

        let by_n = record
            .resolve(&LoadRequest {
                n: Some(8),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_n.volume_key, VolumeKey::from("B#ns"));
        assert_eq!(by_n.slice, 1);

        let by_i = record
            .resolve(&LoadRequest {
                i: Some(4),
                ..Default::default()
            })
            .unwrap();
        assert_eq!((by_i.volume_key.as_str(), by_i.slice), ("B#ns", 2));

        let by_s = record
            .resolve(&LoadRequest {
                s: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_s.volume_key, VolumeKey::from("B#ns"));

        assert!(record
            .resolve(&LoadRequest {
                n: Some(42),
                ..Default::default()
            })
            .is_none());
    }

    #[test]
    fn removing_a_volume_reindexes() {
        let mut record = BusRecord::default();
        record.set_slices(&VolumeKey::from("A#ns"), inputs(&[1]), false, None);
        record.set_slices(&VolumeKey::from("B#ns"), inputs(&[1, 2]), false, None);
        assert!(record.remove_volume(&VolumeKey::from("A#ns")));
        let b = record.volume(&VolumeKey::from("B#ns")).unwrap();
        assert_eq!(b.slices[0].i, 0);
    }
}
