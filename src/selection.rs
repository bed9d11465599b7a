//! Picks the volume to show first among freshly loaded ones, and the volumes
//! that accompany it.

use std::cmp::Reverse;

use crate::catalog::Catalog;
use crate::grouper::VolumeKey;

/// Preference of a modality as the primary volume. Other modalities are
/// never chosen.
pub fn modality_priority(modality: &str) -> Option<u8> {
    match modality.trim() {
        "CT" | "MR" => Some(3),
        "US" => Some(2),
        "DX" => Some(1),
        _ => None,
    }
}

/// Highest modality priority first, then the volume with more slices. Ties
/// keep load order.
pub fn find_base_volume<'a>(
    catalog: &Catalog,
    keys: impl IntoIterator<Item = &'a VolumeKey>,
) -> Option<VolumeKey> {
    keys.into_iter()
        .filter_map(|key| {
            let info = catalog.volume(key)?;
            let priority = modality_priority(&info.modality)?;
            Some((key, priority, info.number_of_slices))
        })
        .enumerate()
        .min_by_key(|(position, (_, priority, slices))| {
            (Reverse(*priority), Reverse(*slices), *position)
        })
        .map(|(_, (key, _, _))| key.clone())
}

/// Other loaded volumes from the primary volume's study.
fn others_in_study<'a>(
    catalog: &'a Catalog,
    primary: &'a VolumeKey,
    keys: impl IntoIterator<Item = &'a VolumeKey> + 'a,
) -> impl Iterator<Item = &'a VolumeKey> + 'a {
    let study = catalog.study_of(primary);
    keys.into_iter()
        .filter(move |key| *key != primary && study.is_some() && catalog.study_of(key) == study)
}

fn modality_of<'a>(catalog: &'a Catalog, key: &VolumeKey) -> Option<&'a str> {
    catalog.volume(key).map(|info| info.modality.trim())
}

/// A PET volume to layer over a CT primary. Only the first one, since
/// scanners often emit several corrected PET series.
pub fn find_layer_candidate<'a>(
    catalog: &'a Catalog,
    primary: &'a VolumeKey,
    keys: impl IntoIterator<Item = &'a VolumeKey> + 'a,
) -> Option<VolumeKey> {
    if modality_of(catalog, primary) != Some("CT") {
        return None;
    }
    others_in_study(catalog, primary, keys)
        .find(|key| modality_of(catalog, key) == Some("PT"))
        .cloned()
}

/// Segmentation volumes from the primary volume's study.
pub fn find_segmentations<'a>(
    catalog: &'a Catalog,
    primary: &'a VolumeKey,
    keys: impl IntoIterator<Item = &'a VolumeKey> + 'a,
) -> Vec<VolumeKey> {
    others_in_study(catalog, primary, keys)
        .filter(|key| modality_of(catalog, key) == Some("SEG"))
        .cloned()
        .collect()
}
