use std::{collections::HashMap, fmt};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tags::{DataUnit, MAIN_TAGS, TagDecoder, TagMap, TagName};

/// Separates the series UID from the namespace suffix in a [`VolumeKey`].
pub const SUFFIX_SEPARATOR: char = '#';

/// Identity of one series within an optional load namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeKey(String);

impl VolumeKey {
    pub fn new(series_uid: &str, suffix: Option<&str>) -> Self {
        match suffix.filter(|suffix| !suffix.is_empty()) {
            Some(suffix) => Self(format!("{series_uid}{SUFFIX_SEPARATOR}{suffix}")),
            None => Self(series_uid.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace this key was loaded under, if any.
    pub fn suffix(&self) -> Option<&str> {
        self.0
            .rsplit_once(SUFFIX_SEPARATOR)
            .map(|(_, suffix)| suffix)
    }

    pub fn series_uid(&self) -> &str {
        self.0
            .rsplit_once(SUFFIX_SEPARATOR)
            .map_or(self.0.as_str(), |(uid, _)| uid)
    }
}

impl fmt::Display for VolumeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VolumeKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// A unit together with the tags decoded from it.
#[derive(Debug, Clone)]
pub struct TaggedUnit {
    pub unit: DataUnit,
    pub tags: TagMap,
}

/// The units belonging to one volume, not yet sorted.
#[derive(Debug, Clone)]
pub struct VolumeGroup {
    pub key: VolumeKey,
    pub units: Vec<TaggedUnit>,
}

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("No volumes categorized from DICOM file(s)")]
    NoVolumesFound,
}

/// Partition tagged units by series, in order of first appearance.
pub fn group_units(
    units: impl IntoIterator<Item = TaggedUnit>,
    suffix: Option<&str>,
) -> Result<Vec<VolumeGroup>, GroupError> {
    let mut groups: Vec<VolumeGroup> = Vec::new();
    let mut index: HashMap<VolumeKey, usize> = HashMap::new();

    for tagged in units {
        let Some(series_uid) = tagged.tags.get_opt(TagName::SeriesInstanceUid) else {
            log::warn!(
                "{}: no SeriesInstanceUID, skipping",
                tagged.unit.source()
            );
            continue;
        };
        let key = VolumeKey::new(series_uid, suffix);
        match index.get(&key) {
            Some(&position) => groups[position].units.push(tagged),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(VolumeGroup {
                    key,
                    units: vec![tagged],
                });
            }
        }
    }

    if groups.is_empty() {
        return Err(GroupError::NoVolumesFound);
    }
    Ok(groups)
}

/// Decode the main tags of every unit and group them. Units that cannot be
/// decoded are dropped with a warning.
pub async fn categorize<D: TagDecoder>(
    decoder: &D,
    units: Vec<DataUnit>,
    suffix: Option<&str>,
) -> Result<Vec<VolumeGroup>, GroupError> {
    let decoded = join_all(units.iter().map(|unit| decoder.decode(unit, MAIN_TAGS))).await;

    let tagged = units
        .into_iter()
        .zip(decoded)
        .filter_map(|(unit, tags)| match tags {
            Ok(tags) => Some(TaggedUnit { unit, tags }),
            Err(err) => {
                log::warn!("{}: {err}", unit.source());
                None
            }
        });

    group_units(tagged, suffix)
}
