//! Patient → Study → Volume index.
//!
//! Parent pointers (`volume_study`, `study_patient`) give O(1) upward lookup,
//! child lists give top-down traversal. Records are first-writer-wins: an
//! existing key is never overwritten, only a volume's slice count and
//! windowing flag may change after insertion.

use std::collections::HashMap;

use serde::Serialize;

use crate::grouper::VolumeKey;
use crate::tags::{TagMap, TagName};

pub const ANONYMOUS_PATIENT: &str = "Anonymous";
pub const ANONYMOUS_PATIENT_ID: &str = "ANONYMOUS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PatientInfo {
    pub patient_name: String,
    #[serde(rename = "PatientID")]
    pub patient_id: String,
    pub patient_birth_date: String,
    pub patient_sex: String,
    pub patient_age: String,
    pub patient_weight: String,
    pub patient_address: String,
}

impl PatientInfo {
    pub fn from_tags(tags: &TagMap) -> Self {
        Self {
            patient_name: tags
                .get_opt(TagName::PatientName)
                .unwrap_or(ANONYMOUS_PATIENT)
                .to_string(),
            patient_id: tags
                .get_opt(TagName::PatientId)
                .unwrap_or(ANONYMOUS_PATIENT_ID)
                .to_string(),
            patient_birth_date: tags.get(TagName::PatientBirthDate).to_string(),
            patient_sex: tags.get(TagName::PatientSex).to_string(),
            patient_age: tags.get(TagName::PatientAge).to_string(),
            patient_weight: tags.get(TagName::PatientWeight).to_string(),
            patient_address: tags.get(TagName::PatientAddress).to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.patient_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StudyInfo {
    #[serde(rename = "StudyInstanceUID")]
    pub study_instance_uid: String,
    #[serde(rename = "StudyID")]
    pub study_id: String,
    pub study_name: String,
    pub study_date: String,
    pub study_time: String,
    pub study_description: String,
    pub accession_number: String,
    pub institution_name: Option<String>,
    pub referring_physician_name: Option<String>,
    pub manufacturer_model_name: Option<String>,
}

impl StudyInfo {
    pub fn from_tags(tags: &TagMap) -> Self {
        let optional = |name| tags.get_opt(name).map(str::to_string);
        Self {
            study_instance_uid: tags.get(TagName::StudyInstanceUid).to_string(),
            study_id: tags.get(TagName::StudyId).to_string(),
            study_name: tags.get(TagName::StudyName).to_string(),
            study_date: tags.get(TagName::StudyDate).to_string(),
            study_time: tags.get(TagName::StudyTime).to_string(),
            study_description: tags.get(TagName::StudyDescription).to_string(),
            accession_number: tags.get(TagName::AccessionNumber).to_string(),
            institution_name: optional(TagName::InstitutionName),
            referring_physician_name: optional(TagName::ReferringPhysicianName),
            manufacturer_model_name: optional(TagName::ManufacturerModelName),
        }
    }

    pub fn key(&self) -> &str {
        &self.study_instance_uid
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeInfo {
    #[serde(rename = "SeriesInstanceUID")]
    pub series_instance_uid: String,
    pub series_number: String,
    pub series_date: String,
    pub series_time: String,
    pub series_description: String,
    pub modality: String,
    pub body_part_examined: String,
    pub repetition_time: Option<String>,
    pub echo_time: Option<String>,
    pub magnetic_field_strength: Option<String>,
    pub slice_thickness: Option<String>,
    pub slice_location: Option<String>,
    pub pixel_spacing: Option<String>,
    pub window_level: String,
    pub window_width: String,

    pub number_of_slices: usize,
    #[serde(rename = "VolumeID")]
    pub volume_key: VolumeKey,
    pub windowing_differs: bool,
}

impl VolumeInfo {
    pub fn from_tags(tags: &TagMap, volume_key: VolumeKey, number_of_slices: usize) -> Self {
        let optional = |name| tags.get_opt(name).map(str::to_string);
        Self {
            series_instance_uid: tags.get(TagName::SeriesInstanceUid).to_string(),
            series_number: tags.get(TagName::SeriesNumber).to_string(),
            series_date: tags.get(TagName::SeriesDate).to_string(),
            series_time: tags.get(TagName::SeriesTime).to_string(),
            series_description: tags.get(TagName::SeriesDescription).to_string(),
            modality: tags.get(TagName::Modality).to_string(),
            body_part_examined: tags.get(TagName::BodyPartExamined).to_string(),
            repetition_time: optional(TagName::RepetitionTime),
            echo_time: optional(TagName::EchoTime),
            magnetic_field_strength: optional(TagName::MagneticFieldStrength),
            slice_thickness: optional(TagName::SliceThickness),
            slice_location: optional(TagName::SliceLocation),
            pixel_spacing: optional(TagName::PixelSpacing),
            window_level: tags.get(TagName::WindowLevel).to_string(),
            window_width: tags.get(TagName::WindowWidth).to_string(),
            number_of_slices,
            volume_key,
            windowing_differs: false,
        }
    }

    /// Series description, else series number, else the series UID.
    pub fn display_name(&self) -> String {
        let cleaned = |name: &str| name.split_whitespace().collect::<Vec<_>>().join(" ");
        let description = if self.series_description.is_empty() {
            cleaned(&self.series_number)
        } else {
            cleaned(&self.series_description)
        };
        if description.is_empty() {
            self.series_instance_uid.clone()
        } else {
            description
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Catalog {
    patient_info: HashMap<String, PatientInfo>,
    patient_studies: HashMap<String, Vec<String>>,

    study_info: HashMap<String, StudyInfo>,
    study_volumes: HashMap<String, Vec<VolumeKey>>,

    volume_info: HashMap<VolumeKey, VolumeInfo>,

    volume_study: HashMap<VolumeKey, String>,
    study_patient: HashMap<String, String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert whatever levels are new. Returns `true` if the volume was new.
    /// A known volume leaves the catalog untouched, whatever patient or study
    /// the caller passes along.
    pub fn upsert(&mut self, patient: PatientInfo, study: StudyInfo, volume: VolumeInfo) -> bool {
        let volume_key = volume.volume_key.clone();
        if self.volume_info.contains_key(&volume_key) {
            return false;
        }
        let patient_key = patient.key().to_string();
        let study_key = study.key().to_string();

        if !self.patient_info.contains_key(&patient_key) {
            self.patient_info.insert(patient_key.clone(), patient);
            self.patient_studies.insert(patient_key.clone(), Vec::new());
        }

        if !self.study_info.contains_key(&study_key) {
            self.study_info.insert(study_key.clone(), study);
            self.study_volumes.insert(study_key.clone(), Vec::new());
            self.study_patient
                .insert(study_key.clone(), patient_key.clone());
            self.patient_studies
                .entry(patient_key)
                .or_default()
                .push(study_key.clone());
        }

        self.volume_info.insert(volume_key.clone(), volume);
        self.volume_study
            .insert(volume_key.clone(), study_key.clone());
        self.study_volumes
            .entry(study_key)
            .or_default()
            .push(volume_key);
        true
    }

    pub fn update_slice_count(&mut self, key: &VolumeKey, number_of_slices: usize) {
        if let Some(info) = self.volume_info.get_mut(key) {
            info.number_of_slices = number_of_slices;
        }
    }

    pub fn update_windowing(&mut self, key: &VolumeKey, differs: bool) {
        if let Some(info) = self.volume_info.get_mut(key) {
            info.windowing_differs = differs;
        }
    }

    /// Remove a volume, then its study if now empty, then its patient if now
    /// empty. Returns `false` if the volume was unknown.
    pub fn delete_volume(&mut self, key: &VolumeKey) -> bool {
        if self.volume_info.remove(key).is_none() {
            return false;
        }
        let Some(study_key) = self.volume_study.remove(key) else {
            return true;
        };
        let now_empty = self.study_volumes.get_mut(&study_key).is_none_or(|volumes| {
            volumes.retain(|volume| volume != key);
            volumes.is_empty()
        });
        if now_empty {
            self.delete_study(&study_key);
        }
        true
    }

    fn delete_study(&mut self, study_key: &str) {
        if self.study_info.remove(study_key).is_none() {
            return;
        }
        let patient_key = self.study_patient.remove(study_key);
        for volume in self.study_volumes.remove(study_key).unwrap_or_default() {
            self.volume_info.remove(&volume);
            self.volume_study.remove(&volume);
        }

        let Some(patient_key) = patient_key else {
            return;
        };
        let now_empty = self
            .patient_studies
            .get_mut(&patient_key)
            .is_none_or(|studies| {
                studies.retain(|study| study != study_key);
                studies.is_empty()
            });
        if now_empty {
            self.patient_info.remove(&patient_key);
            self.patient_studies.remove(&patient_key);
        }
    }

    pub fn patient(&self, key: &str) -> Option<&PatientInfo> {
        self.patient_info.get(key)
    }

    pub fn study(&self, key: &str) -> Option<&StudyInfo> {
        self.study_info.get(key)
    }

    pub fn volume(&self, key: &VolumeKey) -> Option<&VolumeInfo> {
        self.volume_info.get(key)
    }

    pub fn contains_volume(&self, key: &VolumeKey) -> bool {
        self.volume_info.contains_key(key)
    }

    pub fn study_of(&self, volume: &VolumeKey) -> Option<&str> {
        self.volume_study.get(volume).map(String::as_str)
    }

    pub fn patient_of(&self, study: &str) -> Option<&str> {
        self.study_patient.get(study).map(String::as_str)
    }

    pub fn studies_of(&self, patient: &str) -> &[String] {
        self.patient_studies
            .get(patient)
            .map_or(&[], Vec::as_slice)
    }

    pub fn volumes_of(&self, study: &str) -> &[VolumeKey] {
        self.study_volumes.get(study).map_or(&[], Vec::as_slice)
    }

    pub fn volume_keys(&self) -> impl Iterator<Item = &VolumeKey> {
        self.volume_info.keys()
    }

    pub fn patient_count(&self) -> usize {
        self.patient_info.len()
    }

    pub fn study_count(&self) -> usize {
        self.study_info.len()
    }

    pub fn volume_count(&self) -> usize {
        self.volume_info.len()
    }
}
