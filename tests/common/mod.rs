#![allow(dead_code)]

use std::{cell::Cell, path::Path, rc::Rc};

use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use dicom_dictionary_std::{tags, uids};
use dicom_volume_sync::{
    SyncConfig, Volume,
    store::DicomStore,
    tags::{DataUnit, DicomTagDecoder},
    volume_loader::{ImageBuilder, VolumeLoaderError},
};
use ndarray::Array3;

pub struct Slice<'a> {
    pub patient: &'a str,
    pub study: &'a str,
    pub series: &'a str,
    pub modality: &'a str,
    pub instance: &'a str,
    pub window: Option<(&'a str, &'a str)>,
}

impl Default for Slice<'_> {
    fn default() -> Self {
        Self {
            patient: "P1",
            study: "ST1",
            series: "S1",
            modality: "CT",
            instance: "1",
            window: None,
        }
    }
}

impl Slice<'_> {
    pub fn dataset(&self) -> InMemDicomObject {
        let sop = format!("{}.{}", self.series, self.instance);
        let mut elements = vec![
            DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(uids::CT_IMAGE_STORAGE)),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop)),
            DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from(self.patient)),
            DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("Doe^Jane")),
            DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(self.study)),
            DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(self.series)),
            DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from(self.modality)),
            DataElement::new(tags::INSTANCE_NUMBER, VR::IS, PrimitiveValue::from(self.instance)),
        ];
        if let Some((width, level)) = self.window {
            elements.push(DataElement::new(tags::WINDOW_WIDTH, VR::DS, PrimitiveValue::from(width)));
            elements.push(DataElement::new(tags::WINDOW_CENTER, VR::DS, PrimitiveValue::from(level)));
        }
        InMemDicomObject::from_element_iter(elements)
    }

    pub fn unit(&self, source: &str) -> DataUnit {
        DataUnit::from_dataset(source, self.dataset())
    }

    /// Write the slice as a Part 10 file.
    pub fn write(&self, path: &Path) {
        let sop = format!("{}.{}", self.series, self.instance);
        self.dataset()
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                    .media_storage_sop_instance_uid(sop),
            )
            .unwrap()
            .write_to_file(path)
            .unwrap();
    }
}

/// One constant slice per unit, axial, counting its builds.
#[derive(Default)]
pub struct FakeBuilder {
    pub calls: Rc<Cell<usize>>,
}

impl ImageBuilder for FakeBuilder {
    async fn build_image(&self, units: &[DataUnit]) -> Result<Volume, VolumeLoaderError> {
        self.calls.set(self.calls.get() + 1);
        if units.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        let data = Array3::from_shape_fn((units.len(), 4, 4), |(k, _, _)| k as u16);
        Ok(Volume::new(data, (1.0, 1.0, 2.5)))
    }
}

pub fn store_with(config: SyncConfig) -> DicomStore<DicomTagDecoder, FakeBuilder> {
    DicomStore::new(DicomTagDecoder, FakeBuilder::default(), config)
}

pub fn store() -> DicomStore<DicomTagDecoder, FakeBuilder> {
    store_with(SyncConfig::default())
}
