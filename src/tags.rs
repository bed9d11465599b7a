//! Named DICOM tag extraction.
//!
//! A [`TagDescriptor`] binds a [`TagName`] to its binary tag address. Reading a
//! set of descriptors from a [`DataUnit`] yields a [`TagMap`]; tags missing from
//! the data set resolve to an empty string rather than an error.

use std::{collections::BTreeMap, fmt, future::Future, io::Read, path::PathBuf, sync::Arc};

use dicom::{
    core::Tag,
    object::{DefaultDicomObject, InMemDicomObject, open_file},
};
use dicom_dictionary_std::tags;
use thiserror::Error;

/// Tags the library knows by name. Anything else lands in [`TagName::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagName {
    // Patient
    PatientName,
    PatientId,
    PatientBirthDate,
    PatientSex,
    PatientAge,
    PatientWeight,
    PatientAddress,
    // Study
    StudyInstanceUid,
    StudyId,
    StudyName,
    StudyDate,
    StudyTime,
    StudyDescription,
    AccessionNumber,
    InstitutionName,
    ReferringPhysicianName,
    ManufacturerModelName,
    // Series
    SeriesInstanceUid,
    SeriesNumber,
    SeriesDate,
    SeriesTime,
    SeriesDescription,
    Modality,
    BodyPartExamined,
    RepetitionTime,
    EchoTime,
    MagneticFieldStrength,
    // Instance
    SopInstanceUid,
    InstanceNumber,
    SliceThickness,
    SliceLocation,
    PixelSpacing,
    WindowLevel,
    WindowWidth,
    ImagePositionPatient,
    ImageOrientationPatient,
    Unknown(Tag),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagDescriptor {
    pub name: TagName,
    pub tag: Tag,
    /// Free text: collapse runs of whitespace and trim.
    pub strconv: bool,
}

impl TagDescriptor {
    pub const fn new(name: TagName, tag: Tag) -> Self {
        Self {
            name,
            tag,
            strconv: false,
        }
    }

    pub const fn text(name: TagName, tag: Tag) -> Self {
        Self {
            name,
            tag,
            strconv: true,
        }
    }

    pub const fn unknown(tag: Tag) -> Self {
        Self::new(TagName::Unknown(tag), tag)
    }
}

/// Per-slice tags read for every unit of a volume.
pub const INSTANCE_TAGS: &[TagDescriptor] = &[
    TagDescriptor::new(TagName::SopInstanceUid, tags::SOP_INSTANCE_UID),
    TagDescriptor::new(TagName::InstanceNumber, tags::INSTANCE_NUMBER),
    TagDescriptor::new(TagName::SliceThickness, tags::SLICE_THICKNESS),
    TagDescriptor::new(TagName::SliceLocation, tags::SLICE_LOCATION),
    TagDescriptor::new(TagName::WindowLevel, tags::WINDOW_CENTER),
    TagDescriptor::new(TagName::WindowWidth, tags::WINDOW_WIDTH),
];

/// Patient, study, series and instance tags.
pub const MAIN_TAGS: &[TagDescriptor] = &[
    TagDescriptor::text(TagName::PatientName, tags::PATIENT_NAME),
    TagDescriptor::text(TagName::PatientId, tags::PATIENT_ID),
    TagDescriptor::new(TagName::PatientBirthDate, tags::PATIENT_BIRTH_DATE),
    TagDescriptor::new(TagName::PatientSex, tags::PATIENT_SEX),
    TagDescriptor::new(TagName::PatientAge, tags::PATIENT_AGE),
    TagDescriptor::new(TagName::PatientWeight, tags::PATIENT_WEIGHT),
    TagDescriptor::new(TagName::PatientAddress, tags::PATIENT_ADDRESS),
    TagDescriptor::new(TagName::StudyInstanceUid, tags::STUDY_INSTANCE_UID),
    TagDescriptor::text(TagName::StudyId, tags::STUDY_ID),
    TagDescriptor::text(TagName::StudyName, tags::PATIENT_NAME),
    TagDescriptor::new(TagName::StudyDate, tags::STUDY_DATE),
    TagDescriptor::new(TagName::StudyTime, tags::STUDY_TIME),
    TagDescriptor::text(TagName::StudyDescription, tags::STUDY_DESCRIPTION),
    TagDescriptor::new(TagName::AccessionNumber, tags::ACCESSION_NUMBER),
    TagDescriptor::new(TagName::InstitutionName, tags::INSTITUTION_NAME),
    TagDescriptor::new(
        TagName::ReferringPhysicianName,
        tags::REFERRING_PHYSICIAN_NAME,
    ),
    TagDescriptor::new(
        TagName::ManufacturerModelName,
        tags::MANUFACTURER_MODEL_NAME,
    ),
    TagDescriptor::new(TagName::SeriesInstanceUid, tags::SERIES_INSTANCE_UID),
    TagDescriptor::new(TagName::SeriesNumber, tags::SERIES_NUMBER),
    TagDescriptor::new(TagName::SeriesDate, tags::SERIES_DATE),
    TagDescriptor::new(TagName::SeriesTime, tags::SERIES_TIME),
    TagDescriptor::text(TagName::SeriesDescription, tags::SERIES_DESCRIPTION),
    TagDescriptor::new(TagName::Modality, tags::MODALITY),
    TagDescriptor::new(TagName::BodyPartExamined, tags::BODY_PART_EXAMINED),
    TagDescriptor::new(TagName::RepetitionTime, tags::REPETITION_TIME),
    TagDescriptor::new(TagName::EchoTime, tags::ECHO_TIME),
    TagDescriptor::new(
        TagName::MagneticFieldStrength,
        tags::MAGNETIC_FIELD_STRENGTH,
    ),
    TagDescriptor::new(TagName::PixelSpacing, tags::PIXEL_SPACING),
    TagDescriptor::new(TagName::ImagePositionPatient, tags::IMAGE_POSITION_PATIENT),
    TagDescriptor::new(
        TagName::ImageOrientationPatient,
        tags::IMAGE_ORIENTATION_PATIENT,
    ),
    TagDescriptor::new(TagName::SopInstanceUid, tags::SOP_INSTANCE_UID),
    TagDescriptor::new(TagName::InstanceNumber, tags::INSTANCE_NUMBER),
    TagDescriptor::new(TagName::SliceThickness, tags::SLICE_THICKNESS),
    TagDescriptor::new(TagName::SliceLocation, tags::SLICE_LOCATION),
    TagDescriptor::new(TagName::WindowLevel, tags::WINDOW_CENTER),
    TagDescriptor::new(TagName::WindowWidth, tags::WINDOW_WIDTH),
];

/// Decoded tag values keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMap {
    values: BTreeMap<TagName, String>,
}

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a tag, or `""` if it was absent.
    pub fn get(&self, name: TagName) -> &str {
        self.values.get(&name).map(String::as_str).unwrap_or("")
    }

    /// Value of a tag, `None` if absent or empty.
    pub fn get_opt(&self, name: TagName) -> Option<&str> {
        self.values
            .get(&name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn insert(&mut self, name: TagName, value: impl Into<String>) {
        self.values.insert(name, value.into());
    }

    pub fn contains(&self, name: TagName) -> bool {
        self.get_opt(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TagName, &str)> {
        self.values.iter().map(|(name, value)| (*name, value.as_str()))
    }
}

impl FromIterator<(TagName, String)> for TagMap {
    fn from_iter<I: IntoIterator<Item = (TagName, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Identity of the source a unit came from: a file name, URL or path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone)]
pub enum UnitPayload {
    /// A fully read DICOM file.
    Object(Arc<DefaultDicomObject>),
    /// A data set without file meta, e.g. a streamed chunk.
    Dataset(Arc<InMemDicomObject>),
    /// Encoded Part 10 bytes, with or without the 128 byte preamble.
    Buffer(Arc<[u8]>),
    Path(PathBuf),
}

impl fmt::Debug for UnitPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitPayload::Object(_) => f.write_str("Object"),
            UnitPayload::Dataset(_) => f.write_str("Dataset"),
            UnitPayload::Buffer(bytes) => write!(f, "Buffer({} bytes)", bytes.len()),
            UnitPayload::Path(path) => write!(f, "Path({})", path.display()),
        }
    }
}

/// One input item: a file or a streamed chunk.
#[derive(Debug, Clone)]
pub struct DataUnit {
    source: SourceId,
    payload: UnitPayload,
}

#[derive(Debug, Error)]
pub enum TagError {
    #[error("{source_id}: not a readable DICOM object: {message}")]
    Unreadable { source_id: SourceId, message: String },

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

impl DataUnit {
    pub fn new(source: SourceId, payload: UnitPayload) -> Self {
        Self { source, payload }
    }

    pub fn from_object(source: impl Into<String>, object: DefaultDicomObject) -> Self {
        Self::new(SourceId::new(source), UnitPayload::Object(Arc::new(object)))
    }

    pub fn from_dataset(source: impl Into<String>, dataset: InMemDicomObject) -> Self {
        Self::new(SourceId::new(source), UnitPayload::Dataset(Arc::new(dataset)))
    }

    pub fn from_bytes(source: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::new(SourceId::new(source), UnitPayload::Buffer(bytes.into()))
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::new(
            SourceId::new(path.display().to_string()),
            UnitPayload::Path(path),
        )
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn payload(&self) -> &UnitPayload {
        &self.payload
    }

    /// Run `f` over the unit's data set, reading it if it is not in memory yet.
    pub fn with_dataset<R>(&self, f: impl FnOnce(&InMemDicomObject) -> R) -> Result<R, TagError> {
        match &self.payload {
            UnitPayload::Object(object) => Ok(f(&***object)),
            UnitPayload::Dataset(dataset) => Ok(f(&**dataset)),
            UnitPayload::Buffer(bytes) => {
                let object = self.read_buffer(bytes)?;
                Ok(f(&*object))
            }
            UnitPayload::Path(path) => {
                let object = open_file(path)?;
                Ok(f(&*object))
            }
        }
    }

    /// Open the unit as a DICOM file object. Bare data sets have no file meta.
    pub fn file_object(&self) -> Result<Option<Arc<DefaultDicomObject>>, TagError> {
        match &self.payload {
            UnitPayload::Object(object) => Ok(Some(object.clone())),
            UnitPayload::Dataset(_) => Ok(None),
            UnitPayload::Buffer(bytes) => Ok(Some(Arc::new(self.read_buffer(bytes)?))),
            UnitPayload::Path(path) => Ok(Some(Arc::new(open_file(path)?))),
        }
    }

    fn read_buffer(&self, bytes: &[u8]) -> Result<DefaultDicomObject, TagError> {
        let body = strip_preamble(bytes).ok_or_else(|| TagError::Unreadable {
            source_id: self.source.clone(),
            message: "missing DICM magic code".to_string(),
        })?;
        read_part10(body).map_err(TagError::from)
    }
}

fn read_part10(body: impl Read) -> Result<DefaultDicomObject, dicom::object::ReadError> {
    dicom::object::from_reader(body)
}

/// Returns the bytes starting at the `DICM` magic code.
fn strip_preamble(bytes: &[u8]) -> Option<&[u8]> {
    const MAGIC: &[u8; 4] = b"DICM";
    if bytes.len() >= 132 && &bytes[128..132] == MAGIC {
        Some(&bytes[128..])
    } else if bytes.starts_with(MAGIC) {
        Some(bytes)
    } else {
        None
    }
}

/// Read the requested tags from an in-memory data set.
pub fn read_tags(dataset: &InMemDicomObject, descriptors: &[TagDescriptor]) -> TagMap {
    descriptors
        .iter()
        .map(|descriptor| {
            let value = dataset
                .element(descriptor.tag)
                .ok()
                .and_then(|element| element.to_str().ok())
                .map(|value| clean_value(&value, descriptor.strconv))
                .unwrap_or_default();
            (descriptor.name, value)
        })
        .collect()
}

fn clean_value(raw: &str, strconv: bool) -> String {
    let value = raw.trim_matches(['\0', ' ']);
    if strconv {
        value.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        value.to_string()
    }
}

/// Boundary for tag decoding. Native parsers may need to suspend, so decoding
/// is async even when the data is already in memory.
pub trait TagDecoder {
    fn decode(
        &self,
        unit: &DataUnit,
        descriptors: &[TagDescriptor],
    ) -> impl Future<Output = Result<TagMap, TagError>>;
}

/// Decodes tags with dicom-rs, reading buffers and paths on demand.
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomTagDecoder;

impl DicomTagDecoder {
    pub fn read_now(
        &self,
        unit: &DataUnit,
        descriptors: &[TagDescriptor],
    ) -> Result<TagMap, TagError> {
        unit.with_dataset(|dataset| read_tags(dataset, descriptors))
    }
}

impl TagDecoder for DicomTagDecoder {
    fn decode(
        &self,
        unit: &DataUnit,
        descriptors: &[TagDescriptor],
    ) -> impl Future<Output = Result<TagMap, TagError>> {
        let result = self.read_now(unit, descriptors);
        async move { result }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use dicom::core::VR;

    #[test]
    fn missing_tags_resolve_to_empty() {
        let unit = slice_unit("a.dcm", "S1", "4");
        let map = DicomTagDecoder.read_now(&unit, MAIN_TAGS).unwrap();

        assert_eq!(map.get(TagName::SeriesInstanceUid), "S1");
        assert_eq!(map.get(TagName::InstanceNumber), "4");
        assert_eq!(map.get(TagName::WindowWidth), "");
        assert_eq!(map.get_opt(TagName::BodyPartExamined), None);
    }

    #[test]
    fn text_tags_are_normalized() {
        let unit = slice_unit_with(
            "a.dcm",
            "S1",
            "1",
            &[(tags::SERIES_DESCRIPTION, VR::LO, "  Head   without  contrast ")],
        );
        let map = DicomTagDecoder.read_now(&unit, MAIN_TAGS).unwrap();
        assert_eq!(map.get(TagName::SeriesDescription), "Head without contrast");
        // StudyName reads the patient name tag
        assert_eq!(map.get(TagName::StudyName), "Doe^John");
    }

    #[test]
    fn unknown_tags_use_the_fallback_bucket() {
        let unit = slice_unit_with("a.dcm", "S1", "1", &[(tags::BODY_PART_THICKNESS, VR::DS, "12")]);
        let descriptor = TagDescriptor::unknown(tags::BODY_PART_THICKNESS);
        let map = DicomTagDecoder.read_now(&unit, &[descriptor]).unwrap();
        assert_eq!(map.get(TagName::Unknown(tags::BODY_PART_THICKNESS)), "12");
    }

    #[tokio::test]
    async fn async_decode_matches_read_now() {
        let unit = slice_unit("a.dcm", "S1", "7");
        let decoded = DicomTagDecoder.decode(&unit, INSTANCE_TAGS).await.unwrap();
        assert_eq!(decoded, DicomTagDecoder.read_now(&unit, INSTANCE_TAGS).unwrap());
    }

    #[test]
    fn part10_buffers_and_paths_read_the_same_tags() {
        use dicom::object::FileMetaTableBuilder;
        use dicom_dictionary_std::uids;

        let UnitPayload::Dataset(dataset) = slice_unit("a.dcm", "S1", "5").payload().clone() else {
            unreachable!("test units are data sets");
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.dcm");
        (*dataset)
            .clone()
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                    .media_storage_sop_instance_uid("1.2.3"),
            )
            .unwrap()
            .write_to_file(&path)
            .unwrap();

        let from_path = DicomTagDecoder
            .read_now(&DataUnit::from_path(&path), INSTANCE_TAGS)
            .unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let from_bytes = DicomTagDecoder
            .read_now(&DataUnit::from_bytes("a.dcm", bytes), INSTANCE_TAGS)
            .unwrap();
        assert_eq!(from_path.get(TagName::InstanceNumber), "5");
        assert_eq!(from_path, from_bytes);
    }

    #[test]
    fn garbage_buffers_are_rejected() {
        let unit = DataUnit::from_bytes("junk.bin", vec![0u8; 16]);
        assert!(matches!(
            DicomTagDecoder.read_now(&unit, MAIN_TAGS),
            Err(TagError::Unreadable { .. })
        ));
    }
}
