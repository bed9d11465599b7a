use crate::{tags::{DataUnit, TagError, UnitPayload}, volume::Volume};

use dicom::{
    object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::{tags, uids};
use ndarray::{Array2, Array3, s};
use std::{
    fs,
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Slice {index} could not be decoded: {message}")]
    Decode { index: usize, message: String },

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("Could not attach file meta: {0}")]
    FileMeta(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Unit(#[from] TagError),
}

/// Boundary for turning sorted units into pixel data with geometry.
pub trait ImageBuilder {
    fn build_image(
        &self,
        units: &[DataUnit],
    ) -> impl Future<Output = Result<Volume, VolumeLoaderError>>;
}

/// Builds volumes with dicom-rs pixel decoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeLoader;

impl ImageBuilder for VolumeLoader {
    fn build_image(
        &self,
        units: &[DataUnit],
    ) -> impl Future<Output = Result<Volume, VolumeLoaderError>> {
        let result = Self::load_from_units(units);
        async move { result }
    }
}

type DicomFile = FileDicomObject<InMemDicomObject>;

impl VolumeLoader {
    /// Load a volume from units already in slice order
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found or dimensions are inconsistent
    pub fn load_from_units(units: &[DataUnit]) -> Result<Volume, VolumeLoaderError> {
        let objects = units
            .iter()
            .map(Self::open_unit)
            .collect::<Result<Vec<_>, _>>()?;
        Self::load_from_dicom_objects(&objects)
    }

    /// Load a volume from DICOM objects in slice order
    pub fn load_from_dicom_objects(
        dicom_objects: &[Arc<DicomFile>],
    ) -> Result<Volume, VolumeLoaderError> {
        // Every slice must decode, or volume depth would drift from the slice list.
        let images = dicom_objects
            .iter()
            .enumerate()
            .map(|(index, dicom_object)| Self::decode_image(index, dicom_object))
            .collect::<Result<Vec<_>, _>>()?;

        if images.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::validate_dimensions(&images)?;

        let volume_array = Self::build_volume_array(&images);
        let spacing = Self::get_spacing(dicom_objects).ok_or(VolumeLoaderError::MissingSpacing)?;
        let (origin, direction) = Self::get_geometry(dicom_objects);

        Ok(Volume::new(volume_array, spacing).with_geometry(origin, direction))
    }

    fn open_unit(unit: &DataUnit) -> Result<Arc<DicomFile>, VolumeLoaderError> {
        if let UnitPayload::Dataset(dataset) = unit.payload() {
            let object = (**dataset)
                .clone()
                .with_meta(
                    FileMetaTableBuilder::new().transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN),
                )
                .map_err(|err| VolumeLoaderError::FileMeta(err.to_string()))?;
            return Ok(Arc::new(object));
        }
        unit.file_object()?
            .ok_or(VolumeLoaderError::NoValidImages)
    }

    fn decode_image(index: usize, dicom_object: &DicomFile) -> Result<Array2<u16>, VolumeLoaderError> {
        let failed = |message: String| VolumeLoaderError::Decode { index, message };
        let pixel_data = dicom_object
            .decode_pixel_data()
            .map_err(|err| failed(err.to_string()))?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::First);
        pixel_data
            .to_ndarray_with_options::<u16>(&options)
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
            .map_err(|err| failed(err.to_string()))
    }

    fn validate_dimensions(images: &[Array2<u16>]) -> Result<(), VolumeLoaderError> {
        let first_dim = images[0].dim();
        if images.iter().any(|img| img.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(images: &[Array2<u16>]) -> Array3<u16> {
        let (height, width) = images[0].dim();
        let depth = images.len();
        let mut volume = Array3::<u16>::zeros((depth, height, width));

        for (i, image) in images.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(image);
        }

        volume
    }

    fn get_spacing(dicom_objects: &[Arc<DicomFile>]) -> Option<(f32, f32, f32)> {
        let pixel_spacing = dicom_objects.iter().find_map(|dicom_object| {
            dicom_object
                .element(tags::PIXEL_SPACING)
                .ok()?
                .to_multi_float32()
                .ok()
        })?;

        let slice_thickness = dicom_objects
            .iter()
            .find_map(|dicom_object| {
                dicom_object
                    .element(tags::SLICE_THICKNESS)
                    .ok()?
                    .to_float32()
                    .ok()
            })
            .unwrap_or(1.0);

        // PixelSpacing is row spacing then column spacing
        Some((*pixel_spacing.get(1)?, *pixel_spacing.first()?, slice_thickness))
    }

    fn position(dicom_object: &DicomFile) -> Option<[f64; 3]> {
        let pos = dicom_object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()?
            .to_multi_float64()
            .ok()?;
        Some([*pos.first()?, *pos.get(1)?, *pos.get(2)?])
    }

    /// Origin and direction cosines. The slice axis follows the first to last
    /// slice positions when available, the row/column cross product otherwise.
    fn get_geometry(dicom_objects: &[Arc<DicomFile>]) -> ([f64; 3], [[f64; 3]; 3]) {
        let first = dicom_objects.first().map(|object| object.as_ref());
        let origin = first.and_then(Self::position).unwrap_or([0.0; 3]);

        let Some(cosines) = first.and_then(|dicom_object| {
            dicom_object
                .element(tags::IMAGE_ORIENTATION_PATIENT)
                .ok()?
                .to_multi_float64()
                .ok()
                .filter(|values| values.len() == 6)
        }) else {
            return (origin, crate::volume::IDENTITY_DIRECTION);
        };

        let row = [cosines[0], cosines[1], cosines[2]];
        let column = [cosines[3], cosines[4], cosines[5]];
        let mut normal = cross(row, column);

        let last = dicom_objects
            .last()
            .and_then(|object| Self::position(object));
        if let (Some(last), true) = (last, dicom_objects.len() > 1) {
            let step = [last[0] - origin[0], last[1] - origin[1], last[2] - origin[2]];
            if dot(step, normal) < 0.0 {
                normal = normal.map(|v| -v);
            }
        }

        (origin, [row, column, normal])
    }
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Paths of all `.dcm` files in a directory, sorted by name.
pub fn collect_dicom_paths(path: impl AsRef<Path>) -> Result<Vec<PathBuf>, VolumeLoaderError> {
    let mut paths: Vec<_> = fs::read_dir(path.as_ref())?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
        })
        .collect();

    if paths.is_empty() {
        return Err(VolumeLoaderError::NoValidImages);
    }
    paths.sort();
    Ok(paths)
}
