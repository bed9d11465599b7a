use serde::Serialize;

use crate::enums::{LpsAxis, Orientation};
use crate::volume::LpsOrientation;

/// Camera placement for showing a volume in one of the canonical views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CameraHint {
    pub view: Orientation,
    pub direction: LpsAxis,
    pub up: LpsAxis,
}

impl CameraHint {
    pub fn canonical(view: Orientation) -> Self {
        let (direction, up) = match view {
            Orientation::Axial => (LpsAxis::Superior, LpsAxis::Anterior),
            Orientation::Coronal => (LpsAxis::Posterior, LpsAxis::Superior),
            Orientation::Sagittal => (LpsAxis::Right, LpsAxis::Superior),
        };
        Self {
            view,
            direction,
            up,
        }
    }

    /// Hint for the view the volume was acquired in. Oblique acquisitions,
    /// whose slice axis is further than `tolerance` from every LPS axis, get
    /// no hint.
    pub fn for_volume(orientation: &LpsOrientation, tolerance: f64) -> Option<Self> {
        (orientation.stacking_cosine() >= tolerance)
            .then(|| Self::canonical(orientation.primary()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::IDENTITY_DIRECTION;

    #[test]
    fn axial_volume_gets_axial_camera() {
        let orientation = LpsOrientation::from_direction(&IDENTITY_DIRECTION);
        let hint = CameraHint::for_volume(&orientation, 0.8).unwrap();
        assert_eq!(hint.view, Orientation::Axial);
        assert_eq!(hint.direction, LpsAxis::Superior);
        assert_eq!(hint.up, LpsAxis::Anterior);
    }

    #[test]
    fn sagittal_volume_gets_sagittal_camera() {
        let direction = [[0.0, 1.0, 0.0], [0.0, 0.0, -1.0], [1.0, 0.0, 0.0]];
        let orientation = LpsOrientation::from_direction(&direction);
        let hint = CameraHint::for_volume(&orientation, 0.8).unwrap();
        assert_eq!(hint.view, Orientation::Sagittal);
        assert_eq!(hint.direction, LpsAxis::Right);
    }

    #[test]
    fn oblique_volume_gets_no_camera() {
        let c = std::f64::consts::FRAC_1_SQRT_2;
        let direction = [[1.0, 0.0, 0.0], [0.0, c, -c], [0.0, c, c]];
        let orientation = LpsOrientation::from_direction(&direction);
        assert!(CameraHint::for_volume(&orientation, 0.8).is_none());
    }
}
