use serde::{Deserialize, Serialize};

/// The three canonical anatomical views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

impl Orientation {
    pub const ALL: [Orientation; 3] = [
        Orientation::Axial,
        Orientation::Coronal,
        Orientation::Sagittal,
    ];

    /// Viewport id used by the host for this view.
    pub fn view_id(self) -> &'static str {
        match self {
            Orientation::Axial => "Axial",
            Orientation::Coronal => "Coronal",
            Orientation::Sagittal => "Sagittal",
        }
    }

    pub fn from_view_id(view_id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|orientation| orientation.view_id() == view_id)
    }

    /// Single-view layout showing only this orientation, e.g. `"Axial Only"`.
    pub fn layout_name(self) -> String {
        format!("{} Only", self.view_id())
    }

    pub fn from_layout_name(layout_name: &str) -> Option<Self> {
        layout_name
            .strip_suffix(" Only")
            .and_then(Self::from_view_id)
    }

    /// Index of the LPS axis this view looks along (0 = L, 1 = P, 2 = S).
    pub fn lps_axis(self) -> usize {
        match self {
            Orientation::Sagittal => 0,
            Orientation::Coronal => 1,
            Orientation::Axial => 2,
        }
    }

    pub fn from_lps_axis(axis: usize) -> Option<Self> {
        match axis {
            0 => Some(Orientation::Sagittal),
            1 => Some(Orientation::Coronal),
            2 => Some(Orientation::Axial),
            _ => None,
        }
    }
}

/// Signed anatomical directions in the LPS patient coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LpsAxis {
    Left,
    Right,
    Posterior,
    Anterior,
    Superior,
    Inferior,
}

impl LpsAxis {
    pub fn vector(self) -> [f64; 3] {
        match self {
            LpsAxis::Left => [1.0, 0.0, 0.0],
            LpsAxis::Right => [-1.0, 0.0, 0.0],
            LpsAxis::Posterior => [0.0, 1.0, 0.0],
            LpsAxis::Anterior => [0.0, -1.0, 0.0],
            LpsAxis::Superior => [0.0, 0.0, 1.0],
            LpsAxis::Inferior => [0.0, 0.0, -1.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_names_round_trip() {
        for orientation in Orientation::ALL {
            let layout = orientation.layout_name();
            assert_eq!(Orientation::from_layout_name(&layout), Some(orientation));
        }
        assert_eq!(Orientation::Axial.layout_name(), "Axial Only");
        assert_eq!(Orientation::from_layout_name("Quad View"), None);
    }

    #[test]
    fn lps_axis_matches_view() {
        for orientation in Orientation::ALL {
            assert_eq!(
                Orientation::from_lps_axis(orientation.lps_axis()),
                Some(orientation)
            );
        }
    }
}
