//! Display windowing (VOI LUT width/level) analysis.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub width: f64,
    pub level: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowingError {
    #[error("Invalid WindowWidth or WindowLevel DICOM tags")]
    NonNumeric,

    #[error("Different numbers of WindowWidth ({widths}) and WindowLevel ({levels}) DICOM tags")]
    CountMismatch { widths: usize, levels: usize },
}

fn parse_values(raw: &str) -> Result<Vec<f64>, WindowingError> {
    raw.split('\\')
        .map(|value| {
            value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or(WindowingError::NonNumeric)
        })
        .collect()
}

/// Parse backslash separated WindowWidth / WindowCenter values into pairs.
/// An empty width means the tags are absent.
pub fn try_parse_windows(width: &str, level: &str) -> Result<Vec<Window>, WindowingError> {
    if width.trim().is_empty() {
        return Ok(Vec::new());
    }
    let widths = parse_values(width)?;
    let levels = parse_values(level)?;
    if widths.len() != levels.len() {
        return Err(WindowingError::CountMismatch {
            widths: widths.len(),
            levels: levels.len(),
        });
    }
    Ok(widths
        .into_iter()
        .zip(levels)
        .map(|(width, level)| Window { width, level })
        .collect())
}

/// Like [`try_parse_windows`], but malformed tags are logged and yield nothing.
pub fn parse_windows(width: &str, level: &str) -> Vec<Window> {
    try_parse_windows(width, level).unwrap_or_else(|err| {
        log::error!("{err} (width {width:?}, level {level:?})");
        Vec::new()
    })
}

/// First VOI LUT entry of a slice.
pub fn first_window(width: &str, level: &str) -> Option<Window> {
    parse_windows(width, level).into_iter().next()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct WindowingSummary {
    pub windows: Vec<Option<Window>>,
    pub differs: bool,
}

/// Parse each slice's first window and flag volumes whose slices disagree.
pub fn analyze<'a>(slices: impl IntoIterator<Item = (&'a str, &'a str)>) -> WindowingSummary {
    let windows: Vec<Option<Window>> = slices
        .into_iter()
        .map(|(width, level)| first_window(width, level))
        .collect();

    let differs = windows
        .split_first()
        .is_some_and(|(first, rest)| rest.iter().any(|window| window != first));

    WindowingSummary { windows, differs }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_valued_tags() {
        let windows = try_parse_windows("400\\1500", "40\\300").unwrap();
        assert_eq!(
            windows,
            vec![
                Window { width: 400.0, level: 40.0 },
                Window { width: 1500.0, level: 300.0 },
            ]
        );
    }

    #[test]
    fn missing_width_is_not_an_error() {
        assert_eq!(try_parse_windows("", ""), Ok(vec![]));
    }

    #[test]
    fn malformed_tags_yield_nothing() {
        assert_eq!(try_parse_windows("abc", "40"), Err(WindowingError::NonNumeric));
        assert_eq!(
            try_parse_windows("400\\500", "40"),
            Err(WindowingError::CountMismatch { widths: 2, levels: 1 })
        );
        assert_eq!(parse_windows("400\\500", "40"), vec![]);
        assert_eq!(first_window("abc", "40"), None);
    }

    #[test]
    fn differing_levels_are_flagged() {
        let summary = analyze([("400", "40"), ("400", "60")]);
        assert!(summary.differs);

        let summary = analyze([("400", "40"), ("400", "40")]);
        assert!(!summary.differs);
        assert_eq!(summary.windows[0], Some(Window { width: 400.0, level: 40.0 }));
    }

    #[test]
    fn analysis_is_idempotent() {
        let slices = [("400\\80", "40\\20"), ("350", "40"), ("", "")];
        let first = analyze(slices);
        let second = analyze(slices);
        assert_eq!(first, second);
        assert!(first.differs);
    }

    #[test]
    fn empty_volume_does_not_differ() {
        assert!(!analyze(std::iter::empty()).differs);
        assert!(!analyze([("", ""), ("", "")]).differs);
    }
}
