use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of review categories remarks are grouped under.
///
/// Source spreadsheets carry Russian section labels; the clustering service
/// and storage use the snake_case key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewCategory {
    Reassessment,
    Seismogeological,
    Petrophysical,
    Geological,
    HydrodynamicIntegrated,
    Development,
    /// Sentinel for empty, NaN-like or unrecognized labels.
    #[serde(rename = "None")]
    None,
}

impl ReviewCategory {
    /// Taxonomy order, used for report chapters.
    pub const ALL: [ReviewCategory; 7] = [
        ReviewCategory::Reassessment,
        ReviewCategory::Seismogeological,
        ReviewCategory::Petrophysical,
        ReviewCategory::Geological,
        ReviewCategory::HydrodynamicIntegrated,
        ReviewCategory::Development,
        ReviewCategory::None,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            ReviewCategory::Reassessment => "reassessment",
            ReviewCategory::Seismogeological => "seismogeological",
            ReviewCategory::Petrophysical => "petrophysical",
            ReviewCategory::Geological => "geological",
            ReviewCategory::HydrodynamicIntegrated => "hydrodynamic_integrated",
            ReviewCategory::Development => "development",
            ReviewCategory::None => "None",
        }
    }

    /// Label as it appears in source spreadsheets and report headings.
    pub fn label(&self) -> &'static str {
        match self {
            ReviewCategory::Reassessment => "Программа доизучения (ГРР и ОПР)",
            ReviewCategory::Seismogeological => "Сейсмогеологическая модель",
            ReviewCategory::Petrophysical => "Петрофизическая модель",
            ReviewCategory::Geological => "Геологическая модель",
            ReviewCategory::HydrodynamicIntegrated => "Гидродинамическая и интегрированная модели",
            ReviewCategory::Development => {
                "Разработка и прогноз технологических показателей добычи"
            }
            ReviewCategory::None => "Без категории",
        }
    }

    /// Maps a spreadsheet label through the translation table.
    ///
    /// Empty cells, `None`, anything that parses as a NaN float and labels
    /// outside the table all collapse to [`ReviewCategory::None`].
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        if label.is_empty() || label == "None" {
            return ReviewCategory::None;
        }
        if label.parse::<f64>().is_ok_and(f64::is_nan) {
            return ReviewCategory::None;
        }
        Self::ALL
            .into_iter()
            .find(|c| *c != ReviewCategory::None && c.label() == label)
            .unwrap_or(ReviewCategory::None)
    }

    /// Inverse of [`key`](Self::key); unknown keys are `None`.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.key() == key)
    }
}

impl fmt::Display for ReviewCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_source_labels() {
        assert_eq!(
            ReviewCategory::from_label("Программа доизучения (ГРР и ОПР)"),
            ReviewCategory::Reassessment
        );
        assert_eq!(
            ReviewCategory::from_label("  Геологическая модель "),
            ReviewCategory::Geological
        );
        assert_eq!(
            ReviewCategory::from_label("Гидродинамическая и интегрированная модели"),
            ReviewCategory::HydrodynamicIntegrated
        );
    }

    #[test]
    fn sentinel_for_missing_or_unknown() {
        for label in ["", "None", "NaN", "nan", "Прочее", "42"] {
            assert_eq!(
                ReviewCategory::from_label(label),
                ReviewCategory::None,
                "label {label:?}"
            );
        }
        // The sentinel's own display label is not a source label.
        assert_eq!(
            ReviewCategory::from_label(ReviewCategory::None.label()),
            ReviewCategory::None
        );
    }

    #[test]
    fn keys_roundtrip() {
        for category in ReviewCategory::ALL {
            assert_eq!(ReviewCategory::from_key(category.key()), Some(category));
        }
        assert_eq!(ReviewCategory::from_key("drilling"), None);
    }

    #[test]
    fn serde_uses_keys() {
        assert_eq!(
            serde_json::to_string(&ReviewCategory::HydrodynamicIntegrated).unwrap(),
            r#""hydrodynamic_integrated""#
        );
        assert_eq!(
            serde_json::to_string(&ReviewCategory::None).unwrap(),
            r#""None""#
        );
    }
}
