// src/parse/category.rs
use serde::{Deserialize, Serialize};

/// Fixed category vocabulary. Declaration order is display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "New Features")]
    NewFeatures,
    #[serde(rename = "Improvements")]
    Improvements,
    #[serde(rename = "IDE & Editor")]
    IdeEditor,
    #[serde(rename = "Performance")]
    Performance,
    #[serde(rename = "Bug Fixes")]
    BugFixes,
    #[serde(rename = "Changes")]
    Changes,
    #[serde(rename = "Documentation")]
    Documentation,
    #[serde(rename = "Other Changes")]
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::NewFeatures,
        Category::Improvements,
        Category::IdeEditor,
        Category::Performance,
        Category::BugFixes,
        Category::Changes,
        Category::Documentation,
        Category::Other,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::NewFeatures => "New Features",
            Category::Improvements => "Improvements",
            Category::IdeEditor => "IDE & Editor",
            Category::Performance => "Performance",
            Category::BugFixes => "Bug Fixes",
            Category::Changes => "Changes",
            Category::Documentation => "Documentation",
            Category::Other => "Other Changes",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Category::NewFeatures => "✨",
            Category::Improvements => "📈",
            Category::IdeEditor => "🖥️",
            Category::Performance => "⚡",
            Category::BugFixes => "🐛",
            Category::Changes => "🔄",
            Category::Documentation => "📚",
            Category::Other => "📝",
        }
    }

    /// Case-insensitive lookup by display name.
    pub fn from_name(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
    }

    /// Unknown names land in the catch-all instead of being dropped.
    pub fn from_name_or_other(s: &str) -> Self {
        Self::from_name(s).unwrap_or(Category::Other)
    }

    pub fn vocabulary() -> Vec<&'static str> {
        Self::ALL.iter().map(|c| c.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_display_order() {
        let mut v = vec![Category::Other, Category::BugFixes, Category::NewFeatures];
        v.sort();
        assert_eq!(
            v,
            vec![Category::NewFeatures, Category::BugFixes, Category::Other]
        );
    }

    #[test]
    fn lookup_is_case_insensitive_with_fallback() {
        assert_eq!(Category::from_name("bug fixes"), Some(Category::BugFixes));
        assert_eq!(Category::from_name_or_other("Security"), Category::Other);
    }
}
