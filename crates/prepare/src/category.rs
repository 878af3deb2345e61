use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of answer an example or window carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Null,
    Short,
    Long,
    Yes,
    No,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Null,
        Category::Short,
        Category::Long,
        Category::Yes,
        Category::No,
    ];

    /// Code persisted in the `category` field of a dataset record.
    pub fn code(self) -> u8 {
        match self {
            Category::Null => 0,
            Category::Short => 1,
            Category::Long => 2,
            Category::Yes => 3,
            Category::No => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Category::Null),
            1 => Some(Category::Short),
            2 => Some(Category::Long),
            3 => Some(Category::Yes),
            4 => Some(Category::No),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::Null => "null",
            Category::Short => "short",
            Category::Long => "long",
            Category::Yes => "yes",
            Category::No => "no",
        }
    }

    /// Whether windows of this category carry a token span.
    pub fn has_span(self) -> bool {
        match self {
            Category::Short | Category::Long => true,
            Category::Null | Category::Yes | Category::No => false,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_fixed() {
        let codes: Vec<u8> = Category::ALL.iter().map(|c| c.code()).collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4]);
        assert_eq!(Category::from_code(3), Some(Category::Yes));
        assert_eq!(Category::from_code(5), None);
    }

    #[test]
    fn test_serde_uses_lowercase_names() {
        assert_eq!(serde_json::to_string(&Category::Long).unwrap(), "\"long\"");
        let parsed: Category = serde_json::from_str("\"no\"").unwrap();
        assert_eq!(parsed, Category::No);
    }
}
