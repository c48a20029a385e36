//! Priority labels assigned by the classifier, and Gmail label IDs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Well-known Gmail system label IDs
pub struct LabelId;

impl LabelId {
    pub const INBOX: &'static str = "INBOX";
    pub const TRASH: &'static str = "TRASH";
    pub const SPAM: &'static str = "SPAM";
}

/// Priority assigned to a message by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Important,
    NotImportant,
}

impl Label {
    /// Storage form, also the form the classifier is asked to produce
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Important => "IMPORTANT",
            Label::NotImportant => "NOT IMPORTANT",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown label: {0}")]
pub struct UnknownLabel(pub String);

impl FromStr for Label {
    type Err = UnknownLabel;

    /// Accepts the stored form as well as the HIGH/LOW wording used in prompts
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IMPORTANT" | "HIGH" => Ok(Label::Important),
            "NOT IMPORTANT" | "LOW" => Ok(Label::NotImportant),
            _ => Err(UnknownLabel(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label_variants() {
        assert_eq!("IMPORTANT".parse::<Label>().unwrap(), Label::Important);
        assert_eq!("high".parse::<Label>().unwrap(), Label::Important);
        assert_eq!("Not Important".parse::<Label>().unwrap(), Label::NotImportant);
        assert_eq!(" LOW ".parse::<Label>().unwrap(), Label::NotImportant);
        assert!("MEDIUM".parse::<Label>().is_err());
    }

    #[test]
    fn test_label_roundtrip_through_str() {
        for label in [Label::Important, Label::NotImportant] {
            assert_eq!(label.as_str().parse::<Label>().unwrap(), label);
        }
    }
}
