//! GroupId - 並列度を区切る論理パーティション（プロジェクトなど）

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::SpoolError;

/// 投入時に受け付けるグループキーの最大長
pub const MAX_GROUP_ID_LEN: usize = 256;

/// GroupId は呼び出し側が指定するパーティションキー
///
/// [`GroupId::parse`] を通してしか作れないので、システム内の値はすべて
/// 空でなく、前後の空白がなく、制御文字を含まない
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupId(String);

impl GroupId {
    pub fn parse(raw: &str) -> Result<Self, SpoolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SpoolError::InvalidRequest(
                "group_id must not be empty".to_string(),
            ));
        }
        if trimmed.len() > MAX_GROUP_ID_LEN {
            return Err(SpoolError::InvalidRequest(format!(
                "group_id must be at most {MAX_GROUP_ID_LEN} bytes"
            )));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(SpoolError::InvalidRequest(
                "group_id must not contain control characters".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GroupId {
    type Error = SpoolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<GroupId> for String {
    fn from(value: GroupId) -> Self {
        value.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn parse_trims_whitespace() {
        let group = GroupId::parse("  project-a ").unwrap();
        assert_eq!(group.as_str(), "project-a");
    }

    #[rstest]
    #[case::empty("")]
    #[case::blank("   ")]
    #[case::control("proj\u{0007}ect")]
    fn parse_rejects_malformed(#[case] raw: &str) {
        assert!(matches!(
            GroupId::parse(raw),
            Err(SpoolError::InvalidRequest(_))
        ));
    }

    #[test]
    fn parse_rejects_overlong_key() {
        let raw = "g".repeat(MAX_GROUP_ID_LEN + 1);
        assert!(GroupId::parse(&raw).is_err());
        assert!(GroupId::parse(&raw[..MAX_GROUP_ID_LEN]).is_ok());
    }

    #[test]
    fn deserialize_validates() {
        let ok: GroupId = serde_json::from_str("\"alpha\"").unwrap();
        assert_eq!(ok.as_str(), "alpha");
        assert!(serde_json::from_str::<GroupId>("\"\"").is_err());
    }
}
