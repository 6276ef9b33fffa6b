use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrgId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrantId(pub String);

/// A column of the grant pipeline board, e.g. `researching` or `submitted`.
/// Surrounding whitespace is dropped on construction and deserialization.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct Stage(pub String);

impl Stage {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<String> for Stage {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

/// Organization membership role. Variants are ordered from lowest to highest
/// authority; a higher role satisfies any requirement for a lower one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    Contributor,
    Admin,
}

impl OrgRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contributor => "contributor",
            Self::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "contributor" => Some(Self::Contributor),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn satisfies(self, required: OrgRole) -> bool {
        self >= required
    }
}

/// The authenticated caller, as resolved by the identity provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub org_id: OrgId,
    pub role: OrgRole,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, org_id: impl Into<String>, role: OrgRole) -> Self {
        Self { user_id: UserId(user_id.into()), org_id: OrgId(org_id.into()), role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == OrgRole::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::{OrgRole, Stage};

    #[test]
    fn stages_ignore_surrounding_whitespace() {
        assert_eq!(Stage::new(" submitted\t"), Stage::new("submitted"));

        let parsed: Stage = serde_json::from_str(r#""submitted ""#).expect("stage");
        assert_eq!(parsed.as_str(), "submitted");
        assert_eq!(serde_json::to_string(&parsed).expect("serialize"), r#""submitted""#);
    }

    #[test]
    fn admin_satisfies_contributor_requirement_but_not_the_reverse() {
        assert!(OrgRole::Admin.satisfies(OrgRole::Contributor));
        assert!(OrgRole::Admin.satisfies(OrgRole::Admin));
        assert!(OrgRole::Contributor.satisfies(OrgRole::Contributor));
        assert!(!OrgRole::Contributor.satisfies(OrgRole::Admin));
    }

    #[test]
    fn role_parsing_is_case_and_whitespace_tolerant() {
        assert_eq!(OrgRole::parse(" Admin "), Some(OrgRole::Admin));
        assert_eq!(OrgRole::parse("CONTRIBUTOR"), Some(OrgRole::Contributor));
        assert_eq!(OrgRole::parse("viewer"), None);
    }
}
