use std::fmt::{Display, Formatter};
use std::str::FromStr;

use atis_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// Level of hierarchy roots (the ministry).
pub const ROOT_LEVEL: u16 = 1;
/// Level at which regional offices sit.
pub const REGION_LEVEL: u16 = 2;
/// Level at which sector offices sit.
pub const SECTOR_LEVEL: u16 = 3;
/// Level at which schools sit.
pub const SCHOOL_LEVEL: u16 = 4;
/// Deepest level an institution may occupy.
pub const MAX_INSTITUTION_LEVEL: u16 = 5;

/// Unique identifier for an institution node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstitutionId(i64);

impl InstitutionId {
    /// Creates an institution identifier from its stored value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the stored value.
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for InstitutionId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Display for InstitutionId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Institution kind tag.
///
/// The tag is informational: tree shape is driven by `parent_id` and
/// `level`, never by the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstitutionType {
    /// Ministry of education.
    Ministry,
    /// Regional education office.
    Region,
    /// Sector office grouping schools.
    Sector,
    /// General school.
    School,
    /// Secondary school.
    SecondarySchool,
    /// Gymnasium.
    Gymnasium,
    /// Vocational school.
    Vocational,
    /// Kindergarten.
    Kindergarten,
    /// Any other institution kind.
    Other,
}

impl InstitutionType {
    /// Returns a stable storage value for this type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ministry => "ministry",
            Self::Region => "region",
            Self::Sector => "sector",
            Self::School => "school",
            Self::SecondarySchool => "secondary_school",
            Self::Gymnasium => "gymnasium",
            Self::Vocational => "vocational",
            Self::Kindergarten => "kindergarten",
            Self::Other => "other",
        }
    }

    /// Returns whether the type is one of the school kinds.
    #[must_use]
    pub fn is_school(&self) -> bool {
        matches!(
            self,
            Self::School | Self::SecondarySchool | Self::Gymnasium | Self::Vocational
        )
    }
}

impl FromStr for InstitutionType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "ministry" => Ok(Self::Ministry),
            "region" | "regional_education_department" => Ok(Self::Region),
            "sector" | "sector_education_office" => Ok(Self::Sector),
            "school" => Ok(Self::School),
            "secondary_school" => Ok(Self::SecondarySchool),
            "gymnasium" => Ok(Self::Gymnasium),
            "vocational" => Ok(Self::Vocational),
            "kindergarten" => Ok(Self::Kindergarten),
            "other" => Ok(Self::Other),
            _ => Err(AppError::Validation(format!(
                "unknown institution type '{value}'"
            ))),
        }
    }
}

/// Input payload for constructing an institution node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstitutionNodeInput {
    /// Stable identifier.
    pub id: InstitutionId,
    /// Parent institution, `None` for roots.
    pub parent_id: Option<InstitutionId>,
    /// Display name.
    pub name: String,
    /// Institution kind.
    pub institution_type: InstitutionType,
    /// Depth in the tree, starting at [`ROOT_LEVEL`].
    pub level: u16,
    /// Soft-state flag; inactive nodes are retained for audit.
    pub is_active: bool,
}

/// One node of the institution hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstitutionNode {
    id: InstitutionId,
    parent_id: Option<InstitutionId>,
    name: NonEmptyString,
    institution_type: InstitutionType,
    level: u16,
    is_active: bool,
}

impl InstitutionNode {
    /// Creates a validated node.
    ///
    /// Only node-local rules are checked here. Consistency with the parent's
    /// level is a tree property, see [`crate::InstitutionTree`].
    pub fn new(input: InstitutionNodeInput) -> AppResult<Self> {
        if input.level < ROOT_LEVEL {
            return Err(AppError::Validation(format!(
                "institution '{}' level must be at least {ROOT_LEVEL}",
                input.id
            )));
        }

        if input.parent_id == Some(input.id) {
            return Err(AppError::Validation(format!(
                "institution '{}' cannot be its own parent",
                input.id
            )));
        }

        Ok(Self {
            id: input.id,
            parent_id: input.parent_id,
            name: NonEmptyString::new(input.name)?,
            institution_type: input.institution_type,
            level: input.level,
            is_active: input.is_active,
        })
    }

    /// Returns the node identifier.
    #[must_use]
    pub fn id(&self) -> InstitutionId {
        self.id
    }

    /// Returns the parent identifier.
    #[must_use]
    pub fn parent_id(&self) -> Option<InstitutionId> {
        self.parent_id
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &NonEmptyString {
        &self.name
    }

    /// Returns the institution kind.
    #[must_use]
    pub fn institution_type(&self) -> InstitutionType {
        self.institution_type
    }

    /// Returns the node depth.
    #[must_use]
    pub fn level(&self) -> u16 {
        self.level
    }

    /// Returns whether the node is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Returns whether the node has no parent.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Returns whether the node is a sector office at sector depth.
    #[must_use]
    pub fn is_sector(&self) -> bool {
        self.institution_type == InstitutionType::Sector && self.level == SECTOR_LEVEL
    }

    pub(crate) fn set_parent_id(&mut self, parent_id: Option<InstitutionId>) {
        self.parent_id = parent_id;
    }

    pub(crate) fn set_level(&mut self, level: u16) {
        self.level = level;
    }

    pub(crate) fn set_active(&mut self, is_active: bool) {
        self.is_active = is_active;
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use atis_core::AppError;

    use super::{InstitutionId, InstitutionNode, InstitutionNodeInput, InstitutionType};

    fn input(id: i64, parent_id: Option<i64>, level: u16) -> InstitutionNodeInput {
        InstitutionNodeInput {
            id: InstitutionId::new(id),
            parent_id: parent_id.map(InstitutionId::new),
            name: format!("Institution {id}"),
            institution_type: InstitutionType::Other,
            level,
            is_active: true,
        }
    }

    #[test]
    fn node_rejects_self_parent() {
        let result = InstitutionNode::new(input(7, Some(7), 2));
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn node_rejects_level_zero() {
        let result = InstitutionNode::new(input(7, None, 0));
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn node_rejects_blank_name() {
        let mut payload = input(7, None, 1);
        payload.name = "  ".to_owned();
        assert!(InstitutionNode::new(payload).is_err());
    }

    #[test]
    fn institution_type_roundtrip_storage_value() {
        for value in [
            InstitutionType::Ministry,
            InstitutionType::Region,
            InstitutionType::Sector,
            InstitutionType::School,
            InstitutionType::SecondarySchool,
            InstitutionType::Gymnasium,
            InstitutionType::Vocational,
            InstitutionType::Kindergarten,
            InstitutionType::Other,
        ] {
            let restored = InstitutionType::from_str(value.as_str());
            assert!(matches!(restored, Ok(parsed) if parsed == value));
        }
    }

    #[test]
    fn only_school_kinds_are_schools() {
        assert!(InstitutionType::Gymnasium.is_school());
        assert!(!InstitutionType::Sector.is_school());
        assert!(!InstitutionType::Kindergarten.is_school());
    }
}
