//! Schema metadata types for source tables and the semantic column mapping.
//!
//! These types are plain value objects: they are produced by one discovery
//! call, carry no connection handle, and are immutable afterwards.

use serde::Serialize;

/// A user-visible table in the source database, annotated with an exact
/// row count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescriptor {
    /// Table name as declared in the source file.
    pub name: String,

    /// Exact row count at discovery time.
    pub row_count: u64,
}

/// A column of a source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    /// Column name as declared.
    pub name: String,

    /// Declared source type tag (e.g. `int`, `nvarchar`, `datetime`).
    pub data_type: String,

    /// Whether the column admits NULL.
    pub is_nullable: bool,

    /// 1-based ordinal position in the table declaration.
    pub ordinal: u32,
}

/// The fixed set of semantic target fields an attendance export produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetField {
    /// Numeric identifier of the person clocking in or out.
    UserId,
    /// Local wall-clock timestamp of the punch.
    CheckTime,
    /// Device verification method code (fingerprint, card, ...).
    VerifyType,
}

impl TargetField {
    /// All target fields, in output column order.
    pub const ALL: [TargetField; 3] =
        [TargetField::UserId, TargetField::CheckTime, TargetField::VerifyType];

    /// Column name used in the emitted INSERT statements.
    #[must_use]
    pub fn column_name(self) -> &'static str {
        match self {
            TargetField::UserId => "user_id",
            TargetField::CheckTime => "check_time",
            TargetField::VerifyType => "verify_type",
        }
    }

    /// Whether a mapping for this field is mandatory.
    ///
    /// The identifier and the timestamp are required; the verify code is
    /// optional and simply omitted when no column matches.
    #[must_use]
    pub fn is_required(self) -> bool {
        !matches!(self, TargetField::VerifyType)
    }

    /// Known source column name variants for this field, matched
    /// case-insensitively in table-declared ordinal order.
    ///
    /// Kept as data so new device firmwares are an addition here, not a
    /// code change in the matcher.
    #[must_use]
    pub fn name_variants(self) -> &'static [&'static str] {
        match self {
            TargetField::UserId => &["USERID", "USER_ID", "ENROLLNUMBER", "BADGENUMBER", "PIN"],
            TargetField::CheckTime => &["CHECKTIME", "CHECK_TIME", "VERIFYTIME", "PUNCHTIME", "ATTTIME"],
            TargetField::VerifyType => &["VERIFYCODE", "VERIFY_CODE", "VERIFYMODE", "CHECKTYPE"],
        }
    }
}

impl std::fmt::Display for TargetField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column_name())
    }
}

/// Table name aliases recognized by auto-detection, matched
/// case-insensitively. Different ZKTeco firmware generations use different
/// spellings for the punch log table.
pub const ATTENDANCE_TABLE_ALIASES: &[&str] =
    &["CHECKINOUT", "CHECK_IN_OUT", "ATTLOG", "ATT_LOG", "ATTENDANCE", "PUNCHLOG"];

/// One resolved source-column-to-target-field assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    /// Source column name, guaranteed to exist in the table.
    pub source_column: String,

    /// Target semantic field this column feeds.
    pub target: TargetField,

    /// Declared source type tag, for diagnostics.
    pub source_type: String,
}

/// Result of a successful semantic mapping: every required target field has
/// exactly one mapping.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedSchema {
    /// Source table name.
    pub table: String,

    /// Exact row count at discovery time.
    pub row_count: u64,

    /// Mappings in target field order.
    pub mappings: Vec<ColumnMapping>,

    /// Source columns not claimed by any target field, retained for
    /// operator visibility.
    pub unmapped_columns: Vec<String>,
}

impl ResolvedSchema {
    /// Find the mapping for a given target field, if any.
    #[must_use]
    pub fn mapping_for(&self, field: TargetField) -> Option<&ColumnMapping> {
        self.mappings.iter().find(|m| m.target == field)
    }
}

/// Full-table schema used by raw export, when no semantic mapping is
/// attempted: every declared column in declaration order.
#[derive(Debug, Clone, Serialize)]
pub struct RawTableSchema {
    /// Source table name.
    pub table: String,

    /// Exact row count at discovery time.
    pub row_count: u64,

    /// All columns, ordered by ordinal position.
    pub columns: Vec<ColumnDescriptor>,
}

impl RawTableSchema {
    /// Column names in declaration order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_fields() {
        assert!(TargetField::UserId.is_required());
        assert!(TargetField::CheckTime.is_required());
        assert!(!TargetField::VerifyType.is_required());
    }

    #[test]
    fn test_target_column_names() {
        assert_eq!(TargetField::UserId.column_name(), "user_id");
        assert_eq!(TargetField::CheckTime.column_name(), "check_time");
        assert_eq!(TargetField::VerifyType.column_name(), "verify_type");
    }

    #[test]
    fn test_mapping_for() {
        let schema = ResolvedSchema {
            table: "CHECKINOUT".to_string(),
            row_count: 1,
            mappings: vec![ColumnMapping {
                source_column: "USERID".to_string(),
                target: TargetField::UserId,
                source_type: "int".to_string(),
            }],
            unmapped_columns: vec![],
        };

        assert!(schema.mapping_for(TargetField::UserId).is_some());
        assert!(schema.mapping_for(TargetField::CheckTime).is_none());
    }
}
