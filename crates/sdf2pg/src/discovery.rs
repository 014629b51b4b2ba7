//! Schema discovery: table inventory, attendance-table auto-detection, and
//! heuristic column mapping.
//!
//! Nothing here trusts user-facing names: identifier quoting happens in the
//! engine backends when SQL is built, and all matching is case-insensitive
//! because SSCE files from different firmware generations disagree on
//! casing.

use tracing::{debug, info};

use crate::engine::SdfConnection;
use crate::error::{ExportError, Result};
use crate::schema::{
    ColumnMapping, RawTableSchema, ResolvedSchema, TableDescriptor, TargetField,
    ATTENDANCE_TABLE_ALIASES,
};

/// Enumerate user-visible tables, sorted by name, each with an exact row
/// count.
pub fn list_tables(conn: &dyn SdfConnection) -> Result<Vec<TableDescriptor>> {
    let mut names = conn.table_names()?;
    names.sort();

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let row_count = conn.row_count(&name)?;
        tables.push(TableDescriptor { name, row_count });
    }

    debug!("Discovered {} tables", tables.len());
    Ok(tables)
}

/// Find the attendance table by name alias and map its columns.
///
/// Fails with [`ExportError::NoTablesFound`] on an empty database and with
/// [`ExportError::NoAttendanceTableDetected`] (carrying the full inventory)
/// when no alias matches.
pub fn auto_detect(conn: &dyn SdfConnection) -> Result<ResolvedSchema> {
    let tables = list_tables(conn)?;
    if tables.is_empty() {
        return Err(ExportError::NoTablesFound);
    }

    let matched = tables.iter().find(|t| {
        ATTENDANCE_TABLE_ALIASES
            .iter()
            .any(|alias| t.name.eq_ignore_ascii_case(alias))
    });

    match matched {
        Some(table) => {
            info!("Auto-detected attendance table: {}", table.name);
            map_columns(conn, &table.name)
        }
        None => Err(ExportError::NoAttendanceTableDetected { tables }),
    }
}

/// Map a table's columns onto the semantic target fields.
///
/// Each target field independently takes the first column (in declared
/// ordinal order) whose name case-insensitively matches one of its known
/// variants. Optional fields that find nothing are simply omitted; required
/// fields that find nothing fail the whole resolution with full context.
pub fn map_columns(conn: &dyn SdfConnection, table: &str) -> Result<ResolvedSchema> {
    let columns = conn.columns(table)?;
    let row_count = conn.row_count(table)?;

    let mut mappings = Vec::new();
    for field in TargetField::ALL {
        let matched = columns.iter().find(|col| {
            field
                .name_variants()
                .iter()
                .any(|variant| col.name.eq_ignore_ascii_case(variant))
        });
        if let Some(col) = matched {
            debug!("Mapped column {} -> {}", col.name, field);
            mappings.push(ColumnMapping {
                source_column: col.name.clone(),
                target: field,
                source_type: col.data_type.clone(),
            });
        }
    }

    let missing: Vec<TargetField> = TargetField::ALL
        .into_iter()
        .filter(|f| f.is_required() && !mappings.iter().any(|m| m.target == *f))
        .collect();

    if !missing.is_empty() {
        return Err(ExportError::RequiredColumnsMissing {
            table: table.to_string(),
            missing: missing.clone(),
            searched_variants: missing
                .iter()
                .flat_map(|f| f.name_variants().iter().map(|v| (*v).to_string()))
                .collect(),
            actual_columns: columns.iter().map(|c| c.name.clone()).collect(),
        });
    }

    let unmapped_columns = columns
        .iter()
        .filter(|c| !mappings.iter().any(|m| m.source_column == c.name))
        .map(|c| c.name.clone())
        .collect();

    Ok(ResolvedSchema {
        table: table.to_string(),
        row_count,
        mappings,
        unmapped_columns,
    })
}

/// Fetch the full declared column list of a table for raw export.
pub fn raw_schema(conn: &dyn SdfConnection, table: &str) -> Result<RawTableSchema> {
    let columns = conn.columns(table)?;
    let row_count = conn.row_count(table)?;
    Ok(RawTableSchema {
        table: table.to_string(),
        row_count,
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::{MemoryDriver, MemoryTable};
    use crate::engine::SdfDriver;
    use crate::value::CeValue;
    use std::fs;

    fn attendance_table(name: &str) -> MemoryTable {
        MemoryTable::new(name)
            .with_column("USERID", "int", false)
            .with_column("CHECKTIME", "datetime", false)
            .with_column("VERIFYCODE", "int", true)
            .with_column("SENSORID", "nvarchar", true)
    }

    fn open(driver: &MemoryDriver, dir: &tempfile::TempDir) -> Box<dyn SdfConnection> {
        let path = dir.path().join("att.sdf");
        fs::write(&path, b"x").unwrap();
        driver.open(&path, None).unwrap()
    }

    #[test]
    fn test_list_tables_sorted_with_counts() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MemoryDriver::new(vec![
            MemoryTable::new("ZEBRA"),
            attendance_table("CHECKINOUT").with_row(vec![
                CeValue::I32(1),
                CeValue::Null,
                CeValue::Null,
                CeValue::Null,
            ]),
        ]);
        let conn = open(&driver, &dir);

        let tables = list_tables(&*conn).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "CHECKINOUT");
        assert_eq!(tables[0].row_count, 1);
        assert_eq!(tables[1].name, "ZEBRA");
    }

    #[test]
    fn test_auto_detect_is_case_insensitive() {
        for spelling in ["CHECKINOUT", "checkinout", "CheckInOut", "att_log"] {
            let dir = tempfile::tempdir().unwrap();
            let driver = MemoryDriver::new(vec![attendance_table(spelling)]);
            let conn = open(&driver, &dir);

            let resolved = auto_detect(&*conn).unwrap();
            assert_eq!(resolved.table, spelling);
        }
    }

    #[test]
    fn test_auto_detect_empty_database() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MemoryDriver::new(vec![]);
        let conn = open(&driver, &dir);

        assert!(matches!(
            auto_detect(&*conn).unwrap_err(),
            ExportError::NoTablesFound
        ));
    }

    #[test]
    fn test_auto_detect_no_alias_carries_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MemoryDriver::new(vec![
            MemoryTable::new("USERINFO"),
            MemoryTable::new("DEPARTMENTS"),
        ]);
        let conn = open(&driver, &dir);

        match auto_detect(&*conn).unwrap_err() {
            ExportError::NoAttendanceTableDetected { tables } => {
                assert_eq!(tables.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_map_columns_full_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let driver = MemoryDriver::new(vec![attendance_table("CHECKINOUT")]);
        let conn = open(&driver, &dir);

        let resolved = map_columns(&*conn, "CHECKINOUT").unwrap();
        assert_eq!(resolved.mappings.len(), 3);
        assert_eq!(
            resolved
                .mapping_for(TargetField::UserId)
                .unwrap()
                .source_column,
            "USERID"
        );
        assert_eq!(resolved.unmapped_columns, vec!["SENSORID"]);
    }

    #[test]
    fn test_map_columns_optional_field_omitted_silently() {
        let dir = tempfile::tempdir().unwrap();
        let table = MemoryTable::new("ATTLOG")
            .with_column("user_id", "int", false)
            .with_column("punchtime", "datetime", false);
        let driver = MemoryDriver::new(vec![table]);
        let conn = open(&driver, &dir);

        let resolved = map_columns(&*conn, "ATTLOG").unwrap();
        assert_eq!(resolved.mappings.len(), 2);
        assert!(resolved.mapping_for(TargetField::VerifyType).is_none());
    }

    #[test]
    fn test_map_columns_missing_required_reports_everything() {
        let dir = tempfile::tempdir().unwrap();
        let table = MemoryTable::new("ODD")
            .with_column("A", "int", false)
            .with_column("B", "nvarchar", true);
        let driver = MemoryDriver::new(vec![table]);
        let conn = open(&driver, &dir);

        match map_columns(&*conn, "ODD").unwrap_err() {
            ExportError::RequiredColumnsMissing {
                table,
                missing,
                searched_variants,
                actual_columns,
            } => {
                assert_eq!(table, "ODD");
                assert_eq!(missing, vec![TargetField::UserId, TargetField::CheckTime]);
                assert!(searched_variants.contains(&"USERID".to_string()));
                assert!(searched_variants.contains(&"CHECKTIME".to_string()));
                assert_eq!(actual_columns, vec!["A", "B"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_first_ordinal_match_wins() {
        let dir = tempfile::tempdir().unwrap();
        // Both BADGENUMBER and USERID are identifier variants; the earlier
        // ordinal wins even though USERID appears first in the variant list.
        let table = MemoryTable::new("CHECKINOUT")
            .with_column("BADGENUMBER", "int", false)
            .with_column("USERID", "int", false)
            .with_column("CHECKTIME", "datetime", false);
        let driver = MemoryDriver::new(vec![table]);
        let conn = open(&driver, &dir);

        let resolved = map_columns(&*conn, "CHECKINOUT").unwrap();
        assert_eq!(
            resolved
                .mapping_for(TargetField::UserId)
                .unwrap()
                .source_column,
            "BADGENUMBER"
        );
        assert_eq!(resolved.unmapped_columns, vec!["USERID"]);
    }
}
