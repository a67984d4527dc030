//! Row validation plus the archive-level checks run before replay.
//!
//! Row validators are pure: they never fail, they only describe what is wrong
//! with a row. Optional columns are left to record construction.

use std::path::Path;

use semver::Version;
use thiserror::Error;

use super::report::ImportIssue;
use crate::codec::RecordRow;
use crate::export::manifest::ExportInfo;
use crate::model::{ExerciseCategory, MealType, ServingUnit, TableKind, SCHEMA_VERSION};
use crate::time::{parse_date, parse_datetime, parse_iso_local};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("schema version mismatch: supported={supported}, archive={archive}")]
    SchemaVersionMismatch { supported: u32, archive: u32 },
    #[error("archive app version {found} is older than minimum supported {minimum}")]
    AppVersionTooOld { minimum: String, found: String },
    #[error("invalid app version in export_info.tsv: {0}")]
    InvalidAppVersion(String),
    #[error("archive images need {required_bytes} bytes but only {available_bytes} are free")]
    InsufficientDisk {
        required_bytes: u64,
        available_bytes: u64,
    },
    #[error("failed to query free disk space: {0}")]
    DiskQuery(String),
}

pub fn check_export_info(info: &ExportInfo, minimum: &Version) -> Result<(), ValidationError> {
    if info.schema_version != SCHEMA_VERSION {
        return Err(ValidationError::SchemaVersionMismatch {
            supported: SCHEMA_VERSION,
            archive: info.schema_version,
        });
    }
    let found = Version::parse(info.app_version.trim())
        .map_err(|err| ValidationError::InvalidAppVersion(err.to_string()))?;
    if found < *minimum {
        return Err(ValidationError::AppVersionTooOld {
            minimum: minimum.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}

pub fn check_disk_space(
    required_bytes: u64,
    target_root: &Path,
    available_override: Option<u64>,
) -> Result<(), ValidationError> {
    let available_bytes = match available_override {
        Some(v) => v,
        None => fs2::available_space(target_root)
            .map_err(|err| ValidationError::DiskQuery(err.to_string()))?,
    };
    if available_bytes < required_bytes {
        return Err(ValidationError::InsufficientDisk {
            required_bytes,
            available_bytes,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub errors: Vec<ImportIssue>,
    pub warnings: Vec<ImportIssue>,
}

#[derive(Clone, Copy)]
enum Check {
    /// Required integer key (own id or a reference to a parent).
    Identifier,
    Name,
    NonNegative,
    Positive,
    Count,
    Enumerated(fn(&str) -> bool),
    Date,
    DateTime,
    IsoDateTime,
    /// `createdAt` / `updatedAt`: blank is tolerated with a warning.
    Stamp,
}

fn serving_unit(raw: &str) -> bool {
    raw.parse::<ServingUnit>().is_ok()
}

fn exercise_category(raw: &str) -> bool {
    raw.parse::<ExerciseCategory>().is_ok()
}

fn meal_type(raw: &str) -> bool {
    raw.parse::<MealType>().is_ok()
}

fn rules(kind: TableKind) -> &'static [(&'static str, Check)] {
    use Check::*;
    match kind {
        TableKind::Meal => &[
            ("id", Identifier),
            ("name", Name),
            ("servingSizeValue", Positive),
            ("servingSizeUnit", Enumerated(serving_unit)),
            ("calories", NonNegative),
            ("protein", NonNegative),
            ("carbs", NonNegative),
            ("fat", NonNegative),
            ("sodium", NonNegative),
            ("createdAt", Stamp),
        ],
        TableKind::Exercise => &[
            ("id", Identifier),
            ("name", Name),
            ("category", Enumerated(exercise_category)),
            ("createdAt", Stamp),
        ],
        TableKind::Pill => &[("id", Identifier), ("name", Name), ("createdAt", Stamp)],
        TableKind::Tag => &[("id", Identifier), ("name", Name), ("createdAt", Stamp)],
        TableKind::UserGoal => &[
            ("id", Identifier),
            ("dailyCalories", NonNegative),
            ("dailyProtein", NonNegative),
            ("dailyCarbs", NonNegative),
            ("dailyFat", NonNegative),
            ("dailySodium", NonNegative),
            ("updatedAt", Stamp),
        ],
        TableKind::MealCheckIn => &[
            ("id", Identifier),
            ("mealId", Identifier),
            ("mealType", Enumerated(meal_type)),
            ("servingsMultiplier", Positive),
            ("checkInDate", Date),
            ("checkInDateTime", DateTime),
        ],
        TableKind::ExerciseLog => &[
            ("id", Identifier),
            ("exerciseId", Identifier),
            ("weight", NonNegative),
            ("reps", Count),
            ("sets", Count),
            ("loggedAt", IsoDateTime),
        ],
        TableKind::PillCheckIn => &[
            ("id", Identifier),
            ("pillId", Identifier),
            ("takenAt", IsoDateTime),
        ],
        TableKind::MealTag => &[("mealId", Identifier), ("tagId", Identifier)],
        TableKind::ExerciseTag => &[("exerciseId", Identifier), ("tagId", Identifier)],
    }
}

enum Finding {
    Ok,
    Warn(String),
    Fail(String),
}

fn apply(check: Check, column: &str, value: Option<&str>) -> Finding {
    let Some(raw) = value else {
        return match check {
            Check::Stamp => Finding::Warn(format!("{column} is blank; using import time")),
            Check::Name => Finding::Fail(format!("{column} must not be blank")),
            _ => Finding::Fail(format!("{column} is required")),
        };
    };
    let fail = |what: &str| Finding::Fail(format!("{column} {what}: {raw:?}"));
    match check {
        Check::Name => Finding::Ok,
        Check::Identifier => match raw.parse::<i64>() {
            Ok(_) => Finding::Ok,
            Err(_) => fail("is not an integer identifier"),
        },
        Check::NonNegative => match raw.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => Finding::Ok,
            Ok(_) => fail("must not be negative"),
            Err(_) => fail("is not a number"),
        },
        Check::Positive => match raw.parse::<f64>() {
            Ok(v) if v.is_finite() && v > 0.0 => Finding::Ok,
            Ok(_) => fail("must be greater than zero"),
            Err(_) => fail("is not a number"),
        },
        Check::Count => match raw.parse::<i64>() {
            Ok(v) if v >= 0 => Finding::Ok,
            Ok(_) => fail("must not be negative"),
            Err(_) => fail("is not a whole number"),
        },
        Check::Enumerated(known) => {
            if known(raw) {
                Finding::Ok
            } else {
                fail("is not a known value")
            }
        }
        Check::Date => match parse_date(raw) {
            Some(_) => Finding::Ok,
            None => fail("is not a yyyy-MM-dd date"),
        },
        Check::DateTime | Check::Stamp => match parse_datetime(raw) {
            Some(_) => Finding::Ok,
            None => fail("is not a yyyy-MM-dd HH:mm:ss timestamp"),
        },
        Check::IsoDateTime => match parse_iso_local(raw) {
            Some(_) => Finding::Ok,
            None => fail("is not an ISO-8601 local date-time"),
        },
    }
}

/// Validate one decoded row against the rules for its table kind.
pub fn validate(kind: TableKind, row: &RecordRow) -> ValidationOutcome {
    let table = kind.table_name();
    let mut outcome = ValidationOutcome::default();
    for (column, check) in rules(kind) {
        match apply(*check, column, row.non_blank(column)) {
            Finding::Ok => {}
            Finding::Warn(message) => outcome.warnings.push(
                ImportIssue::warning(table, message)
                    .at_line(row.line)
                    .on_field(*column),
            ),
            Finding::Fail(message) => outcome.errors.push(
                ImportIssue::error(table, message)
                    .at_line(row.line)
                    .on_field(*column),
            ),
        }
    }
    outcome.is_valid = outcome.errors.is_empty();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_table;

    fn row(kind: TableKind, values: &[&str]) -> RecordRow {
        let header = kind.header().join("\t");
        let text = format!("{header}\n{}\n", values.join("\t"));
        decode_table(&text).rows.remove(0)
    }

    fn meal_row(name: &str, serving: &str, unit: &str, calories: &str) -> RecordRow {
        row(
            TableKind::Meal,
            &[
                "7", name, serving, unit, calories, "1", "2", "3", "", "", "0", "", "false",
                "2024-03-01 08:00:00",
            ],
        )
    }

    #[test]
    fn valid_meal_passes() {
        let outcome = validate(TableKind::Meal, &meal_row("Oats", "40", "g", "150"));
        assert!(outcome.is_valid, "{:?}", outcome.errors);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn blank_name_and_bad_numbers_are_errors() {
        let outcome = validate(TableKind::Meal, &meal_row("  ", "0", "bucket", "-5"));
        assert!(!outcome.is_valid);
        let fields: Vec<_> = outcome
            .errors
            .iter()
            .map(|e| e.field.clone().unwrap())
            .collect();
        assert_eq!(
            fields,
            vec!["name", "servingSizeValue", "servingSizeUnit", "calories"]
        );
        assert!(outcome.errors.iter().all(|e| e.line == Some(2)));
    }

    #[test]
    fn blank_created_at_is_a_warning() {
        let r = row(TableKind::Tag, &["1", "breakfast", "", ""]);
        let outcome = validate(TableKind::Tag, &r);
        assert!(outcome.is_valid);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].field.as_deref(), Some("createdAt"));
    }

    #[test]
    fn timestamp_patterns_are_enforced() {
        let r = row(
            TableKind::MealCheckIn,
            &["1", "7", "lunch", "1", "03/01/2024", "2024-03-01T12:00:00", ""],
        );
        let outcome = validate(TableKind::MealCheckIn, &r);
        let fields: Vec<_> = outcome
            .errors
            .iter()
            .map(|e| e.field.clone().unwrap())
            .collect();
        assert_eq!(fields, vec!["checkInDate", "checkInDateTime"]);

        let log = row(
            TableKind::PillCheckIn,
            &["1", "2", "2024-03-01T08:30:00.250"],
        );
        assert!(validate(TableKind::PillCheckIn, &log).is_valid);
    }

    #[test]
    fn junction_requires_both_keys() {
        let r = row(TableKind::MealTag, &["3", "x"]);
        let outcome = validate(TableKind::MealTag, &r);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].field.as_deref(), Some("tagId"));
    }

    #[test]
    fn export_info_versions_are_checked() {
        let minimum = Version::parse("0.1.0").unwrap();
        let mut info = ExportInfo::full_backup("0.2.0");
        assert!(check_export_info(&info, &minimum).is_ok());

        info.app_version = "0.0.9".into();
        assert!(matches!(
            check_export_info(&info, &minimum),
            Err(ValidationError::AppVersionTooOld { .. })
        ));

        info.app_version = "not-a-version".into();
        assert!(matches!(
            check_export_info(&info, &minimum),
            Err(ValidationError::InvalidAppVersion(_))
        ));

        info.app_version = "0.2.0".into();
        info.schema_version = SCHEMA_VERSION + 1;
        assert!(matches!(
            check_export_info(&info, &minimum),
            Err(ValidationError::SchemaVersionMismatch { .. })
        ));
    }

    #[test]
    fn disk_space_override_is_respected() {
        let root = Path::new(".");
        assert!(check_disk_space(10, root, Some(10)).is_ok());
        assert!(matches!(
            check_disk_space(11, root, Some(10)),
            Err(ValidationError::InsufficientDisk { .. })
        ));
    }
}
