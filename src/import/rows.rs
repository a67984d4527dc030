//! Typed record construction for validated rows.
//!
//! Foreign keys are translated through the session's [`IdMapTable`] and image
//! paths through the [`AssetRelocator`]. Anything that cannot be turned into a
//! typed value surfaces as a [`RowError`].

use chrono::NaiveDateTime;
use thiserror::Error;

use super::assets::{AssetRelocator, ImageKind};
use super::id_map::IdMapTable;
use crate::codec::RecordRow;
use crate::model::{
    split_list, Exercise, ExerciseLog, ExerciseTag, Meal, MealCheckIn, MealTag, Pill, PillCheckIn,
    Record, TableKind, Tag, UserGoal,
};
use crate::time::{parse_date, parse_datetime, parse_iso_local};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("{field} is required")]
    Missing { field: &'static str },
    #[error("{field} has an invalid value {value:?}")]
    Malformed { field: &'static str, value: String },
    #[error("{field} references {parent} {id} which was not imported")]
    MissingParent {
        field: &'static str,
        parent: TableKind,
        id: String,
    },
}

impl RowError {
    pub fn field(&self) -> &'static str {
        match self {
            RowError::Missing { field }
            | RowError::Malformed { field, .. }
            | RowError::MissingParent { field, .. } => *field,
        }
    }
}

pub(crate) struct RowContext<'a> {
    pub id_map: &'a IdMapTable,
    pub relocator: &'a AssetRelocator,
    /// Substituted for blank `createdAt` / `updatedAt` values.
    pub now: NaiveDateTime,
}

#[derive(Debug)]
pub(crate) struct BuiltRecord {
    pub record: Record,
    /// Images the record pointed at that the archive did not carry.
    pub unresolved_images: Vec<String>,
}

struct Fields<'r> {
    row: &'r RecordRow,
}

impl<'r> Fields<'r> {
    fn raw(&self, field: &'static str) -> Result<&'r str, RowError> {
        self.row.non_blank(field).ok_or(RowError::Missing { field })
    }

    fn malformed(field: &'static str, value: &str) -> RowError {
        RowError::Malformed {
            field,
            value: value.to_string(),
        }
    }

    /// Free text is stored exactly as decoded; only the blank check trims.
    fn verbatim(&self, field: &'static str) -> Option<&'r str> {
        self.row.non_blank(field)?;
        self.row.get(field)
    }

    fn text(&self, field: &'static str) -> Result<String, RowError> {
        self.verbatim(field)
            .map(str::to_string)
            .ok_or(RowError::Missing { field })
    }

    fn opt_text(&self, field: &'static str) -> Option<String> {
        self.verbatim(field).map(str::to_string)
    }

    fn int(&self, field: &'static str) -> Result<i64, RowError> {
        let raw = self.raw(field)?;
        raw.parse().map_err(|_| Self::malformed(field, raw))
    }

    fn opt_int(&self, field: &'static str) -> Result<Option<i64>, RowError> {
        self.row
            .non_blank(field)
            .map(|raw| raw.parse().map_err(|_| Self::malformed(field, raw)))
            .transpose()
    }

    fn real(&self, field: &'static str) -> Result<f64, RowError> {
        let raw = self.raw(field)?;
        parse_real(raw).ok_or_else(|| Self::malformed(field, raw))
    }

    fn opt_real(&self, field: &'static str) -> Result<Option<f64>, RowError> {
        self.row
            .non_blank(field)
            .map(|raw| parse_real(raw).ok_or_else(|| Self::malformed(field, raw)))
            .transpose()
    }

    /// Blank means `false`.
    fn flag(&self, field: &'static str) -> Result<bool, RowError> {
        match self.row.non_blank(field) {
            None => Ok(false),
            Some(raw) if raw.eq_ignore_ascii_case("true") || raw == "1" => Ok(true),
            Some(raw) if raw.eq_ignore_ascii_case("false") || raw == "0" => Ok(false),
            Some(raw) => Err(Self::malformed(field, raw)),
        }
    }

    fn parsed<T: std::str::FromStr>(&self, field: &'static str) -> Result<T, RowError> {
        let raw = self.raw(field)?;
        raw.parse().map_err(|_| Self::malformed(field, raw))
    }

    fn date(&self, field: &'static str) -> Result<chrono::NaiveDate, RowError> {
        let raw = self.raw(field)?;
        parse_date(raw).ok_or_else(|| Self::malformed(field, raw))
    }

    fn datetime(&self, field: &'static str) -> Result<NaiveDateTime, RowError> {
        let raw = self.raw(field)?;
        parse_datetime(raw).ok_or_else(|| Self::malformed(field, raw))
    }

    fn iso(&self, field: &'static str) -> Result<NaiveDateTime, RowError> {
        let raw = self.raw(field)?;
        parse_iso_local(raw).ok_or_else(|| Self::malformed(field, raw))
    }

    fn stamp(&self, field: &'static str, now: NaiveDateTime) -> Result<NaiveDateTime, RowError> {
        match self.row.non_blank(field) {
            None => Ok(now),
            Some(_) => self.datetime(field),
        }
    }

    fn parent(
        &self,
        field: &'static str,
        parent: TableKind,
        id_map: &IdMapTable,
    ) -> Result<i64, RowError> {
        let raw = self.raw(field)?;
        let key = archive_key(raw);
        id_map.get(parent, &key).ok_or(RowError::MissingParent {
            field,
            parent,
            id: key,
        })
    }
}

/// Integer ids are keyed by their canonical form so `07` and `7` agree.
pub(crate) fn archive_key(raw: &str) -> String {
    let raw = raw.trim();
    raw.parse::<i64>()
        .map(|id| id.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn parse_real(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub(crate) fn build_record(
    kind: TableKind,
    row: &RecordRow,
    ctx: &RowContext<'_>,
) -> Result<BuiltRecord, RowError> {
    let f = Fields { row };
    let mut unresolved_images = Vec::new();
    let record = match kind {
        TableKind::Meal => {
            let local_image_path = f.opt_text("localImagePath").and_then(|old| {
                let found = ctx.relocator.resolve(ImageKind::Meal, &old);
                if found.is_none() {
                    unresolved_images.push(old);
                }
                found
            });
            Record::Meal(Meal {
                id: f.int("id")?,
                name: f.text("name")?,
                serving_size_value: f.real("servingSizeValue")?,
                serving_size_unit: f.parsed("servingSizeUnit")?,
                calories: f.real("calories")?,
                protein: f.real("protein")?,
                carbs: f.real("carbs")?,
                fat: f.real("fat")?,
                fiber: f.opt_real("fiber")?,
                sugar: f.opt_real("sugar")?,
                sodium: f.real("sodium")?,
                local_image_path,
                is_favorite: f.flag("isFavorite")?,
                created_at: f.stamp("createdAt", ctx.now)?,
            })
        }
        TableKind::Exercise => {
            let mut image_paths = Vec::new();
            for old in split_list(f.row.get("imagePaths").unwrap_or_default()) {
                match ctx.relocator.resolve(ImageKind::Exercise, &old) {
                    Some(found) => image_paths.push(found),
                    None => unresolved_images.push(old),
                }
            }
            Record::Exercise(Exercise {
                id: f.int("id")?,
                name: f.text("name")?,
                category: f.parsed("category")?,
                muscle_groups: split_list(f.row.get("muscleGroups").unwrap_or_default()),
                image_paths,
                is_favorite: f.flag("isFavorite")?,
                created_at: f.stamp("createdAt", ctx.now)?,
            })
        }
        TableKind::Pill => Record::Pill(Pill {
            id: f.int("id")?,
            name: f.text("name")?,
            dosage: f.opt_text("dosage"),
            notes: f.opt_text("notes"),
            created_at: f.stamp("createdAt", ctx.now)?,
        }),
        TableKind::Tag => Record::Tag(Tag {
            id: f.int("id")?,
            name: f.text("name")?,
            color: f.opt_text("color"),
            created_at: f.stamp("createdAt", ctx.now)?,
        }),
        TableKind::UserGoal => Record::UserGoal(UserGoal {
            id: f.int("id")?,
            daily_calories: f.real("dailyCalories")?,
            daily_protein: f.real("dailyProtein")?,
            daily_carbs: f.real("dailyCarbs")?,
            daily_fat: f.real("dailyFat")?,
            daily_sodium: f.real("dailySodium")?,
            target_weight: f.opt_real("targetWeight")?,
            updated_at: f.stamp("updatedAt", ctx.now)?,
        }),
        TableKind::MealCheckIn => Record::MealCheckIn(MealCheckIn {
            id: f.int("id")?,
            meal_id: f.parent("mealId", TableKind::Meal, ctx.id_map)?,
            meal_type: f.parsed("mealType")?,
            servings_multiplier: f.real("servingsMultiplier")?,
            check_in_date: f.date("checkInDate")?,
            check_in_date_time: f.datetime("checkInDateTime")?,
            notes: f.opt_text("notes"),
        }),
        TableKind::ExerciseLog => Record::ExerciseLog(ExerciseLog {
            id: f.int("id")?,
            exercise_id: f.parent("exerciseId", TableKind::Exercise, ctx.id_map)?,
            weight: f.real("weight")?,
            reps: f.int("reps")?,
            sets: f.int("sets")?,
            duration_minutes: f.opt_int("durationMinutes")?,
            notes: f.opt_text("notes"),
            logged_at: f.iso("loggedAt")?,
        }),
        TableKind::PillCheckIn => Record::PillCheckIn(PillCheckIn {
            id: f.int("id")?,
            pill_id: f.parent("pillId", TableKind::Pill, ctx.id_map)?,
            taken_at: f.iso("takenAt")?,
        }),
        TableKind::MealTag => Record::MealTag(MealTag {
            meal_id: f.parent("mealId", TableKind::Meal, ctx.id_map)?,
            tag_id: f.parent("tagId", TableKind::Tag, ctx.id_map)?,
        }),
        TableKind::ExerciseTag => Record::ExerciseTag(ExerciseTag {
            exercise_id: f.parent("exerciseId", TableKind::Exercise, ctx.id_map)?,
            tag_id: f.parent("tagId", TableKind::Tag, ctx.id_map)?,
        }),
    };
    Ok(BuiltRecord {
        record,
        unresolved_images,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_table;
    use crate::model::{MealType, ServingUnit};
    use crate::time::now_local;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn row(kind: TableKind, values: &[&str]) -> RecordRow {
        let text = format!("{}\n{}\n", kind.header().join("\t"), values.join("\t"));
        decode_table(&text).rows.remove(0)
    }

    fn ctx<'a>(id_map: &'a IdMapTable, relocator: &'a AssetRelocator) -> RowContext<'a> {
        RowContext {
            id_map,
            relocator,
            now: parse_datetime("2024-05-05 05:05:05").unwrap(),
        }
    }

    #[test]
    fn meal_builds_with_relocated_image() {
        let dir = TempDir::new().unwrap();
        let mut relocator =
            AssetRelocator::new(dir.path().join("meals"), dir.path().join("exercises"));
        relocator
            .relocate("images/meals/oats.jpg", &mut Cursor::new(b"x".to_vec()))
            .unwrap();
        let id_map = IdMapTable::new();
        let r = row(
            TableKind::Meal,
            &[
                "7", "Oats", "40", "G", "150", "5", "27", "3", "4", "", "0.01",
                "/sdcard/old/oats.jpg", "TRUE", "",
            ],
        );
        let built = build_record(TableKind::Meal, &r, &ctx(&id_map, &relocator)).unwrap();
        let Record::Meal(meal) = built.record else {
            panic!("expected meal");
        };
        assert_eq!(meal.id, 7);
        assert_eq!(meal.serving_size_unit, ServingUnit::Gram);
        assert_eq!(meal.fiber, Some(4.0));
        assert_eq!(meal.sugar, None);
        assert!(meal.is_favorite);
        assert_eq!(meal.created_at, parse_datetime("2024-05-05 05:05:05").unwrap());
        assert!(meal.local_image_path.unwrap().ends_with("oats.jpg"));
        assert!(built.unresolved_images.is_empty());
    }

    #[test]
    fn free_text_keeps_surrounding_whitespace() {
        let dir = TempDir::new().unwrap();
        let relocator = AssetRelocator::new(dir.path(), dir.path());
        let id_map = IdMapTable::new();
        let text = crate::codec::encode_table(
            &TableKind::Pill.header(),
            &[vec![
                "3".to_string(),
                "  Vitamin D ".to_string(),
                " ".to_string(),
                "take with food\n".to_string(),
                "2024-01-01 00:00:00".to_string(),
            ]],
        );
        let r = decode_table(&text).rows.remove(0);
        let built = build_record(TableKind::Pill, &r, &ctx(&id_map, &relocator)).unwrap();
        let Record::Pill(pill) = built.record else {
            panic!("expected pill");
        };
        assert_eq!(pill.name, "  Vitamin D ");
        assert_eq!(pill.dosage, None);
        assert_eq!(pill.notes.as_deref(), Some("take with food\n"));
    }

    #[test]
    fn bad_optional_field_is_malformed() {
        let dir = TempDir::new().unwrap();
        let relocator = AssetRelocator::new(dir.path(), dir.path());
        let id_map = IdMapTable::new();
        let r = row(
            TableKind::Meal,
            &[
                "1", "Rice", "100", "g", "130", "2", "28", "0", "lots", "", "0", "", "false",
                "2024-01-01 00:00:00",
            ],
        );
        let err = build_record(TableKind::Meal, &r, &ctx(&id_map, &relocator)).unwrap_err();
        assert_eq!(
            err,
            RowError::Malformed {
                field: "fiber",
                value: "lots".into()
            }
        );
    }

    #[test]
    fn foreign_keys_are_remapped() {
        let dir = TempDir::new().unwrap();
        let relocator = AssetRelocator::new(dir.path(), dir.path());
        let mut id_map = IdMapTable::new();
        id_map.put(TableKind::Meal, "7", 101);
        let r = row(
            TableKind::MealCheckIn,
            &["3", "7", "BREAKFAST", "1.5", "2024-03-01", "2024-03-01 08:00:00", "tasty"],
        );
        let built = build_record(TableKind::MealCheckIn, &r, &ctx(&id_map, &relocator)).unwrap();
        let Record::MealCheckIn(check_in) = built.record else {
            panic!("expected check-in");
        };
        assert_eq!(check_in.meal_id, 101);
        assert_eq!(check_in.meal_type, MealType::Breakfast);
        assert_eq!(check_in.notes.as_deref(), Some("tasty"));
    }

    #[test]
    fn missing_parent_is_reported() {
        let dir = TempDir::new().unwrap();
        let relocator = AssetRelocator::new(dir.path(), dir.path());
        let id_map = IdMapTable::new();
        let r = row(TableKind::ExerciseTag, &["5", "6"]);
        let err = build_record(TableKind::ExerciseTag, &r, &ctx(&id_map, &relocator)).unwrap_err();
        assert_eq!(err.field(), "exerciseId");
        assert!(matches!(
            err,
            RowError::MissingParent {
                parent: TableKind::Exercise,
                ..
            }
        ));
    }

    #[test]
    fn exercise_drops_images_not_in_archive() {
        let dir = TempDir::new().unwrap();
        let mut relocator =
            AssetRelocator::new(dir.path().join("meals"), dir.path().join("exercises"));
        relocator
            .relocate("images/exercises/squat.png", &mut Cursor::new(b"x".to_vec()))
            .unwrap();
        let id_map = IdMapTable::new();
        let r = row(
            TableKind::Exercise,
            &[
                "2",
                "Squat",
                "strength",
                "legs|glutes",
                "/a/squat.png|/a/gone.png",
                "0",
                &crate::time::format_datetime(&now_local()),
            ],
        );
        let built = build_record(TableKind::Exercise, &r, &ctx(&id_map, &relocator)).unwrap();
        let Record::Exercise(exercise) = built.record else {
            panic!("expected exercise");
        };
        assert_eq!(exercise.muscle_groups, vec!["legs", "glutes"]);
        assert_eq!(exercise.image_paths.len(), 1);
        assert_eq!(built.unresolved_images, vec!["/a/gone.png".to_string()]);
    }
}
