//! Typed records for the ten table kinds carried by a backup archive.
//!
//! Every kind owns a fixed, ordered column schema. Archive headers use the
//! camelCase column names listed here; the SQLite store uses snake_case.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Schema version written to and required from `export_info.tsv`.
pub const SCHEMA_VERSION: u32 = 1;

/// Separator for list-valued columns such as `imagePaths`.
///
/// Items are stored verbatim but cannot themselves contain `|`: such an item
/// comes back as two. Whitespace-only items are dropped.
pub const LIST_SEPARATOR: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Meal,
    Exercise,
    Pill,
    Tag,
    UserGoal,
    MealCheckIn,
    ExerciseLog,
    PillCheckIn,
    MealTag,
    ExerciseTag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
    Enumerated,
    List,
    Date,
    DateTime,
    IsoDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

const fn col(name: &'static str, ty: ColumnType) -> Column {
    Column { name, ty }
}

use ColumnType::*;

const MEAL_COLUMNS: &[Column] = &[
    col("id", Integer),
    col("name", Text),
    col("servingSizeValue", Real),
    col("servingSizeUnit", Enumerated),
    col("calories", Real),
    col("protein", Real),
    col("carbs", Real),
    col("fat", Real),
    col("fiber", Real),
    col("sugar", Real),
    col("sodium", Real),
    col("localImagePath", Text),
    col("isFavorite", Boolean),
    col("createdAt", DateTime),
];

const EXERCISE_COLUMNS: &[Column] = &[
    col("id", Integer),
    col("name", Text),
    col("category", Enumerated),
    col("muscleGroups", List),
    col("imagePaths", List),
    col("isFavorite", Boolean),
    col("createdAt", DateTime),
];

const PILL_COLUMNS: &[Column] = &[
    col("id", Integer),
    col("name", Text),
    col("dosage", Text),
    col("notes", Text),
    col("createdAt", DateTime),
];

const TAG_COLUMNS: &[Column] = &[
    col("id", Integer),
    col("name", Text),
    col("color", Text),
    col("createdAt", DateTime),
];

const USER_GOAL_COLUMNS: &[Column] = &[
    col("id", Integer),
    col("dailyCalories", Real),
    col("dailyProtein", Real),
    col("dailyCarbs", Real),
    col("dailyFat", Real),
    col("dailySodium", Real),
    col("targetWeight", Real),
    col("updatedAt", DateTime),
];

const MEAL_CHECK_IN_COLUMNS: &[Column] = &[
    col("id", Integer),
    col("mealId", Integer),
    col("mealType", Enumerated),
    col("servingsMultiplier", Real),
    col("checkInDate", Date),
    col("checkInDateTime", DateTime),
    col("notes", Text),
];

const EXERCISE_LOG_COLUMNS: &[Column] = &[
    col("id", Integer),
    col("exerciseId", Integer),
    col("weight", Real),
    col("reps", Integer),
    col("sets", Integer),
    col("durationMinutes", Integer),
    col("notes", Text),
    col("loggedAt", IsoDateTime),
];

const PILL_CHECK_IN_COLUMNS: &[Column] = &[
    col("id", Integer),
    col("pillId", Integer),
    col("takenAt", IsoDateTime),
];

const MEAL_TAG_COLUMNS: &[Column] = &[col("mealId", Integer), col("tagId", Integer)];

const EXERCISE_TAG_COLUMNS: &[Column] = &[col("exerciseId", Integer), col("tagId", Integer)];

impl TableKind {
    pub const ALL: [TableKind; 10] = [
        TableKind::Meal,
        TableKind::Exercise,
        TableKind::Pill,
        TableKind::Tag,
        TableKind::UserGoal,
        TableKind::MealCheckIn,
        TableKind::ExerciseLog,
        TableKind::PillCheckIn,
        TableKind::MealTag,
        TableKind::ExerciseTag,
    ];

    /// Logical table name, also the archive entry stem.
    pub fn table_name(self) -> &'static str {
        match self {
            TableKind::Meal => "meals",
            TableKind::Exercise => "exercises",
            TableKind::Pill => "pills",
            TableKind::Tag => "tags",
            TableKind::UserGoal => "user_goals",
            TableKind::MealCheckIn => "meal_check_ins",
            TableKind::ExerciseLog => "exercise_logs",
            TableKind::PillCheckIn => "pill_check_ins",
            TableKind::MealTag => "meal_tags",
            TableKind::ExerciseTag => "exercise_tags",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.tsv", self.table_name())
    }

    pub fn from_table_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.table_name() == name)
    }

    pub fn columns(self) -> &'static [Column] {
        match self {
            TableKind::Meal => MEAL_COLUMNS,
            TableKind::Exercise => EXERCISE_COLUMNS,
            TableKind::Pill => PILL_COLUMNS,
            TableKind::Tag => TAG_COLUMNS,
            TableKind::UserGoal => USER_GOAL_COLUMNS,
            TableKind::MealCheckIn => MEAL_CHECK_IN_COLUMNS,
            TableKind::ExerciseLog => EXERCISE_LOG_COLUMNS,
            TableKind::PillCheckIn => PILL_CHECK_IN_COLUMNS,
            TableKind::MealTag => MEAL_TAG_COLUMNS,
            TableKind::ExerciseTag => EXERCISE_TAG_COLUMNS,
        }
    }

    pub fn header(self) -> Vec<String> {
        self.columns().iter().map(|c| c.name.to_string()).collect()
    }

    /// Junction kinds have no primary key of their own and never appear in
    /// the ID mapping table.
    pub fn owns_primary_key(self) -> bool {
        !matches!(self, TableKind::MealTag | TableKind::ExerciseTag)
    }

    /// Human-readable description written to `export_info.tsv`.
    pub fn description(self) -> &'static str {
        match self {
            TableKind::Meal => "Meal definitions with nutrition facts and optional photo",
            TableKind::Exercise => "Exercise definitions with muscle groups and photos",
            TableKind::Pill => "Supplements and medication definitions",
            TableKind::Tag => "User-defined tags",
            TableKind::UserGoal => "Daily nutrition goals",
            TableKind::MealCheckIn => "Logged meals referencing meals",
            TableKind::ExerciseLog => "Logged workouts referencing exercises",
            TableKind::PillCheckIn => "Logged doses referencing pills",
            TableKind::MealTag => "Meal to tag links",
            TableKind::ExerciseTag => "Exercise to tag links",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value {:?}", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                let trimmed = raw.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(trimmed))
                    .ok_or_else(|| UnknownVariant(raw.to_string()))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(ServingUnit {
    Gram => "g",
    Kilogram => "kg",
    Milligram => "mg",
    Ounce => "oz",
    Pound => "lb",
    Milliliter => "ml",
    Liter => "l",
    Cup => "cup",
    Tablespoon => "tbsp",
    Teaspoon => "tsp",
    Piece => "piece",
    Serving => "serving",
});

string_enum!(ExerciseCategory {
    Strength => "STRENGTH",
    Cardio => "CARDIO",
    Flexibility => "FLEXIBILITY",
    Balance => "BALANCE",
    Other => "OTHER",
});

string_enum!(MealType {
    Breakfast => "BREAKFAST",
    Lunch => "LUNCH",
    Dinner => "DINNER",
    Snack => "SNACK",
});

#[derive(Debug, Clone, PartialEq)]
pub struct Meal {
    pub id: i64,
    pub name: String,
    pub serving_size_value: f64,
    pub serving_size_unit: ServingUnit,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: Option<f64>,
    pub sugar: Option<f64>,
    pub sodium: f64,
    pub local_image_path: Option<String>,
    pub is_favorite: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exercise {
    pub id: i64,
    pub name: String,
    pub category: ExerciseCategory,
    pub muscle_groups: Vec<String>,
    pub image_paths: Vec<String>,
    pub is_favorite: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pill {
    pub id: i64,
    pub name: String,
    pub dosage: Option<String>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub color: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserGoal {
    pub id: i64,
    pub daily_calories: f64,
    pub daily_protein: f64,
    pub daily_carbs: f64,
    pub daily_fat: f64,
    pub daily_sodium: f64,
    pub target_weight: Option<f64>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MealCheckIn {
    pub id: i64,
    pub meal_id: i64,
    pub meal_type: MealType,
    pub servings_multiplier: f64,
    pub check_in_date: NaiveDate,
    pub check_in_date_time: NaiveDateTime,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseLog {
    pub id: i64,
    pub exercise_id: i64,
    pub weight: f64,
    pub reps: i64,
    pub sets: i64,
    pub duration_minutes: Option<i64>,
    pub notes: Option<String>,
    pub logged_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PillCheckIn {
    pub id: i64,
    pub pill_id: i64,
    pub taken_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MealTag {
    pub meal_id: i64,
    pub tag_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExerciseTag {
    pub exercise_id: i64,
    pub tag_id: i64,
}

/// One row of any table kind. Dispatch over kinds is always an exhaustive
/// match on this enum.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Meal(Meal),
    Exercise(Exercise),
    Pill(Pill),
    Tag(Tag),
    UserGoal(UserGoal),
    MealCheckIn(MealCheckIn),
    ExerciseLog(ExerciseLog),
    PillCheckIn(PillCheckIn),
    MealTag(MealTag),
    ExerciseTag(ExerciseTag),
}

impl Record {
    pub fn kind(&self) -> TableKind {
        match self {
            Record::Meal(_) => TableKind::Meal,
            Record::Exercise(_) => TableKind::Exercise,
            Record::Pill(_) => TableKind::Pill,
            Record::Tag(_) => TableKind::Tag,
            Record::UserGoal(_) => TableKind::UserGoal,
            Record::MealCheckIn(_) => TableKind::MealCheckIn,
            Record::ExerciseLog(_) => TableKind::ExerciseLog,
            Record::PillCheckIn(_) => TableKind::PillCheckIn,
            Record::MealTag(_) => TableKind::MealTag,
            Record::ExerciseTag(_) => TableKind::ExerciseTag,
        }
    }

    /// Primary key, `None` for junction rows.
    pub fn id(&self) -> Option<i64> {
        match self {
            Record::Meal(r) => Some(r.id),
            Record::Exercise(r) => Some(r.id),
            Record::Pill(r) => Some(r.id),
            Record::Tag(r) => Some(r.id),
            Record::UserGoal(r) => Some(r.id),
            Record::MealCheckIn(r) => Some(r.id),
            Record::ExerciseLog(r) => Some(r.id),
            Record::PillCheckIn(r) => Some(r.id),
            Record::MealTag(_) | Record::ExerciseTag(_) => None,
        }
    }
}

pub fn join_list(values: &[String]) -> String {
    let mut out = String::new();
    for (idx, value) in values.iter().enumerate() {
        if idx > 0 {
            out.push(LIST_SEPARATOR);
        }
        out.push_str(value);
    }
    out
}

pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(LIST_SEPARATOR)
        .filter(|part| !part.trim().is_empty())
        .map(str::to_string)
        .collect()
}
