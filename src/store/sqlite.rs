use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};

use super::{Store, UnitOfWork};
use crate::model::{
    join_list, split_list, Exercise, ExerciseLog, ExerciseTag, Meal, MealCheckIn, MealTag, Pill,
    PillCheckIn, Record, TableKind, Tag, UserGoal,
};
use crate::time::{
    format_date, format_datetime, format_iso_local, parse_date, parse_datetime, parse_iso_local,
};
use crate::{AppError, AppResult};

/// [`Store`] backed by the tracker's SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(Debug, Clone)]
enum SqlValue {
    Int(Option<i64>),
    Real(Option<f64>),
    Text(Option<String>),
}

fn text(value: impl Into<String>) -> SqlValue {
    SqlValue::Text(Some(value.into()))
}

fn opt_text(value: &Option<String>) -> SqlValue {
    SqlValue::Text(value.clone())
}

fn int(value: i64) -> SqlValue {
    SqlValue::Int(Some(value))
}

fn real(value: f64) -> SqlValue {
    SqlValue::Real(Some(value))
}

fn physical_table(kind: TableKind) -> &'static str {
    // Logical names double as SQL table names.
    kind.table_name()
}

/// Column/value pairs for a record, primary key excluded.
fn record_values(record: &Record) -> Vec<(&'static str, SqlValue)> {
    match record {
        Record::Meal(m) => vec![
            ("name", text(&m.name)),
            ("serving_size_value", real(m.serving_size_value)),
            ("serving_size_unit", text(m.serving_size_unit.as_str())),
            ("calories", real(m.calories)),
            ("protein", real(m.protein)),
            ("carbs", real(m.carbs)),
            ("fat", real(m.fat)),
            ("fiber", SqlValue::Real(m.fiber)),
            ("sugar", SqlValue::Real(m.sugar)),
            ("sodium", real(m.sodium)),
            ("local_image_path", opt_text(&m.local_image_path)),
            ("is_favorite", int(m.is_favorite as i64)),
            ("created_at", text(format_datetime(&m.created_at))),
        ],
        Record::Exercise(e) => vec![
            ("name", text(&e.name)),
            ("category", text(e.category.as_str())),
            ("muscle_groups", text(join_list(&e.muscle_groups))),
            ("image_paths", text(join_list(&e.image_paths))),
            ("is_favorite", int(e.is_favorite as i64)),
            ("created_at", text(format_datetime(&e.created_at))),
        ],
        Record::Pill(p) => vec![
            ("name", text(&p.name)),
            ("dosage", opt_text(&p.dosage)),
            ("notes", opt_text(&p.notes)),
            ("created_at", text(format_datetime(&p.created_at))),
        ],
        Record::Tag(t) => vec![
            ("name", text(&t.name)),
            ("color", opt_text(&t.color)),
            ("created_at", text(format_datetime(&t.created_at))),
        ],
        Record::UserGoal(g) => vec![
            ("daily_calories", real(g.daily_calories)),
            ("daily_protein", real(g.daily_protein)),
            ("daily_carbs", real(g.daily_carbs)),
            ("daily_fat", real(g.daily_fat)),
            ("daily_sodium", real(g.daily_sodium)),
            ("target_weight", SqlValue::Real(g.target_weight)),
            ("updated_at", text(format_datetime(&g.updated_at))),
        ],
        Record::MealCheckIn(c) => vec![
            ("meal_id", int(c.meal_id)),
            ("meal_type", text(c.meal_type.as_str())),
            ("servings_multiplier", real(c.servings_multiplier)),
            ("check_in_date", text(format_date(&c.check_in_date))),
            ("check_in_date_time", text(format_datetime(&c.check_in_date_time))),
            ("notes", opt_text(&c.notes)),
        ],
        Record::ExerciseLog(l) => vec![
            ("exercise_id", int(l.exercise_id)),
            ("weight", real(l.weight)),
            ("reps", int(l.reps)),
            ("sets", int(l.sets)),
            ("duration_minutes", SqlValue::Int(l.duration_minutes)),
            ("notes", opt_text(&l.notes)),
            ("logged_at", text(format_iso_local(&l.logged_at))),
        ],
        Record::PillCheckIn(p) => vec![
            ("pill_id", int(p.pill_id)),
            ("taken_at", text(format_iso_local(&p.taken_at))),
        ],
        Record::MealTag(j) => vec![("meal_id", int(j.meal_id)), ("tag_id", int(j.tag_id))],
        Record::ExerciseTag(j) => vec![
            ("exercise_id", int(j.exercise_id)),
            ("tag_id", int(j.tag_id)),
        ],
    }
}

fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: &[SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn select_sql(kind: TableKind) -> String {
    let table = physical_table(kind);
    match kind {
        TableKind::MealTag => format!("SELECT meal_id, tag_id FROM {table} ORDER BY meal_id, tag_id"),
        TableKind::ExerciseTag => {
            format!("SELECT exercise_id, tag_id FROM {table} ORDER BY exercise_id, tag_id")
        }
        _ => format!("SELECT * FROM {table} ORDER BY id"),
    }
}

fn decode_error(kind: TableKind, column: &str, raw: &str) -> AppError {
    AppError::new("STORE/DECODE", format!("Stored value {raw:?} is not valid"))
        .with_context("table", kind.table_name())
        .with_context("column", column.to_string())
}

fn get_datetime(row: &SqliteRow, kind: TableKind, column: &str) -> AppResult<chrono::NaiveDateTime> {
    let raw: String = row.try_get(column)?;
    parse_datetime(&raw).ok_or_else(|| decode_error(kind, column, &raw))
}

fn get_iso(row: &SqliteRow, kind: TableKind, column: &str) -> AppResult<chrono::NaiveDateTime> {
    let raw: String = row.try_get(column)?;
    parse_iso_local(&raw).ok_or_else(|| decode_error(kind, column, &raw))
}

fn get_enum<T: std::str::FromStr>(row: &SqliteRow, kind: TableKind, column: &str) -> AppResult<T> {
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|_| decode_error(kind, column, &raw))
}

fn decode_row(kind: TableKind, row: &SqliteRow) -> AppResult<Record> {
    let record = match kind {
        TableKind::Meal => Record::Meal(Meal {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            serving_size_value: row.try_get("serving_size_value")?,
            serving_size_unit: get_enum(row, kind, "serving_size_unit")?,
            calories: row.try_get("calories")?,
            protein: row.try_get("protein")?,
            carbs: row.try_get("carbs")?,
            fat: row.try_get("fat")?,
            fiber: row.try_get("fiber")?,
            sugar: row.try_get("sugar")?,
            sodium: row.try_get("sodium")?,
            local_image_path: row.try_get("local_image_path")?,
            is_favorite: row.try_get::<i64, _>("is_favorite")? != 0,
            created_at: get_datetime(row, kind, "created_at")?,
        }),
        TableKind::Exercise => Record::Exercise(Exercise {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            category: get_enum(row, kind, "category")?,
            muscle_groups: split_list(&row.try_get::<String, _>("muscle_groups")?),
            image_paths: split_list(&row.try_get::<String, _>("image_paths")?),
            is_favorite: row.try_get::<i64, _>("is_favorite")? != 0,
            created_at: get_datetime(row, kind, "created_at")?,
        }),
        TableKind::Pill => Record::Pill(Pill {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            dosage: row.try_get("dosage")?,
            notes: row.try_get("notes")?,
            created_at: get_datetime(row, kind, "created_at")?,
        }),
        TableKind::Tag => Record::Tag(Tag {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            color: row.try_get("color")?,
            created_at: get_datetime(row, kind, "created_at")?,
        }),
        TableKind::UserGoal => Record::UserGoal(UserGoal {
            id: row.try_get("id")?,
            daily_calories: row.try_get("daily_calories")?,
            daily_protein: row.try_get("daily_protein")?,
            daily_carbs: row.try_get("daily_carbs")?,
            daily_fat: row.try_get("daily_fat")?,
            daily_sodium: row.try_get("daily_sodium")?,
            target_weight: row.try_get("target_weight")?,
            updated_at: get_datetime(row, kind, "updated_at")?,
        }),
        TableKind::MealCheckIn => {
            let raw_date: String = row.try_get("check_in_date")?;
            Record::MealCheckIn(MealCheckIn {
                id: row.try_get("id")?,
                meal_id: row.try_get("meal_id")?,
                meal_type: get_enum(row, kind, "meal_type")?,
                servings_multiplier: row.try_get("servings_multiplier")?,
                check_in_date: parse_date(&raw_date)
                    .ok_or_else(|| decode_error(kind, "check_in_date", &raw_date))?,
                check_in_date_time: get_datetime(row, kind, "check_in_date_time")?,
                notes: row.try_get("notes")?,
            })
        }
        TableKind::ExerciseLog => Record::ExerciseLog(ExerciseLog {
            id: row.try_get("id")?,
            exercise_id: row.try_get("exercise_id")?,
            weight: row.try_get("weight")?,
            reps: row.try_get("reps")?,
            sets: row.try_get("sets")?,
            duration_minutes: row.try_get("duration_minutes")?,
            notes: row.try_get("notes")?,
            logged_at: get_iso(row, kind, "logged_at")?,
        }),
        TableKind::PillCheckIn => Record::PillCheckIn(PillCheckIn {
            id: row.try_get("id")?,
            pill_id: row.try_get("pill_id")?,
            taken_at: get_iso(row, kind, "taken_at")?,
        }),
        TableKind::MealTag => Record::MealTag(MealTag {
            meal_id: row.try_get("meal_id")?,
            tag_id: row.try_get("tag_id")?,
        }),
        TableKind::ExerciseTag => Record::ExerciseTag(ExerciseTag {
            exercise_id: row.try_get("exercise_id")?,
            tag_id: row.try_get("tag_id")?,
        }),
    };
    Ok(record)
}

#[async_trait]
impl Store for SqliteStore {
    async fn fetch_all(&self, kind: TableKind) -> AppResult<Vec<Record>> {
        let rows = sqlx::query(&select_sql(kind))
            .fetch_all(&self.pool)
            .await
            .map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "store_fetch_all")
                    .with_context("table", kind.table_name())
            })?;
        rows.iter().map(|row| decode_row(kind, row)).collect()
    }

    async fn begin(&self, kind: TableKind) -> AppResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await.map_err(|err| {
            AppError::from(err)
                .with_context("operation", "store_begin")
                .with_context("table", kind.table_name())
        })?;
        debug!(target: "nutrilog", event = "store_unit_begin", table = kind.table_name());
        Ok(Box::new(SqliteUnit { kind, tx: Some(tx) }))
    }
}

struct SqliteUnit {
    kind: TableKind,
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteUnit {
    fn check_kind(&self, record: &Record) -> AppResult<()> {
        if record.kind() != self.kind {
            return Err(AppError::new(
                "STORE/KIND_MISMATCH",
                "Record does not belong to this unit of work",
            )
            .with_context("expected", self.kind.table_name())
            .with_context("actual", record.kind().table_name()));
        }
        Ok(())
    }

    fn tx(&mut self) -> AppResult<&mut Transaction<'static, Sqlite>> {
        self.tx.as_mut().ok_or_else(|| {
            AppError::new("STORE/UNIT_CLOSED", "Unit of work already committed")
                .with_context("table", self.kind.table_name())
        })
    }
}

#[async_trait]
impl UnitOfWork for SqliteUnit {
    async fn insert(&mut self, record: &Record) -> AppResult<Option<i64>> {
        self.check_kind(record)?;
        let pairs = record_values(record);
        let columns: Vec<&str> = pairs.iter().map(|(c, _)| *c).collect();
        let values: Vec<SqlValue> = pairs.into_iter().map(|(_, v)| v).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            physical_table(self.kind),
            columns.join(", "),
            placeholders(values.len())
        );
        let owns_key = self.kind.owns_primary_key();
        let tx = self.tx()?;
        let result = bind_values(sqlx::query(&sql), &values)
            .execute(&mut **tx)
            .await?;
        Ok(owns_key.then(|| result.last_insert_rowid()))
    }

    async fn upsert(&mut self, record: &Record) -> AppResult<()> {
        self.check_kind(record)?;
        let pairs = record_values(record);
        let mut columns: Vec<&str> = pairs.iter().map(|(c, _)| *c).collect();
        let mut values: Vec<SqlValue> = pairs.into_iter().map(|(_, v)| v).collect();
        let conflict = match record.id() {
            Some(id) => {
                let updates = columns
                    .iter()
                    .map(|c| format!("{c} = excluded.{c}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                columns.insert(0, "id");
                values.insert(0, int(id));
                format!("ON CONFLICT(id) DO UPDATE SET {updates}")
            }
            None => "ON CONFLICT DO NOTHING".to_string(),
        };
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) {}",
            physical_table(self.kind),
            columns.join(", "),
            placeholders(values.len()),
            conflict
        );
        let tx = self.tx()?;
        bind_values(sqlx::query(&sql), &values)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn commit(&mut self) -> AppResult<()> {
        let tx = self.tx.take().ok_or_else(|| {
            AppError::new("STORE/UNIT_CLOSED", "Unit of work already committed")
                .with_context("table", self.kind.table_name())
        })?;
        tx.commit().await.map_err(|err| {
            warn!(target: "nutrilog", event = "store_unit_commit_failed", table = self.kind.table_name(), error = %err);
            AppError::from(err).with_context("table", self.kind.table_name())
        })?;
        debug!(target: "nutrilog", event = "store_unit_commit", table = self.kind.table_name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_pool;
    use crate::model::ServingUnit;

    fn meal(name: &str) -> Record {
        Record::Meal(Meal {
            id: 42,
            name: name.to_string(),
            serving_size_value: 100.0,
            serving_size_unit: ServingUnit::Gram,
            calories: 250.0,
            protein: 10.0,
            carbs: 30.0,
            fat: 5.0,
            fiber: Some(4.0),
            sugar: None,
            sodium: 0.2,
            local_image_path: None,
            is_favorite: true,
            created_at: parse_datetime("2024-01-02 03:04:05").expect("datetime"),
        })
    }

    #[tokio::test]
    async fn insert_assigns_fresh_identifier() {
        let store = SqliteStore::new(open_memory_pool().await.expect("pool"));
        let mut unit = store.begin(TableKind::Meal).await.expect("begin");
        let first = unit.insert(&meal("Oats")).await.expect("insert");
        let second = unit.insert(&meal("Rice")).await.expect("insert");
        unit.commit().await.expect("commit");

        assert_eq!(first, Some(1));
        assert_eq!(second, Some(2));
        let all = store.fetch_all(TableKind::Meal).await.expect("fetch");
        assert_eq!(all.len(), 2);
        match &all[0] {
            Record::Meal(m) => {
                assert_eq!(m.id, 1);
                assert_eq!(m.name, "Oats");
                assert!(m.is_favorite);
                assert_eq!(m.fiber, Some(4.0));
                assert_eq!(m.sugar, None);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_insert_leaves_unit_usable() {
        let store = SqliteStore::new(open_memory_pool().await.expect("pool"));
        let mut unit = store.begin(TableKind::PillCheckIn).await.expect("begin");
        let orphan = Record::PillCheckIn(PillCheckIn {
            id: 1,
            pill_id: 404,
            taken_at: parse_iso_local("2024-01-01T08:00:00").expect("iso"),
        });
        assert!(unit.insert(&orphan).await.is_err());
        unit.commit().await.expect("commit after failed row");
    }

    #[tokio::test]
    async fn junction_upsert_is_idempotent() {
        let store = SqliteStore::new(open_memory_pool().await.expect("pool"));
        let mut meals = store.begin(TableKind::Meal).await.expect("begin");
        let meal_id = meals.insert(&meal("Oats")).await.expect("meal").expect("id");
        meals.commit().await.expect("commit");

        let mut tags = store.begin(TableKind::Tag).await.expect("begin");
        let tag_id = tags
            .insert(&Record::Tag(Tag {
                id: 9,
                name: "breakfast".into(),
                color: None,
                created_at: parse_datetime("2024-01-02 03:04:05").expect("datetime"),
            }))
            .await
            .expect("tag")
            .expect("id");
        tags.commit().await.expect("commit");

        let link = Record::MealTag(MealTag { meal_id, tag_id });
        let mut unit = store.begin(TableKind::MealTag).await.expect("begin");
        assert_eq!(unit.insert(&link).await.expect("insert"), None);
        unit.upsert(&link).await.expect("upsert duplicate");
        unit.commit().await.expect("commit");
        assert_eq!(store.fetch_all(TableKind::MealTag).await.expect("fetch").len(), 1);
    }

    #[tokio::test]
    async fn kind_mismatch_is_rejected() {
        let store = SqliteStore::new(open_memory_pool().await.expect("pool"));
        let mut unit = store.begin(TableKind::Tag).await.expect("begin");
        let err = unit.insert(&meal("Oats")).await.expect_err("mismatch");
        assert_eq!(err.code(), "STORE/KIND_MISMATCH");
    }
}
