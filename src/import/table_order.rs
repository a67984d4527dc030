use crate::model::TableKind;

/// Replay order. Every parent kind precedes the kinds that reference it.
pub const IMPORT_ORDER: [TableKind; 10] = [
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

/// Parent kinds referenced by a kind's foreign-key columns.
pub(crate) fn parents(kind: TableKind) -> &'static [(&'static str, TableKind)] {
    match kind {
        TableKind::MealCheckIn => &[("mealId", TableKind::Meal)],
        TableKind::ExerciseLog => &[("exerciseId", TableKind::Exercise)],
        TableKind::PillCheckIn => &[("pillId", TableKind::Pill)],
        TableKind::MealTag => &[("mealId", TableKind::Meal), ("tagId", TableKind::Tag)],
        TableKind::ExerciseTag => &[("exerciseId", TableKind::Exercise), ("tagId", TableKind::Tag)],
        TableKind::Meal
        | TableKind::Exercise
        | TableKind::Pill
        | TableKind::Tag
        | TableKind::UserGoal => &[],
    }
}
