//! Workout catalog: the read-only source of planned exercises.
//!
//! The engine only ever asks the catalog two things, which workout exists
//! and what is planned at a given position. Authoring plans happens
//! elsewhere; this module ships a small built-in catalog.

use crate::types::*;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

/// Read-only lookup of workout plans
pub trait WorkoutCatalog {
    fn workout(&self, workout_id: &str) -> Option<&WorkoutPlan>;

    fn planned_exercise(&self, workout_id: &str, order_index: usize) -> Option<&PlannedExercise> {
        self.workout(workout_id)?
            .exercises
            .iter()
            .find(|e| e.order_index == order_index)
    }
}

impl<T: WorkoutCatalog + ?Sized> WorkoutCatalog for &T {
    fn workout(&self, workout_id: &str) -> Option<&WorkoutPlan> {
        (**self).workout(workout_id)
    }
}

/// Map-backed catalog
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    pub workouts: HashMap<String, WorkoutPlan>,
}

impl WorkoutCatalog for StaticCatalog {
    fn workout(&self, workout_id: &str) -> Option<&WorkoutPlan> {
        self.workouts.get(workout_id)
    }
}

/// Cached default catalog - built once and reused across all operations
static DEFAULT_CATALOG: Lazy<StaticCatalog> = Lazy::new(build_default_catalog_internal);

/// Get a reference to the cached default catalog
pub fn get_default_catalog() -> &'static StaticCatalog {
    &DEFAULT_CATALOG
}

/// Builds the default catalog of built-in workouts
///
/// **Note**: For production use, prefer `get_default_catalog()` which returns a
/// cached reference. This function is retained for testing and custom catalog creation.
pub fn build_default_catalog() -> StaticCatalog {
    build_default_catalog_internal()
}

fn reps(
    exercise_id: &str,
    name: &str,
    order_index: usize,
    target_sets: u32,
    target_reps: u32,
    rest_seconds: u32,
) -> PlannedExercise {
    PlannedExercise {
        exercise_id: exercise_id.into(),
        name: name.into(),
        order_index,
        target_sets,
        target_reps: Some(target_reps),
        target_duration_seconds: None,
        rest_seconds,
    }
}

fn timed(
    exercise_id: &str,
    name: &str,
    order_index: usize,
    target_sets: u32,
    seconds: u32,
    rest_seconds: u32,
) -> PlannedExercise {
    PlannedExercise {
        exercise_id: exercise_id.into(),
        name: name.into(),
        order_index,
        target_sets,
        target_reps: None,
        target_duration_seconds: Some(seconds),
        rest_seconds,
    }
}

fn build_default_catalog_internal() -> StaticCatalog {
    let plans = vec![
        WorkoutPlan {
            id: "full_body_a".into(),
            name: "Full Body A".into(),
            exercises: vec![
                reps("goblet_squat", "Goblet Squat", 0, 3, 10, 90),
                reps("push_up", "Push-up", 1, 3, 12, 60),
                reps("kb_row", "Kettlebell Row", 2, 3, 10, 90),
            ],
        },
        WorkoutPlan {
            id: "upper_push".into(),
            name: "Upper Push".into(),
            exercises: vec![
                reps("bench_press", "Bench Press", 0, 4, 8, 120),
                reps("overhead_press", "Overhead Press", 1, 3, 8, 120),
                reps("dip", "Dip", 2, 3, 10, 90),
                timed("plank", "Plank", 3, 2, 60, 45),
            ],
        },
        WorkoutPlan {
            id: "mobility_flow".into(),
            name: "Mobility Flow".into(),
            exercises: vec![
                timed("hip_cars", "Hip CARs", 0, 1, 120, 15),
                timed("shoulder_cars", "Shoulder CARs", 1, 1, 120, 15),
            ],
        },
    ];

    StaticCatalog::from_plans(plans)
}

impl StaticCatalog {
    pub fn from_plans(plans: impl IntoIterator<Item = WorkoutPlan>) -> Self {
        Self {
            workouts: plans.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// Merge extra plans over this catalog; same id replaces the built-in
    pub fn with_custom(mut self, plans: &[WorkoutPlan]) -> Self {
        for plan in plans {
            if self.workouts.contains_key(&plan.id) {
                tracing::info!("Custom workout '{}' overrides built-in plan", plan.id);
            }
            self.workouts.insert(plan.id.clone(), plan.clone());
        }
        self
    }

    /// Workout ids in sorted order, for stable listings
    pub fn workout_ids(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.workouts.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Validate the catalog for consistency and completeness
    ///
    /// Returns a list of validation errors, or empty Vec if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (id, plan) in &self.workouts {
            if id.is_empty() || plan.id.is_empty() {
                errors.push("Workout has empty ID".to_string());
            }
            if id != &plan.id {
                errors.push(format!(
                    "Workout key '{}' doesn't match plan.id '{}'",
                    id, plan.id
                ));
            }
            if plan.name.is_empty() {
                errors.push(format!("Workout '{}' has empty name", id));
            }

            let mut seen = HashSet::new();
            for (position, exercise) in plan.exercises.iter().enumerate() {
                if exercise.exercise_id.is_empty() {
                    errors.push(format!(
                        "Workout '{}': exercise at position {} has empty ID",
                        id, position
                    ));
                }
                if !seen.insert(exercise.order_index) {
                    errors.push(format!(
                        "Workout '{}': duplicate order_index {}",
                        id, exercise.order_index
                    ));
                }
                if exercise.order_index != position {
                    errors.push(format!(
                        "Workout '{}': exercise '{}' has order_index {} at position {}",
                        id, exercise.exercise_id, exercise.order_index, position
                    ));
                }
                if exercise.target_sets == 0 {
                    errors.push(format!(
                        "Workout '{}': exercise '{}' targets zero sets",
                        id, exercise.exercise_id
                    ));
                }
                if exercise.target_reps.is_none() && exercise.target_duration_seconds.is_none() {
                    errors.push(format!(
                        "Workout '{}': exercise '{}' has neither reps nor duration",
                        id, exercise.exercise_id
                    ));
                }
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_loads() {
        let catalog = build_default_catalog();
        assert_eq!(catalog.workouts.len(), 3);
        assert_eq!(
            catalog.workout_ids(),
            vec!["full_body_a", "mobility_flow", "upper_push"]
        );
    }

    #[test]
    fn test_planned_exercise_lookup() {
        let catalog = get_default_catalog();
        let ex = catalog.planned_exercise("full_body_a", 1).unwrap();
        assert_eq!(ex.exercise_id, "push_up");
        assert!(catalog.planned_exercise("full_body_a", 3).is_none());
        assert!(catalog.planned_exercise("missing", 0).is_none());
    }

    #[test]
    fn test_default_catalog_validates() {
        let catalog = build_default_catalog();
        let errors = catalog.validate();
        assert!(
            errors.is_empty(),
            "Default catalog has validation errors: {:?}",
            errors
        );
    }

    #[test]
    fn test_validate_flags_bad_plan() {
        let catalog = StaticCatalog::from_plans(vec![WorkoutPlan {
            id: "broken".into(),
            name: "".into(),
            exercises: vec![PlannedExercise {
                exercise_id: "squat".into(),
                name: "Squat".into(),
                order_index: 2,
                target_sets: 0,
                target_reps: None,
                target_duration_seconds: None,
                rest_seconds: 60,
            }],
        }]);

        let errors = catalog.validate();
        assert_eq!(errors.len(), 4, "{:?}", errors);
    }

    #[test]
    fn test_with_custom_overrides() {
        let custom = WorkoutPlan {
            id: "full_body_a".into(),
            name: "My Full Body".into(),
            exercises: vec![reps("deadlift", "Deadlift", 0, 5, 5, 180)],
        };
        let catalog = build_default_catalog().with_custom(&[custom]);
        let plan = catalog.workout("full_body_a").unwrap();
        assert_eq!(plan.name, "My Full Body");
        assert_eq!(plan.total_sets(), 5);
    }
}
