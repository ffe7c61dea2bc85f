//! Post-workout statistics and feedback.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{SessionId, WorkoutSession, WorkoutSet};
use crate::util::format_weight;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkoutSummary {
    pub session_id: SessionId,
    pub title: String,
    pub duration_minutes: i64,
    pub total_sets: usize,
    pub total_volume: f64,
    pub max_weight: f64,
    pub top_exercise: Option<String>,
    pub total_rest_secs: u64,
}

impl WorkoutSummary {
    /// Aggregate a session. An unfinished session is measured up to `now`.
    pub fn from_session(session: &WorkoutSession, sets: &[WorkoutSet], now: DateTime<Utc>) -> Self {
        let end = session.ended_at.unwrap_or(now);
        let duration_minutes = (end - session.started_at).num_minutes().max(0);

        Self {
            session_id: session.id,
            title: session.display_title().to_string(),
            duration_minutes,
            total_sets: sets.len(),
            total_volume: sets.iter().map(WorkoutSet::volume).sum(),
            max_weight: sets.iter().map(|s| s.weight).fold(0.0, f64::max),
            top_exercise: most_frequent_exercise(sets),
            total_rest_secs: sets.iter().map(|s| s.rest_secs).sum(),
        }
    }
}

/// Exercise with the most sets; ties go to whichever appeared first.
pub fn most_frequent_exercise(sets: &[WorkoutSet]) -> Option<String> {
    let counts = sets.iter().map(|s| s.exercise_name.as_str()).counts();
    sets.iter()
        .map(|s| s.exercise_name.as_str())
        .unique()
        .fold(None::<(&str, usize)>, |best, name| {
            let count = counts.get(name).copied().unwrap_or(0);
            match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((name, count)),
            }
        })
        .map(|(name, _)| name.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub text: String,
    pub score: u8,
}

/// Produces a short written review of a finished workout.
pub trait FeedbackGenerator {
    fn generate(&self, summary: &WorkoutSummary) -> Result<Feedback, String>;
}

/// Deterministic feedback used when no generator is configured or the
/// configured one fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackFeedback;

impl FallbackFeedback {
    pub fn score(summary: &WorkoutSummary) -> u8 {
        let sets = summary.total_sets.min(8) as i64;
        let minutes = summary.duration_minutes.clamp(0, 60);
        let volume_bonus = if summary.total_volume > 0.0 { 10 } else { 0 };
        (40 + 5 * sets + minutes / 3 + volume_bonus).clamp(0, 100) as u8
    }
}

impl FeedbackGenerator for FallbackFeedback {
    fn generate(&self, summary: &WorkoutSummary) -> Result<Feedback, String> {
        let text = match (&summary.top_exercise, summary.total_sets) {
            (None, _) | (_, 0) => {
                "No sets logged this time. Showing up is the first rep, so come back and log a few next session."
                    .to_string()
            }
            (Some(top), sets) => format!(
                "Great work! {sets} sets in {} minutes, moving {}kg in total. {top} led the session.",
                summary.duration_minutes,
                format_weight(summary.total_volume),
            ),
        };

        Ok(Feedback {
            text,
            score: Self::score(summary),
        })
    }
}

/// Ask `generator`, falling back to [`FallbackFeedback`] on any failure.
pub fn feedback_or_fallback(
    generator: &dyn FeedbackGenerator,
    summary: &WorkoutSummary,
) -> Feedback {
    match generator.generate(summary) {
        Ok(feedback) => feedback,
        Err(e) => {
            warn!(session_id = %summary.session_id, error = %e, "feedback generator failed, using fallback");
            FallbackFeedback
                .generate(summary)
                .unwrap_or_else(|text| Feedback { text, score: 0 })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SessionStatus, SetId, UserId};
    use chrono::{Duration, TimeZone};

    fn session(minutes: i64) -> WorkoutSession {
        let started_at = Utc.with_ymd_and_hms(2024, 5, 1, 18, 0, 0).unwrap();
        WorkoutSession {
            id: SessionId::new_v4(),
            user_id: UserId::new("alice"),
            title: None,
            status: SessionStatus::Completed,
            started_at,
            ended_at: Some(started_at + Duration::minutes(minutes)),
        }
    }

    fn set(name: &str, weight: f64, reps: u32, rest_secs: u64) -> WorkoutSet {
        WorkoutSet {
            id: SetId::new_v4(),
            session_id: SessionId::new_v4(),
            exercise_name: name.into(),
            set_number: 1,
            weight,
            reps,
            rpe: None,
            duration_secs: 0,
            rest_secs,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn summary_aggregates_sets() {
        let session = session(45);
        let sets = vec![
            set("Squat", 100.0, 5, 90),
            set("Squat", 100.0, 5, 120),
            set("Bench Press", 60.0, 8, 0),
        ];
        let summary = WorkoutSummary::from_session(&session, &sets, Utc::now());

        assert_eq!(summary.title, "Workout");
        assert_eq!(summary.duration_minutes, 45);
        assert_eq!(summary.total_sets, 3);
        assert_eq!(summary.total_volume, 1480.0);
        assert_eq!(summary.max_weight, 100.0);
        assert_eq!(summary.top_exercise.as_deref(), Some("Squat"));
        assert_eq!(summary.total_rest_secs, 210);
    }

    #[test]
    fn empty_session_summary() {
        let summary = WorkoutSummary::from_session(&session(5), &[], Utc::now());
        assert_eq!(summary.total_sets, 0);
        assert_eq!(summary.total_volume, 0.0);
        assert_eq!(summary.max_weight, 0.0);
        assert_eq!(summary.top_exercise, None);
    }

    #[test]
    fn unfinished_session_measures_to_now() {
        let mut s = session(0);
        s.ended_at = None;
        let now = s.started_at + Duration::minutes(12) + Duration::seconds(59);
        let summary = WorkoutSummary::from_session(&s, &[], now);
        assert_eq!(summary.duration_minutes, 12);
    }

    #[test]
    fn most_frequent_ties_go_to_first_seen() {
        let sets = vec![
            set("Row", 50.0, 10, 0),
            set("Squat", 100.0, 5, 0),
            set("Squat", 100.0, 5, 0),
            set("Row", 50.0, 10, 0),
        ];
        assert_eq!(most_frequent_exercise(&sets).as_deref(), Some("Row"));
        assert_eq!(most_frequent_exercise(&[]), None);
    }

    #[test]
    fn fallback_score_formula() {
        let sets = vec![set("Squat", 100.0, 5, 0); 3];
        let summary = WorkoutSummary::from_session(&session(30), &sets, Utc::now());
        // 40 + 5*3 + 30/3 + 10
        assert_eq!(FallbackFeedback::score(&summary), 75);

        let many = vec![set("Squat", 100.0, 5, 0); 20];
        let summary = WorkoutSummary::from_session(&session(180), &many, Utc::now());
        // 40 + 5*8 + 60/3 + 10 = 110, clamped
        assert_eq!(FallbackFeedback::score(&summary), 100);

        let summary = WorkoutSummary::from_session(&session(0), &[], Utc::now());
        assert_eq!(FallbackFeedback::score(&summary), 40);
    }

    #[test]
    fn fallback_text_mentions_top_exercise() {
        let sets = vec![set("Squat", 100.0, 5, 0)];
        let summary = WorkoutSummary::from_session(&session(20), &sets, Utc::now());
        let feedback = FallbackFeedback.generate(&summary).unwrap();
        assert!(feedback.text.contains("Squat"));
        assert!(feedback.text.contains("500kg"));
    }

    struct Offline;

    impl FeedbackGenerator for Offline {
        fn generate(&self, _summary: &WorkoutSummary) -> Result<Feedback, String> {
            Err("service unavailable".into())
        }
    }

    #[test]
    fn generator_failure_uses_fallback() {
        let summary = WorkoutSummary::from_session(&session(10), &[], Utc::now());
        let feedback = feedback_or_fallback(&Offline, &summary);
        assert_eq!(feedback, FallbackFeedback.generate(&summary).unwrap());
    }
}
