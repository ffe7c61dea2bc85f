use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;

/// Highest value on the perceived-exertion scale.
pub const MAX_RPE: u8 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(SessionId);
uuid_id!(SetId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

/// One continuous workout, from start to finish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub title: Option<String>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl WorkoutSession {
    pub fn is_in_progress(&self) -> bool {
        self.status == SessionStatus::InProgress
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Workout")
    }
}

/// A persisted set. Only `rest_secs` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSet {
    pub id: SetId,
    pub session_id: SessionId,
    pub exercise_name: String,
    pub set_number: u32,
    pub weight: f64,
    pub reps: u32,
    pub rpe: Option<u8>,
    pub duration_secs: u64,
    pub rest_secs: u64,
    pub created_at: DateTime<Utc>,
}

impl WorkoutSet {
    pub fn volume(&self) -> f64 {
        self.weight * self.reps as f64
    }

    pub fn fields(&self) -> SetFields {
        SetFields {
            exercise_name: self.exercise_name.clone(),
            set_number: self.set_number,
            weight: self.weight,
            reps: self.reps,
            rpe: self.rpe,
            duration_secs: self.duration_secs,
        }
    }
}

/// The values a user submits for one set.
///
/// Unsigned fields make negative reps/durations unrepresentable; the rest is
/// checked by [`SetFields::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetFields {
    pub exercise_name: String,
    pub set_number: u32,
    pub weight: f64,
    pub reps: u32,
    pub rpe: Option<u8>,
    pub duration_secs: u64,
}

impl SetFields {
    pub fn new(
        exercise_name: impl Into<String>,
        set_number: u32,
        weight: f64,
        reps: u32,
        rpe: Option<u8>,
        duration_secs: u64,
    ) -> Result<Self, ValidationError> {
        let fields = Self {
            exercise_name: exercise_name.into().trim().to_string(),
            set_number,
            weight,
            reps,
            rpe,
            duration_secs,
        };
        fields.validate()?;
        Ok(fields)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.exercise_name.trim().is_empty() {
            return Err(ValidationError::EmptyExerciseName);
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(ValidationError::InvalidWeight(self.weight));
        }
        if self.reps < 1 {
            return Err(ValidationError::RepsTooLow(self.reps));
        }
        if let Some(rpe) = self.rpe {
            if rpe > MAX_RPE {
                return Err(ValidationError::RpeOutOfRange(rpe));
            }
        }
        if self.set_number < 1 {
            return Err(ValidationError::SetNumberTooLow(self.set_number));
        }
        Ok(())
    }
}
