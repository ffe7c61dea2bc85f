//! The set-log form and its prefill rules.
//!
//! When the exercise name changes, the next set number is derived from the
//! most recently added set of that exercise in the session. Weight, reps and
//! RPE are left alone, so the previous submission's values act as sticky
//! defaults for the next set.

use std::str::FromStr;

use crate::error::ValidationError;
use crate::model::{SetFields, WorkoutSet};

/// Next set number for `exercise_name`: one past the set number of the
/// latest matching set (by insertion order, case-sensitive), or 1.
/// Surrounding whitespace is not part of the name.
pub fn next_set_number(sets: &[WorkoutSet], exercise_name: &str) -> u32 {
    let exercise_name = exercise_name.trim();
    sets.iter()
        .rev()
        .find(|s| s.exercise_name.trim() == exercise_name)
        .map_or(1, |last| last.set_number + 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    ExerciseName,
    Weight,
    Reps,
    Rpe,
    SetNumber,
}

impl FormField {
    pub const ALL: [FormField; 5] = [
        FormField::ExerciseName,
        FormField::Weight,
        FormField::Reps,
        FormField::Rpe,
        FormField::SetNumber,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FormField::ExerciseName => "Exercise",
            FormField::Weight => "Weight (kg)",
            FormField::Reps => "Reps",
            FormField::Rpe => "RPE",
            FormField::SetNumber => "Set",
        }
    }

    fn index(&self) -> usize {
        Self::ALL.iter().position(|f| f == self).unwrap_or(0)
    }

    pub fn next(&self) -> FormField {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    pub fn prev(&self) -> FormField {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    fn accepts(&self, c: char) -> bool {
        match self {
            FormField::ExerciseName => !c.is_control(),
            FormField::Weight => c.is_ascii_digit() || c == '.',
            FormField::Reps | FormField::Rpe | FormField::SetNumber => c.is_ascii_digit(),
        }
    }
}

/// Text buffers behind the set-log form.
#[derive(Debug, Clone, PartialEq)]
pub struct SetForm {
    pub exercise_name: String,
    pub weight: String,
    pub reps: String,
    pub rpe: String,
    pub set_number: String,
    /// Captured from the set clock when the set is completed.
    pub duration_secs: u64,
    pub focus: FormField,
}

impl Default for SetForm {
    fn default() -> Self {
        Self::new(Some(8))
    }
}

impl SetForm {
    pub fn new(default_rpe: Option<u8>) -> Self {
        Self {
            exercise_name: String::new(),
            weight: "0".to_string(),
            reps: "0".to_string(),
            rpe: default_rpe.map(|r| r.to_string()).unwrap_or_default(),
            set_number: "1".to_string(),
            duration_secs: 0,
            focus: FormField::ExerciseName,
        }
    }

    pub fn value(&self, field: FormField) -> &str {
        match field {
            FormField::ExerciseName => &self.exercise_name,
            FormField::Weight => &self.weight,
            FormField::Reps => &self.reps,
            FormField::Rpe => &self.rpe,
            FormField::SetNumber => &self.set_number,
        }
    }

    fn value_mut(&mut self, field: FormField) -> &mut String {
        match field {
            FormField::ExerciseName => &mut self.exercise_name,
            FormField::Weight => &mut self.weight,
            FormField::Reps => &mut self.reps,
            FormField::Rpe => &mut self.rpe,
            FormField::SetNumber => &mut self.set_number,
        }
    }

    pub fn focus_next(&mut self) {
        self.focus = self.focus.next();
    }

    pub fn focus_prev(&mut self) {
        self.focus = self.focus.prev();
    }

    /// Type into the focused field. Returns true when the exercise name
    /// changed and the caller should re-run prefill.
    pub fn push_char(&mut self, c: char) -> bool {
        let field = self.focus;
        if !field.accepts(c) {
            return false;
        }
        let buf = self.value_mut(field);
        // Numeric fields start at "0"; typing replaces the placeholder.
        if field != FormField::ExerciseName && buf == "0" && c != '.' {
            buf.clear();
        }
        buf.push(c);
        field == FormField::ExerciseName
    }

    /// Delete from the focused field. Same return contract as `push_char`.
    pub fn backspace(&mut self) -> bool {
        let field = self.focus;
        let changed = self.value_mut(field).pop().is_some();
        changed && field == FormField::ExerciseName
    }

    pub fn set_value(&mut self, field: FormField, value: impl Into<String>) {
        *self.value_mut(field) = value.into();
    }

    /// Replace the exercise name and re-run prefill against `sets`.
    pub fn set_exercise_name(&mut self, name: impl Into<String>, sets: &[WorkoutSet]) {
        self.exercise_name = name.into();
        self.apply_prefill(sets);
    }

    /// Recompute the set number for the current exercise name. An empty
    /// name leaves the form untouched.
    pub fn apply_prefill(&mut self, sets: &[WorkoutSet]) {
        if self.exercise_name.trim().is_empty() {
            return;
        }
        self.set_number = next_set_number(sets, &self.exercise_name).to_string();
    }

    /// Parse and validate the buffers into a submittable record.
    pub fn to_fields(&self) -> Result<SetFields, ValidationError> {
        let rpe = match self.rpe.trim() {
            "" => None,
            text => Some(parse_field::<u8>("RPE", text)?),
        };
        SetFields::new(
            self.exercise_name.as_str(),
            parse_field("set number", &self.set_number)?,
            parse_field("weight", &self.weight)?,
            parse_field("reps", &self.reps)?,
            rpe,
            self.duration_secs,
        )
    }
}

fn parse_field<T: FromStr>(field: &'static str, input: &str) -> Result<T, ValidationError> {
    input
        .trim()
        .parse::<T>()
        .map_err(|_| ValidationError::NotANumber {
            field,
            input: input.to_string(),
        })
}
