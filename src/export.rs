use std::io::Write;

use serde::Serialize;

use crate::model::WorkoutSet;

#[derive(Debug, Serialize)]
struct SetRow<'a> {
    set_number: u32,
    exercise_name: &'a str,
    weight: f64,
    reps: u32,
    rpe: Option<u8>,
    duration_secs: u64,
    rest_secs: u64,
    created_at: String,
}

impl<'a> From<&'a WorkoutSet> for SetRow<'a> {
    fn from(set: &'a WorkoutSet) -> Self {
        Self {
            set_number: set.set_number,
            exercise_name: &set.exercise_name,
            weight: set.weight,
            reps: set.reps,
            rpe: set.rpe,
            duration_secs: set.duration_secs,
            rest_secs: set.rest_secs,
            created_at: set.created_at.to_rfc3339(),
        }
    }
}

/// Write `sets` as CSV with a header row. An empty slice still gets the header.
pub fn write_sets_csv<W: Write>(writer: W, sets: &[WorkoutSet]) -> csv::Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    if sets.is_empty() {
        out.write_record([
            "set_number",
            "exercise_name",
            "weight",
            "reps",
            "rpe",
            "duration_secs",
            "rest_secs",
            "created_at",
        ])?;
    }
    for set in sets {
        out.serialize(SetRow::from(set))?;
    }
    out.flush()?;
    Ok(())
}
