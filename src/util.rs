/// Format seconds as `H:MM:SS`, dropping the hour segment while it is zero
/// (`MM:SS`).
pub fn format_hms(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    match hours {
        0 => format!("{minutes:02}:{seconds:02}"),
        h => format!("{h}:{minutes:02}:{seconds:02}"),
    }
}

/// Render a weight without a trailing `.0` for whole numbers.
pub fn format_weight(weight: f64) -> String {
    if (weight - weight.round()).abs() < f64::EPSILON {
        format!("{}", weight.round())
    } else {
        format!("{weight:.1}")
    }
}
