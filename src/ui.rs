use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget, Wrap},
};

use crate::app::{App, Screen};
use crate::controller::{NoticeLevel, SessionPhase, WorkoutSessionController};
use crate::prefill::FormField;
use crate::summary::{Feedback, WorkoutSummary};
use crate::timer::Clock;
use crate::util::{format_hms, format_weight};

const HORIZONTAL_MARGIN: u16 = 2;

impl<C: Clock> Widget for &App<C> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        match (self.screen, self.summary()) {
            (Screen::Summary, Some((summary, feedback))) => {
                render_summary(summary, feedback, area, buf)
            }
            _ => render_workout(&self.controller, area, buf),
        }
    }
}

fn bold() -> Style {
    Style::default().add_modifier(Modifier::BOLD)
}

fn dim() -> Style {
    Style::default().add_modifier(Modifier::DIM)
}

fn phase_color(phase: SessionPhase) -> Color {
    match phase {
        SessionPhase::Ready => Color::Cyan,
        SessionPhase::Executing => Color::Green,
        SessionPhase::Logging => Color::Yellow,
        SessionPhase::Resting => Color::Magenta,
    }
}

fn render_workout<C: Clock>(c: &WorkoutSessionController<C>, area: Rect, buf: &mut Buffer) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Length(9),
                Constraint::Min(3),
                Constraint::Length(1),
                Constraint::Length(1),
            ]
            .as_ref(),
        )
        .split(area);

    render_header(c, chunks[0], buf);
    render_phase(c, chunks[1], buf);
    render_sets(c, chunks[2], buf);

    if let Some(notice) = c.notice() {
        let color = match notice.level {
            NoticeLevel::Info => Color::Green,
            NoticeLevel::Error => Color::Red,
        };
        let mut spans = vec![Span::styled(
            notice.message.as_str(),
            Style::default().fg(color),
        )];
        if c.phase() != SessionPhase::Logging {
            spans.push(Span::styled("  (x) dismiss", dim()));
        }
        Paragraph::new(Line::from(spans)).render(chunks[3], buf);
    }

    Paragraph::new(Span::styled(key_hints(c), dim())).render(chunks[4], buf);
}

fn render_header<C: Clock>(c: &WorkoutSessionController<C>, area: Rect, buf: &mut Buffer) {
    let phase = c.phase();
    let line = Line::from(vec![
        Span::styled(c.session().display_title().to_string(), bold()),
        Span::raw("  "),
        Span::styled(format_hms(c.timers().workout_secs), bold()),
        Span::raw("  "),
        Span::styled(
            phase.to_string().to_uppercase(),
            bold().fg(phase_color(phase)),
        ),
        Span::styled(
            if c.is_pending() { "  saving..." } else { "" },
            dim(),
        ),
    ]);
    Paragraph::new(line)
        .block(Block::default().borders(Borders::BOTTOM))
        .render(area, buf);
}

fn render_phase<C: Clock>(c: &WorkoutSessionController<C>, area: Rect, buf: &mut Buffer) {
    let timers = c.timers();
    let lines = match c.phase() {
        SessionPhase::Ready => {
            if c.finish_requested() {
                vec![Line::from(Span::styled(
                    "Finish this workout? (y/n)",
                    bold().fg(Color::Yellow),
                ))]
            } else {
                vec![Line::from("Ready for the next set.")]
            }
        }
        SessionPhase::Executing => vec![
            Line::from("Set in progress"),
            Line::from(Span::styled(
                format_hms(timers.set_secs),
                bold().fg(Color::Green),
            )),
        ],
        SessionPhase::Logging => form_lines(c),
        SessionPhase::Resting => vec![
            Line::from("Resting"),
            Line::from(Span::styled(
                format_hms(timers.rest_secs),
                bold().fg(Color::Magenta),
            )),
        ],
    };

    Paragraph::new(lines)
        .alignment(if c.phase() == SessionPhase::Logging {
            Alignment::Left
        } else {
            Alignment::Center
        })
        .render(area, buf);
}

fn form_lines<C: Clock>(c: &WorkoutSessionController<C>) -> Vec<Line<'static>> {
    let form = c.form();
    let mut lines = vec![Line::from(vec![
        Span::raw("Duration  "),
        Span::styled(format_hms(form.duration_secs), bold()),
    ])];

    for field in FormField::ALL {
        let focused = form.focus == field;
        let value_style = if focused {
            bold().add_modifier(Modifier::UNDERLINED)
        } else {
            Style::default()
        };
        lines.push(Line::from(vec![
            Span::styled(if focused { "> " } else { "  " }, bold()),
            Span::raw(format!("{:<12}", field.label())),
            Span::styled(form.value(field).to_string(), value_style),
        ]));
    }

    if let Some(error) = c.form_error() {
        lines.push(Line::from(Span::styled(
            error.to_string(),
            Style::default().fg(Color::Red),
        )));
    }
    lines
}

fn render_sets<C: Clock>(c: &WorkoutSessionController<C>, area: Rect, buf: &mut Buffer) {
    let groups = c.grouped_sets();
    let mut lines = Vec::new();

    // Most recently started exercise on top.
    for (name, sets) in groups.iter().rev() {
        lines.push(Line::from(vec![
            Span::styled(name.to_string(), bold()),
            Span::styled(format!("  ({} sets)", sets.len()), dim()),
        ]));
        for set in sets {
            let rpe = set.rpe.map(|r| format!(" @{r}")).unwrap_or_default();
            lines.push(Line::from(format!(
                "  #{:<3} {}kg x {}{rpe}  set {}  rest {}",
                set.set_number,
                format_weight(set.weight),
                set.reps,
                format_hms(set.duration_secs),
                format_hms(set.rest_secs),
            )));
        }
    }

    if lines.is_empty() {
        lines.push(Line::from(Span::styled("No sets yet", dim())));
    }

    Paragraph::new(lines)
        .block(Block::default().borders(Borders::TOP).title("Sets"))
        .render(area, buf);
}

fn key_hints<C: Clock>(c: &WorkoutSessionController<C>) -> &'static str {
    match c.phase() {
        SessionPhase::Ready if c.finish_requested() => "(y)es finish / any key to cancel",
        SessionPhase::Ready => "(s)tart set / (f)inish workout / (esc)ape",
        SessionPhase::Executing => "(enter) complete set / (esc)ape",
        SessionPhase::Logging => "(tab) next field / (enter) save / (esc)ape",
        SessionPhase::Resting => "(enter) end rest / (esc)ape",
    }
}

fn render_summary(summary: &WorkoutSummary, feedback: &Feedback, area: Rect, buf: &mut Buffer) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .constraints(
            [
                Constraint::Length(9),
                Constraint::Min(3),
                Constraint::Length(1),
            ]
            .as_ref(),
        )
        .split(area);

    let stat = |label: &str, value: String| {
        Line::from(vec![
            Span::raw(format!("{label:<14}")),
            Span::styled(value, bold()),
        ])
    };
    let stats = vec![
        stat("Duration", format!("{} min", summary.duration_minutes)),
        stat("Sets", summary.total_sets.to_string()),
        stat("Volume", format!("{}kg", format_weight(summary.total_volume))),
        stat("Max weight", format!("{}kg", format_weight(summary.max_weight))),
        stat(
            "Top exercise",
            summary.top_exercise.clone().unwrap_or_else(|| "-".into()),
        ),
        stat("Total rest", format_hms(summary.total_rest_secs)),
        stat("Score", format!("{}/100", feedback.score)),
    ];
    Paragraph::new(stats)
        .block(
            Block::default()
                .borders(Borders::BOTTOM)
                .title(Span::styled(summary.title.clone(), bold())),
        )
        .render(chunks[0], buf);

    Paragraph::new(feedback.text.as_str())
        .style(Style::default().add_modifier(Modifier::ITALIC))
        .wrap(Wrap { trim: true })
        .render(chunks[1], buf);

    Paragraph::new(Span::styled("(q)uit", dim())).render(chunks[2], buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ControllerSettings, StoreReply};
    use crate::model::UserId;
    use crate::store::{SqliteWorkoutStore, WorkoutStore};
    use crate::timer::ManualClock;
    use chrono::{TimeZone, Utc};
    use ratatui::{backend::TestBackend, Terminal};
    use std::sync::Arc;

    fn app() -> (ManualClock, SqliteWorkoutStore, App<ManualClock>) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 18, 0, 0).unwrap());
        let store =
            SqliteWorkoutStore::open_in_memory(UserId::new("alice"), Arc::new(clock.clone()))
                .unwrap();
        let session = store.start_session(Some("Leg day")).unwrap();
        let controller =
            WorkoutSessionController::new(session, vec![], clock.clone(), ControllerSettings::default())
                .unwrap();
        (clock, store, App::new(controller))
    }

    fn draw(app: &App<ManualClock>) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 30)).unwrap();
        terminal
            .draw(|f| f.render_widget(app, f.area()))
            .unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|c| c.symbol())
            .collect()
    }

    #[test]
    fn ready_screen_shows_title_and_hints() {
        let (_clock, _store, app) = app();
        let content = draw(&app);
        assert!(content.contains("Leg day"));
        assert!(content.contains("READY"));
        assert!(content.contains("No sets yet"));
        assert!(content.contains("(s)tart set"));
    }

    #[test]
    fn executing_screen_shows_set_clock() {
        let (clock, _store, mut app) = app();
        app.controller.start_set().unwrap();
        clock.advance_secs(65);
        app.controller.on_tick();
        let content = draw(&app);
        assert!(content.contains("EXECUTING"));
        assert!(content.contains("01:05"));
    }

    #[test]
    fn logging_screen_shows_form_and_errors() {
        let (_clock, _store, mut app) = app();
        app.controller.start_set().unwrap();
        app.controller.complete_set().unwrap();
        let _ = app.controller.begin_log_set();
        let content = draw(&app);
        assert!(content.contains("Exercise"));
        assert!(content.contains("RPE"));
        assert!(content.contains("exercise name must not be empty"));
    }

    #[test]
    fn notice_offers_dismiss_outside_logging() {
        let (_clock, _store, mut app) = app();
        app.controller.report_error("store unavailable: offline");
        let content = draw(&app);
        assert!(content.contains("store unavailable: offline"));
        assert!(content.contains("(x) dismiss"));

        app.controller.start_set().unwrap();
        app.controller.complete_set().unwrap();
        assert!(!draw(&app).contains("(x) dismiss"));
    }

    #[test]
    fn summary_screen_after_finish() {
        let (_clock, store, mut app) = app();
        app.controller.request_finish().unwrap();
        let cmd = app.controller.confirm_finish().unwrap();
        let session = store.finish_session(app.controller.session().id).unwrap();
        app.handle_event(crate::runtime::AppEvent::Store(StoreReply::SessionFinished {
            request_id: cmd.request_id(),
            result: Ok(session),
        }));

        let content = draw(&app);
        assert!(content.contains("Duration"));
        assert!(content.contains("40/100"));
    }
}
