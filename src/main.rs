use clap::{error::ErrorKind, CommandFactory, Parser};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use std::{
    error::Error,
    io::{self, stdin},
    path::PathBuf,
    time::Duration,
};
use tracing::{info, warn};

use setlog::{
    app::App,
    app_dirs::AppDirs,
    config::{Config, ConfigStore, FileConfigStore},
    controller::{ControllerSettings, WorkoutSessionController},
    export::write_sets_csv,
    logging,
    model::{SessionId, UserId},
    runtime::{AppEventSource, CrosstermEventSource, FixedTicker, Runner, Ticker},
    store::{ActiveWorkoutRepository, SqliteWorkoutStore, WorkoutStore},
    summary::{FallbackFeedback, FeedbackGenerator, WorkoutSummary},
    timer::{Clock, SystemClock},
    util::{format_hms, format_weight},
    worker::StoreWorker,
};

const TICK_RATE_MS: u64 = 250;

/// terminal workout logger with set and rest timers
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Log strength training from the terminal: time each set, record weight, reps and RPE, and time the rest until the next one."
)]
pub struct Cli {
    /// owner of the sessions written by this run (overrides config)
    #[clap(short = 'u', long)]
    user: Option<String>,

    /// title for a newly started workout
    #[clap(short = 't', long)]
    title: Option<String>,

    /// end rest automatically after this many seconds (overrides config)
    #[clap(short = 'r', long)]
    rest_secs: Option<u64>,

    /// path to the workout database
    #[clap(long)]
    db: Option<PathBuf>,

    /// print a session's sets as CSV and exit
    #[clap(long, value_name = "SESSION_ID", conflicts_with = "summary")]
    export: Option<SessionId>,

    /// print a session's summary and exit
    #[clap(long, value_name = "SESSION_ID")]
    summary: Option<SessionId>,

    /// write the effective settings to the config file and exit
    #[clap(long)]
    save_config: bool,
}

impl Cli {
    /// Layer command line overrides on top of the stored config.
    fn apply_to(&self, mut config: Config) -> Config {
        if let Some(user) = &self.user {
            config.user = user.clone();
        }
        if let Some(secs) = self.rest_secs {
            config.auto_rest_secs = Some(secs);
        }
        config
    }

    fn db_path(&self) -> Option<PathBuf> {
        self.db.clone().or_else(AppDirs::db_path)
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config_store = FileConfigStore::new();
    let config = cli.apply_to(config_store.load());

    if cli.save_config {
        config_store.save(&config)?;
        println!("saved config to {}", config_store.path().display());
        return Ok(());
    }

    if let Some(log_path) = AppDirs::log_path() {
        if let Err(e) = logging::init(&log_path, &config.log_level) {
            eprintln!("logging disabled: {e}");
        }
    }

    let Some(db_path) = cli.db_path() else {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "could not determine a database path, pass --db")
            .exit();
    };
    let user = UserId::new(config.user.clone());
    let store = SqliteWorkoutStore::open(&db_path, user.clone())?;

    if let Some(id) = cli.export {
        let sets = store.sets_for_session(id)?;
        write_sets_csv(io::stdout().lock(), &sets)?;
        return Ok(());
    }

    if let Some(id) = cli.summary {
        print_summary(&store, id)?;
        return Ok(());
    }

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let session = match store.current_session()? {
        Some(session) => {
            info!(session_id = %session.id, "resuming workout");
            session
        }
        None => store.start_session(cli.title.as_deref())?,
    };
    let sets = store.sets_for_session(session.id)?;
    let controller = WorkoutSessionController::new(
        session,
        sets,
        SystemClock,
        ControllerSettings::from(&config),
    )?;
    let mut app = App::new(controller);

    let events = CrosstermEventSource::new();
    let worker = StoreWorker::spawn(SqliteWorkoutStore::open(&db_path, user)?, events.sender());
    let runner = Runner::new(events, FixedTicker::new(Duration::from_millis(TICK_RATE_MS)));

    enable_raw_mode()?;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = start_tui(&mut terminal, &mut app, &runner, &worker, &store);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn start_tui<B, E, T, C>(
    terminal: &mut Terminal<B>,
    app: &mut App<C>,
    runner: &Runner<E, T>,
    worker: &StoreWorker,
    store: &SqliteWorkoutStore,
) -> Result<(), Box<dyn Error>>
where
    B: Backend,
    E: AppEventSource,
    T: Ticker,
    C: Clock,
{
    loop {
        terminal.draw(|f| f.render_widget(&*app, f.area()))?;

        let event = runner.step();
        if let Some(command) = app.handle_event(event) {
            if let Err(e) = worker.submit(command) {
                app.controller.report_error(e.to_string());
            }
        }

        if let Some((session_id, feedback)) = app.take_unsaved_feedback() {
            if let Err(e) = store.save_feedback(session_id, &feedback) {
                warn!(session_id = %session_id, error = %e, "could not save feedback");
            }
        }

        if app.should_quit() {
            break;
        }
    }

    Ok(())
}

fn print_summary(store: &SqliteWorkoutStore, id: SessionId) -> Result<(), Box<dyn Error>> {
    let session = store.session(id)?;
    let sets = store.sets_for_session(id)?;
    let summary = WorkoutSummary::from_session(&session, &sets, SystemClock.now());
    let feedback = match store.feedback_for(id)? {
        Some(feedback) => feedback,
        None => FallbackFeedback
            .generate(&summary)
            .map_err(|e| format!("no feedback available: {e}"))?,
    };

    println!("{} ({})", summary.title, session.status);
    println!("duration:     {} min", summary.duration_minutes);
    println!("sets:         {}", summary.total_sets);
    println!("volume:       {}kg", format_weight(summary.total_volume));
    println!("max weight:   {}kg", format_weight(summary.max_weight));
    println!(
        "top exercise: {}",
        summary.top_exercise.as_deref().unwrap_or("-")
    );
    println!("total rest:   {}", format_hms(summary.total_rest_secs));
    println!("score:        {}/100", feedback.score);
    println!();
    println!("{}", feedback.text);
    Ok(())
}
