//! The active-workout state machine.
//!
//! ```text
//!   ready --start_set--> executing --complete_set--> logging
//!     ^                                                 |
//!     |                                        begin_log_set + SetAdded(ok)
//!     +------------------ finish_rest <--- resting <----+
//! ```
//!
//! The controller never talks to storage itself. Actions that need the store
//! return a [`StoreCommand`]; the caller runs it (inline via [`execute`] or on
//! a worker thread) and feeds the [`StoreReply`] back through
//! [`WorkoutSessionController::on_store_reply`]. While a command is in flight
//! the controller is `pending` and refuses further submissions.

use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::error::{ControllerError, StoreError};
use crate::model::{SessionId, SetFields, SetId, WorkoutSession, WorkoutSet};
use crate::prefill::{FormField, SetForm};
use crate::store::WorkoutStore;
use crate::summary::WorkoutSummary;
use crate::timer::{Clock, PhaseTimers, TimerDisplay};

/// How long a notice stays on screen unless replaced.
pub const NOTICE_TTL_SECS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SessionPhase {
    Ready,
    Executing,
    Logging,
    Resting,
}

pub type RequestId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    AddSet {
        request_id: RequestId,
        session_id: SessionId,
        fields: SetFields,
    },
    UpdateRestTime {
        request_id: RequestId,
        session_id: SessionId,
        set_id: SetId,
        rest_secs: u64,
    },
    FinishSession {
        request_id: RequestId,
        session_id: SessionId,
    },
}

impl StoreCommand {
    pub fn request_id(&self) -> RequestId {
        match self {
            StoreCommand::AddSet { request_id, .. }
            | StoreCommand::UpdateRestTime { request_id, .. }
            | StoreCommand::FinishSession { request_id, .. } => *request_id,
        }
    }
}

/// Outcome of a [`StoreCommand`]. Successful writes carry the refreshed set
/// list so the controller resynchronises with what was stored.
#[derive(Debug)]
pub enum StoreReply {
    SetAdded {
        request_id: RequestId,
        result: Result<(SetId, Vec<WorkoutSet>), StoreError>,
    },
    RestTimeUpdated {
        request_id: RequestId,
        result: Result<Vec<WorkoutSet>, StoreError>,
    },
    SessionFinished {
        request_id: RequestId,
        result: Result<WorkoutSession, StoreError>,
    },
}

impl StoreReply {
    pub fn request_id(&self) -> RequestId {
        match self {
            StoreReply::SetAdded { request_id, .. }
            | StoreReply::RestTimeUpdated { request_id, .. }
            | StoreReply::SessionFinished { request_id, .. } => *request_id,
        }
    }
}

/// Run one command against a store.
pub fn execute<S: WorkoutStore + ?Sized>(store: &S, command: StoreCommand) -> StoreReply {
    match command {
        StoreCommand::AddSet {
            request_id,
            session_id,
            fields,
        } => StoreReply::SetAdded {
            request_id,
            result: store
                .add_set(session_id, &fields)
                .and_then(|id| Ok((id, store.list_sets(session_id)?))),
        },
        StoreCommand::UpdateRestTime {
            request_id,
            session_id,
            set_id,
            rest_secs,
        } => StoreReply::RestTimeUpdated {
            request_id,
            result: store
                .update_set_rest_time(set_id, rest_secs)
                .and_then(|()| store.list_sets(session_id)),
        },
        StoreCommand::FinishSession {
            request_id,
            session_id,
        } => StoreReply::SessionFinished {
            request_id,
            result: store.finish_session(session_id),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    AddSet,
    UpdateRestTime,
    FinishSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub request_id: RequestId,
    pub kind: PendingKind,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A dismissable message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// End rest automatically once it has run this long.
    pub auto_rest_secs: Option<u64>,
    /// Abandon an in-flight store call after this long.
    pub store_timeout_secs: u64,
    /// RPE the set form starts with.
    pub default_rpe: Option<u8>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            auto_rest_secs: None,
            store_timeout_secs: 15,
            default_rpe: Some(8),
        }
    }
}

/// Owns the phase, the timers and the set form for one active session.
#[derive(Debug)]
pub struct WorkoutSessionController<C: Clock> {
    session: WorkoutSession,
    sets: Vec<WorkoutSet>,
    phase: SessionPhase,
    form: SetForm,
    form_error: Option<String>,
    timers: PhaseTimers,
    last_set_id: Option<SetId>,
    pending: Option<Pending>,
    notice: Option<Notice>,
    finish_requested: bool,
    finished: bool,
    next_request_id: RequestId,
    settings: ControllerSettings,
    clock: C,
}

impl<C: Clock> WorkoutSessionController<C> {
    /// Take over an in-progress session. The phase always starts at `ready`,
    /// whatever the user was doing before a reload.
    pub fn new(
        session: WorkoutSession,
        sets: Vec<WorkoutSet>,
        clock: C,
        settings: ControllerSettings,
    ) -> Result<Self, ControllerError> {
        if !session.is_in_progress() {
            return Err(ControllerError::Finished);
        }
        let now = clock.now();
        info!(session_id = %session.id, sets = sets.len(), "controller attached to session");

        Ok(Self {
            timers: PhaseTimers::new(session.started_at, now),
            session,
            sets,
            phase: SessionPhase::Ready,
            form: SetForm::new(settings.default_rpe),
            form_error: None,
            last_set_id: None,
            pending: None,
            notice: None,
            finish_requested: false,
            finished: false,
            next_request_id: 1,
            settings,
            clock,
        })
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session(&self) -> &WorkoutSession {
        &self.session
    }

    pub fn sets(&self) -> &[WorkoutSet] {
        &self.sets
    }

    pub fn form(&self) -> &SetForm {
        &self.form
    }

    pub fn form_error(&self) -> Option<&str> {
        self.form_error.as_deref()
    }

    pub fn timers(&self) -> TimerDisplay {
        self.timers.display()
    }

    pub fn timer_state(&self) -> &PhaseTimers {
        &self.timers
    }

    pub fn last_set_id(&self) -> Option<SetId> {
        self.last_set_id
    }

    pub fn pending(&self) -> Option<Pending> {
        self.pending
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn finish_requested(&self) -> bool {
        self.finish_requested
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn settings(&self) -> ControllerSettings {
        self.settings
    }

    /// Statistics for the session as it stands now.
    pub fn summary(&self) -> WorkoutSummary {
        WorkoutSummary::from_session(&self.session, &self.sets, self.clock.now())
    }

    /// Sets grouped by exercise, in order of first appearance.
    pub fn grouped_sets(&self) -> Vec<(&str, Vec<&WorkoutSet>)> {
        self.sets
            .iter()
            .map(|s| s.exercise_name.as_str())
            .unique()
            .map(|name| {
                let group = self
                    .sets
                    .iter()
                    .filter(|s| s.exercise_name == name)
                    .collect::<Vec<_>>();
                (name, group)
            })
            .collect()
    }

    fn guard_active(&self) -> Result<(), ControllerError> {
        if self.finished {
            Err(ControllerError::Finished)
        } else {
            Ok(())
        }
    }

    fn expect_phase(
        &self,
        expected: SessionPhase,
        action: &'static str,
    ) -> Result<(), ControllerError> {
        self.guard_active()?;
        if self.phase != expected {
            return Err(ControllerError::InvalidTransition {
                from: self.phase,
                action,
            });
        }
        Ok(())
    }

    fn transition(&mut self, to: SessionPhase) {
        debug!(session_id = %self.session.id, from = %self.phase, to = %to, "phase transition");
        self.phase = to;
    }

    fn next_request(&mut self, kind: PendingKind) -> RequestId {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.pending = Some(Pending {
            request_id,
            kind,
            since: self.clock.now(),
        });
        request_id
    }

    fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
        self.notice = Some(Notice {
            level,
            message: message.into(),
            at: self.clock.now(),
        });
    }

    /// Error notice for a failed store call. Failures that may go away on
    /// their own say so.
    fn notify_store_failure(&mut self, what: &str, e: &StoreError) {
        let message = if e.is_transient() {
            format!("{what}: {e} (try again)")
        } else {
            format!("{what}: {e}")
        };
        self.notify(NoticeLevel::Error, message);
    }

    /// Surface an error raised outside the controller (e.g. a dead worker).
    pub fn report_error(&mut self, message: impl Into<String>) {
        self.notify(NoticeLevel::Error, message);
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    /// ready -> executing. Starts the set clock.
    pub fn start_set(&mut self) -> Result<(), ControllerError> {
        self.expect_phase(SessionPhase::Ready, "start a set")?;
        self.finish_requested = false;
        self.timers.start_set(self.clock.now());
        self.transition(SessionPhase::Executing);
        Ok(())
    }

    /// executing -> logging. The set clock's reading becomes the set's
    /// duration, and prefill runs for whatever exercise is in the form.
    pub fn complete_set(&mut self) -> Result<(), ControllerError> {
        self.expect_phase(SessionPhase::Executing, "complete a set")?;
        let duration = self.timers.stop_set(self.clock.now()).unwrap_or(0);
        self.form.duration_secs = duration;
        self.form.focus = FormField::ExerciseName;
        self.form.apply_prefill(&self.sets);
        self.form_error = None;
        self.transition(SessionPhase::Logging);
        Ok(())
    }

    fn expect_editable(&self) -> Result<(), ControllerError> {
        self.expect_phase(SessionPhase::Logging, "edit the set")
    }

    pub fn set_exercise_name(&mut self, name: impl Into<String>) -> Result<(), ControllerError> {
        self.expect_editable()?;
        self.form.set_exercise_name(name, &self.sets);
        Ok(())
    }

    pub fn set_field(
        &mut self,
        field: FormField,
        value: impl Into<String>,
    ) -> Result<(), ControllerError> {
        self.expect_editable()?;
        self.form.set_value(field, value);
        if field == FormField::ExerciseName {
            self.form.apply_prefill(&self.sets);
        }
        Ok(())
    }

    pub fn type_char(&mut self, c: char) -> Result<(), ControllerError> {
        self.expect_editable()?;
        if self.form.push_char(c) {
            self.form.apply_prefill(&self.sets);
        }
        Ok(())
    }

    pub fn backspace(&mut self) -> Result<(), ControllerError> {
        self.expect_editable()?;
        if self.form.backspace() {
            self.form.apply_prefill(&self.sets);
        }
        Ok(())
    }

    pub fn focus_next(&mut self) -> Result<(), ControllerError> {
        self.expect_editable()?;
        self.form.focus_next();
        Ok(())
    }

    pub fn focus_prev(&mut self) -> Result<(), ControllerError> {
        self.expect_editable()?;
        self.form.focus_prev();
        Ok(())
    }

    /// Validate the form and produce the add-set command. Validation errors
    /// are reported inline and keep the controller in `logging`.
    pub fn begin_log_set(&mut self) -> Result<StoreCommand, ControllerError> {
        self.expect_editable()?;
        if self.is_pending() {
            return Err(ControllerError::Pending);
        }

        let fields = match self.form.to_fields() {
            Ok(fields) => fields,
            Err(e) => {
                debug!(error = %e, "set form rejected");
                self.form_error = Some(e.to_string());
                return Err(e.into());
            }
        };
        self.form_error = None;

        let request_id = self.next_request(PendingKind::AddSet);
        Ok(StoreCommand::AddSet {
            request_id,
            session_id: self.session.id,
            fields,
        })
    }

    /// resting -> ready. Stops the rest clock and, if a set was just saved,
    /// returns the command that records the rest on it.
    pub fn finish_rest(&mut self) -> Result<Option<StoreCommand>, ControllerError> {
        self.expect_phase(SessionPhase::Resting, "end the rest")?;
        let rest_secs = self.timers.stop_rest(self.clock.now()).unwrap_or(0);
        self.transition(SessionPhase::Ready);

        let Some(set_id) = self.last_set_id.take() else {
            return Ok(None);
        };
        debug!(set_id = %set_id, rest_secs, "rest finished");
        let request_id = self.next_request(PendingKind::UpdateRestTime);
        Ok(Some(StoreCommand::UpdateRestTime {
            request_id,
            session_id: self.session.id,
            set_id,
            rest_secs,
        }))
    }

    /// Ask to end the workout. Only allowed from `ready`; the caller must
    /// then [`confirm_finish`](Self::confirm_finish) or cancel.
    pub fn request_finish(&mut self) -> Result<(), ControllerError> {
        self.guard_active()?;
        if self.phase != SessionPhase::Ready {
            return Err(ControllerError::FinishNotAllowed(self.phase));
        }
        self.finish_requested = true;
        Ok(())
    }

    pub fn cancel_finish(&mut self) {
        self.finish_requested = false;
    }

    pub fn confirm_finish(&mut self) -> Result<StoreCommand, ControllerError> {
        self.guard_active()?;
        if self.phase != SessionPhase::Ready {
            return Err(ControllerError::FinishNotAllowed(self.phase));
        }
        if !self.finish_requested {
            return Err(ControllerError::FinishNotConfirmed);
        }
        if self.is_pending() {
            return Err(ControllerError::Pending);
        }
        let request_id = self.next_request(PendingKind::FinishSession);
        Ok(StoreCommand::FinishSession {
            request_id,
            session_id: self.session.id,
        })
    }

    /// Apply the result of a store command.
    pub fn on_store_reply(&mut self, reply: StoreReply) {
        let current = self.pending.map(|p| p.request_id);
        if current != Some(reply.request_id()) {
            self.on_stale_reply(reply);
            return;
        }
        self.pending = None;

        match reply {
            StoreReply::SetAdded { result, .. } => match result {
                Ok((set_id, sets)) => self.on_set_added(set_id, sets),
                Err(e) => {
                    warn!(session_id = %self.session.id, error = %e, "saving set failed");
                    self.notify_store_failure("Set not saved", &e);
                }
            },
            StoreReply::RestTimeUpdated { result, .. } => match result {
                Ok(sets) => self.sets = sets,
                Err(e) => {
                    warn!(session_id = %self.session.id, error = %e, "recording rest failed");
                    self.notify_store_failure("Rest time not saved", &e);
                }
            },
            StoreReply::SessionFinished { result, .. } => match result {
                Ok(session) => {
                    info!(session_id = %session.id, "workout finished");
                    self.session = session;
                    self.finished = true;
                    self.finish_requested = false;
                    self.teardown();
                }
                Err(e) => {
                    warn!(session_id = %self.session.id, error = %e, "finishing workout failed");
                    self.finish_requested = false;
                    self.notify_store_failure("Could not finish workout", &e);
                }
            },
        }
    }

    fn on_set_added(&mut self, set_id: SetId, sets: Vec<WorkoutSet>) {
        let number = self
            .sets_with_id(&sets, set_id)
            .map(|s| s.set_number)
            .unwrap_or_default();
        self.sets = sets;
        self.last_set_id = Some(set_id);

        // Name, weight, reps and RPE stay as sticky defaults.
        self.form.duration_secs = 0;
        self.form.apply_prefill(&self.sets);

        self.timers.start_rest(self.clock.now());
        self.transition(SessionPhase::Resting);
        self.notify(
            NoticeLevel::Info,
            format!("Saved {} set {number}", self.form.exercise_name.trim()),
        );
    }

    fn sets_with_id<'a>(&self, sets: &'a [WorkoutSet], id: SetId) -> Option<&'a WorkoutSet> {
        sets.iter().find(|s| s.id == id)
    }

    /// A reply for a request we stopped waiting for. Writes still happened,
    /// so adopt the freshest set list and re-run prefill, but leave the phase
    /// alone.
    fn on_stale_reply(&mut self, reply: StoreReply) {
        debug!(request_id = reply.request_id(), "ignoring stale store reply");
        match reply {
            StoreReply::SetAdded {
                result: Ok((set_id, sets)),
                ..
            } => {
                let saved = self
                    .sets_with_id(&sets, set_id)
                    .map(|s| format!("{} set {}", s.exercise_name, s.set_number));
                self.sets = sets;
                self.form.apply_prefill(&self.sets);
                if let Some(saved) = saved {
                    info!(set_id = %set_id, "late reply: set was saved");
                    self.notify(NoticeLevel::Info, format!("Saved {saved} after all"));
                }
            }
            StoreReply::RestTimeUpdated {
                result: Ok(sets), ..
            } => {
                self.sets = sets;
                self.form.apply_prefill(&self.sets);
            }
            _ => {}
        }
    }

    /// Refresh clocks, expire old notices, time out stuck store calls and
    /// auto-end rest. May return a command for the caller to run.
    pub fn on_tick(&mut self) -> Option<StoreCommand> {
        if self.finished {
            return None;
        }
        let now = self.clock.now();
        self.timers.refresh(now);

        if let Some(notice) = &self.notice {
            if now - notice.at >= Duration::seconds(NOTICE_TTL_SECS) {
                self.notice = None;
            }
        }

        if let Some(pending) = self.pending {
            let timeout = Duration::seconds(self.settings.store_timeout_secs as i64);
            if now - pending.since >= timeout {
                warn!(request_id = pending.request_id, kind = ?pending.kind, "store call timed out");
                self.pending = None;
                if pending.kind == PendingKind::FinishSession {
                    self.finish_requested = false;
                }
                self.notify(NoticeLevel::Error, StoreError::Timeout.to_string());
            }
        }

        if self.phase == SessionPhase::Resting {
            if let Some(limit) = self.settings.auto_rest_secs {
                let rested = self.timers.phase_elapsed_secs(now).unwrap_or(0);
                if rested >= limit {
                    info!(rest_secs = rested, "rest period elapsed");
                    return self.finish_rest().ok().flatten();
                }
            }
        }
        None
    }

    /// Cancel every clock. Called when the session completes and when the
    /// screen goes away; unsaved phase state is dropped.
    pub fn teardown(&mut self) {
        self.timers.tear_down();
        self.pending = None;
    }

    /// Run `command` against `store` right away and apply the reply.
    pub fn run_inline<S: WorkoutStore + ?Sized>(&mut self, store: &S, command: StoreCommand) {
        let reply = execute(store, command);
        self.on_store_reply(reply);
    }

    /// Validate, save, and apply in one go.
    pub fn log_set<S: WorkoutStore + ?Sized>(&mut self, store: &S) -> Result<(), ControllerError> {
        let command = self.begin_log_set()?;
        self.run_inline(store, command);
        Ok(())
    }
}

impl<C: Clock> Drop for WorkoutSessionController<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}
