use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::debug;

use crate::controller::{SessionPhase, StoreCommand, WorkoutSessionController};
use crate::error::ControllerError;
use crate::model::SessionId;
use crate::runtime::AppEvent;
use crate::summary::{
    feedback_or_fallback, FallbackFeedback, Feedback, FeedbackGenerator, WorkoutSummary,
};
use crate::timer::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Workout,
    Summary,
}

/// Keyboard-facing shell around the session controller.
pub struct App<C: Clock> {
    pub controller: WorkoutSessionController<C>,
    pub screen: Screen,
    summary: Option<(WorkoutSummary, Feedback)>,
    unsaved_feedback: bool,
    feedback: Box<dyn FeedbackGenerator>,
    should_quit: bool,
}

impl<C: Clock> App<C> {
    pub fn new(controller: WorkoutSessionController<C>) -> Self {
        Self::with_feedback(controller, Box::new(FallbackFeedback))
    }

    pub fn with_feedback(
        controller: WorkoutSessionController<C>,
        feedback: Box<dyn FeedbackGenerator>,
    ) -> Self {
        Self {
            controller,
            screen: Screen::Workout,
            summary: None,
            unsaved_feedback: false,
            feedback,
            should_quit: false,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn summary(&self) -> Option<&(WorkoutSummary, Feedback)> {
        self.summary.as_ref()
    }

    /// Feedback produced for a just-finished session that has not been
    /// persisted yet. Returns it once.
    pub fn take_unsaved_feedback(&mut self) -> Option<(SessionId, Feedback)> {
        if !self.unsaved_feedback {
            return None;
        }
        self.unsaved_feedback = false;
        self.summary
            .as_ref()
            .map(|(summary, feedback)| (summary.session_id, feedback.clone()))
    }

    /// Feed one runtime event through the app. Any returned command must be
    /// run against the store and its reply fed back as [`AppEvent::Store`].
    pub fn handle_event(&mut self, event: AppEvent) -> Option<StoreCommand> {
        match event {
            AppEvent::Key(key) => self.handle_key(key),
            AppEvent::Tick => self.controller.on_tick(),
            AppEvent::Resize => None,
            AppEvent::Store(reply) => {
                self.controller.on_store_reply(reply);
                self.check_finished();
                None
            }
        }
    }

    fn check_finished(&mut self) {
        if self.controller.is_finished() && self.screen == Screen::Workout {
            let summary = self.controller.summary();
            let feedback = feedback_or_fallback(self.feedback.as_ref(), &summary);
            self.summary = Some((summary, feedback));
            self.unsaved_feedback = true;
            self.screen = Screen::Summary;
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<StoreCommand> {
        let ctrl_c =
            key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c');
        if key.code == KeyCode::Esc || ctrl_c {
            self.quit();
            return None;
        }

        if self.screen == Screen::Summary {
            if matches!(key.code, KeyCode::Enter | KeyCode::Char('q')) {
                self.quit();
            }
            return None;
        }

        // `x` is text while logging a set; elsewhere it clears the notice.
        let phase = self.controller.phase();
        if key.code == KeyCode::Char('x')
            && phase != SessionPhase::Logging
            && self.controller.notice().is_some()
        {
            self.controller.dismiss_notice();
            return None;
        }

        let result = match phase {
            SessionPhase::Ready => self.on_ready_key(key.code),
            SessionPhase::Executing => match key.code {
                KeyCode::Enter | KeyCode::Char(' ') => self.controller.complete_set().map(|_| None),
                _ => Ok(None),
            },
            SessionPhase::Logging => self.on_logging_key(key.code),
            SessionPhase::Resting => match key.code {
                KeyCode::Enter | KeyCode::Char(' ') => self.controller.finish_rest(),
                _ => Ok(None),
            },
        };

        match result {
            Ok(command) => command,
            // Shown inline next to the form.
            Err(ControllerError::Validation(_)) => None,
            Err(e) => {
                debug!(error = %e, "action rejected");
                self.controller.report_error(e.to_string());
                None
            }
        }
    }

    fn on_ready_key(&mut self, code: KeyCode) -> Result<Option<StoreCommand>, ControllerError> {
        if self.controller.finish_requested() {
            return match code {
                KeyCode::Char('y') => self.controller.confirm_finish().map(Some),
                _ => {
                    self.controller.cancel_finish();
                    Ok(None)
                }
            };
        }
        match code {
            KeyCode::Char('s') | KeyCode::Enter | KeyCode::Char(' ') => {
                self.controller.start_set().map(|_| None)
            }
            KeyCode::Char('f') => self.controller.request_finish().map(|_| None),
            _ => Ok(None),
        }
    }

    fn on_logging_key(&mut self, code: KeyCode) -> Result<Option<StoreCommand>, ControllerError> {
        let c = &mut self.controller;
        match code {
            KeyCode::Enter => c.begin_log_set().map(Some),
            KeyCode::Tab | KeyCode::Down => c.focus_next().map(|_| None),
            KeyCode::BackTab | KeyCode::Up => c.focus_prev().map(|_| None),
            KeyCode::Backspace => c.backspace().map(|_| None),
            KeyCode::Char(ch) => c.type_char(ch).map(|_| None),
            _ => Ok(None),
        }
    }

    fn quit(&mut self) {
        self.controller.teardown();
        self.should_quit = true;
    }
}
