use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::controller::{execute, StoreCommand};
use crate::error::StoreError;
use crate::runtime::AppEvent;
use crate::store::WorkoutStore;

/// Runs store commands off the UI thread and posts each reply back into the
/// event stream as [`AppEvent::Store`].
pub struct StoreWorker {
    commands: Option<Sender<StoreCommand>>,
    handle: Option<JoinHandle<()>>,
}

impl StoreWorker {
    pub fn spawn<S>(store: S, events: Sender<AppEvent>) -> Self
    where
        S: WorkoutStore + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<StoreCommand>();

        let handle = thread::spawn(move || {
            for command in rx {
                let request_id = command.request_id();
                debug!(request_id, "running store command");
                let reply = execute(&store, command);
                if events.send(AppEvent::Store(reply)).is_err() {
                    warn!(request_id, "event loop gone, dropping store reply");
                    break;
                }
            }
        });

        Self {
            commands: Some(tx),
            handle: Some(handle),
        }
    }

    pub fn submit(&self, command: StoreCommand) -> Result<(), StoreError> {
        let sender = self
            .commands
            .as_ref()
            .ok_or_else(|| StoreError::Unavailable("store worker stopped".into()))?;
        sender
            .send(command)
            .map_err(|_| StoreError::Unavailable("store worker stopped".into()))
    }
}

impl Drop for StoreWorker {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop.
        self.commands.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::StoreReply;
    use crate::model::{SetFields, UserId};
    use crate::store::SqliteWorkoutStore;
    use crate::timer::SystemClock;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn replies_arrive_as_events() {
        let store =
            SqliteWorkoutStore::open_in_memory(UserId::new("alice"), Arc::new(SystemClock)).unwrap();
        let session = store.start_session(None).unwrap();

        let (tx, rx) = mpsc::channel();
        let worker = StoreWorker::spawn(store, tx);
        let fields = SetFields::new("Squat", 1, 100.0, 5, Some(8), 20).unwrap();
        worker
            .submit(StoreCommand::AddSet {
                request_id: 7,
                session_id: session.id,
                fields,
            })
            .unwrap();

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_matches!(
            event,
            AppEvent::Store(StoreReply::SetAdded { request_id: 7, result: Ok((_, ref sets)) }) if sets.len() == 1
        );
    }

    #[test]
    fn store_errors_are_replies_not_panics() {
        let store =
            SqliteWorkoutStore::open_in_memory(UserId::new("alice"), Arc::new(SystemClock)).unwrap();
        let (tx, rx) = mpsc::channel();
        let worker = StoreWorker::spawn(store, tx);
        worker
            .submit(StoreCommand::FinishSession {
                request_id: 1,
                session_id: crate::model::SessionId::new_v4(),
            })
            .unwrap();

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_matches!(
            event,
            AppEvent::Store(StoreReply::SessionFinished {
                result: Err(StoreError::NotFound { .. }),
                ..
            })
        );
    }
}
