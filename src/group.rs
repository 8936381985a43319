//! Spawn-and-join task groups that keep the first error.

use std::any::Any;
use std::sync::{Arc, Mutex};
use std::thread::{self, Scope, ScopedJoinHandle};

use crate::error::{PipelineError, PipelineResult};
use crate::limiter::Limiter;

/// Runs tasks on scoped threads and remembers the first one that failed.
///
/// Siblings of a failing task keep running; their results are discarded.
/// [`TaskGroup::wait`] joins everything before reporting.
pub struct TaskGroup<'scope, 'env: 'scope> {
    scope: &'scope Scope<'scope, 'env>,
    handles: Vec<ScopedJoinHandle<'scope, ()>>,
    first_error: Arc<Mutex<Option<PipelineError>>>,
}

impl<'scope, 'env> TaskGroup<'scope, 'env> {
    pub fn new(scope: &'scope Scope<'scope, 'env>) -> Self {
        Self {
            scope,
            handles: Vec::new(),
            first_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawns `task`, keeping `guard` alive until the task's result has been
    /// recorded. Used to hold a limiter permit.
    pub fn spawn_holding<G, F>(&mut self, guard: G, task: F)
    where
        G: Send + 'scope,
        F: FnOnce() -> PipelineResult<()> + Send + 'scope,
    {
        let first_error = Arc::clone(&self.first_error);
        let handle = self.scope.spawn(move || {
            let _guard = guard;
            if let Err(err) = task() {
                record(&first_error, err);
            }
        });
        self.handles.push(handle);
    }

    /// Joins every task, then returns the first recorded error.
    pub fn wait(self) -> PipelineResult<()> {
        for handle in self.handles {
            if let Err(payload) = handle.join() {
                record(
                    &self.first_error,
                    PipelineError::TaskPanicked(panic_message(payload.as_ref())),
                );
            }
        }
        let mut slot = self
            .first_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match slot.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn record(slot: &Mutex<Option<PipelineError>>, err: PipelineError) {
    let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if guard.is_none() {
        *guard = Some(err);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// The fan-out every parallel stage uses: one task per item, each admitted
/// through `limiter` and holding its slot until it returns.
pub fn fan_out<T, I, F>(limiter: &Limiter, items: I, task: F) -> PipelineResult<()>
where
    I: IntoIterator<Item = T>,
    T: Send,
    F: Fn(T) -> PipelineResult<()> + Sync,
{
    let task = &task;
    thread::scope(|scope| {
        let mut group = TaskGroup::new(scope);
        for item in items {
            let permit = limiter.acquire();
            group.spawn_holding(permit, move || task(item));
        }
        group.wait()
    })
}
