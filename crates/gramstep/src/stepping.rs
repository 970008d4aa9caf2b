//! Single-stepping of pipeline runs.
//!
//! A pipeline runs on its own worker thread and calls [`Probe::report`] at
//! each named instrumentation [`Point`]. The owning [`Controller`] sets
//! breakpoints and switches the [`RunMode`]:
//!
//! * `Run`: keep going until a breakpoint is hit.
//! * `Pause`: stop at the next point, whatever it is.
//! * `Paused`: the worker is blocked inside `report` and a snapshot of its
//!   variables can be read with [`Controller::variables`].
//! * `Exit`: the worker stops at the next point it reaches and the run
//!   produces no result.
//!
//! Cancellation is cooperative. Exit is only observed inside `report`, so a
//! stage without instrumentation points runs to its end before the worker
//! notices.
//!
//! All of the state is guarded by one mutex and one condition variable; every
//! mode change wakes up every waiter.

use crate::types::Set;
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunMode {
    Run,
    Pause,
    Paused,
    Exit,
}

/// A named instrumentation point. `line` numbers the steps inside one
/// algorithm; `-1` marks its completion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub name: Cow<'static, str>,
    pub line: i32,
}

impl Point {
    pub const fn new(name: &'static str, line: i32) -> Self {
        Self {
            name: Cow::Borrowed(name),
            line,
        }
    }

    pub fn named(name: impl Into<String>, line: i32) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            line,
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.line)
    }
}

/// Copy of the pipeline variables taken when the worker paused.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub point: Point,
    pub variables: serde_json::Value,
}

/// Returned from [`Probe::report`] when the run has been told to exit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("pipeline halted at {point}")]
pub struct Halted {
    pub point: Point,
}

struct State<R> {
    mode: RunMode,
    breakpoints: Set<Point>,
    snapshot: Option<Snapshot>,
    result: Option<R>,
}

struct Shared<R> {
    state: Mutex<State<R>>,
    wakeup: Condvar,
}

impl<R> Shared<R> {
    fn lock(&self) -> MutexGuard<'_, State<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State<R>>) -> MutexGuard<'a, State<R>> {
        self.wakeup
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_mode(&self, mode: RunMode) {
        let mut state = self.lock();
        if state.mode != RunMode::Exit {
            state.mode = mode;
        }
        self.wakeup.notify_all();
    }
}

/// The worker-facing side of a controller.
trait Hook: Send + Sync {
    fn report(
        &self,
        point: Point,
        capture: &dyn Fn() -> serde_json::Value,
    ) -> Result<(), Halted>;
}

impl<R: Send> Hook for Shared<R> {
    fn report(
        &self,
        point: Point,
        capture: &dyn Fn() -> serde_json::Value,
    ) -> Result<(), Halted> {
        let mut state = self.lock();
        if state.mode == RunMode::Exit {
            return Err(Halted { point });
        }

        let hit = state.breakpoints.contains(&point);
        if hit || state.mode == RunMode::Pause {
            tracing::trace!(%point, hit, "paused");
            state.mode = RunMode::Paused;
            state.snapshot = Some(Snapshot {
                point: point.clone(),
                variables: capture(),
            });
            self.wakeup.notify_all();
            while state.mode == RunMode::Paused {
                state = self.wait(state);
            }
            state.snapshot = None;
        }

        match state.mode {
            RunMode::Exit => Err(Halted { point }),
            _ => Ok(()),
        }
    }
}

/// Handle through which a pipeline reports its progress.
///
/// A detached probe never pauses, which runs a pipeline straight through on
/// the calling thread.
#[derive(Clone, Default)]
pub struct Probe {
    hook: Option<Arc<dyn Hook>>,
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("attached", &self.hook.is_some())
            .finish()
    }
}

impl Probe {
    pub fn detached() -> Self {
        Self::default()
    }

    /// Report reaching `point`. Blocks while the run is paused. `vars` is
    /// only serialized if the run actually pauses here.
    pub fn report<V>(&self, point: Point, vars: &V) -> Result<(), Halted>
    where
        V: Serialize + ?Sized,
    {
        let Some(hook) = &self.hook else {
            return Ok(());
        };
        hook.report(point, &|| {
            serde_json::to_value(vars).unwrap_or_else(|err| {
                tracing::warn!("failed to capture variables: {}", err);
                serde_json::Value::Null
            })
        })
    }
}

/// Sets the mode to Exit when the worker finishes, even by panicking.
struct ExitGuard<R>(Arc<Shared<R>>);

impl<R> Drop for ExitGuard<R> {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.mode = RunMode::Exit;
        state.snapshot = None;
        self.0.wakeup.notify_all();
    }
}

/// Owner of one pipeline run on a worker thread.
///
/// Dropping the controller asks the worker to exit without waiting for it.
pub struct Controller<R> {
    shared: Arc<Shared<R>>,
    handle: Option<JoinHandle<()>>,
}

impl<R> fmt::Debug for Controller<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("mode", &self.shared.lock().mode)
            .finish()
    }
}

impl<R> Controller<R>
where
    R: Send + 'static,
{
    /// Start `run` on a new thread. The run starts in `Pause` mode, so it
    /// stops at its first instrumentation point.
    pub fn spawn<F>(run: F) -> Self
    where
        F: FnOnce(&Probe) -> Result<R, Halted> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                mode: RunMode::Pause,
                breakpoints: Set::default(),
                snapshot: None,
                result: None,
            }),
            wakeup: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        let handle = thread::spawn(move || {
            let guard = ExitGuard(Arc::clone(&worker));
            let probe = Probe {
                hook: Some(worker.clone() as Arc<dyn Hook>),
            };
            match run(&probe) {
                Ok(result) => worker.lock().result = Some(result),
                Err(halted) => tracing::debug!("{}", halted),
            }
            drop(guard);
        });

        Self {
            shared,
            handle: Some(handle),
        }
    }
}

impl<R> Controller<R> {
    pub fn run_mode(&self) -> RunMode {
        self.shared.lock().mode
    }

    /// Continue until the next breakpoint.
    pub fn resume(&self) {
        self.shared.set_mode(RunMode::Run);
    }

    /// Stop at the next instrumentation point.
    pub fn pause(&self) {
        let mut state = self.shared.lock();
        if state.mode == RunMode::Run {
            state.mode = RunMode::Pause;
        }
    }

    /// Abort the run. Exit is final.
    pub fn exit(&self) {
        self.shared.set_mode(RunMode::Exit);
    }

    pub fn add_breakpoint(&self, point: Point) -> bool {
        self.shared.lock().breakpoints.insert(point)
    }

    pub fn remove_breakpoint(&self, point: &Point) -> bool {
        self.shared.lock().breakpoints.shift_remove(point)
    }

    pub fn clear_breakpoints(&self) {
        self.shared.lock().breakpoints.clear();
    }

    pub fn breakpoints(&self) -> Vec<Point> {
        self.shared.lock().breakpoints.iter().cloned().collect()
    }

    /// The snapshot taken at the point the worker is paused at, or `None`
    /// unless the worker is paused.
    pub fn variables(&self) -> Option<Snapshot> {
        let state = self.shared.lock();
        match state.mode {
            RunMode::Paused => state.snapshot.clone(),
            _ => None,
        }
    }

    pub fn current_point(&self) -> Option<Point> {
        self.variables().map(|snapshot| snapshot.point)
    }

    /// Block until the worker pauses or exits, returning the mode.
    pub fn wait_paused(&self) -> RunMode {
        let mut state = self.shared.lock();
        while matches!(state.mode, RunMode::Run | RunMode::Pause) {
            state = self.shared.wait(state);
        }
        state.mode
    }

    /// Block until the worker exits.
    pub fn wait_exit(&self) {
        let mut state = self.shared.lock();
        while state.mode != RunMode::Exit {
            state = self.shared.wait(state);
        }
    }

    /// The result of the run, once it has exited. `None` before that and
    /// for aborted runs.
    pub fn exit_result(&self) -> Option<R>
    where
        R: Clone,
    {
        let state = self.shared.lock();
        match state.mode {
            RunMode::Exit => state.result.clone(),
            _ => None,
        }
    }

    /// Wait for the worker thread to finish and take its result.
    pub fn join(mut self) -> Option<R> {
        self.wait_exit();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("pipeline worker panicked");
            }
        }
        self.shared.lock().result.take()
    }
}

impl<R> Drop for Controller<R> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shared.set_mode(RunMode::Exit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Counter {
        i: usize,
    }

    /// Counts to three, reporting every step.
    fn count(probe: &Probe) -> Result<usize, Halted> {
        let mut vars = Counter { i: 0 };
        probe.report(Point::new("count", 0), &vars)?;
        for i in 1..=3 {
            vars.i = i;
            probe.report(Point::new("count", 1), &vars)?;
        }
        probe.report(Point::new("count", -1), &vars)?;
        Ok(vars.i)
    }

    #[test]
    fn detached_probe_runs_through() {
        assert_eq!(count(&Probe::detached()), Ok(3));
    }

    #[test]
    fn starts_paused_at_first_point() {
        let controller = Controller::spawn(count);
        assert_eq!(controller.wait_paused(), RunMode::Paused);
        let snapshot = controller.variables().unwrap();
        assert_eq!(snapshot.point, Point::new("count", 0));
        assert_eq!(snapshot.variables, json!({ "i": 0 }));

        controller.resume();
        assert_eq!(controller.join(), Some(3));
    }

    #[test]
    fn stops_at_every_breakpoint_hit() {
        let controller = Controller::spawn(count);
        controller.wait_paused();
        controller.add_breakpoint(Point::new("count", 1));

        let mut seen = vec![];
        loop {
            controller.resume();
            match controller.wait_paused() {
                RunMode::Paused => {
                    let snapshot = controller.variables().unwrap();
                    assert_eq!(snapshot.point, Point::new("count", 1));
                    seen.push(snapshot.variables["i"].as_u64().unwrap());
                }
                _ => break,
            }
        }
        assert_eq!(seen, [1, 2, 3]);
        assert_eq!(controller.exit_result(), Some(3));
    }

    #[test]
    fn removed_breakpoints_no_longer_stop() {
        let controller = Controller::spawn(count);
        controller.wait_paused();
        let point = Point::new("count", 1);
        controller.add_breakpoint(point.clone());
        controller.resume();
        assert_eq!(controller.wait_paused(), RunMode::Paused);
        assert!(controller.remove_breakpoint(&point));
        assert!(controller.breakpoints().is_empty());

        controller.resume();
        assert_eq!(controller.wait_paused(), RunMode::Exit);
        assert_eq!(controller.join(), Some(3));
    }

    #[test]
    fn pause_keeps_a_paused_run_in_place() {
        let controller = Controller::spawn(count);
        controller.wait_paused();
        controller.add_breakpoint(Point::new("count", 1));
        controller.resume();
        controller.wait_paused();
        controller.clear_breakpoints();

        controller.pause();
        assert_eq!(controller.run_mode(), RunMode::Paused);
        assert_eq!(controller.current_point(), Some(Point::new("count", 1)));
        controller.resume();
        assert_eq!(controller.join(), Some(3));
    }

    #[test]
    fn exit_aborts_without_result() {
        let controller = Controller::spawn(count);
        controller.wait_paused();
        controller.exit();
        controller.resume();
        assert_eq!(controller.run_mode(), RunMode::Exit);
        assert_eq!(controller.join(), None);
    }

    #[test]
    fn variables_are_hidden_unless_paused() {
        let controller = Controller::spawn(count);
        controller.wait_paused();
        controller.resume();
        controller.wait_exit();
        assert_eq!(controller.variables(), None);
        assert_eq!(controller.current_point(), None);
    }
}
