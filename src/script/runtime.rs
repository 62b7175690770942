//! Promises, the microtask queue and virtual-time timers.
//!
//! Time never passes on its own: when no job is runnable the clock jumps to
//! the earliest timer deadline, so timer-heavy code runs instantly and in a
//! reproducible order.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures_util::future::LocalBoxFuture;
use futures_util::task::noop_waker_ref;
use log::{debug, trace};
use thiserror::Error;

use super::interp::{ErrorKind, Interp};
use super::value::*;

pub(super) enum Job {
    Reaction(Reaction, Result<Value, Value>),
    Call(Value, Vec<Value>),
    /// Resolve `promise` by following a thenable.
    Adopt {
        promise: ObjRef,
        thenable: Value,
        then: Value,
    },
}

struct Timer {
    callback: Value,
    args: Vec<Value>,
    interval: Option<u64>,
}

pub(super) struct EventLoop {
    jobs: RefCell<VecDeque<Job>>,
    tasks: RefCell<HashMap<u64, LocalBoxFuture<'static, ()>>>,
    current_task: Cell<Option<u64>>,
    next_task: Cell<u64>,
    timers: RefCell<BTreeMap<(u64, u64), Timer>>,
    deadlines: RefCell<HashMap<u64, u64>>,
    next_timer: Cell<u64>,
    now: Cell<u64>,
}

impl EventLoop {
    pub(super) fn new() -> Self {
        Self {
            jobs: RefCell::new(VecDeque::new()),
            tasks: RefCell::new(HashMap::new()),
            current_task: Cell::new(None),
            next_task: Cell::new(0),
            timers: RefCell::new(BTreeMap::new()),
            deadlines: RefCell::new(HashMap::new()),
            next_timer: Cell::new(0),
            now: Cell::new(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoopError {
    #[error(transparent)]
    Fatal(#[from] FatalError),
    #[error("promise never settled")]
    NeverSettled,
}

/// Settled outcome of a promise, `None` while pending (or not a promise).
pub fn promise_outcome(promise: &ObjRef) -> Option<Result<Value, Value>> {
    match &promise.kind {
        ObjKind::Promise(state) => match &*state.borrow() {
            PromiseState::Pending(_) => None,
            PromiseState::Fulfilled(v) => Some(Ok(v.clone())),
            PromiseState::Rejected(e) => Some(Err(e.clone())),
        },
        _ => None,
    }
}

pub fn is_promise(value: &Value) -> bool {
    matches!(value, Value::Object(o) if matches!(o.kind, ObjKind::Promise(_)))
}

fn thrown(abrupt: Abrupt) -> Value {
    match abrupt {
        Abrupt::Throw(value) => value,
        _ => Value::Undefined,
    }
}

/// Suspends the current task until a promise settles. Always yields at
/// least once, so `await` on a settled value still takes one tick.
pub(super) struct AwaitFuture<'a> {
    interp: &'a Interp,
    promise: ObjRef,
    registered: bool,
}

impl Future for AwaitFuture<'_> {
    type Output = JsResult<Value>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if !this.registered {
            let Some(task) = this.interp.event_loop.current_task.get() else {
                return Poll::Ready(Err(this.interp.throw(
                    ErrorKind::Syntax,
                    "await is only valid in async functions and the top level bodies of modules",
                )));
            };
            this.registered = true;
            this.interp.on_settle(&this.promise, Reaction::Resume(task));
            return Poll::Pending;
        }
        match promise_outcome(&this.promise) {
            Some(Ok(value)) => Poll::Ready(Ok(value)),
            Some(Err(error)) => Poll::Ready(Err(Abrupt::Throw(error))),
            None => Poll::Pending,
        }
    }
}

impl Interp {
    // --- promises ---

    pub fn new_promise(&self) -> ObjRef {
        self.new_promise_with_proto(self.intrinsics.promise_proto.clone())
    }

    pub(super) fn new_promise_with_proto(&self, proto: ObjRef) -> ObjRef {
        Obj::new(
            ObjKind::Promise(RefCell::new(PromiseState::Pending(Vec::new()))),
            Some(proto),
        )
    }

    /// Fulfils or rejects a pending promise; later calls are ignored.
    pub(super) fn settle(&self, promise: &ObjRef, outcome: Result<Value, Value>) {
        let ObjKind::Promise(state) = &promise.kind else {
            return;
        };
        let reactions = {
            let mut state = state.borrow_mut();
            if !matches!(*state, PromiseState::Pending(_)) {
                return;
            }
            let settled = match &outcome {
                Ok(v) => PromiseState::Fulfilled(v.clone()),
                Err(e) => PromiseState::Rejected(e.clone()),
            };
            match std::mem::replace(&mut *state, settled) {
                PromiseState::Pending(reactions) => reactions,
                _ => Vec::new(),
            }
        };
        for reaction in reactions {
            self.enqueue(Job::Reaction(reaction, outcome.clone()));
        }
    }

    /// The promise resolve function: adopts thenables, fulfils otherwise.
    pub(super) fn resolve_promise(&self, promise: &ObjRef, value: Value) {
        if let Value::Object(obj) = &value {
            if Rc::ptr_eq(obj, promise) {
                let error = thrown(self.type_error("Chaining cycle detected for promise #<Promise>"));
                self.settle(promise, Err(error));
                return;
            }
            if let Some(then) = obj.get("then").filter(Value::is_callable) {
                self.enqueue(Job::Adopt {
                    promise: promise.clone(),
                    thenable: value.clone(),
                    then,
                });
                return;
            }
        }
        self.settle(promise, Ok(value));
    }

    /// `resolve`/`reject` pair handed to executors; only the first call counts.
    pub(super) fn resolving_functions(&self, promise: &ObjRef) -> (Value, Value) {
        let done = Rc::new(Cell::new(false));
        let (target, flag) = (promise.clone(), done.clone());
        let resolve = self.native_function("", move |interp, _, args| {
            if !flag.replace(true) {
                interp.resolve_promise(&target, args.first().cloned().unwrap_or_default());
            }
            Ok(Value::Undefined)
        });
        let target = promise.clone();
        let reject = self.native_function("", move |interp, _, args| {
            if !done.replace(true) {
                interp.settle(&target, Err(args.first().cloned().unwrap_or_default()));
            }
            Ok(Value::Undefined)
        });
        (resolve, reject)
    }

    pub(super) fn on_settle(&self, promise: &ObjRef, reaction: Reaction) {
        let ObjKind::Promise(state) = &promise.kind else {
            return;
        };
        let outcome = match &mut *state.borrow_mut() {
            PromiseState::Pending(reactions) => {
                reactions.push(reaction);
                return;
            }
            PromiseState::Fulfilled(v) => Ok(v.clone()),
            PromiseState::Rejected(e) => Err(e.clone()),
        };
        self.enqueue(Job::Reaction(reaction, outcome));
    }

    pub(super) fn then(&self, promise: &ObjRef, on_fulfilled: Value, on_rejected: Value) -> ObjRef {
        let derived = self.new_promise();
        self.on_settle(
            promise,
            Reaction::Then {
                on_fulfilled,
                on_rejected,
                derived: Some(derived.clone()),
            },
        );
        derived
    }

    /// `Promise.resolve` semantics: promises pass through, anything else is wrapped.
    pub(super) fn promise_resolve(&self, value: Value) -> ObjRef {
        if let Value::Object(obj) = &value {
            if matches!(obj.kind, ObjKind::Promise(_)) {
                return obj.clone();
            }
        }
        let promise = self.new_promise();
        self.resolve_promise(&promise, value);
        promise
    }

    pub(super) fn await_value(&self, value: Value) -> AwaitFuture<'_> {
        AwaitFuture {
            interp: self,
            promise: self.promise_resolve(value),
            registered: false,
        }
    }

    // --- tasks and jobs ---

    pub(super) fn enqueue(&self, job: Job) {
        self.event_loop.jobs.borrow_mut().push_back(job);
    }

    /// Starts an async function body, running it eagerly up to its first
    /// suspension.
    pub(super) fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        let id = self.event_loop.next_task.get() + 1;
        self.event_loop.next_task.set(id);
        self.poll_task(id, task);
    }

    fn poll_task(&self, id: u64, mut task: LocalBoxFuture<'static, ()>) {
        let previous = self.event_loop.current_task.replace(Some(id));
        let mut cx = Context::from_waker(noop_waker_ref());
        let pending = task.as_mut().poll(&mut cx).is_pending();
        self.event_loop.current_task.set(previous);
        if pending {
            self.event_loop.tasks.borrow_mut().insert(id, task);
        }
    }

    fn resume(&self, id: u64) {
        let task = self.event_loop.tasks.borrow_mut().remove(&id);
        match task {
            Some(task) => self.poll_task(id, task),
            None => trace!("resume for finished task {}", id),
        }
    }

    fn run_job(&self, job: Job) -> Result<(), FatalError> {
        let result = match job {
            Job::Call(callback, args) => self.call(&callback, Value::Undefined, &args).map(drop),
            Job::Reaction(reaction, outcome) => self.react(reaction, outcome),
            Job::Adopt {
                promise,
                thenable,
                then,
            } => {
                let (resolve, reject) = self.resolving_functions(&promise);
                match self.call(&then, thenable, &[resolve, reject.clone()]) {
                    Err(Abrupt::Throw(error)) => self.call(&reject, Value::Undefined, &[error]).map(drop),
                    other => other.map(drop),
                }
            }
        };
        match result {
            Err(Abrupt::Fatal(error)) => {
                self.set_fatal(error.clone());
                Err(error)
            }
            Err(Abrupt::Throw(error)) => {
                debug!("uncaught exception in job: {}", self.describe_error(&error));
                Ok(())
            }
            _ => match self.fatal() {
                Some(error) => Err(error),
                None => Ok(()),
            },
        }
    }

    fn react(&self, reaction: Reaction, outcome: Result<Value, Value>) -> JsResult<()> {
        match reaction {
            Reaction::Resume(id) => {
                self.resume(id);
                Ok(())
            }
            Reaction::Native(callback) => callback(self, outcome),
            Reaction::Then {
                on_fulfilled,
                on_rejected,
                derived,
            } => {
                let (handler, argument) = match &outcome {
                    Ok(v) => (on_fulfilled, v.clone()),
                    Err(e) => (on_rejected, e.clone()),
                };
                let result = if handler.is_callable() {
                    match self.call(&handler, Value::Undefined, &[argument]) {
                        Ok(v) => Ok(v),
                        Err(Abrupt::Throw(e)) => Err(e),
                        Err(other) => return Err(other),
                    }
                } else {
                    outcome
                };
                if let Some(derived) = derived {
                    match result {
                        Ok(v) => self.resolve_promise(&derived, v),
                        Err(e) => self.settle(&derived, Err(e)),
                    }
                }
                Ok(())
            }
        }
    }

    fn next_job(&self) -> Option<Job> {
        self.event_loop.jobs.borrow_mut().pop_front()
    }

    // --- timers ---

    pub(super) fn set_timer(&self, callback: Value, delay: f64, args: Vec<Value>, repeat: bool) -> u64 {
        let delay = if delay.is_nan() || delay < 0.0 {
            0
        } else {
            delay.min(i32::MAX as f64) as u64
        };
        let id = self.event_loop.next_timer.get() + 1;
        self.event_loop.next_timer.set(id);
        let deadline = self.event_loop.now.get() + delay;
        self.event_loop.timers.borrow_mut().insert(
            (deadline, id),
            Timer {
                callback,
                args,
                interval: repeat.then_some(delay.max(1)),
            },
        );
        self.event_loop.deadlines.borrow_mut().insert(id, deadline);
        id
    }

    pub(super) fn clear_timer(&self, id: u64) {
        if let Some(deadline) = self.event_loop.deadlines.borrow_mut().remove(&id) {
            self.event_loop.timers.borrow_mut().remove(&(deadline, id));
        }
    }

    /// Current virtual time in milliseconds.
    pub fn now_ms(&self) -> f64 {
        self.event_loop.now.get() as f64
    }

    /// Advances the clock to the earliest timer and runs it.
    fn fire_next_timer(&self) -> Result<bool, FatalError> {
        let next = self.event_loop.timers.borrow_mut().pop_first();
        let Some(((deadline, id), timer)) = next else {
            return Ok(false);
        };
        self.event_loop.deadlines.borrow_mut().remove(&id);
        let now = self.event_loop.now.get().max(deadline);
        self.event_loop.now.set(now);
        if let Some(interval) = timer.interval {
            self.event_loop.timers.borrow_mut().insert(
                (now + interval, id),
                Timer {
                    callback: timer.callback.clone(),
                    args: timer.args.clone(),
                    interval: Some(interval),
                },
            );
            self.event_loop.deadlines.borrow_mut().insert(id, now + interval);
        }
        trace!("timer {} fired at {}ms", id, now);
        if let Err(Abrupt::Fatal(error)) = self.step() {
            return Err(error);
        }
        self.enqueue(Job::Call(timer.callback, timer.args));
        Ok(true)
    }

    fn has_one_shot_timer(&self) -> bool {
        self.event_loop.timers.borrow().values().any(|t| t.interval.is_none())
    }

    /// Runs jobs and timers until `promise` settles.
    pub fn run_until_settled(&self, promise: &ObjRef) -> Result<(), LoopError> {
        loop {
            if let Some(error) = self.fatal() {
                return Err(LoopError::Fatal(error));
            }
            if promise_outcome(promise).is_some() {
                return Ok(());
            }
            if let Some(job) = self.next_job() {
                self.run_job(job)?;
                continue;
            }
            if !self.fire_next_timer()? {
                return Err(LoopError::NeverSettled);
            }
        }
    }

    /// Runs leftover work from an invocation so it cannot leak into the next
    /// one. Repeating timers are dropped once no one-shot timer remains.
    pub fn drain(&self) -> Result<(), FatalError> {
        loop {
            if let Some(error) = self.fatal() {
                return Err(error);
            }
            if let Some(job) = self.next_job() {
                self.run_job(job)?;
                continue;
            }
            if !self.has_one_shot_timer() {
                break;
            }
            self.fire_next_timer()?;
        }
        self.event_loop.timers.borrow_mut().clear();
        self.event_loop.deadlines.borrow_mut().clear();
        Ok(())
    }

    /// Drops all pending work. Suspended tasks hold the realm alive, so
    /// this must run before the interpreter is discarded.
    pub fn shutdown(&self) {
        self.event_loop.jobs.borrow_mut().clear();
        let tasks = std::mem::take(&mut *self.event_loop.tasks.borrow_mut());
        drop(tasks);
        self.event_loop.timers.borrow_mut().clear();
        self.event_loop.deadlines.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::super::interp::Limits;
    use super::*;

    #[test]
    fn test_settle_only_once() {
        let interp = Interp::new(Limits::default(), 0.0);
        let p = interp.new_promise();
        interp.settle(&p, Ok(Value::Number(1.0)));
        interp.settle(&p, Err(Value::Number(2.0)));
        assert!(matches!(promise_outcome(&p), Some(Ok(Value::Number(n))) if n == 1.0));
    }

    #[test]
    fn test_then_runs_as_microtask() {
        let interp = Interp::new(Limits::default(), 0.0);
        let p = interp.promise_resolve(Value::Number(2.0));
        let double = interp.native_function("double", |interp, _, args| {
            Ok(Value::Number(interp.to_number(&args[0])? * 2.0))
        });
        let derived = interp.then(&p, double, Value::Undefined);
        assert!(promise_outcome(&derived).is_none());
        interp.run_until_settled(&derived).unwrap();
        assert!(matches!(promise_outcome(&derived), Some(Ok(Value::Number(n))) if n == 4.0));
    }

    #[test]
    fn test_virtual_clock_orders_timers() {
        let interp = Interp::new(Limits::default(), 0.0);
        let log = Rc::new(RefCell::new(Vec::new()));
        for delay in [30.0, 10.0, 20.0] {
            let log = log.clone();
            let cb = interp.native_function("cb", move |interp, _, _| {
                log.borrow_mut().push(interp.now_ms());
                Ok(Value::Undefined)
            });
            interp.set_timer(cb, delay, Vec::new(), false);
        }
        interp.drain().unwrap();
        assert_eq!(*log.borrow(), vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_never_settled_is_reported() {
        let interp = Interp::new(Limits::default(), 0.0);
        let p = interp.new_promise();
        assert_eq!(interp.run_until_settled(&p), Err(LoopError::NeverSettled));
    }

    #[test]
    fn test_drain_drops_intervals() {
        let interp = Interp::new(Limits::default(), 0.0);
        let ticks = Rc::new(Cell::new(0));
        let counter = ticks.clone();
        let cb = interp.native_function("tick", move |_, _, _| {
            counter.set(counter.get() + 1);
            Ok(Value::Undefined)
        });
        interp.set_timer(cb, 10.0, Vec::new(), true);
        interp.set_timer(Value::Undefined, 35.0, Vec::new(), false);
        interp.drain().unwrap();
        assert_eq!(ticks.get(), 3);
        assert!(interp.event_loop.timers.borrow().is_empty());
    }

    #[test]
    fn test_cleared_timer_never_fires() {
        let interp = Interp::new(Limits::default(), 0.0);
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();
        let cb = interp.native_function("cb", move |_, _, _| {
            flag.set(true);
            Ok(Value::Undefined)
        });
        let id = interp.set_timer(cb, 5.0, Vec::new(), false);
        interp.clear_timer(id);
        interp.drain().unwrap();
        assert!(!fired.get());
    }
}
