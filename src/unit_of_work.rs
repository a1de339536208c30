//! Thread-scoped unit of work bounding one message's processing.
//!
//! A unit of work is begun by the runtime before a message is handled and
//! ends in exactly one of commit or rollback. Collaborators register
//! `FnOnce` listeners for either outcome, plus cleanup listeners that run
//! after both. The innermost active unit of work on the current thread is
//! reachable through [`CurrentUnitOfWork`]; this crate never begins or ends
//! one on behalf of a message.
//!
//! Units of work nest: beginning a second one while the first is active
//! pushes onto a stack, and listeners attach to the innermost entry.
//! Everything is thread-local, matching the one-logical-thread-per-unit-of-
//! work execution model; listeners therefore do not need to be `Send`.

use std::cell::RefCell;
use std::rc::Rc;

type Listener = Box<dyn FnOnce()>;

/// Lifecycle phase of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Begun and not yet ended.
    Started,
    /// Ended successfully; commit listeners have run.
    Committed,
    /// Ended by rollback (or cancellation, which is treated identically).
    RolledBack,
}

struct Inner {
    message_id: String,
    phase: Phase,
    commit_listeners: Vec<Listener>,
    rollback_listeners: Vec<Listener>,
    cleanup_listeners: Vec<Listener>,
}

thread_local! {
    static STACK: RefCell<Vec<Rc<RefCell<Inner>>>> = const { RefCell::new(Vec::new()) };
}

/// A transactional scope bounding exactly one message's processing.
pub struct UnitOfWork {
    inner: Rc<RefCell<Inner>>,
}

impl UnitOfWork {
    /// Begin a unit of work for the message identified by `message_id` and
    /// make it the current one on this thread.
    pub fn begin(message_id: impl Into<String>) -> Self {
        let message_id = message_id.into();
        tracing::debug!(message_id = %message_id, "unit of work started");
        let inner = Rc::new(RefCell::new(Inner {
            message_id,
            phase: Phase::Started,
            commit_listeners: Vec::new(),
            rollback_listeners: Vec::new(),
            cleanup_listeners: Vec::new(),
        }));
        STACK.with(|stack| stack.borrow_mut().push(Rc::clone(&inner)));
        Self { inner }
    }

    /// The identifier of the message this unit of work bounds.
    pub fn message_id(&self) -> String {
        self.inner.borrow().message_id.clone()
    }

    /// The current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.inner.borrow().phase
    }

    /// Register a listener to run when this unit of work commits.
    ///
    /// Dropped unfired on rollback.
    pub fn on_commit(&self, listener: impl FnOnce() + 'static) {
        self.inner.borrow_mut().commit_listeners.push(Box::new(listener));
    }

    /// Register a listener to run when this unit of work rolls back.
    ///
    /// Dropped unfired on commit.
    pub fn on_rollback(&self, listener: impl FnOnce() + 'static) {
        self.inner
            .borrow_mut()
            .rollback_listeners
            .push(Box::new(listener));
    }

    /// Register a listener to run after the unit of work ends, regardless
    /// of outcome. Cleanup listeners run after the outcome listeners.
    pub fn on_cleanup(&self, listener: impl FnOnce() + 'static) {
        self.inner
            .borrow_mut()
            .cleanup_listeners
            .push(Box::new(listener));
    }

    /// End this unit of work successfully, running commit listeners then
    /// cleanup listeners in registration order.
    pub fn commit(self) {
        Self::finish(self.inner, Phase::Committed);
    }

    /// End this unit of work unsuccessfully, running rollback listeners
    /// then cleanup listeners in registration order.
    pub fn rollback(self) {
        Self::finish(self.inner, Phase::RolledBack);
    }

    fn finish(inner: Rc<RefCell<Inner>>, outcome: Phase) {
        // Detach from the thread-local stack first, so listeners observing
        // the "current" unit of work see the enclosing one (or none).
        STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|entry| Rc::ptr_eq(entry, &inner)) {
                stack.remove(pos);
            }
        });

        let (fired, cleanups, message_id) = {
            let mut inner = inner.borrow_mut();
            inner.phase = outcome;
            let fired = match outcome {
                Phase::Committed => std::mem::take(&mut inner.commit_listeners),
                _ => std::mem::take(&mut inner.rollback_listeners),
            };
            // The losing outcome's listeners are dropped unfired.
            inner.commit_listeners.clear();
            inner.rollback_listeners.clear();
            let cleanups = std::mem::take(&mut inner.cleanup_listeners);
            (fired, cleanups, inner.message_id.clone())
        };

        tracing::debug!(message_id = %message_id, ?outcome, "unit of work ended");
        for listener in fired {
            listener();
        }
        for listener in cleanups {
            listener();
        }
    }
}

/// Access to the innermost active unit of work on the current thread.
pub struct CurrentUnitOfWork;

impl CurrentUnitOfWork {
    /// Whether any unit of work is active on this thread.
    pub fn is_active() -> bool {
        STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Run `f` against the innermost active unit of work, or return `None`
    /// when no unit of work is active.
    pub fn with<R>(f: impl FnOnce(&UnitOfWork) -> R) -> Option<R> {
        let top = STACK.with(|stack| stack.borrow().last().cloned());
        top.map(|inner| f(&UnitOfWork { inner }))
    }
}
