use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use tracing::{error, warn};

thread_local! {
    static GUARD_DEPTH: Cell<u32> = const { Cell::new(0) };
    static LAST_PANIC_LOCATION: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Names the unit a barrier protects: its type tag and its identity.
#[derive(Debug, Clone, Copy)]
pub struct UnitLabel<'a> {
    pub kind: &'a str,
    pub identifier: &'a str,
}

impl<'a> UnitLabel<'a> {
    pub fn new(kind: &'a str, identifier: &'a str) -> Self {
        Self { kind, identifier }
    }
}

impl fmt::Display for UnitLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.identifier)
    }
}

/// What happened inside a barrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<T> {
    Completed(T),
    Failed(String),
    Panicked(String),
}

impl<T> Guarded<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Failed(_) | Self::Panicked(_) => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Run `work` behind a fault barrier. Returns `None` when it returned an
/// error or panicked; the caller treats that as "nothing productive this
/// tick".
pub fn guard<T, E, F>(label: &UnitLabel<'_>, work: F) -> Option<T>
where
    E: fmt::Display,
    F: FnOnce() -> Result<T, E>,
{
    guard_outcome(label, work).into_option()
}

/// Like [`guard`] but reports whether the unit failed or panicked.
///
/// Emits exactly one log line per caught failure.
pub fn guard_outcome<T, E, F>(label: &UnitLabel<'_>, work: F) -> Guarded<T>
where
    E: fmt::Display,
    F: FnOnce() -> Result<T, E>,
{
    GUARD_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let outcome = panic::catch_unwind(AssertUnwindSafe(work));
    GUARD_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));

    match outcome {
        Ok(Ok(value)) => Guarded::Completed(value),
        Ok(Err(failure)) => {
            let message = failure.to_string();
            warn!(
                unit_kind = label.kind,
                unit_id = label.identifier,
                error = %message,
                "unit failed, skipped for this tick"
            );
            Guarded::Failed(message)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            let location = LAST_PANIC_LOCATION.with(|slot| slot.borrow_mut().take());
            error!(
                unit_kind = label.kind,
                unit_id = label.identifier,
                panic = %message,
                location = location.as_deref().unwrap_or("unknown"),
                "unit panicked, skipped for this tick"
            );
            Guarded::Panicked(message)
        }
    }
}

static HOOK: Once = Once::new();

/// Replace the process panic hook so panics caught by a barrier are reported
/// only through the barrier's own log line. Panics outside any barrier still
/// reach the previous hook. Safe to call more than once.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if GUARD_DEPTH.with(Cell::get) > 0 {
                let location = info
                    .location()
                    .map(|location| format!("{}:{}", location.file(), location.line()));
                LAST_PANIC_LOCATION.with(|slot| *slot.borrow_mut() = location);
            } else {
                previous(info);
            }
        }));
    });
}

pub fn panic_hook_installed() -> bool {
    HOOK.is_completed()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
