//! Process-wide reporter for uncaught failures.
//!
//! A single panic hook is registered per process. When a panic escapes
//! outside the request pipeline (a background task, the server loop, a
//! detached warm-up call), the reporter logs where it happened, the payload
//! and a backtrace, then applies the configured [`FaultPolicy`]:
//!
//! - `Continue` (default): log that the process is now unreliable and keep
//!   serving in a degraded state.
//! - `Exit`: terminate with exit code 1 after logging.
//!
//! Panics raised while a request is being handled are not uncaught: the
//! terminal pipeline stage turns them into a uniform 500 response. Those
//! are marked with a [`RequestScope`] guard and only logged here.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::Cell;
use std::fmt;
use std::panic::PanicHookInfo;
use std::str::FromStr;
use std::sync::OnceLock;

use tracing::{error, warn};

/// What to do after an uncaught failure has been logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Log a reliability warning and keep running.
    #[default]
    Continue,
    /// Terminate the process with exit code 1.
    Exit,
}

impl FaultPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Exit => "exit",
        }
    }
}

impl FromStr for FaultPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "exit" => Ok(Self::Exit),
            _ => Err(()),
        }
    }
}

/// Decision taken by the reporter for a single fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The process keeps running in a degraded state.
    Degraded,
    /// The process must terminate.
    Terminate,
}

/// One uncaught failure, ready to be logged.
#[derive(Debug)]
pub struct Fault {
    /// Where the failure surfaced (source location, task or thread name).
    pub origin: String,
    /// Rendered error or panic payload.
    pub error: String,
    /// Captured stack trace.
    pub backtrace: Backtrace,
}

impl Fault {
    /// Creates a fault for `origin`, capturing the current backtrace.
    pub fn new(origin: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            origin: origin.into(),
            error: error.to_string(),
            backtrace: Backtrace::force_capture(),
        }
    }

    fn from_panic(info: &PanicHookInfo<'_>) -> Self {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("<unnamed>");
        let origin = match info.location() {
            Some(loc) => format!(
                "{}:{}:{} (thread {thread_name})",
                loc.file(),
                loc.line(),
                loc.column()
            ),
            None => format!("<unknown location> (thread {thread_name})"),
        };
        Self::new(origin, describe_payload(info.payload()))
    }
}

/// Renders a panic payload as text.
#[must_use]
pub fn describe_payload(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Logs faults and decides, by policy, whether the process survives them.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultReporter {
    policy: FaultPolicy,
}

static INSTALLED: OnceLock<FaultPolicy> = OnceLock::new();

impl FaultReporter {
    #[must_use]
    pub fn new(policy: FaultPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> FaultPolicy {
        self.policy
    }

    /// Logs `fault` and returns the policy decision. Never exits by itself.
    pub fn report(&self, fault: &Fault) -> FaultOutcome {
        error!(
            origin = %fault.origin,
            error = %fault.error,
            backtrace = %fault.backtrace,
            "uncaught fault"
        );
        match self.policy {
            FaultPolicy::Continue => {
                warn!(
                    origin = %fault.origin,
                    "process state is now considered unreliable; a restart is recommended"
                );
                FaultOutcome::Degraded
            }
            FaultPolicy::Exit => {
                error!(origin = %fault.origin, "terminating process per fault policy");
                FaultOutcome::Terminate
            }
        }
    }

    /// Registers the process-wide panic hook.
    ///
    /// Only the first call registers anything; later calls log a warning and
    /// return `false`.
    pub fn install(self) -> bool {
        let mut registered = false;
        INSTALLED.get_or_init(|| {
            registered = true;
            std::panic::set_hook(Box::new(move |info| {
                if RequestScope::active() {
                    // The terminal pipeline stage reports this one.
                    let fault = Fault::from_panic(info);
                    error!(origin = %fault.origin, error = %fault.error, "request handler panicked");
                    return;
                }
                if self.report(&Fault::from_panic(info)) == FaultOutcome::Terminate {
                    std::process::exit(1);
                }
            }));
            self.policy
        });
        if !registered {
            warn!("fault reporter already installed; ignoring second registration");
        }
        registered
    }
}

/// Policy of the installed reporter, if any.
#[must_use]
pub fn installed_policy() -> Option<FaultPolicy> {
    INSTALLED.get().copied()
}

/// Reports a failure of a detached background task.
///
/// Uses the installed policy (or the default when none is installed).
/// Returns the decision without exiting; callers that own the process
/// lifecycle act on [`FaultOutcome::Terminate`].
pub fn report_background_failure(origin: &str, error: impl fmt::Display) -> FaultOutcome {
    let reporter = FaultReporter::new(installed_policy().unwrap_or_default());
    reporter.report(&Fault::new(origin, error))
}

thread_local! {
    static REQUEST_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Marks the current thread as executing request-pipeline code.
///
/// Dropping the guard (including during unwinding) clears the mark.
#[derive(Debug)]
pub struct RequestScope {
    _private: (),
}

impl RequestScope {
    #[must_use]
    pub fn enter() -> Self {
        REQUEST_DEPTH.with(|d| d.set(d.get() + 1));
        Self { _private: () }
    }

    #[must_use]
    pub fn active() -> bool {
        REQUEST_DEPTH.with(|d| d.get() > 0)
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        REQUEST_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}
