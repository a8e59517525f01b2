//! Debounced asynchronous validation for user-entered input.
//!
//! A `Debouncer` coalesces rapid input changes into a single delayed check
//! and guarantees that only the most recent input's result ever becomes
//! visible. Staleness is decided by a generation token captured at schedule
//! time and re-checked under the publishing lock, not by timer cancellation;
//! cancellation races are the real hazard, not the timer.
//!
//! `UsernameValidator` and `SourceLintValidator` specialize the pattern for
//! registration (format-then-availability) and script lint feedback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, warn};

use crate::services::ContentService;

/// Flat view of a validator for UI consumption: drives the "can submit"
/// gate and the pending/valid/invalid icon state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationState {
    pub is_pending: bool,
    pub is_valid: bool,
    pub error_message: Option<String>,
}

impl ValidationState {
    pub fn neutral() -> Self {
        ValidationState {
            is_pending: false,
            is_valid: false,
            error_message: None,
        }
    }

    pub fn pending() -> Self {
        ValidationState {
            is_pending: true,
            is_valid: false,
            error_message: None,
        }
    }

    pub fn valid() -> Self {
        ValidationState {
            is_pending: false,
            is_valid: true,
            error_message: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ValidationState {
            is_pending: false,
            is_valid: false,
            error_message: Some(message.into()),
        }
    }

    pub fn can_submit(&self) -> bool {
        self.is_valid && !self.is_pending
    }
}

/// Token identifying one debounce cycle. A result may only be published
/// while its token is still current; check `is_current()` under the same
/// lock that guards the state being written.
pub struct CycleToken {
    token: u64,
    generation: Arc<AtomicU64>,
}

impl CycleToken {
    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.token
    }
}

/// Coalesces rapid input events into one delayed check and discards stale
/// results. Each `schedule` supersedes everything before it.
pub struct Debouncer {
    generation: Arc<AtomicU64>,
    quiet_period: Duration,
}

impl Debouncer {
    pub fn new(quiet_period: Duration) -> Self {
        Debouncer {
            generation: Arc::new(AtomicU64::new(0)),
            quiet_period,
        }
    }

    /// Invalidate any pending or in-flight cycle without scheduling a new one.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Start a new cycle. After the quiet period, `job` runs on a worker
    /// thread with the cycle's token -- unless a newer cycle has started, in
    /// which case the job never runs. The job must re-check the token before
    /// writing any result.
    pub fn schedule<F>(&self, job: F)
    where
        F: FnOnce(&CycleToken) + Send + 'static,
    {
        let token = CycleToken {
            token: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            generation: Arc::clone(&self.generation),
        };
        let quiet = self.quiet_period;
        thread::spawn(move || {
            thread::sleep(quiet);
            if !token.is_current() {
                debug!("Debounce cycle superseded before it fired");
                return;
            }
            job(&token);
        });
    }
}

/// Exhaustive outcome of the two-phase username check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsernameStatus {
    /// No input yet, or input cleared
    Unset,
    /// A debounced check is scheduled or in flight
    Pending,
    /// Synchronous format check failed; no remote call was made
    FormatInvalid(String),
    Available,
    Taken,
    /// The availability service failed; reported as state, never raised
    CheckFailed(String),
}

impl UsernameStatus {
    pub fn as_validation_state(&self) -> ValidationState {
        match self {
            UsernameStatus::Unset => ValidationState::neutral(),
            UsernameStatus::Pending => ValidationState::pending(),
            UsernameStatus::FormatInvalid(reason) => ValidationState::invalid(reason.clone()),
            UsernameStatus::Available => ValidationState::valid(),
            UsernameStatus::Taken => ValidationState::invalid("username already taken"),
            UsernameStatus::CheckFailed(reason) => ValidationState::invalid(reason.clone()),
        }
    }
}

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 32;

static USERNAME_RE: OnceLock<Regex> = OnceLock::new();

fn username_regex() -> &'static Regex {
    USERNAME_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9_-]*[a-z0-9]$").expect("username regex is valid")
    })
}

/// Synchronous phase-one format check: length 3-32, lowercase alphanumerics
/// plus `_`/`-`, must not start or end with `_`/`-`.
pub fn check_username_format(value: &str) -> Result<(), String> {
    let len = value.chars().count();
    if len < USERNAME_MIN_LEN {
        return Err(format!(
            "username must be at least {} characters",
            USERNAME_MIN_LEN
        ));
    }
    if len > USERNAME_MAX_LEN {
        return Err(format!(
            "username must be at most {} characters",
            USERNAME_MAX_LEN
        ));
    }
    if !username_regex().is_match(value) {
        if value.starts_with(['_', '-']) || value.ends_with(['_', '-']) {
            return Err("username must not start or end with '_' or '-'".to_string());
        }
        return Err(
            "username may only contain lowercase letters, digits, '_' and '-'".to_string(),
        );
    }
    Ok(())
}

struct TrackedStatus<S> {
    status: S,
    revision: u64,
}

impl<S> TrackedStatus<S> {
    fn set(&mut self, status: S) {
        self.status = status;
        self.revision = self.revision.wrapping_add(1);
    }
}

/// Live username availability feedback for the registration flow.
pub struct UsernameValidator {
    service: Arc<dyn ContentService>,
    debouncer: Debouncer,
    state: Arc<Mutex<TrackedStatus<UsernameStatus>>>,
}

impl UsernameValidator {
    pub fn new(service: Arc<dyn ContentService>, quiet_period: Duration) -> Self {
        UsernameValidator {
            service,
            debouncer: Debouncer::new(quiet_period),
            state: Arc::new(Mutex::new(TrackedStatus {
                status: UsernameStatus::Unset,
                revision: 0,
            })),
        }
    }

    /// Feed the latest input. Empty input short-circuits to `Unset` without
    /// scheduling a check; anything else becomes `Pending` and is validated
    /// after the quiet period (format first, then availability).
    pub fn on_input_changed(&self, raw: &str) {
        let value = raw.trim().to_string();
        if value.is_empty() {
            self.debouncer.cancel();
            self.state.lock().set(UsernameStatus::Unset);
            return;
        }

        // Invalidate older cycles before exposing Pending so a slow in-flight
        // check can never publish over the newer cycle's state.
        self.debouncer.cancel();
        self.state.lock().set(UsernameStatus::Pending);
        let service = Arc::clone(&self.service);
        let state = Arc::clone(&self.state);
        self.debouncer.schedule(move |cycle| {
            let status = match check_username_format(&value) {
                Err(reason) => UsernameStatus::FormatInvalid(reason),
                Ok(()) => match service.check_username_available(&value) {
                    Ok(true) => UsernameStatus::Available,
                    Ok(false) => UsernameStatus::Taken,
                    Err(e) => {
                        warn!(error = %e, "Username availability check failed");
                        UsernameStatus::CheckFailed("failed to check availability".to_string())
                    }
                },
            };
            let mut state = state.lock();
            if cycle.is_current() {
                state.set(status);
            }
        });
    }

    pub fn status(&self) -> UsernameStatus {
        self.state.lock().status.clone()
    }

    pub fn validation_state(&self) -> ValidationState {
        self.status().as_validation_state()
    }

    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }
}

/// Exhaustive outcome of a debounced lint pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LintStatus {
    Unset,
    Pending,
    Clean,
    Problems(Vec<String>),
    /// The lint service failed; reported as state, never raised
    CheckFailed(String),
}

impl LintStatus {
    pub fn as_validation_state(&self) -> ValidationState {
        match self {
            LintStatus::Unset => ValidationState::neutral(),
            LintStatus::Pending => ValidationState::pending(),
            LintStatus::Clean => ValidationState::valid(),
            LintStatus::Problems(errors) => ValidationState::invalid(
                errors
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "script has lint errors".to_string()),
            ),
            LintStatus::CheckFailed(reason) => ValidationState::invalid(reason.clone()),
        }
    }
}

/// Live lint feedback for the script editor, same debounce/staleness
/// discipline as the username flow but against the lint service.
pub struct SourceLintValidator {
    service: Arc<dyn ContentService>,
    debouncer: Debouncer,
    state: Arc<Mutex<TrackedStatus<LintStatus>>>,
}

impl SourceLintValidator {
    pub fn new(service: Arc<dyn ContentService>, quiet_period: Duration) -> Self {
        SourceLintValidator {
            service,
            debouncer: Debouncer::new(quiet_period),
            state: Arc::new(Mutex::new(TrackedStatus {
                status: LintStatus::Unset,
                revision: 0,
            })),
        }
    }

    /// Feed the latest source text. Empty source is always
    /// `invalid("script is empty")` without invoking the lint service.
    pub fn on_source_changed(&self, source: &str) {
        if source.trim().is_empty() {
            self.debouncer.cancel();
            self.state
                .lock()
                .set(LintStatus::Problems(vec!["script is empty".to_string()]));
            return;
        }

        // Same ordering as the username flow: invalidate before Pending.
        self.debouncer.cancel();
        self.state.lock().set(LintStatus::Pending);
        let source = source.to_string();
        let service = Arc::clone(&self.service);
        let state = Arc::clone(&self.state);
        self.debouncer.schedule(move |cycle| {
            let status = match service.lint(&source) {
                Ok(report) if report.ok => LintStatus::Clean,
                Ok(report) => LintStatus::Problems(report.errors),
                Err(e) => {
                    warn!(error = %e, "Lint check failed");
                    LintStatus::CheckFailed("failed to lint script".to_string())
                }
            };
            let mut state = state.lock();
            if cycle.is_current() {
                state.set(status);
            }
        });
    }

    pub fn status(&self) -> LintStatus {
        self.state.lock().status.clone()
    }

    pub fn validation_state(&self) -> ValidationState {
        self.status().as_validation_state()
    }

    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }
}

#[cfg(test)]
#[path = "validation_tests.rs"]
mod validation_tests;
