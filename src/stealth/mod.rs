//! Stealth instrumentation for automated browser sessions
//!
//! The shim hides the usual automation tells from runtime checks on the
//! target page: constant-interval timing, a `devtools` state property, the
//! `navigator.webdriver` flag and `console.clear` side channels.
//!
//! Patches never touch ambient globals directly. [`apply`] receives an
//! [`Environment`] and returns one [`ShimPatchRecord`] per patch:
//!
//! - [`ScriptEnvironment`] renders the patches as a JavaScript bundle that the
//!   scrape adapter registers to run before any page script.
//! - [`InMemoryEnvironment`] models the same globals in Rust so every patch can
//!   be exercised without a browser.
//!
//! # Example
//!
//! ```
//! use catalog_scraper::stealth::{self, Clock, InMemoryEnvironment, Target};
//!
//! let mut env = InMemoryEnvironment::headless_chrome();
//! let records = stealth::apply(&mut env);
//! assert!(records.iter().all(|r| r.error.is_none()));
//!
//! assert_eq!(env.get(Target::Navigator, "webdriver"), Some(false.into()));
//! let first = env.now(Clock::HighResolution).unwrap();
//! assert!(env.now(Clock::HighResolution).unwrap() > first);
//! ```

pub mod clock;
pub mod sandbox;
pub mod script;

pub use clock::MonotonicClock;
pub use sandbox::InMemoryEnvironment;
pub use script::ScriptEnvironment;

use crate::error::ShimError;
use serde::Serialize;
use serde_json::{json, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Upper bound of the random increment added to each clock reading, in ms
pub const CLOCK_JITTER_MS: f64 = 5.0;

/// Timing functions inspected by anti-automation scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Clock {
    /// `Date.now()`, integer milliseconds
    WallClock,
    /// `performance.now()`, fractional milliseconds
    HighResolution,
}

impl Clock {
    pub fn name(&self) -> &'static str {
        match self {
            Clock::WallClock => "Date.now",
            Clock::HighResolution => "performance.now",
        }
    }

    /// Smallest forward step a reading can take
    pub fn step(&self) -> f64 {
        match self {
            Clock::WallClock => 1.0,
            Clock::HighResolution => 0.001,
        }
    }

    pub fn quantize(&self, value: f64) -> f64 {
        match self {
            Clock::WallClock => value.floor(),
            Clock::HighResolution => value,
        }
    }
}

/// Global objects the shim patches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Window,
    Navigator,
    Console,
}

impl Target {
    pub fn global(&self) -> &'static str {
        match self {
            Target::Window => "window",
            Target::Navigator => "navigator",
            Target::Console => "console",
        }
    }
}

/// A spoofed property. Reads always yield `value()`, writes are swallowed.
#[derive(Debug, Clone, Copy)]
pub struct AccessorSpec {
    pub target: Target,
    pub property: &'static str,
    pub value: fn() -> Value,
    pub configurable: bool,
}

impl AccessorSpec {
    pub fn name(&self) -> String {
        format!("{}.{}", self.target.global(), self.property)
    }
}

fn devtools_closed() -> Value {
    json!({
        "isOpen": false,
        "orientation": null,
        "isDevtoolsDetecting": false,
    })
}

fn automation_off() -> Value {
    Value::Bool(false)
}

pub const SPOOFED_PROPERTIES: &[AccessorSpec] = &[
    AccessorSpec {
        target: Target::Window,
        property: "devtools",
        value: devtools_closed,
        configurable: false,
    },
    AccessorSpec {
        target: Target::Navigator,
        property: "webdriver",
        value: automation_off,
        configurable: false,
    },
];

/// Functions replaced with no-ops when present
pub const SILENCED_FUNCTIONS: &[(Target, &str)] = &[(Target::Console, "clear")];

/// The global environment of one browser session, as seen by the shim
pub trait Environment {
    /// Make `clock` strictly increasing with up to `max_jitter` ms of noise
    fn wrap_clock(&mut self, clock: Clock, max_jitter: f64) -> Result<(), ShimError>;

    /// Replace (or define) a property with a read-only accessor
    fn install_accessor(&mut self, spec: &AccessorSpec) -> Result<(), ShimError>;

    /// Replace a function with a no-op. `Ok(false)` when it does not exist.
    fn silence_function(&mut self, target: Target, name: &str) -> Result<bool, ShimError>;
}

/// Outcome of one patch against the environment it was applied to, for
/// diagnostics only.
///
/// For [`ScriptEnvironment`] the environment is the rendered bundle: `applied`
/// means the patch was written into the script. Whether the page's engine
/// accepted it is not observable from Rust, since each fragment swallows its
/// own errors in the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShimPatchRecord {
    pub name: String,
    pub applied: bool,
    pub error: Option<String>,
}

/// Apply every patch to `env`. Never fails; failures land in the records.
pub fn apply(env: &mut dyn Environment) -> Vec<ShimPatchRecord> {
    let mut records = Vec::new();

    for clock in [Clock::WallClock, Clock::HighResolution] {
        records.push(guarded(clock.name(), || {
            env.wrap_clock(clock, CLOCK_JITTER_MS).map(|_| true)
        }));
    }

    for spec in SPOOFED_PROPERTIES {
        records.push(guarded(&spec.name(), || {
            env.install_accessor(spec).map(|_| true)
        }));
    }

    for (target, function) in SILENCED_FUNCTIONS {
        let name = format!("{}.{}", target.global(), function);
        records.push(guarded(&name, || env.silence_function(*target, function)));
    }

    records
}

/// Render the shim for a fresh browser context.
///
/// The records describe what went into the script, not what happened when
/// the page ran it.
pub fn build_script() -> (String, Vec<ShimPatchRecord>) {
    let mut env = ScriptEnvironment::new();
    let records = apply(&mut env);
    (env.into_script(), records)
}

fn guarded<F>(name: &str, patch: F) -> ShimPatchRecord
where
    F: FnOnce() -> Result<bool, ShimError>,
{
    let outcome = catch_unwind(AssertUnwindSafe(patch))
        .unwrap_or_else(|_| Err(ShimError::Panicked(name.to_string())));

    match outcome {
        Ok(applied) => {
            if !applied {
                log::debug!("Stealth patch {} skipped: not present", name);
            }
            ShimPatchRecord {
                name: name.to_string(),
                applied,
                error: None,
            }
        }
        Err(e) => {
            log::warn!("Stealth patch {} failed: {}", name, e);
            ShimPatchRecord {
                name: name.to_string(),
                applied: false,
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Environment where every operation fails or panics
    struct Hostile;

    impl Environment for Hostile {
        fn wrap_clock(&mut self, clock: Clock, _max_jitter: f64) -> Result<(), ShimError> {
            Err(ShimError::Missing(clock.name().to_string()))
        }

        fn install_accessor(&mut self, spec: &AccessorSpec) -> Result<(), ShimError> {
            if spec.property == "devtools" {
                panic!("defineProperty exploded");
            }
            Err(ShimError::NotConfigurable(spec.name()))
        }

        fn silence_function(&mut self, _target: Target, _name: &str) -> Result<bool, ShimError> {
            Ok(false)
        }
    }

    #[test]
    fn test_apply_records_every_patch() {
        let (_, records) = build_script();
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Date.now",
                "performance.now",
                "window.devtools",
                "navigator.webdriver",
                "console.clear"
            ]
        );
        assert!(records.iter().all(|r| r.applied));
    }

    #[test]
    fn test_failures_do_not_stop_later_patches() {
        let records = apply(&mut Hostile);
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| !r.applied));

        assert_eq!(
            records[2].error.as_deref(),
            Some("patch window.devtools panicked")
        );
        assert_eq!(
            records[3].error.as_deref(),
            Some("navigator.webdriver is not configurable")
        );
        // Absent function is a skip, not an error
        assert!(records[4].error.is_none());
    }

    #[test]
    fn test_clock_quantize() {
        assert_eq!(Clock::WallClock.quantize(10.9), 10.0);
        assert_eq!(Clock::HighResolution.quantize(10.9), 10.9);
    }
}
