use super::{AccessorSpec, Clock, Environment, MonotonicClock, Target};
use crate::error::ShimError;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub type ClockSource = Box<dyn FnMut() -> f64 + Send>;

struct ClockSlot {
    source: ClockSource,
    wrapper: Option<MonotonicClock>,
}

#[derive(Debug, Clone)]
struct Property {
    value: Value,
    accessor: bool,
    writable: bool,
    configurable: bool,
}

/// In-process model of a browser session's globals.
///
/// Follows `Object.defineProperty` rules closely enough for the shim:
/// non-configurable properties cannot be redefined, writes to accessors
/// without a meaningful setter are dropped, and `console.clear` empties the
/// console until it is silenced.
#[derive(Default)]
pub struct InMemoryEnvironment {
    clocks: HashMap<Clock, ClockSlot>,
    properties: HashMap<(Target, String), Property>,
    functions: HashMap<(Target, String), bool>,
    console: Vec<String>,
}

impl InMemoryEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// What an unpatched automated Chrome session looks like to a page script
    pub fn headless_chrome() -> Self {
        let started = Instant::now();
        Self::new()
            .with_clock(Clock::WallClock, || {
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as f64)
                    .unwrap_or(0.0)
            })
            .with_clock(Clock::HighResolution, move || {
                started.elapsed().as_secs_f64() * 1000.0
            })
            .with_property(Target::Navigator, "webdriver", Value::Bool(true), true)
            .with_function(Target::Console, "clear")
    }

    pub fn with_clock<F>(mut self, clock: Clock, source: F) -> Self
    where
        F: FnMut() -> f64 + Send + 'static,
    {
        self.clocks.insert(
            clock,
            ClockSlot {
                source: Box::new(source),
                wrapper: None,
            },
        );
        self
    }

    /// Define a plain writable data property
    pub fn with_property(
        mut self,
        target: Target,
        name: &str,
        value: Value,
        configurable: bool,
    ) -> Self {
        self.properties.insert(
            (target, name.to_string()),
            Property {
                value,
                accessor: false,
                writable: true,
                configurable,
            },
        );
        self
    }

    pub fn with_function(mut self, target: Target, name: &str) -> Self {
        self.functions.insert((target, name.to_string()), false);
        self
    }

    /// Read a clock the way page script would
    pub fn now(&mut self, clock: Clock) -> Option<f64> {
        let slot = self.clocks.get_mut(&clock)?;
        let raw = (slot.source)();
        Some(match slot.wrapper.as_mut() {
            Some(wrapper) => wrapper.next(raw),
            None => raw,
        })
    }

    pub fn get(&self, target: Target, name: &str) -> Option<Value> {
        self.properties
            .get(&(target, name.to_string()))
            .map(|p| p.value.clone())
    }

    /// Assign a property. Writes to accessors and read-only data are ignored.
    pub fn set(&mut self, target: Target, name: &str, value: Value) {
        match self.properties.get_mut(&(target, name.to_string())) {
            Some(property) if property.accessor || !property.writable => {}
            Some(property) => property.value = value,
            None => {
                self.properties.insert(
                    (target, name.to_string()),
                    Property {
                        value,
                        accessor: false,
                        writable: true,
                        configurable: true,
                    },
                );
            }
        }
    }

    pub fn is_configurable(&self, target: Target, name: &str) -> Option<bool> {
        self.properties
            .get(&(target, name.to_string()))
            .map(|p| p.configurable)
    }

    pub fn is_accessor(&self, target: Target, name: &str) -> Option<bool> {
        self.properties
            .get(&(target, name.to_string()))
            .map(|p| p.accessor)
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.console.push(line.into());
    }

    pub fn console_lines(&self) -> &[String] {
        &self.console
    }

    /// Call a function by name. Only `console.clear` has an observable effect.
    pub fn call(&mut self, target: Target, name: &str) -> Result<(), ShimError> {
        let silenced = *self
            .functions
            .get(&(target, name.to_string()))
            .ok_or_else(|| ShimError::Missing(format!("{}.{}", target.global(), name)))?;

        if !silenced && target == Target::Console && name == "clear" {
            self.console.clear();
        }
        Ok(())
    }
}

impl Environment for InMemoryEnvironment {
    fn wrap_clock(&mut self, clock: Clock, max_jitter: f64) -> Result<(), ShimError> {
        let slot = self
            .clocks
            .get_mut(&clock)
            .ok_or_else(|| ShimError::Missing(clock.name().to_string()))?;
        slot.wrapper = Some(MonotonicClock::new(clock, max_jitter));
        Ok(())
    }

    fn install_accessor(&mut self, spec: &AccessorSpec) -> Result<(), ShimError> {
        let key = (spec.target, spec.property.to_string());
        if let Some(existing) = self.properties.get(&key) {
            if !existing.configurable {
                return Err(ShimError::NotConfigurable(spec.name()));
            }
        }

        self.properties.insert(
            key,
            Property {
                value: (spec.value)(),
                accessor: true,
                writable: false,
                configurable: spec.configurable,
            },
        );
        Ok(())
    }

    fn silence_function(&mut self, target: Target, name: &str) -> Result<bool, ShimError> {
        match self.functions.get_mut(&(target, name.to_string())) {
            Some(silenced) => {
                *silenced = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpatched_console_clear_erases_lines() {
        let mut env = InMemoryEnvironment::headless_chrome();
        env.log("detector");
        env.call(Target::Console, "clear").unwrap();
        assert!(env.console_lines().is_empty());
    }

    #[test]
    fn test_non_configurable_property_rejects_accessor() {
        let mut env = InMemoryEnvironment::new().with_property(
            Target::Window,
            "devtools",
            Value::Bool(true),
            false,
        );
        let spec = crate::stealth::SPOOFED_PROPERTIES[0];
        assert_eq!(
            env.install_accessor(&spec),
            Err(ShimError::NotConfigurable("window.devtools".to_string()))
        );
        assert_eq!(env.get(Target::Window, "devtools"), Some(Value::Bool(true)));
    }

    #[test]
    fn test_missing_clock_reports_missing() {
        let mut env = InMemoryEnvironment::new();
        assert!(matches!(
            env.wrap_clock(Clock::WallClock, 5.0),
            Err(ShimError::Missing(_))
        ));
        assert_eq!(env.now(Clock::WallClock), None);
    }
}
