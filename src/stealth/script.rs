use super::{AccessorSpec, Clock, Environment, Target};
use crate::error::ShimError;

const CLOCK_PATCH: &str = r#"
  try {
    if (__OWNER__ && typeof __OWNER__.now === 'function') {
      const original = __OWNER__.now.bind(__OWNER__);
      let last = -Infinity;
      __OWNER__.now = function now() {
        let value = __ROUND__(original() + Math.random() * __JITTER__);
        if (!(value > last)) {
          value = __ROUND__(last + __STEP__ + Math.random() * __JITTER__);
        }
        last = value;
        return value;
      };
    }
  } catch (e) {}
"#;

const ACCESSOR_PATCH: &str = r#"
  try {
    Object.defineProperty(__TARGET__, '__NAME__', {
      get: () => (__VALUE__),
      set: () => {},
      configurable: __CONFIGURABLE__,
      enumerable: true,
    });
  } catch (e) {}
"#;

const SILENCE_PATCH: &str = r#"
  try {
    if (__TARGET__ && typeof __TARGET__.__NAME__ === 'function') {
      __TARGET__.__NAME__ = function __NAME__() {};
    }
  } catch (e) {}
"#;

/// Renders shim patches as a JavaScript bundle.
///
/// Each fragment is wrapped in its own `try` so a patch the page's engine
/// rejects does not stop the rest. Operations only fail for patches that
/// cannot be rendered; an in-page rejection is silent and never reaches the
/// returned [`ShimPatchRecord`](super::ShimPatchRecord)s.
#[derive(Debug, Default)]
pub struct ScriptEnvironment {
    fragments: Vec<String>,
}

impl ScriptEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Wrap all fragments into one self-invoking function
    pub fn into_script(self) -> String {
        format!("(() => {{{}}})();", self.fragments.join(""))
    }
}

impl Environment for ScriptEnvironment {
    fn wrap_clock(&mut self, clock: Clock, max_jitter: f64) -> Result<(), ShimError> {
        let (owner, round) = match clock {
            Clock::WallClock => ("Date", "Math.floor"),
            Clock::HighResolution => ("window.performance", ""),
        };
        let jitter = if max_jitter.is_finite() { max_jitter.max(0.0) } else { 0.0 };

        self.fragments.push(
            CLOCK_PATCH
                .replace("__OWNER__", owner)
                .replace("__ROUND__", round)
                .replace("__STEP__", &clock.step().to_string())
                .replace("__JITTER__", &jitter.to_string()),
        );
        Ok(())
    }

    fn install_accessor(&mut self, spec: &AccessorSpec) -> Result<(), ShimError> {
        if !is_identifier(spec.property) {
            return Err(ShimError::Missing(spec.name()));
        }
        let value = serde_json::to_string(&(spec.value)())
            .map_err(|_| ShimError::Missing(spec.name()))?;

        self.fragments.push(
            ACCESSOR_PATCH
                .replace("__TARGET__", spec.target.global())
                .replace("__NAME__", spec.property)
                .replace("__VALUE__", &value)
                .replace("__CONFIGURABLE__", if spec.configurable { "true" } else { "false" }),
        );
        Ok(())
    }

    fn silence_function(&mut self, target: Target, name: &str) -> Result<bool, ShimError> {
        if !is_identifier(name) {
            return Err(ShimError::Missing(format!("{}.{}", target.global(), name)));
        }
        // Presence is checked in the page
        self.fragments.push(
            SILENCE_PATCH
                .replace("__TARGET__", target.global())
                .replace("__NAME__", name),
        );
        Ok(true)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stealth::sandbox::InMemoryEnvironment;
    use crate::stealth::{apply, SPOOFED_PROPERTIES};
    use serde_json::Value;

    #[test]
    fn test_script_contains_every_patch() {
        let mut env = ScriptEnvironment::new();
        apply(&mut env);
        assert_eq!(env.fragment_count(), 5);

        let script = env.into_script();
        assert!(script.starts_with("(() => {"));
        assert!(script.ends_with("})();"));
        assert!(script.contains("Date.now = function now()"));
        assert!(script.contains("window.performance.now = function now()"));
        assert!(script.contains("Object.defineProperty(navigator, 'webdriver'"));
        assert!(script.contains("get: () => (false)"));
        assert!(script.contains("\"isOpen\":false"));
        assert!(script.contains("console.clear = function clear() {}"));
        assert!(!script.contains("__"));
    }

    #[test]
    fn test_wall_clock_is_floored() {
        let mut env = ScriptEnvironment::new();
        env.wrap_clock(Clock::WallClock, 5.0).unwrap();
        let script = env.into_script();
        assert!(script.contains("Math.floor(original() + Math.random() * 5)"));
        assert!(script.contains("last + 1 +"));
    }

    #[test]
    fn test_rejects_non_identifier_names() {
        let bad = AccessorSpec {
            target: Target::Window,
            property: "x'); alert(1); ('",
            value: || Value::Null,
            configurable: true,
        };
        let mut env = ScriptEnvironment::new();
        assert!(env.install_accessor(&bad).is_err());
        assert!(env.install_accessor(&SPOOFED_PROPERTIES[0]).is_ok());
        assert_eq!(env.fragment_count(), 1);
    }

    #[test]
    fn test_records_report_rendering_not_page_outcome() {
        // A page that already locked navigator.webdriver rejects the accessor
        let mut page = InMemoryEnvironment::headless_chrome().with_property(
            Target::Navigator,
            "webdriver",
            Value::Bool(true),
            false,
        );
        let in_page = apply(&mut page);
        let webdriver = in_page
            .iter()
            .find(|r| r.name == "navigator.webdriver")
            .unwrap();
        assert!(webdriver.error.is_some());

        // The rendered bundle cannot see that and reports the patch as written
        let mut bundle = ScriptEnvironment::new();
        let rendered = apply(&mut bundle);
        let webdriver = rendered
            .iter()
            .find(|r| r.name == "navigator.webdriver")
            .unwrap();
        assert!(webdriver.applied);
        assert!(webdriver.error.is_none());
        assert!(bundle.into_script().contains("} catch (e) {}"));
    }
}
