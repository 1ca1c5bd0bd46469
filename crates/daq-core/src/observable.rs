//! Observable Parameters
//!
//! Operator controls of a driver are registered as observables so a host GUI
//! can enumerate them, render them from metadata and validate edits before
//! anything reaches the instrument.
//!
//! ```rust,ignore
//! // Float with slider bounds (dtype="float", min_value, max_value set)
//! let diameter = Observable::new("Pupil Diameter X", 4.5)
//!     .with_units("mm")
//!     .with_range_introspectable(0.1, 10.0)
//!     .with_step(0.01);
//!
//! // Integer restricted to a set of values (dtype="enum")
//! let fourier = Observable::new("Fourier Order", 2i64)
//!     .with_choices_introspectable(vec![2, 4, 6]);
//! ```
//!
//! NaN and Infinity are rejected by float range validators so snapshots
//! always serialize to JSON.

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

type Validator<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// Type-erased access to a parameter, used by [`ParameterSet`].
pub trait ParameterBase: Send + Sync {
    /// Parameter name (unique within a set).
    fn name(&self) -> String;

    fn metadata(&self) -> ObservableMetadata;

    /// Current value as JSON.
    fn get_json(&self) -> Result<serde_json::Value>;

    /// Validate and set from JSON.
    fn set_json(&self, value: serde_json::Value) -> Result<()>;
}

/// Metadata for an observable parameter.
///
/// | Field | Populated By | GUI Widget |
/// |-------|--------------|------------|
/// | `dtype="float"`, `min_value`, `max_value` | `Observable<f64>::with_range_introspectable()` | Slider |
/// | `dtype="int"`, `min_value`, `max_value` | `Observable<i64>::with_range_introspectable()` | Spin box |
/// | `dtype="enum"`, `min_value`, `max_value` | `Observable<i64>::with_choices_introspectable()` | Combo box |
/// | `dtype="bool"` | `Observable<bool>::as_checkbox()` | Checkbox |
/// | `step` | `with_step()` | Spin increment |
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservableMetadata {
    /// Front-panel key.
    pub name: String,

    /// Tooltip text.
    pub description: Option<String>,

    /// Physical units (e.g., "mm").
    pub units: Option<String>,

    /// Widget hint: `"float"`, `"int"`, `"bool"` or `"enum"`.
    #[serde(default)]
    pub dtype: String,

    #[serde(default)]
    pub min_value: Option<f64>,

    #[serde(default)]
    pub max_value: Option<f64>,

    #[serde(default)]
    pub step: Option<f64>,
}

/// A validated control value with introspectable metadata.
///
/// Clones share value, metadata and validator.
pub struct Observable<T> {
    value: Arc<RwLock<T>>,
    metadata: Arc<RwLock<ObservableMetadata>>,
    validator: Option<Validator<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            metadata: Arc::clone(&self.metadata),
            validator: self.validator.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("metadata", &*self.metadata.read())
            .field("has_validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, initial_value: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(initial_value)),
            metadata: Arc::new(RwLock::new(ObservableMetadata {
                name: name.into(),
                ..ObservableMetadata::default()
            })),
            validator: None,
        }
    }

    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.metadata.write().description = Some(description.into());
        self
    }

    pub fn with_units(self, units: impl Into<String>) -> Self {
        self.metadata.write().units = Some(units.into());
        self
    }

    /// Declare the control increment.
    pub fn with_step(self, step: f64) -> Self {
        self.metadata.write().step = Some(step);
        self
    }

    fn constrained(
        mut self,
        dtype: &str,
        bounds: (Option<f64>, Option<f64>),
        validator: impl Fn(&T) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        {
            let mut meta = self.metadata.write();
            meta.dtype = dtype.to_string();
            meta.min_value = bounds.0;
            meta.max_value = bounds.1;
        }
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    pub fn name(&self) -> String {
        self.metadata.read().name.clone()
    }

    pub fn metadata(&self) -> ObservableMetadata {
        self.metadata.read().clone()
    }

    /// Validate and store `value`. A rejected value leaves the old one in place.
    pub fn set(&self, value: T) -> Result<()> {
        if let Some(validator) = &self.validator {
            validator(&value).map_err(|e| anyhow!("'{}': {}", self.name(), e))?;
        }
        *self.value.write() = value;
        Ok(())
    }
}

impl<T> ParameterBase for Observable<T>
where
    T: Clone + Send + Sync + Serialize + for<'de> Deserialize<'de> + 'static,
{
    fn name(&self) -> String {
        Observable::name(self)
    }

    fn metadata(&self) -> ObservableMetadata {
        Observable::metadata(self)
    }

    fn get_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.get())?)
    }

    fn set_json(&self, value: serde_json::Value) -> Result<()> {
        let typed: T = serde_json::from_value(value)
            .map_err(|e| anyhow!("'{}': invalid value type: {}", self.name(), e))?;
        self.set(typed)
    }
}

impl Observable<f64> {
    /// Bound the value to `[min, max]`, rejecting NaN and Infinity.
    ///
    /// # Panics
    ///
    /// Panics at construction if a bound is non-finite or `min > max`.
    pub fn with_range_introspectable(self, min: f64, max: f64) -> Self {
        assert!(
            min.is_finite() && max.is_finite() && min <= max,
            "invalid range [{min}, {max}]"
        );
        self.constrained("float", (Some(min), Some(max)), move |value: &f64| {
            if !value.is_finite() {
                Err(anyhow!("Value must be finite, got {value:?}"))
            } else if *value < min || *value > max {
                Err(anyhow!("Value {value:?} out of range [{min:?}, {max:?}]"))
            } else {
                Ok(())
            }
        })
    }
}

impl Observable<i64> {
    /// # Panics
    ///
    /// Panics at construction if `min > max`.
    pub fn with_range_introspectable(self, min: i64, max: i64) -> Self {
        assert!(min <= max, "invalid range [{min}, {max}]");
        self.constrained("int", (Some(min as f64), Some(max as f64)), move |value: &i64| {
            if (min..=max).contains(value) {
                Ok(())
            } else {
                Err(anyhow!("Value {value} out of range [{min}, {max}]"))
            }
        })
    }

    /// Restrict to a discrete set of integers.
    pub fn with_choices_introspectable(self, choices: Vec<i64>) -> Self {
        let bounds = (
            choices.iter().min().map(|v| *v as f64),
            choices.iter().max().map(|v| *v as f64),
        );
        self.constrained("enum", bounds, move |value: &i64| {
            if choices.contains(value) {
                Ok(())
            } else {
                Err(anyhow!("Value {value} is not one of {choices:?}"))
            }
        })
    }
}

impl Observable<bool> {
    pub fn as_checkbox(self) -> Self {
        self.metadata.write().dtype = "bool".to_string();
        self
    }
}

/// An ordered collection of observable parameters for a device.
///
/// Registration order is kept so GUIs lay controls out the way the driver
/// declared them.
#[derive(Default)]
pub struct ParameterSet {
    parameters: Vec<Box<dyn ParameterBase>>,
}

impl std::fmt::Debug for ParameterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterSet")
            .field("names", &self.names())
            .finish()
    }
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter. A parameter with the same name is replaced.
    pub fn register<P>(&mut self, parameter: P)
    where
        P: ParameterBase + 'static,
    {
        let name = parameter.name();
        self.parameters.retain(|p| p.name() != name);
        self.parameters.push(Box::new(parameter));
    }

    pub fn get(&self, name: &str) -> Option<&dyn ParameterBase> {
        self.parameters
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name()).collect()
    }

    /// Every value as a JSON object keyed by name.
    pub fn snapshot(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        self.parameters
            .iter()
            .map(|p| Ok((p.name(), p.get_json()?)))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn float_range_rejects_out_of_range_and_nan() {
        let obs = Observable::new("Pupil Diameter X", 4.5)
            .with_units("mm")
            .with_range_introspectable(0.1, 10.0)
            .with_step(0.01);

        assert!(obs.set(5.0).is_ok());
        assert_eq!(obs.get(), 5.0);
        assert!(obs.set(0.0).is_err());
        assert!(obs.set(f64::NAN).is_err());
        assert!(obs.set(f64::INFINITY).is_err());
        assert_eq!(obs.get(), 5.0);

        let meta = obs.metadata();
        assert_eq!(meta.dtype, "float");
        assert_eq!(meta.min_value, Some(0.1));
        assert_eq!(meta.max_value, Some(10.0));
        assert_eq!(meta.step, Some(0.01));
    }

    #[test]
    fn int_range_and_choices() {
        let order = Observable::new("Highest Zernike Order", 4i64).with_range_introspectable(2, 10);
        assert!(order.set(0).is_err());
        assert!(order.set(10).is_ok());

        let fourier = Observable::new("Fourier Order", 2i64).with_choices_introspectable(vec![2, 4, 6]);
        assert!(fourier.set(4).is_ok());
        assert!(fourier.set(3).is_err());
        assert_eq!(fourier.get(), 4);
        let meta = fourier.metadata();
        assert_eq!(meta.dtype, "enum");
        assert_eq!((meta.min_value, meta.max_value), (Some(2.0), Some(6.0)));
    }

    #[test]
    fn clones_share_the_value() {
        let obs = Observable::new("Pupil Center X", 0.0).with_range_introspectable(-5.0, 5.0);
        let copy = obs.clone();
        copy.set(1.25).unwrap();
        assert_eq!(obs.get(), 1.25);
    }

    #[test]
    fn parameter_set_snapshot_and_json() {
        let mut set = ParameterSet::new();
        set.register(Observable::new("Limited to Pupil?", true).as_checkbox());
        set.register(Observable::new("Resolution Index", 1i64).with_range_introspectable(0, 11));

        assert_eq!(set.names(), vec!["Limited to Pupil?", "Resolution Index"]);

        let res = set.get("Resolution Index").unwrap();
        assert!(res.set_json(serde_json::json!(12)).is_err());
        assert!(res.set_json(serde_json::json!("three")).is_err());
        res.set_json(serde_json::json!(3)).unwrap();

        let snap = set.snapshot().unwrap();
        assert_eq!(snap["Resolution Index"], serde_json::json!(3));
        assert_eq!(snap["Limited to Pupil?"], serde_json::json!(true));
    }
}
