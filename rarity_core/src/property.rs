use crate::simulator::SimError;
use serde::Serialize;

/// The kinds of properties that can be estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PropertyKind {
    /// Probability of reaching a target state before a deadline state and within the time bound.
    Reachability,
    /// Long-run fraction of time spent in target states.
    SteadyState,
    /// Expected time until a run reaches a target or deadline state,
    /// gets absorbed, or exceeds the time bound.
    ExpectedValue,
}

/// An immutable description of the property to estimate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    kind: PropertyKind,
    time_bound: f64,
}

impl Property {
    /// Creates a property, where an infinite time bound means no time bound.
    ///
    /// It fails if the time bound is negative or NaN,
    /// or if a steady-state property is given a finite time bound.
    pub fn new(kind: PropertyKind, time_bound: f64) -> Result<Self, SimError> {
        if time_bound.is_nan() || time_bound < 0.0 {
            Err(SimError::InvalidTimeBound(time_bound))
        } else if kind == PropertyKind::SteadyState && time_bound.is_finite() {
            Err(SimError::BoundedSteadyState)
        } else {
            Ok(Self { kind, time_bound })
        }
    }

    /// The kind of property.
    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    /// The time bound, infinite if there is none.
    pub fn time_bound(&self) -> f64 {
        self.time_bound
    }

    /// Whether the property has a finite time bound.
    pub fn is_time_bounded(&self) -> bool {
        self.time_bound.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_bounds() {
        let prop = Property::new(PropertyKind::Reachability, 3.5).expect("valid");
        assert!(prop.is_time_bounded());
        assert_eq!(prop.time_bound(), 3.5);
        let prop = Property::new(PropertyKind::ExpectedValue, f64::INFINITY).expect("valid");
        assert!(!prop.is_time_bounded());
        assert!(Property::new(PropertyKind::Reachability, 0.0).is_ok());
        assert!(matches!(
            Property::new(PropertyKind::Reachability, -1.0),
            Err(SimError::InvalidTimeBound(_))
        ));
        assert!(Property::new(PropertyKind::Reachability, f64::NAN).is_err());
        assert!(matches!(
            Property::new(PropertyKind::SteadyState, 10.0),
            Err(SimError::BoundedSteadyState)
        ));
        assert!(Property::new(PropertyKind::SteadyState, f64::INFINITY).is_ok());
    }
}
