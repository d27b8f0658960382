//! Plages de valeurs autorisées pour les variables d'état numériques.

use crate::variable_types::StateValue;

/// Plage `allowedValueRange` d'une variable d'état.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRange {
    minimum: f64,
    maximum: f64,
    step: Option<f64>,
}

impl ValueRange {
    /// Crée une plage. Retourne `None` si `minimum > maximum` ou si le pas
    /// est négatif ou nul.
    pub fn new(minimum: f64, maximum: f64, step: Option<f64>) -> Option<Self> {
        if minimum > maximum {
            return None;
        }
        if let Some(s) = step {
            if s <= 0.0 {
                return None;
            }
        }
        Some(Self {
            minimum,
            maximum,
            step,
        })
    }

    pub fn minimum(&self) -> f64 {
        self.minimum
    }

    pub fn maximum(&self) -> f64 {
        self.maximum
    }

    pub fn step(&self) -> Option<f64> {
        self.step
    }

    /// Vérifie qu'une valeur numérique tombe dans la plage.
    ///
    /// Les valeurs non numériques ne sont jamais contenues.
    pub fn contains(&self, value: &StateValue) -> bool {
        match value.as_f64() {
            Some(v) => v >= self.minimum && v <= self.maximum,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable_types::StateValue;

    #[test]
    fn test_range_bounds() {
        let range = ValueRange::new(0.0, 100.0, Some(1.0)).unwrap();
        assert!(range.contains(&StateValue::UI2(0)));
        assert!(range.contains(&StateValue::UI2(100)));
        assert!(!range.contains(&StateValue::I4(-1)));
        assert!(!range.contains(&StateValue::UI4(101)));
        assert!(!range.contains(&StateValue::String("50".to_string())));
    }

    #[test]
    fn test_invalid_ranges_rejected() {
        assert!(ValueRange::new(10.0, 0.0, None).is_none());
        assert!(ValueRange::new(0.0, 10.0, Some(0.0)).is_none());
        assert!(ValueRange::new(0.0, 10.0, Some(-1.0)).is_none());
    }
}
