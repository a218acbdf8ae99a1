// Archivo: slice.rs
// Propósito: política de tamaño de slice compartida por el normalizador y
// el slicer.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlicePolicy {
    pub configured: usize,
    pub min: usize,
    pub max: usize,
}

impl SlicePolicy {
    /// Tamaño de slice para `count` ítems, o `None` si el troceo queda
    /// deshabilitado (procesamiento ítem por ítem). `requested` reemplaza al
    /// valor configurado como base del clamp.
    pub fn slice_for(&self, requested: Option<usize>, count: usize) -> Option<usize> {
        effective_slice(requested.unwrap_or(self.configured), self.min, self.max, count)
    }
}

/// `clamp(configured, min, min(max, count))`, deshabilitado si el valor
/// resultante queda por debajo de `min`.
pub fn effective_slice(configured: usize, min: usize, max: usize, count: usize) -> Option<usize> {
    let upper = max.min(count);
    let value = configured.max(min).min(upper);
    if value < min {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nine_items_use_the_configured_base() {
        assert_eq!(effective_slice(4, 2, 10, 9), Some(4));
    }

    #[test]
    fn single_item_disables_slicing() {
        assert_eq!(effective_slice(4, 2, 10, 1), None);
        assert_eq!(effective_slice(4, 2, 10, 0), None);
    }

    #[test]
    fn result_stays_within_bounds() {
        for configured in 0..15 {
            for count in 0..25 {
                match effective_slice(configured, 2, 10, count) {
                    Some(v) => {
                        assert!((2..=10).contains(&v));
                        assert!(v <= count);
                    }
                    None => assert!(count < 2),
                }
            }
        }
    }

    #[test]
    fn configured_below_min_is_raised_and_above_max_is_capped() {
        assert_eq!(effective_slice(1, 2, 10, 50), Some(2));
        assert_eq!(effective_slice(40, 2, 10, 50), Some(10));
        let policy = SlicePolicy { configured: 4, min: 2, max: 10 };
        assert_eq!(policy.slice_for(Some(6), 9), Some(6));
        assert_eq!(policy.slice_for(None, 3), Some(3));
    }
}
