// Archivo: config.rs
// Propósito: configuración del motor de lotes (tamaño de slice, inyección
// de fallos, latencia simulada y diagnósticos extendidos).
use crate::errors::{BatchError, Result};
use crate::slice::SlicePolicy;
use crate::step::FaultConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const DEFAULT_SLICE: usize = 4;
pub const MIN_SLICE: usize = 2;
pub const MAX_SLICE: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Tamaño de slice configurado (base del clamp).
    pub slice_size: usize,
    pub min_slice: usize,
    pub max_slice: usize,
    /// Borde superior de la banda de fallos simulados.
    pub failure_rate: f64,
    /// Borde inferior de la banda de fallos simulados.
    pub failure_floor: f64,
    /// Cota de la latencia simulada por ejecución de paso.
    pub max_latency_ms: u64,
    /// Solicitar diagnósticos extendidos por defecto.
    pub extended: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { slice_size: DEFAULT_SLICE,
               min_slice: MIN_SLICE,
               max_slice: MAX_SLICE,
               failure_rate: 0.0,
               failure_floor: 0.0,
               max_latency_ms: 0,
               extended: false }
    }
}

impl BatchConfig {
    /// Carga `.env` si existe y lee las variables `SUBMIT_*`. Las ausentes
    /// conservan el valor por defecto; las inválidas son
    /// `BatchError::Validation` con el nombre de la variable.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let d = Self::default();
        let cfg = Self { slice_size: read_var("SUBMIT_SLICE_SIZE", d.slice_size)?,
                         min_slice: read_var("SUBMIT_MIN_SLICE", d.min_slice)?,
                         max_slice: read_var("SUBMIT_MAX_SLICE", d.max_slice)?,
                         failure_rate: read_var("SUBMIT_FAILURE_RATE", d.failure_rate)?,
                         failure_floor: read_var("SUBMIT_FAILURE_FLOOR", d.failure_floor)?,
                         max_latency_ms: read_var("SUBMIT_MAX_LATENCY_MS", d.max_latency_ms)?,
                         extended: read_var("SUBMIT_EXTENDED", d.extended)? };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_slice == 0 || self.min_slice > self.max_slice {
            return Err(BatchError::Validation(format!("límites de slice inválidos: min={} max={}",
                                                      self.min_slice, self.max_slice)));
        }
        if !(0.0..=1.0).contains(&self.failure_floor)
           || !(0.0..=1.0).contains(&self.failure_rate)
           || self.failure_floor > self.failure_rate
        {
            return Err(BatchError::Validation(format!("banda de fallos inválida: [{}, {})",
                                                      self.failure_floor, self.failure_rate)));
        }
        Ok(())
    }

    pub fn policy(&self) -> SlicePolicy {
        SlicePolicy { configured: self.slice_size, min: self.min_slice, max: self.max_slice }
    }

    pub fn fault(&self) -> FaultConfig {
        FaultConfig { failure_floor: self.failure_floor,
                      failure_rate: self.failure_rate,
                      max_latency_ms: self.max_latency_ms }
    }
}

fn read_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw.trim()
                      .parse::<T>()
                      .map_err(|_| BatchError::Validation(format!("{} inválida: '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = BatchConfig::default();
        cfg.validate().expect("defaults");
        assert_eq!(cfg.policy().configured, 4);
        assert_eq!(cfg.fault().failure_rate, 0.0);
    }

    #[test]
    fn inverted_band_is_rejected() {
        let cfg = BatchConfig { failure_floor: 0.5, failure_rate: 0.2, ..BatchConfig::default() };
        assert!(matches!(cfg.validate(), Err(BatchError::Validation(_))));
        let cfg = BatchConfig { min_slice: 8, max_slice: 3, ..BatchConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unparsable_variable_names_itself() {
        std::env::set_var("SUBMIT_TEST_ONLY_VAR", "abc");
        let err = read_var::<usize>("SUBMIT_TEST_ONLY_VAR", 1).expect_err("must fail");
        assert!(err.to_string().contains("SUBMIT_TEST_ONLY_VAR"));
        std::env::remove_var("SUBMIT_TEST_ONLY_VAR");
        assert_eq!(read_var::<usize>("SUBMIT_TEST_ONLY_VAR", 7).expect("default"), 7);
    }
}
