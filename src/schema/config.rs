//! Configuration types for the stable fluids simulation.

use serde::{Deserialize, Serialize};

fn default_width() -> usize {
    512
}

fn default_height() -> usize {
    512
}

fn default_pressure_iterations() -> usize {
    20
}

fn default_pressure_alpha() -> f32 {
    1.0
}

fn default_pressure_beta() -> f32 {
    1.0
}

fn default_dt() -> f32 {
    1.0
}

fn default_force_radius() -> f32 {
    36.0
}

fn default_force_coefficient() -> f32 {
    1.0
}

fn default_auto_force_coefficient() -> f32 {
    0.06
}

fn default_viscosity() -> f32 {
    0.99
}

/// Top-level simulation configuration.
///
/// All solver constants live here rather than as literals inside the
/// stage logic, so a host can tune them per scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FluidConfig {
    /// Grid width in cells.
    #[serde(default = "default_width")]
    pub width: usize,
    /// Grid height in cells.
    #[serde(default = "default_height")]
    pub height: usize,
    /// Number of Jacobi relaxation passes per step.
    #[serde(default = "default_pressure_iterations")]
    pub pressure_iterations: usize,
    /// Jacobi relaxation coefficient applied to the divergence term.
    #[serde(default = "default_pressure_alpha")]
    pub pressure_alpha: f32,
    /// Jacobi relaxation coefficient applied to the neighbor sum.
    #[serde(default = "default_pressure_beta")]
    pub pressure_beta: f32,
    /// Time step in grid units per step (1.0 = one frame-unit).
    #[serde(default = "default_dt")]
    pub dt: f32,
    /// Pointer force radius in cells.
    #[serde(default = "default_force_radius")]
    pub force_radius: f32,
    /// Scale applied to pointer displacement when injecting force.
    #[serde(default = "default_force_coefficient")]
    pub force_coefficient: f32,
    /// Magnitude of the time-varying ambient force.
    #[serde(default = "default_auto_force_coefficient")]
    pub auto_force_coefficient: f32,
    /// Per-step velocity damping factor, in (0, 1].
    #[serde(default = "default_viscosity")]
    pub viscosity: f32,
}

impl Default for FluidConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            pressure_iterations: default_pressure_iterations(),
            pressure_alpha: default_pressure_alpha(),
            pressure_beta: default_pressure_beta(),
            dt: default_dt(),
            force_radius: default_force_radius(),
            force_coefficient: default_force_coefficient(),
            auto_force_coefficient: default_auto_force_coefficient(),
            viscosity: default_viscosity(),
        }
    }
}

impl FluidConfig {
    /// Get total grid size (width * height).
    #[inline]
    pub fn grid_size(&self) -> usize {
        self.width * self.height
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.pressure_iterations == 0 {
            return Err(ConfigError::InvalidIterations);
        }
        if self.dt <= 0.0 {
            return Err(ConfigError::InvalidTimeStep);
        }
        if self.force_radius <= 0.0 {
            return Err(ConfigError::InvalidForceRadius);
        }
        if self.viscosity <= 0.0 || self.viscosity > 1.0 {
            return Err(ConfigError::InvalidViscosity);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Grid dimensions (width, height) must be non-zero")]
    InvalidDimensions,
    #[error("Pressure iteration count must be non-zero")]
    InvalidIterations,
    #[error("Time step must be positive")]
    InvalidTimeStep,
    #[error("Force radius must be positive")]
    InvalidForceRadius,
    #[error("Viscosity must be in (0, 1]")]
    InvalidViscosity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = FluidConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.width, 512);
        assert_eq!(config.height, 512);
        assert_eq!(config.pressure_iterations, 20);
        assert_eq!(config.force_radius, 36.0);
        assert_eq!(config.force_coefficient, 1.0);
        assert_eq!(config.auto_force_coefficient, 0.06);
        assert_eq!(config.viscosity, 0.99);
    }

    #[test]
    fn rejects_zero_dimensions() {
        let config = FluidConfig {
            width: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDimensions)
        ));
    }

    #[test]
    fn rejects_zero_iterations() {
        let config = FluidConfig {
            pressure_iterations: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidIterations)
        ));
    }

    #[test]
    fn rejects_out_of_range_viscosity() {
        let config = FluidConfig {
            viscosity: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidViscosity)
        ));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: FluidConfig = serde_json::from_str(r#"{"width": 64, "height": 64}"#).unwrap();
        assert_eq!(config.width, 64);
        assert_eq!(config.pressure_iterations, 20);
        assert_eq!(config.viscosity, 0.99);
    }
}
