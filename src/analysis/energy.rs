//! Energy helpers for drop experiments.

use crate::error::{ScanError, ScanResult};

/// Standard gravity in m/s².
pub const GRAVITY: f64 = 9.81;

/// Potential energy in joules of `mass_kg` raised by `height_m`.
pub fn potential_energy(mass_kg: f64, height_m: f64) -> ScanResult<f64> {
    check_mass(mass_kg)?;
    if !height_m.is_finite() {
        return Err(ScanError::InvalidQuantity(format!(
            "height must be finite, got {}",
            height_m
        )));
    }
    Ok(mass_kg * height_m * GRAVITY)
}

/// Speed in m/s of `mass_kg` carrying `kinetic_energy_j`.
pub fn velocity_from_energy(kinetic_energy_j: f64, mass_kg: f64) -> ScanResult<f64> {
    check_mass(mass_kg)?;
    if !kinetic_energy_j.is_finite() || kinetic_energy_j < 0.0 {
        return Err(ScanError::InvalidQuantity(format!(
            "kinetic energy must be finite and non-negative, got {}",
            kinetic_energy_j
        )));
    }
    Ok((2.0 * kinetic_energy_j / mass_kg).sqrt())
}

/// Speed reached by converting `potential_energy_j` fully to kinetic energy.
///
/// Returns `None` for negative potential energy (a body below the reference
/// plane has nothing to release).
pub fn impact_velocity(potential_energy_j: f64, mass_kg: f64) -> ScanResult<Option<f64>> {
    if potential_energy_j.is_finite() && potential_energy_j < 0.0 {
        check_mass(mass_kg)?;
        return Ok(None);
    }
    velocity_from_energy(potential_energy_j, mass_kg).map(Some)
}

fn check_mass(mass_kg: f64) -> ScanResult<()> {
    if mass_kg.is_finite() && mass_kg > 0.0 {
        Ok(())
    } else {
        Err(ScanError::InvalidQuantity(format!(
            "mass must be finite and positive, got {}",
            mass_kg
        )))
    }
}
