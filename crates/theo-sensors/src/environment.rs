// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// Onboard barometer/thermometer reading.
#[derive(Debug, Clone, Copy)]
pub struct EnvironmentReading {
    pub pressure_hpa: f64,
    pub temperature_c: f64,
}

/// Reads the onboard environment sensor. The I²C driver behind this is an
/// external collaborator.
pub trait EnvironmentSource: Send + Sync {
    fn read(&self) -> anyhow::Result<EnvironmentReading>;
}
