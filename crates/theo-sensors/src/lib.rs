// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod battery;
mod environment;
mod imu;

pub use battery::{
    BatteryMonitor, BatteryPublisher, BatterySeverity, BatteryStatusEvent, BatteryTracker,
    BatteryTransition, VoltageSource,
};
pub use environment::{EnvironmentReading, EnvironmentSource};
pub use imu::{
    ImuEventDetector, ImuEventType, ImuMonitor, ImuMonitorHandle, ImuMotionEvent, ImuSample,
    ImuSource,
};
