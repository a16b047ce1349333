//! Component C -- Setpoint Writer.
//!
//! Writes a signed battery-power setpoint to the inverter's field-bus
//! register. Stateless beyond the bus connection; failures are reported,
//! never optimistically swallowed (§4.6).

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SetpointError {
    #[error("field-bus communication failed: {0}")]
    Bus(String),
}

/// `watts`: negative = charge, positive = discharge, zero = idle.
#[async_trait]
pub trait SetpointWriter: Send + Sync {
    async fn write_battery_power(&self, watts: i32) -> Result<bool, SetpointError>;
}

/// The battery-power holding register, per the field-bus register contract (§6).
const BATTERY_POWER_REGISTER: u16 = 1034;

#[cfg(feature = "modbus")]
pub struct ModbusSetpointWriter {
    client: crate::modbus::client::ModbusClient,
}

#[cfg(feature = "modbus")]
impl ModbusSetpointWriter {
    pub async fn connect(addr: &str, unit_id: u8) -> anyhow::Result<Self> {
        let client = crate::modbus::client::ModbusClient::connect(addr, unit_id).await?;
        Ok(Self { client })
    }
}

#[cfg(feature = "modbus")]
#[async_trait]
impl SetpointWriter for ModbusSetpointWriter {
    async fn write_battery_power(&self, watts: i32) -> Result<bool, SetpointError> {
        // Signed 32-bit setpoint packed into two consecutive 16-bit registers,
        // big-endian word order -- the common convention for this register class.
        let bytes = watts.to_be_bytes();
        let hi = u16::from_be_bytes([bytes[0], bytes[1]]);
        let lo = u16::from_be_bytes([bytes[2], bytes[3]]);
        self.client
            .write_multiple_registers(BATTERY_POWER_REGISTER, &[hi, lo])
            .await
            .map_err(|e| SetpointError::Bus(e.to_string()))?;
        Ok(true)
    }
}

/// A setpoint writer over an in-process simulated register, used when
/// `hardware.mode = "simulated"` and in tests.
pub struct SimulatedSetpointWriter {
    last_write: parking_lot::Mutex<i32>,
}

impl SimulatedSetpointWriter {
    pub fn new() -> Self {
        Self {
            last_write: parking_lot::Mutex::new(0),
        }
    }

    pub fn last_write(&self) -> i32 {
        *self.last_write.lock()
    }
}

impl Default for SimulatedSetpointWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SetpointWriter for SimulatedSetpointWriter {
    async fn write_battery_power(&self, watts: i32) -> Result<bool, SetpointError> {
        *self.last_write.lock() = watts;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_writer_records_last_setpoint() {
        let writer = SimulatedSetpointWriter::new();
        assert!(writer.write_battery_power(-3000).await.unwrap());
        assert_eq!(writer.last_write(), -3000);
        assert!(writer.write_battery_power(0).await.unwrap());
        assert_eq!(writer.last_write(), 0);
    }
}
