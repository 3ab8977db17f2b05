//! Thorlabs Kinesis K-Cube DC servo driver (KDC101).
//!
//! Reference: Thorlabs APT Communications Protocol, Issue 39.
//!
//! Protocol overview:
//! - Binary frames with a 6-byte header: message id (u16 LE), then either
//!   two parameter bytes or a data-packet length, destination, source.
//! - Long-form frames set bit 7 of the destination byte and append the
//!   data packet.
//! - Positions travel as signed 32-bit encoder counts; the KDC101 with a
//!   Z8-series actuator resolves 34304 counts per millimeter.
//! - The cube confirms motion with unsolicited MOVE_HOMED / MOVE_COMPLETED
//!   frames; status is polled with REQ_DCSTATUSUPDATE.
//!
//! Bounded waiting is applied one layer up: this driver waits indefinitely
//! for completion frames and the axis handle wraps every call in
//! `tokio::time::timeout`.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::config::AxisSettings;
use crate::hardware::MotionAxis;

/// Encoder counts per millimeter for the Z8-series actuator on a KDC101.
const ENC_COUNTS_PER_MM: f64 = 34_304.0;

/// Generic USB destination for a K-Cube and the host source address.
const DEST: u8 = 0x50;
const SOURCE: u8 = 0x01;
const CHANNEL: u16 = 0x0001;

// Message ids used by this driver.
const MGMSG_MOD_SET_CHANENABLESTATE: u16 = 0x0210;
const MGMSG_HW_REQ_INFO: u16 = 0x0005;
const MGMSG_HW_GET_INFO: u16 = 0x0006;
const MGMSG_MOT_MOVE_HOME: u16 = 0x0443;
const MGMSG_MOT_MOVE_HOMED: u16 = 0x0444;
const MGMSG_MOT_MOVE_ABSOLUTE: u16 = 0x0453;
const MGMSG_MOT_MOVE_COMPLETED: u16 = 0x0464;
const MGMSG_MOT_REQ_DCSTATUSUPDATE: u16 = 0x0490;
const MGMSG_MOT_GET_DCSTATUSUPDATE: u16 = 0x0491;

// Status word bits in GET_DCSTATUSUPDATE.
const STATUS_MOTION_ERROR: u32 = 0x0000_4000;

/// Driver for one KDC101 cube on its USB virtual serial port.
pub struct KinesisAxis {
    port: Mutex<Option<SerialStream>>,
    port_path: String,
    serial: String,
    polling_interval: Duration,
}

impl KinesisAxis {
    /// Build a driver from axis settings. The port path defaults to the
    /// Kinesis USB device path derived from the serial number.
    pub fn open(settings: &AxisSettings) -> Result<Self> {
        let port_path = settings.port.clone().unwrap_or_else(|| {
            format!(
                "/dev/serial/by-id/usb-Thorlabs_Kinesis_K-Cube_DC_Driver_{}-if00",
                settings.serial
            )
        });
        Ok(Self {
            port: Mutex::new(None),
            port_path,
            serial: settings.serial.clone(),
            polling_interval: settings.polling_interval(),
        })
    }

    async fn write_frame(&self, port: &mut SerialStream, frame: &[u8]) -> Result<()> {
        port.write_all(frame)
            .await
            .with_context(|| format!("KDC101 {} write failed", self.serial))
    }

    /// Read one APT frame: header plus any long-form data packet.
    async fn read_frame(&self, port: &mut SerialStream) -> Result<(u16, Vec<u8>)> {
        let mut header = [0u8; 6];
        port.read_exact(&mut header)
            .await
            .with_context(|| format!("KDC101 {} read failed", self.serial))?;
        let msg_id = u16::from_le_bytes([header[0], header[1]]);
        if header[4] & 0x80 == 0 {
            // Short form: the two parameter bytes are the payload.
            return Ok((msg_id, vec![header[2], header[3]]));
        }
        let len = u16::from_le_bytes([header[2], header[3]]) as usize;
        let mut data = vec![0u8; len];
        port.read_exact(&mut data)
            .await
            .with_context(|| format!("KDC101 {} data read failed", self.serial))?;
        Ok((msg_id, data))
    }

    /// Read frames until `wanted` arrives, pausing the polling interval
    /// between unrelated frames (status updates interleave freely).
    async fn await_frame(&self, port: &mut SerialStream, wanted: u16) -> Result<Vec<u8>> {
        loop {
            let (msg_id, data) = self.read_frame(port).await?;
            if msg_id == wanted {
                return Ok(data);
            }
            if msg_id == MGMSG_MOT_GET_DCSTATUSUPDATE {
                let status = parse_dc_status(&data)?;
                if status.status_bits & STATUS_MOTION_ERROR != 0 {
                    bail!(
                        "KDC101 {} reported a motion error (status {:#010x})",
                        self.serial,
                        status.status_bits
                    );
                }
                continue;
            }
            tracing::trace!(serial = %self.serial, msg_id = %format!("{msg_id:#06x}"), "skipping frame");
            tokio::time::sleep(self.polling_interval).await;
        }
    }

    fn with_port<'a>(
        &self,
        guard: &'a mut Option<SerialStream>,
    ) -> Result<&'a mut SerialStream> {
        guard
            .as_mut()
            .ok_or_else(|| anyhow!("KDC101 {} is not connected", self.serial))
    }
}

#[async_trait]
impl MotionAxis for KinesisAxis {
    async fn connect(&self) -> Result<()> {
        let mut guard = self.port.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let mut port = tokio_serial::new(&self.port_path, 115_200)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .with_context(|| format!("failed to open KDC101 serial port {}", self.port_path))?;

        // Handshake: request hardware info so a wrong or dead port fails
        // here instead of at the first motion command.
        self.write_frame(&mut port, &short_frame(MGMSG_HW_REQ_INFO, 0, 0))
            .await?;
        let info = tokio::time::timeout(
            Duration::from_secs(2),
            self.await_frame(&mut port, MGMSG_HW_GET_INFO),
        )
        .await
        .map_err(|_| anyhow!("KDC101 {} did not answer hardware info request", self.serial))??;
        tracing::debug!(serial = %self.serial, info_len = info.len(), "cube identified");

        // Enable the drive channel.
        self.write_frame(
            &mut port,
            &short_frame(MGMSG_MOD_SET_CHANENABLESTATE, CHANNEL as u8, 0x01),
        )
        .await?;

        *guard = Some(port);
        tracing::info!(serial = %self.serial, port = %self.port_path, "KDC101 connected");
        Ok(())
    }

    async fn home(&self) -> Result<()> {
        let mut guard = self.port.lock().await;
        let port = self.with_port(&mut guard)?;
        let frame = short_frame(MGMSG_MOT_MOVE_HOME, CHANNEL as u8, 0);
        port.write_all(&frame)
            .await
            .with_context(|| format!("KDC101 {} write failed", self.serial))?;
        self.await_frame(port, MGMSG_MOT_MOVE_HOMED).await?;
        Ok(())
    }

    async fn move_abs(&self, target_mm: f64) -> Result<()> {
        let counts = mm_to_counts(target_mm);
        let mut guard = self.port.lock().await;
        let port = self.with_port(&mut guard)?;
        let frame = move_absolute_frame(counts);
        port.write_all(&frame)
            .await
            .with_context(|| format!("KDC101 {} write failed", self.serial))?;
        self.await_frame(port, MGMSG_MOT_MOVE_COMPLETED).await?;
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        let mut guard = self.port.lock().await;
        let port = self.with_port(&mut guard)?;
        let frame = short_frame(MGMSG_MOT_REQ_DCSTATUSUPDATE, CHANNEL as u8, 0);
        port.write_all(&frame)
            .await
            .with_context(|| format!("KDC101 {} write failed", self.serial))?;
        let data = self.await_frame(port, MGMSG_MOT_GET_DCSTATUSUPDATE).await?;
        let status = parse_dc_status(&data)?;
        Ok(counts_to_mm(status.position_counts))
    }

    async fn disconnect(&self) -> Result<()> {
        let mut guard = self.port.lock().await;
        let Some(mut port) = guard.take() else {
            return Ok(());
        };
        // Best effort: disable the channel before dropping the port.
        let frame = short_frame(MGMSG_MOD_SET_CHANENABLESTATE, CHANNEL as u8, 0x02);
        if let Err(e) = port.write_all(&frame).await {
            tracing::warn!(serial = %self.serial, error = %e, "channel disable failed");
        }
        tracing::info!(serial = %self.serial, "KDC101 disconnected");
        Ok(())
    }
}

/// Parsed GET_DCSTATUSUPDATE payload.
#[derive(Debug, Clone, Copy)]
struct DcStatus {
    position_counts: i32,
    status_bits: u32,
}

/// Payload layout: chan u16, position i32, velocity u16, reserved u16,
/// status u32 (all little-endian, 14 bytes).
fn parse_dc_status(data: &[u8]) -> Result<DcStatus> {
    if data.len() < 14 {
        bail!("DCSTATUSUPDATE payload too short: {} bytes", data.len());
    }
    let position_counts = i32::from_le_bytes([data[2], data[3], data[4], data[5]]);
    let status_bits = u32::from_le_bytes([data[10], data[11], data[12], data[13]]);
    Ok(DcStatus {
        position_counts,
        status_bits,
    })
}

fn short_frame(msg_id: u16, param1: u8, param2: u8) -> [u8; 6] {
    let id = msg_id.to_le_bytes();
    [id[0], id[1], param1, param2, DEST, SOURCE]
}

fn move_absolute_frame(counts: i32) -> Vec<u8> {
    let mut frame = BytesMut::with_capacity(12);
    frame.put_u16_le(MGMSG_MOT_MOVE_ABSOLUTE);
    frame.put_u16_le(6); // data packet length
    frame.put_u8(DEST | 0x80);
    frame.put_u8(SOURCE);
    frame.put_u16_le(CHANNEL);
    frame.put_i32_le(counts);
    frame.to_vec()
}

fn mm_to_counts(mm: f64) -> i32 {
    (mm * ENC_COUNTS_PER_MM).round() as i32
}

fn counts_to_mm(counts: i32) -> f64 {
    f64::from(counts) / ENC_COUNTS_PER_MM
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_conversion_round_trips() {
        assert_eq!(mm_to_counts(1.0), 34_304);
        assert_eq!(mm_to_counts(0.0), 0);
        let mm = counts_to_mm(mm_to_counts(12.5));
        assert!((mm - 12.5).abs() < 1e-4);
    }

    #[test]
    fn short_frame_layout() {
        let frame = short_frame(MGMSG_MOT_MOVE_HOME, 0x01, 0x00);
        assert_eq!(frame, [0x43, 0x04, 0x01, 0x00, 0x50, 0x01]);
    }

    #[test]
    fn move_absolute_frame_layout() {
        // 2.0 mm = 68608 counts = 0x00010C00.
        let frame = move_absolute_frame(mm_to_counts(2.0));
        assert_eq!(
            frame,
            vec![0x53, 0x04, 0x06, 0x00, 0xD0, 0x01, 0x01, 0x00, 0x00, 0x0C, 0x01, 0x00]
        );
    }

    #[test]
    fn dc_status_parses_position_and_status() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&(-17_152i32).to_le_bytes()); // -0.5 mm
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0x0000_0400u32.to_le_bytes()); // homed bit
        let status = parse_dc_status(&data).unwrap();
        assert_eq!(status.position_counts, -17_152);
        assert_eq!(status.status_bits, 0x0000_0400);
        assert!((counts_to_mm(status.position_counts) + 0.5).abs() < 1e-9);
    }

    #[test]
    fn dc_status_rejects_truncated_payload() {
        assert!(parse_dc_status(&[0u8; 13]).is_err());
    }
}
