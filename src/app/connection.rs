use super::Logger;
use crate::serial::errors::{classify_error, SerialFailureKind};
use crate::serial::{SerialOptions, SerialPort};

/// Open the serial port and log the outcome. The failure kind is returned so
/// the caller can decide whether retrying makes sense.
pub(crate) fn attempt_serial_connect(
    logger: &Logger,
    device: &str,
    options: SerialOptions,
) -> Result<SerialPort, SerialFailureKind> {
    match SerialPort::connect(device, options) {
        Ok(port) => {
            logger.info(format!(
                "serial connected (device={}, baud={})",
                port.device(),
                port.baud()
            ));
            Ok(port)
        }
        Err(err) => {
            let kind = classify_error(&err);
            if kind.is_retryable() {
                logger.warn(format!("serial connect failed ({kind}): {err}; will retry"));
            } else {
                logger.error(format!("serial connect failed ({kind}): {err}"));
            }
            Err(kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::LogLevel;

    #[test]
    fn missing_device_is_reported_as_retryable() {
        let logger = Logger::stderr(LogLevel::Error);
        let kind = attempt_serial_connect(
            &logger,
            "/dev/toffee-module-does-not-exist",
            SerialOptions::default(),
        )
        .unwrap_err();
        assert!(kind.is_retryable());
    }
}
