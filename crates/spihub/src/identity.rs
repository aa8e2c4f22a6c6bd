use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;
use tracing::debug;

/// I2C bus the identity EEPROM sits on.
pub const EEPROM_BUS: &str = "/dev/i2c-1";
/// EEPROM slave address.
pub const EEPROM_ADDR: u16 = 0x50;

const BLOCK_LEN: usize = 32;
const FIELD_LEN: usize = 16;

/// The host identity embedded verbatim in the device-list bootstrap frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub serial_number: String,
    pub access_code: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("EEPROM access failed: {0}")]
    Eeprom(#[from] i2cdev::linux::LinuxI2CError),

    #[error("EEPROM {field} is empty")]
    Empty { field: &'static str },

    #[error("EEPROM {field} is not printable ASCII")]
    NotAscii { field: &'static str },
}

/// Read the serial number and access code from the identity EEPROM.
///
/// The identity block is 32 bytes at word address 0: a NUL-padded ASCII
/// serial number in the first half, a NUL-padded ASCII access code in the
/// second.
pub fn read_identity() -> Result<Identity, IdentityError> {
    let mut eeprom = LinuxI2CDevice::new(EEPROM_BUS, EEPROM_ADDR)?;

    // 24Cxx-style random read: write the two-byte word address, then read.
    eeprom.write(&[0, 0])?;
    let mut block = [0u8; BLOCK_LEN];
    eeprom.read(&mut block)?;

    let identity = parse_identity(&block)?;
    debug!(serial_number = %identity.serial_number, "read identity EEPROM");
    Ok(identity)
}

/// Decode the raw identity block.
pub fn parse_identity(block: &[u8; BLOCK_LEN]) -> Result<Identity, IdentityError> {
    Ok(Identity {
        serial_number: parse_field(&block[..FIELD_LEN], "serial number")?,
        access_code: parse_field(&block[FIELD_LEN..], "access code")?,
    })
}

fn parse_field(raw: &[u8], field: &'static str) -> Result<String, IdentityError> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let trimmed = &raw[..end];
    if trimmed.is_empty() {
        return Err(IdentityError::Empty { field });
    }
    if !trimmed.iter().all(|b| b.is_ascii_graphic()) {
        return Err(IdentityError::NotAscii { field });
    }
    // ASCII verified above.
    Ok(String::from_utf8_lossy(trimmed).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(serial: &[u8], code: &[u8]) -> [u8; BLOCK_LEN] {
        let mut block = [0u8; BLOCK_LEN];
        block[..serial.len()].copy_from_slice(serial);
        block[FIELD_LEN..FIELD_LEN + code.len()].copy_from_slice(code);
        block
    }

    #[test]
    fn parses_nul_padded_fields() {
        let identity = parse_identity(&block(b"SPF30001", b"c0ffee99")).unwrap();
        assert_eq!(identity.serial_number, "SPF30001");
        assert_eq!(identity.access_code, "c0ffee99");
    }

    #[test]
    fn full_width_fields_need_no_terminator() {
        let identity = parse_identity(&block(b"0123456789ABCDEF", b"FEDCBA9876543210")).unwrap();
        assert_eq!(identity.serial_number, "0123456789ABCDEF");
        assert_eq!(identity.access_code, "FEDCBA9876543210");
    }

    #[test]
    fn blank_eeprom_is_rejected() {
        let err = parse_identity(&[0u8; BLOCK_LEN]).unwrap_err();
        assert!(matches!(
            err,
            IdentityError::Empty {
                field: "serial number"
            }
        ));
    }

    #[test]
    fn erased_eeprom_is_rejected() {
        // A factory-erased part reads 0xFF everywhere.
        let err = parse_identity(&[0xFF; BLOCK_LEN]).unwrap_err();
        assert!(matches!(err, IdentityError::NotAscii { .. }));
    }

    #[test]
    fn missing_access_code_is_rejected() {
        let err = parse_identity(&block(b"SPF30001", b"")).unwrap_err();
        assert!(matches!(
            err,
            IdentityError::Empty {
                field: "access code"
            }
        ));
    }
}
