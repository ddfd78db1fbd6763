//! ThingSpeak request paths.
//!
//! Builds the request targets for the channel update and field read
//! endpoints. The request line and headers around them are written by
//! [`ConnectionManager::send_data`](crate::connection::ConnectionManager::send_data).

use core::fmt::Write;

use heapless::String;

use crate::config::ChannelConfig;
use crate::error::{ConfigError, LinkError};

/// Room for a fully percent-encoded chunk plus the query prefix.
pub const PATH_CAPACITY: usize = 3072;

/// Results returned by a read request unless asked otherwise.
pub const DEFAULT_READ_RESULTS: u16 = 2;

pub type RequestPath = String<PATH_CAPACITY>;

/// A channel field number, always within 1..=8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Field(u8);

impl Field {
    pub const fn new(number: u8) -> Result<Self, ConfigError> {
        if number >= 1 && number <= 8 {
            Ok(Self(number))
        } else {
            Err(ConfigError::InvalidField(number))
        }
    }

    pub const fn number(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Field {
    type Error = ConfigError;

    fn try_from(number: u8) -> Result<Self, Self::Error> {
        Self::new(number)
    }
}

/// Default field assignment for the supported sensor kinds.
pub mod fields {
    use super::Field;

    pub const LIGHT_SENSOR: Field = Field(1);
    pub const TEMPERATURE: Field = Field(2);
    pub const HUMIDITY: Field = Field(3);
    pub const PRESSURE: Field = Field(4);
    pub const MAGNETIC_FIELD: Field = Field(5);
    pub const VOLTAGE: Field = Field(6);
    pub const GPS_LATITUDE: Field = Field(7);
    pub const GPS_LONGITUDE: Field = Field(8);
}

/// HTTP method of an outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

/// `/update?api_key=<key>&field<N>=<value>` with `value` percent-encoded.
pub fn write_path(
    channel: &ChannelConfig<'_>,
    field: Field,
    value: &str,
) -> Result<RequestPath, LinkError> {
    let mut path = RequestPath::new();
    write!(
        path,
        "/update?api_key={}&field{}=",
        channel.write_api_key,
        field.number()
    )
    .map_err(|_| LinkError::RequestTooLong)?;
    push_encoded(&mut path, value)?;
    Ok(path)
}

/// Update path carrying a single integer reading.
pub fn write_value_path(
    channel: &ChannelConfig<'_>,
    field: Field,
    value: i32,
) -> Result<RequestPath, LinkError> {
    let mut path = RequestPath::new();
    write!(
        path,
        "/update?api_key={}&field{}={}",
        channel.write_api_key,
        field.number(),
        value
    )
    .map_err(|_| LinkError::RequestTooLong)?;
    Ok(path)
}

/// `/channels/<id>/fields/<N>/last.json?api_key=<key>&results=<K>`
pub fn read_path(
    channel: &ChannelConfig<'_>,
    field: Field,
    results: u16,
) -> Result<RequestPath, LinkError> {
    let mut path = RequestPath::new();
    write!(
        path,
        "/channels/{}/fields/{}/last.json?api_key={}&results={}",
        channel.channel_id,
        field.number(),
        channel.read_api_key,
        results
    )
    .map_err(|_| LinkError::RequestTooLong)?;
    Ok(path)
}

/// Append `value`, escaping everything outside the RFC 3986 unreserved set.
fn push_encoded<const N: usize>(out: &mut String<N>, value: &str) -> Result<(), LinkError> {
    for byte in value.bytes() {
        let pushed = if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte)).is_ok()
        } else {
            write!(out, "%{byte:02X}").is_ok()
        };
        if !pushed {
            return Err(LinkError::RequestTooLong);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> ChannelConfig<'static> {
        ChannelConfig {
            write_api_key: "WKEY",
            read_api_key: "RKEY",
            channel_id: "455094",
            field: fields::LIGHT_SENSOR,
        }
    }

    #[test]
    fn test_field_range() {
        assert_eq!(Field::new(0), Err(ConfigError::InvalidField(0)));
        assert_eq!(Field::new(9), Err(ConfigError::InvalidField(9)));
        assert_eq!(Field::try_from(8).map(Field::number), Ok(8));
        assert_eq!(fields::GPS_LONGITUDE.number(), 8);
    }

    #[test]
    fn test_write_value_path() {
        let path = write_value_path(&channel(), fields::TEMPERATURE, 27).unwrap();
        assert_eq!(path.as_str(), "/update?api_key=WKEY&field2=27");
    }

    #[test]
    fn test_write_path_encodes_spaces() {
        let path = write_path(&channel(), fields::LIGHT_SENSOR, "512 -3 0").unwrap();
        assert_eq!(path.as_str(), "/update?api_key=WKEY&field1=512%20-3%200");
    }

    #[test]
    fn test_read_path() {
        let path = read_path(&channel(), fields::HUMIDITY, DEFAULT_READ_RESULTS).unwrap();
        assert_eq!(
            path.as_str(),
            "/channels/455094/fields/3/last.json?api_key=RKEY&results=2"
        );
    }

    #[test]
    fn test_write_path_too_long() {
        let value = "1 ".repeat(PATH_CAPACITY);
        assert_eq!(
            write_path(&channel(), fields::LIGHT_SENSOR, &value),
            Err(LinkError::RequestTooLong)
        );
    }

    #[test]
    fn test_method_names() {
        assert_eq!(Method::Get.as_str(), "GET");
        assert_eq!(Method::Post.as_str(), "POST");
        assert_eq!(Method::Put.as_str(), "PUT");
    }
}
