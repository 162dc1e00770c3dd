//! SETTINGS parameters and the value set negotiated for one endpoint

use super::error::{Error, Result};
use super::{DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE};
use std::fmt;
use std::ops::RangeInclusive;

/// 2^31-1, the ceiling for any flow control window
pub const MAX_WINDOW_SIZE: u32 = 0x7FFF_FFFF;

const FRAME_SIZE_RANGE: RangeInclusive<u32> = 16_384..=16_777_215;

/// Identifiers from RFC 9113 Section 6.5.2, plus the extensions of RFC 8441
/// and RFC 9218
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SettingsParameter {
    /// Upper bound for the peer's HPACK dynamic table
    HeaderTableSize = 0x1,
    /// Whether the server may send PUSH_PROMISE
    EnablePush = 0x2,
    /// Streams the peer may open at once
    MaxConcurrentStreams = 0x3,
    /// Starting window of every new stream
    InitialWindowSize = 0x4,
    /// Largest frame payload the sender will accept
    MaxFrameSize = 0x5,
    /// Advisory limit on decoded header list size
    MaxHeaderListSize = 0x6,
    /// Extended CONNECT (RFC 8441)
    EnableConnectProtocol = 0x8,
    /// RFC 7540 priority signals are ignored (RFC 9218)
    NoRfc7540Priorities = 0x9,
}

const PARAMETERS: [(SettingsParameter, &str); 8] = [
    (SettingsParameter::HeaderTableSize, "HEADER_TABLE_SIZE"),
    (SettingsParameter::EnablePush, "ENABLE_PUSH"),
    (SettingsParameter::MaxConcurrentStreams, "MAX_CONCURRENT_STREAMS"),
    (SettingsParameter::InitialWindowSize, "INITIAL_WINDOW_SIZE"),
    (SettingsParameter::MaxFrameSize, "MAX_FRAME_SIZE"),
    (SettingsParameter::MaxHeaderListSize, "MAX_HEADER_LIST_SIZE"),
    (SettingsParameter::EnableConnectProtocol, "ENABLE_CONNECT_PROTOCOL"),
    (SettingsParameter::NoRfc7540Priorities, "NO_RFC7540_PRIORITIES"),
];

impl SettingsParameter {
    /// Identifier as written in a SETTINGS entry
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// `None` for identifiers this endpoint ignores
    pub fn from_u16(id: u16) -> Option<Self> {
        PARAMETERS
            .iter()
            .map(|(param, _)| *param)
            .find(|param| param.as_u16() == id)
    }

    /// Name without the SETTINGS_ prefix
    pub fn name(&self) -> &'static str {
        PARAMETERS
            .iter()
            .find(|(param, _)| param == self)
            .map_or("UNKNOWN", |(_, name)| *name)
    }

    fn is_boolean(self) -> bool {
        matches!(
            self,
            SettingsParameter::EnablePush
                | SettingsParameter::EnableConnectProtocol
                | SettingsParameter::NoRfc7540Priorities
        )
    }
}

impl fmt::Display for SettingsParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u16())
    }
}

/// Settings of one endpoint
///
/// A field is `None` until the endpoint sends that parameter; the getters
/// fall back to the protocol defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// SETTINGS_HEADER_TABLE_SIZE
    pub header_table_size: Option<u32>,
    /// SETTINGS_ENABLE_PUSH
    pub enable_push: Option<bool>,
    /// SETTINGS_MAX_CONCURRENT_STREAMS
    pub max_concurrent_streams: Option<u32>,
    /// SETTINGS_INITIAL_WINDOW_SIZE
    pub initial_window_size: Option<u32>,
    /// SETTINGS_MAX_FRAME_SIZE
    pub max_frame_size: Option<u32>,
    /// SETTINGS_MAX_HEADER_LIST_SIZE
    pub max_header_list_size: Option<u32>,
    /// SETTINGS_ENABLE_CONNECT_PROTOCOL
    pub enable_connect_protocol: Option<bool>,
    /// SETTINGS_NO_RFC7540_PRIORITIES
    pub no_rfc7540_priorities: Option<bool>,
}

impl Settings {
    /// A set with nothing sent yet
    pub fn new() -> Self {
        Settings::default()
    }

    /// Apply `entries` in order to an empty set. The first invalid value
    /// is returned as the error.
    pub fn from_entries(entries: &[(SettingsParameter, u32)]) -> Result<Self> {
        entries.iter().try_fold(Settings::new(), |mut settings, &(param, value)| {
            settings.apply(param, value)?;
            Ok(settings)
        })
    }

    /// Store one wire value, then check the whole set.
    ///
    /// An initial window above 2^31-1 is a flow control error. A bad frame
    /// size or a boolean other than 0 or 1 is an invalid setting.
    pub fn apply(&mut self, param: SettingsParameter, value: u32) -> Result<()> {
        if param.is_boolean() && value > 1 {
            return Err(Error::InvalidSettings(format!("{} takes 0 or 1, not {}", param, value)));
        }
        let flag = value == 1;
        match param {
            SettingsParameter::HeaderTableSize => self.header_table_size = Some(value),
            SettingsParameter::EnablePush => self.enable_push = Some(flag),
            SettingsParameter::MaxConcurrentStreams => self.max_concurrent_streams = Some(value),
            SettingsParameter::InitialWindowSize => self.initial_window_size = Some(value),
            SettingsParameter::MaxFrameSize => self.max_frame_size = Some(value),
            SettingsParameter::MaxHeaderListSize => self.max_header_list_size = Some(value),
            SettingsParameter::EnableConnectProtocol => self.enable_connect_protocol = Some(flag),
            SettingsParameter::NoRfc7540Priorities => self.no_rfc7540_priorities = Some(flag),
        }
        self.validate()
    }

    /// Explicitly set parameters, ordered by identifier
    pub fn to_entries(&self) -> Vec<(SettingsParameter, u32)> {
        let bit = |v: Option<bool>| v.map(u32::from);
        let values = [
            self.header_table_size,
            bit(self.enable_push),
            self.max_concurrent_streams,
            self.initial_window_size,
            self.max_frame_size,
            self.max_header_list_size,
            bit(self.enable_connect_protocol),
            bit(self.no_rfc7540_priorities),
        ];
        PARAMETERS
            .iter()
            .zip(values)
            .filter_map(|((param, _), value)| Some((*param, value?)))
            .collect()
    }

    /// Dynamic table bound, 4096 when unset
    pub fn get_header_table_size(&self) -> u32 {
        self.header_table_size.unwrap_or(DEFAULT_HEADER_TABLE_SIZE)
    }

    /// Push is allowed until a peer says otherwise
    pub fn get_enable_push(&self) -> bool {
        self.enable_push.unwrap_or(true)
    }

    /// `None` is unlimited
    pub fn get_max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    /// Stream window, 65535 when unset
    pub fn get_initial_window_size(&self) -> u32 {
        self.initial_window_size.unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// Frame payload limit, 16384 when unset
    pub fn get_max_frame_size(&self) -> u32 {
        self.max_frame_size.unwrap_or(DEFAULT_MAX_FRAME_SIZE)
    }

    /// `None` is unlimited
    pub fn get_max_header_list_size(&self) -> Option<u32> {
        self.max_header_list_size
    }

    /// Check the window and frame size limits
    pub fn validate(&self) -> Result<()> {
        match (self.initial_window_size, self.max_frame_size) {
            (Some(window), _) if window > MAX_WINDOW_SIZE => Err(Error::FlowControl(format!(
                "initial window size {} is above 2^31-1",
                window
            ))),
            (_, Some(size)) if !FRAME_SIZE_RANGE.contains(&size) => Err(Error::InvalidSettings(format!(
                "max frame size {} is outside {:?}",
                size, FRAME_SIZE_RANGE
            ))),
            _ => Ok(()),
        }
    }

    /// Overlay every parameter `other` sets onto `self`
    pub fn merge(&mut self, other: &Settings) {
        fn overlay<T: Copy>(into: &mut Option<T>, from: Option<T>) {
            if from.is_some() {
                *into = from;
            }
        }
        overlay(&mut self.header_table_size, other.header_table_size);
        overlay(&mut self.enable_push, other.enable_push);
        overlay(&mut self.max_concurrent_streams, other.max_concurrent_streams);
        overlay(&mut self.initial_window_size, other.initial_window_size);
        overlay(&mut self.max_frame_size, other.max_frame_size);
        overlay(&mut self.max_header_list_size, other.max_header_list_size);
        overlay(&mut self.enable_connect_protocol, other.enable_connect_protocol);
        overlay(&mut self.no_rfc7540_priorities, other.no_rfc7540_priorities);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_ids() {
        assert_eq!(SettingsParameter::HeaderTableSize.as_u16(), 0x1);
        assert_eq!(SettingsParameter::from_u16(0x4), Some(SettingsParameter::InitialWindowSize));
        assert_eq!(SettingsParameter::from_u16(0x9), Some(SettingsParameter::NoRfc7540Priorities));
        assert_eq!(SettingsParameter::from_u16(0x7), None);
        assert_eq!(SettingsParameter::MaxFrameSize.to_string(), "MAX_FRAME_SIZE (0x5)");
    }

    #[test]
    fn test_unset_parameters_use_protocol_defaults() {
        let settings = Settings::new();
        assert_eq!(settings.get_header_table_size(), 4096);
        assert!(settings.get_enable_push());
        assert_eq!(settings.get_initial_window_size(), 65535);
        assert_eq!(settings.get_max_frame_size(), 16384);
        assert_eq!(settings.get_max_concurrent_streams(), None);
        assert!(settings.to_entries().is_empty());
    }

    #[test]
    fn test_entries_come_back_in_identifier_order() {
        let settings = Settings::from_entries(&[
            (SettingsParameter::MaxFrameSize, 1 << 17),
            (SettingsParameter::EnablePush, 0),
            (SettingsParameter::HeaderTableSize, 8192),
        ])
        .unwrap();

        assert_eq!(
            settings.to_entries(),
            vec![
                (SettingsParameter::HeaderTableSize, 8192),
                (SettingsParameter::EnablePush, 0),
                (SettingsParameter::MaxFrameSize, 1 << 17),
            ]
        );
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        let window = Settings::from_entries(&[(SettingsParameter::InitialWindowSize, 0x8000_0000)]);
        assert!(matches!(window, Err(Error::FlowControl(_))));
        for size in [1024, 16_777_216] {
            let frame = Settings::from_entries(&[(SettingsParameter::MaxFrameSize, size)]);
            assert!(matches!(frame, Err(Error::InvalidSettings(_))));
        }

        let mut settings = Settings::new();
        assert!(matches!(
            settings.apply(SettingsParameter::EnablePush, 2),
            Err(Error::InvalidSettings(_))
        ));
        assert!(matches!(
            settings.apply(SettingsParameter::EnableConnectProtocol, 7),
            Err(Error::InvalidSettings(_))
        ));
        settings.apply(SettingsParameter::NoRfc7540Priorities, 1).unwrap();
        assert_eq!(settings.no_rfc7540_priorities, Some(true));
    }

    #[test]
    fn test_merge_overlays_only_set_values() {
        let mut acked = Settings::from_entries(&[
            (SettingsParameter::HeaderTableSize, 4096),
            (SettingsParameter::MaxFrameSize, 20_000),
        ])
        .unwrap();
        let pending = Settings::from_entries(&[
            (SettingsParameter::HeaderTableSize, 128),
            (SettingsParameter::MaxConcurrentStreams, 100),
        ])
        .unwrap();

        acked.merge(&pending);

        assert_eq!(acked.get_header_table_size(), 128);
        assert_eq!(acked.get_max_concurrent_streams(), Some(100));
        assert_eq!(acked.get_max_frame_size(), 20_000);
    }
}
