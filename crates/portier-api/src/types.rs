// ── Reply and request types ──
//
// Decoded controller replies as handed over by the transport. Every reply
// echoes the serial number of the controller that produced it; callers
// compare it against the controller they addressed before trusting it.

use std::net::{Ipv4Addr, SocketAddrV4};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Common surface of every controller reply.
pub trait Reply {
    /// Serial number echoed by the controller.
    fn controller(&self) -> u32;
}

macro_rules! impl_reply {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Reply for $ty {
                fn controller(&self) -> u32 {
                    self.controller
                }
            }
        )+
    };
}

impl_reply!(
    Ack,
    ControllerInfo,
    ControllerTime,
    ListenerInfo,
    DoorControl,
    Status,
    CardCount,
    CardRecord,
    EventReply,
    InterlockInfo,
    AntiPassbackInfo,
);

// ── Modes ───────────────────────────────────────────────────────────

/// Door control mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DoorMode {
    /// Relay held open: the door is permanently unlocked.
    NormallyOpen,
    /// Relay held closed: the door is permanently locked.
    NormallyClosed,
    /// Unlocked for the configured delay after a valid swipe or button press.
    Controlled,
}

impl DoorMode {
    pub fn code(self) -> u8 {
        match self {
            Self::NormallyOpen => 1,
            Self::NormallyClosed => 2,
            Self::Controlled => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::NormallyOpen),
            2 => Some(Self::NormallyClosed),
            3 => Some(Self::Controlled),
            _ => None,
        }
    }
}

/// Which doors are mutually interlocked (only one may be open at a time).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Interlock {
    None,
    #[strum(serialize = "1&2")]
    #[serde(rename = "1&2")]
    Doors12,
    #[strum(serialize = "3&4")]
    #[serde(rename = "3&4")]
    Doors34,
    #[strum(serialize = "1&2,3&4")]
    #[serde(rename = "1&2,3&4")]
    Doors12And34,
    #[strum(serialize = "1&2&3")]
    #[serde(rename = "1&2&3")]
    Doors123,
    #[strum(serialize = "1&2&3&4")]
    #[serde(rename = "1&2&3&4")]
    Doors1234,
}

impl Interlock {
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Doors12 => 1,
            Self::Doors34 => 2,
            Self::Doors12And34 => 3,
            Self::Doors123 => 4,
            Self::Doors1234 => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Doors12),
            2 => Some(Self::Doors34),
            3 => Some(Self::Doors12And34),
            4 => Some(Self::Doors123),
            8 => Some(Self::Doors1234),
            _ => None,
        }
    }
}

/// Anti-passback rule: which doors must be used in alternation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum AntiPassback {
    Disabled,
    #[strum(serialize = "(1:2);(3:4)")]
    #[serde(rename = "(1:2);(3:4)")]
    Pairs,
    #[strum(serialize = "(1,3):(2,4)")]
    #[serde(rename = "(1,3):(2,4)")]
    Crossed,
    #[strum(serialize = "1:(2,3)")]
    #[serde(rename = "1:(2,3)")]
    OneToTwoThree,
    #[strum(serialize = "1:(2,3,4)")]
    #[serde(rename = "1:(2,3,4)")]
    OneToRest,
}

impl AntiPassback {
    pub fn code(self) -> u8 {
        match self {
            Self::Disabled => 0,
            Self::Pairs => 1,
            Self::Crossed => 2,
            Self::OneToTwoThree => 3,
            Self::OneToRest => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Disabled),
            1 => Some(Self::Pairs),
            2 => Some(Self::Crossed),
            3 => Some(Self::OneToTwoThree),
            4 => Some(Self::OneToRest),
            _ => None,
        }
    }
}

// ── Events ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    None,
    Swipe,
    Door,
    Alarm,
    Overwritten,
    Unknown(u8),
}

impl EventType {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::None,
            1 => Self::Swipe,
            2 => Self::Door,
            3 => Self::Alarm,
            255 => Self::Overwritten,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn from_code(code: u8) -> Self {
        if code == 2 { Self::Out } else { Self::In }
    }
}

/// Event reason.
///
/// `DoorLocked` and `DoorUnlocked` never appear on the wire: they are
/// synthesized from relay bitmask transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    Swipe,
    SwipeOpen,
    SwipeClose,
    Denied,
    NoAccessRights,
    IncorrectPassword,
    AntiPassback,
    MoreCards,
    FirstCardOpen,
    DoorIsNormallyClosed,
    Interlock,
    NotInAllowedTimePeriod,
    InvalidTimezone,
    AccessDenied,
    PushButtonOk,
    DoorOpened,
    DoorClosed,
    DoorOpenedSupervisorPassword,
    ControllerPowerOn,
    ControllerReset,
    PushButtonInvalidDoorLocked,
    PushButtonInvalidOffline,
    PushButtonInvalidInterlock,
    PushButtonInvalidThreat,
    DoorOpenTooLong,
    ForcedOpen,
    Fire,
    ForcedClosed,
    TheftPrevention,
    Zone24x7,
    Emergency,
    RemoteOpenDoor,
    RemoteOpenDoorUsbReader,
    DoorLocked,
    DoorUnlocked,
    Unknown(u8),
}

impl Reason {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Swipe,
            2 => Self::SwipeOpen,
            3 => Self::SwipeClose,
            5 => Self::Denied,
            6 => Self::NoAccessRights,
            7 => Self::IncorrectPassword,
            8 => Self::AntiPassback,
            9 => Self::MoreCards,
            10 => Self::FirstCardOpen,
            11 => Self::DoorIsNormallyClosed,
            12 => Self::Interlock,
            13 => Self::NotInAllowedTimePeriod,
            15 => Self::InvalidTimezone,
            18 => Self::AccessDenied,
            20 => Self::PushButtonOk,
            23 => Self::DoorOpened,
            24 => Self::DoorClosed,
            25 => Self::DoorOpenedSupervisorPassword,
            28 => Self::ControllerPowerOn,
            29 => Self::ControllerReset,
            31 => Self::PushButtonInvalidDoorLocked,
            32 => Self::PushButtonInvalidOffline,
            33 => Self::PushButtonInvalidInterlock,
            34 => Self::PushButtonInvalidThreat,
            37 => Self::DoorOpenTooLong,
            38 => Self::ForcedOpen,
            39 => Self::Fire,
            40 => Self::ForcedClosed,
            41 => Self::TheftPrevention,
            42 => Self::Zone24x7,
            43 => Self::Emergency,
            44 => Self::RemoteOpenDoor,
            45 => Self::RemoteOpenDoorUsbReader,
            other => Self::Unknown(other),
        }
    }

    /// `true` for reasons the engine derives itself rather than reads from
    /// a controller's event log.
    pub fn is_synthetic(self) -> bool {
        matches!(self, Self::DoorLocked | Self::DoorUnlocked)
    }
}

/// One entry of a controller's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub index: u32,
    pub event_type: EventType,
    pub granted: bool,
    /// Door 1–4, or 0 when the event is not door-specific.
    pub door: u8,
    pub direction: Direction,
    /// Card number, or 0 when the event is not card-specific.
    pub card: u32,
    pub timestamp: Option<NaiveDateTime>,
    pub reason: Reason,
}

// ── Replies ─────────────────────────────────────────────────────────

/// Generic acknowledgement (open-door, put-card, delete-card, set-listener,
/// record-special-events).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub controller: u32,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerInfo {
    pub controller: u32,
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mac: String,
    pub firmware: String,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerTime {
    pub controller: u32,
    pub datetime: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerInfo {
    pub controller: u32,
    pub address: SocketAddrV4,
    /// Auto-send interval in seconds (0 = events only).
    pub interval: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorControl {
    pub controller: u32,
    pub door: u8,
    pub mode: DoorMode,
    /// Unlock delay in seconds.
    pub delay: u8,
}

/// Controller status: the most recent event plus the live door bitmasks.
///
/// Also the payload of every datagram the controller pushes to its event
/// listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub controller: u32,
    pub system_datetime: Option<NaiveDateTime>,
    pub doors_open: [bool; 4],
    pub buttons: [bool; 4],
    /// Bit `n` set means the relay of door `n + 1` is energised (unlocked).
    pub relays: u8,
    pub inputs: u8,
    pub system_error: u8,
    pub event: Option<EventRecord>,
}

impl Status {
    /// Index of the most recent event in the controller's log (0 if empty).
    pub fn event_index(&self) -> u32 {
        self.event.as_ref().map_or(0, |e| e.index)
    }

    /// Relay state of door 1–4.
    pub fn unlocked(&self, door: u8) -> Option<bool> {
        match door {
            1..=4 => Some(self.relays & (1 << (door - 1)) != 0),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardCount {
    pub controller: u32,
    pub cards: u32,
}

/// A card as stored on one controller.
///
/// Controllers answer a lookup for an absent card with card number 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRecord {
    pub controller: u32,
    pub card: u32,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Per-door permission: 0 = none, 1 = always, 2–254 = time profile.
    pub doors: [u8; 4],
    pub pin: u32,
}

/// Full replacement record written by put-card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardUpdate {
    pub card: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub doors: [u8; 4],
    pub pin: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReply {
    pub controller: u32,
    pub event: EventRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterlockInfo {
    pub controller: u32,
    pub interlock: Interlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntiPassbackInfo {
    pub controller: u32,
    pub antipassback: AntiPassback,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn door_mode_codes_round_trip() {
        for mode in [
            DoorMode::NormallyOpen,
            DoorMode::NormallyClosed,
            DoorMode::Controlled,
        ] {
            assert_eq!(DoorMode::from_code(mode.code()), Some(mode));
        }
        assert_eq!(DoorMode::from_code(0), None);
    }

    #[test]
    fn interlock_parses_display_form() {
        assert_eq!(Interlock::from_str("1&2,3&4").ok(), Some(Interlock::Doors12And34));
        assert_eq!(Interlock::Doors1234.to_string(), "1&2&3&4");
        assert_eq!(Interlock::from_code(8), Some(Interlock::Doors1234));
        assert_eq!(Interlock::from_code(5), None);
    }

    #[test]
    fn unknown_reason_codes_are_preserved() {
        assert_eq!(Reason::from_code(44), Reason::RemoteOpenDoor);
        assert_eq!(Reason::from_code(200), Reason::Unknown(200));
        assert!(Reason::DoorUnlocked.is_synthetic());
        assert!(!Reason::Swipe.is_synthetic());
    }

    #[test]
    fn status_relay_bits_map_to_doors() {
        let status = Status {
            controller: 1,
            system_datetime: None,
            doors_open: [false; 4],
            buttons: [false; 4],
            relays: 0b0101,
            inputs: 0,
            system_error: 0,
            event: None,
        };
        assert_eq!(status.unlocked(1), Some(true));
        assert_eq!(status.unlocked(2), Some(false));
        assert_eq!(status.unlocked(3), Some(true));
        assert_eq!(status.unlocked(4), Some(false));
        assert_eq!(status.unlocked(5), None);
        assert_eq!(status.event_index(), 0);
    }
}
