// Transport boundary.
//
// One request/reply exchange against one controller. The codec and socket
// handling behind this trait are provided by the embedding application.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::mpsc;

use crate::error::Error;
use crate::types::{
    Ack, AntiPassback, AntiPassbackInfo, CardCount, CardRecord, CardUpdate, ControllerInfo,
    ControllerTime, DoorControl, DoorMode, EventReply, Interlock, InterlockInfo, ListenerInfo,
    Reply, Status,
};

/// UDP port controllers listen on.
pub const DEFAULT_PORT: u16 = 60000;

/// Timeout applied to controllers without an explicit one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2500);

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Udp,
    Tcp,
}

/// A resolved controller: where and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controller {
    pub id: u32,
    pub address: SocketAddrV4,
    pub protocol: Protocol,
    pub timeout: Duration,
}

impl Controller {
    /// Broadcast target used for controllers with no configured address.
    pub fn broadcast(id: u32) -> Self {
        Self {
            id,
            address: SocketAddrV4::new(Ipv4Addr::BROADCAST, DEFAULT_PORT),
            protocol: Protocol::Udp,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.address.ip().is_broadcast()
    }
}

/// A reply that arrived after its request had already timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LateReply {
    Controller(ControllerInfo),
    Listener(ListenerInfo),
    Time(ControllerTime),
    AntiPassback(AntiPassbackInfo),
}

impl Reply for LateReply {
    fn controller(&self) -> u32 {
        match self {
            Self::Controller(r) => r.controller,
            Self::Listener(r) => r.controller,
            Self::Time(r) => r.controller,
            Self::AntiPassback(r) => r.controller,
        }
    }
}

/// A late reply tagged with the controller it was requested from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Late {
    pub expected: u32,
    pub reply: LateReply,
}

/// Sink for late replies.
///
/// A transport that keeps listening after a timeout pushes whatever it
/// eventually receives here. The sink remembers which controller the
/// request went to so the consumer can re-validate the echoed id.
#[derive(Debug, Clone)]
pub struct LateSender {
    expected: u32,
    tx: mpsc::UnboundedSender<Late>,
}

impl LateSender {
    pub fn new(expected: u32, tx: mpsc::UnboundedSender<Late>) -> Self {
        Self { expected, tx }
    }

    /// Hand over a late reply. Sends on a closed sink are ignored.
    pub fn send(&self, reply: LateReply) {
        let _ = self.tx.send(Late {
            expected: self.expected,
            reply,
        });
    }
}

/// Request/reply operations against a single controller.
///
/// Every call honours `controller.timeout`. Replies echo the controller
/// serial number; see [`verify`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_controller(
        &self,
        controller: &Controller,
        late: Option<LateSender>,
    ) -> Result<ControllerInfo, Error>;

    async fn get_time(
        &self,
        controller: &Controller,
        late: Option<LateSender>,
    ) -> Result<ControllerTime, Error>;

    async fn set_time(
        &self,
        controller: &Controller,
        datetime: NaiveDateTime,
    ) -> Result<ControllerTime, Error>;

    async fn get_listener(
        &self,
        controller: &Controller,
        late: Option<LateSender>,
    ) -> Result<ListenerInfo, Error>;

    async fn set_listener(
        &self,
        controller: &Controller,
        address: SocketAddrV4,
        interval: u8,
    ) -> Result<Ack, Error>;

    async fn get_door_control(&self, controller: &Controller, door: u8)
    -> Result<DoorControl, Error>;

    async fn set_door_control(
        &self,
        controller: &Controller,
        door: u8,
        mode: DoorMode,
        delay: u8,
    ) -> Result<DoorControl, Error>;

    async fn open_door(&self, controller: &Controller, door: u8) -> Result<Ack, Error>;

    async fn get_status(&self, controller: &Controller) -> Result<Status, Error>;

    async fn get_cards(&self, controller: &Controller) -> Result<CardCount, Error>;

    async fn get_card(&self, controller: &Controller, card: u32) -> Result<CardRecord, Error>;

    async fn get_card_by_index(
        &self,
        controller: &Controller,
        index: u32,
    ) -> Result<CardRecord, Error>;

    async fn put_card(&self, controller: &Controller, card: &CardUpdate) -> Result<Ack, Error>;

    async fn delete_card(&self, controller: &Controller, card: u32) -> Result<Ack, Error>;

    async fn record_special_events(
        &self,
        controller: &Controller,
        enable: bool,
    ) -> Result<Ack, Error>;

    async fn get_event(&self, controller: &Controller, index: u32) -> Result<EventReply, Error>;

    async fn get_interlock(&self, controller: &Controller) -> Result<InterlockInfo, Error>;

    async fn set_interlock(
        &self,
        controller: &Controller,
        interlock: Interlock,
    ) -> Result<InterlockInfo, Error>;

    async fn get_antipassback(
        &self,
        controller: &Controller,
        late: Option<LateSender>,
    ) -> Result<AntiPassbackInfo, Error>;

    async fn set_antipassback(
        &self,
        controller: &Controller,
        antipassback: AntiPassback,
    ) -> Result<AntiPassbackInfo, Error>;
}

/// Keep `reply` only if it was produced by `expected`.
///
/// Replies from another controller (stray broadcast answers, mis-addressed
/// datagrams) are dropped and logged.
pub fn verify<R: Reply>(expected: u32, reply: R) -> Option<R> {
    let got = reply.controller();
    if got == expected {
        Some(reply)
    } else {
        tracing::warn!(expected, got, "discarding reply from unexpected controller");
        None
    }
}
