// Shared test fixtures: an in-memory fleet of controllers behind the
// `Transport` trait, with failure injection and call accounting.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use portier_api::{
    Ack, AntiPassback, AntiPassbackInfo, CardCount, CardRecord, CardUpdate, Controller,
    ControllerInfo, ControllerTime, Direction, DoorControl, DoorMode, Error, EventRecord,
    EventReply, EventType, Interlock, InterlockInfo, LateReply, LateSender, ListenerInfo, Reason,
    Status, Transport,
};

use portier_core::{ControllerConfig, DoorConfig, RegistryConfig};

pub const ALPHA: u32 = 405_419_896;
pub const BETA: u32 = 303_986_753;
pub const CARD: u32 = 10_058_400;

// ── Fixtures ────────────────────────────────────────────────────────

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn datetime(y: i32, m: u32, d: u32, hh: u32, mm: u32, ss: u32) -> NaiveDateTime {
    date(y, m, d).and_hms_opt(hh, mm, ss).expect("valid time")
}

/// Two controllers, two doors each.
pub fn fleet_config() -> RegistryConfig {
    RegistryConfig {
        controllers: vec![ControllerConfig::new(ALPHA), ControllerConfig::new(BETA)],
        doors: vec![
            door("Great Hall", ALPHA, 1),
            door("Kitchen", ALPHA, 2),
            door("Gryffindor", BETA, 1),
            door("Slytherin", BETA, 2),
        ],
        cards: vec![CARD],
        ..RegistryConfig::default()
    }
}

pub fn door(name: &str, controller: u32, door: u8) -> DoorConfig {
    DoorConfig {
        name: name.into(),
        controller,
        door,
    }
}

pub fn swipe(index: u32) -> EventRecord {
    EventRecord {
        index,
        event_type: EventType::Swipe,
        granted: true,
        door: 1,
        direction: Direction::In,
        card: CARD,
        timestamp: Some(datetime(2024, 11, 5, 12, 0, 0)),
        reason: Reason::Swipe,
    }
}

pub fn card(controller: u32, start: NaiveDate, end: NaiveDate, doors: [u8; 4], pin: u32) -> CardRecord {
    CardRecord {
        controller,
        card: CARD,
        start_date: Some(start),
        end_date: Some(end),
        doors,
        pin,
    }
}

pub fn status(controller: u32, relays: u8, event: Option<EventRecord>) -> Status {
    Status {
        controller,
        system_datetime: Some(datetime(2024, 11, 5, 12, 34, 56)),
        doors_open: [false; 4],
        buttons: [false; 4],
        relays,
        inputs: 0,
        system_error: 0,
        event,
    }
}

// ── Fake controller ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FakeController {
    pub id: u32,
    pub datetime: NaiveDateTime,
    pub listener: SocketAddrV4,
    pub listener_interval: u8,
    pub interlock: Interlock,
    pub antipassback: AntiPassback,
    pub doors: [(DoorMode, u8); 4],
    pub relays: u8,
    pub doors_open: [bool; 4],
    pub buttons: [bool; 4],
    pub cards: BTreeMap<u32, CardRecord>,
    pub events: BTreeMap<u32, EventRecord>,
    pub special_events: bool,
    pub open_ok: bool,
    /// Door number echoed in door control replies, when it should differ.
    pub door_echo: Option<u8>,
}

impl FakeController {
    fn new(id: u32) -> Self {
        Self {
            id,
            datetime: datetime(2024, 11, 5, 12, 34, 56),
            listener: SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 50), 60001),
            listener_interval: 0,
            interlock: Interlock::None,
            antipassback: AntiPassback::Disabled,
            doors: [(DoorMode::Controlled, 5); 4],
            relays: 0,
            doors_open: [false; 4],
            buttons: [false; 4],
            cards: BTreeMap::new(),
            events: BTreeMap::new(),
            special_events: false,
            open_ok: true,
            door_echo: None,
        }
    }

    fn info(&self) -> ControllerInfo {
        ControllerInfo {
            controller: self.id,
            address: Ipv4Addr::new(192, 168, 1, 100),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(192, 168, 1, 1),
            mac: "00:12:23:34:45:56".into(),
            firmware: "v6.62".into(),
            date: Some(date(2020, 1, 1)),
        }
    }

    fn event_index(&self) -> u32 {
        self.events.keys().next_back().copied().unwrap_or(0)
    }

    fn status(&self) -> Status {
        Status {
            controller: self.id,
            system_datetime: Some(self.datetime),
            doors_open: self.doors_open,
            buttons: self.buttons,
            relays: self.relays,
            inputs: 0,
            system_error: 0,
            event: self.events.values().next_back().cloned(),
        }
    }

    fn absent_card(&self) -> CardRecord {
        CardRecord {
            controller: self.id,
            card: 0,
            start_date: None,
            end_date: None,
            doors: [0; 4],
            pin: 0,
        }
    }
}

// ── Fake transport ──────────────────────────────────────────────────

/// In-memory transport. Every request is recorded as `(controller, op)`.
#[derive(Default)]
pub struct FakeTransport {
    controllers: Mutex<HashMap<u32, FakeController>>,
    failing: Mutex<HashSet<u32>>,
    failing_ops: Mutex<HashSet<(u32, &'static str)>>,
    /// Controllers whose replies carry another serial number.
    impostors: Mutex<HashMap<u32, u32>>,
    /// Controllers that time out but deliver the reply late.
    late: Mutex<HashSet<u32>>,
    calls: Mutex<Vec<(u32, &'static str)>>,
    delay: Mutex<Option<Duration>>,
    /// Runs once, just before the given event index is served.
    event_hook: Mutex<Option<(u32, EventHook)>>,
}

type EventHook = Box<dyn FnOnce() + Send>;

impl FakeTransport {
    pub fn new(ids: &[u32]) -> Arc<Self> {
        let fake = Self::default();
        {
            let mut controllers = fake.controllers.lock().expect("lock");
            for id in ids {
                controllers.insert(*id, FakeController::new(*id));
            }
        }
        Arc::new(fake)
    }

    // ── Setup ───────────────────────────────────────────────────────

    pub fn with<T>(&self, id: u32, f: impl FnOnce(&mut FakeController) -> T) -> T {
        let mut controllers = self.controllers.lock().expect("lock");
        f(controllers.get_mut(&id).expect("known fake controller"))
    }

    pub fn set_relays(&self, id: u32, relays: u8) {
        self.with(id, |c| c.relays = relays);
    }

    /// Fill the event log with swipes `1..=last`.
    pub fn log_events(&self, id: u32, last: u32) {
        self.with(id, |c| {
            for index in 1..=last {
                c.events.insert(index, swipe(index));
            }
        });
    }

    pub fn store_card(&self, id: u32, record: CardRecord) {
        self.with(id, |c| {
            c.cards.insert(record.card, record);
        });
    }

    pub fn card_on(&self, id: u32, card: u32) -> Option<CardRecord> {
        self.with(id, |c| c.cards.get(&card).cloned())
    }

    pub fn fail(&self, id: u32) {
        self.failing.lock().expect("lock").insert(id);
    }

    pub fn recover(&self, id: u32) {
        self.failing.lock().expect("lock").remove(&id);
    }

    pub fn fail_op(&self, id: u32, op: &'static str) {
        self.failing_ops.lock().expect("lock").insert((id, op));
    }

    pub fn recover_op(&self, id: u32, op: &'static str) {
        self.failing_ops.lock().expect("lock").remove(&(id, op));
    }

    pub fn impersonate(&self, id: u32, as_id: u32) {
        self.impostors.lock().expect("lock").insert(id, as_id);
    }

    pub fn reply_late(&self, id: u32) {
        self.late.lock().expect("lock").insert(id);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("lock") = Some(delay);
    }

    /// Run `hook` once, while event `index` is being fetched.
    pub fn on_event_fetch(&self, index: u32, hook: impl FnOnce() + Send + 'static) {
        *self.event_hook.lock().expect("lock") = Some((index, Box::new(hook)));
    }

    // ── Accounting ──────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<(u32, &'static str)> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().expect("lock").len()
    }

    pub fn count(&self, id: u32, op: &str) -> usize {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .filter(|(c, o)| *c == id && *o == op)
            .count()
    }

    pub fn count_op(&self, op: &str) -> usize {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .filter(|(_, o)| *o == op)
            .count()
    }

    // ── Plumbing ────────────────────────────────────────────────────

    /// Record the call, wait out the configured delay, apply failure
    /// injection, then run `f` against the controller.
    async fn exchange<T>(
        &self,
        controller: &Controller,
        op: &'static str,
        f: impl FnOnce(&mut FakeController) -> T,
    ) -> Result<T, Error> {
        let id = controller.id;
        self.calls.lock().expect("lock").push((id, op));

        let delay = *self.delay.lock().expect("lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self.failing.lock().expect("lock").contains(&id)
            || self.failing_ops.lock().expect("lock").contains(&(id, op));
        if failing {
            return Err(timeout(controller));
        }

        let mut controllers = self.controllers.lock().expect("lock");
        let fake = controllers.get_mut(&id).ok_or_else(|| timeout(controller))?;
        Ok(f(fake))
    }

    fn echo(&self, id: u32) -> u32 {
        self.impostors
            .lock()
            .expect("lock")
            .get(&id)
            .copied()
            .unwrap_or(id)
    }

    /// Time out, handing the reply to the late sink if one was given.
    fn late_or<T>(
        &self,
        controller: &Controller,
        late: Option<LateSender>,
        reply: impl FnOnce(&FakeController) -> LateReply,
    ) -> Option<Result<T, Error>> {
        if !self.late.lock().expect("lock").contains(&controller.id) {
            return None;
        }
        self.calls.lock().expect("lock").push((controller.id, "late"));
        if let Some(sink) = late {
            let reply = {
                let controllers = self.controllers.lock().expect("lock");
                controllers.get(&controller.id).map(reply)
            };
            if let Some(reply) = reply {
                sink.send(reply);
            }
        }
        Some(Err(timeout(controller)))
    }
}

fn timeout(controller: &Controller) -> Error {
    Error::Timeout {
        controller: controller.id,
        timeout_ms: u64::try_from(controller.timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get_controller(
        &self,
        controller: &Controller,
        late: Option<LateSender>,
    ) -> Result<ControllerInfo, Error> {
        if let Some(result) =
            self.late_or(controller, late, |c| LateReply::Controller(c.info()))
        {
            return result;
        }
        let echo = self.echo(controller.id);
        self.exchange(controller, "get-controller", |c| ControllerInfo {
            controller: echo,
            ..c.info()
        })
        .await
    }

    async fn get_time(
        &self,
        controller: &Controller,
        late: Option<LateSender>,
    ) -> Result<ControllerTime, Error> {
        if let Some(result) = self.late_or(controller, late, |c| {
            LateReply::Time(ControllerTime {
                controller: c.id,
                datetime: c.datetime,
            })
        }) {
            return result;
        }
        let echo = self.echo(controller.id);
        self.exchange(controller, "get-time", |c| ControllerTime {
            controller: echo,
            datetime: c.datetime,
        })
        .await
    }

    async fn set_time(
        &self,
        controller: &Controller,
        datetime: NaiveDateTime,
    ) -> Result<ControllerTime, Error> {
        let echo = self.echo(controller.id);
        self.exchange(controller, "set-time", |c| {
            c.datetime = datetime;
            ControllerTime {
                controller: echo,
                datetime,
            }
        })
        .await
    }

    async fn get_listener(
        &self,
        controller: &Controller,
        late: Option<LateSender>,
    ) -> Result<ListenerInfo, Error> {
        if let Some(result) = self.late_or(controller, late, |c| {
            LateReply::Listener(ListenerInfo {
                controller: c.id,
                address: c.listener,
                interval: c.listener_interval,
            })
        }) {
            return result;
        }
        let echo = self.echo(controller.id);
        self.exchange(controller, "get-listener", |c| ListenerInfo {
            controller: echo,
            address: c.listener,
            interval: c.listener_interval,
        })
        .await
    }

    async fn set_listener(
        &self,
        controller: &Controller,
        address: SocketAddrV4,
        interval: u8,
    ) -> Result<Ack, Error> {
        let echo = self.echo(controller.id);
        self.exchange(controller, "set-listener", |c| {
            c.listener = address;
            c.listener_interval = interval;
            Ack {
                controller: echo,
                ok: true,
            }
        })
        .await
    }

    async fn get_door_control(
        &self,
        controller: &Controller,
        door: u8,
    ) -> Result<DoorControl, Error> {
        let echo = self.echo(controller.id);
        self.exchange(controller, "get-door-control", |c| {
            let (mode, delay) = c.doors[usize::from(door - 1)];
            DoorControl {
                controller: echo,
                door: c.door_echo.unwrap_or(door),
                mode,
                delay,
            }
        })
        .await
    }

    async fn set_door_control(
        &self,
        controller: &Controller,
        door: u8,
        mode: DoorMode,
        delay: u8,
    ) -> Result<DoorControl, Error> {
        let echo = self.echo(controller.id);
        self.exchange(controller, "set-door-control", |c| {
            c.doors[usize::from(door - 1)] = (mode, delay);
            DoorControl {
                controller: echo,
                door,
                mode,
                delay,
            }
        })
        .await
    }

    async fn open_door(&self, controller: &Controller, door: u8) -> Result<Ack, Error> {
        let echo = self.echo(controller.id);
        self.exchange(controller, "open-door", |c| {
            if c.open_ok {
                c.relays |= 1 << (door - 1);
            }
            Ack {
                controller: echo,
                ok: c.open_ok,
            }
        })
        .await
    }

    async fn get_status(&self, controller: &Controller) -> Result<Status, Error> {
        let echo = self.echo(controller.id);
        self.exchange(controller, "get-status", |c| Status {
            controller: echo,
            ..c.status()
        })
        .await
    }

    async fn get_cards(&self, controller: &Controller) -> Result<CardCount, Error> {
        let echo = self.echo(controller.id);
        self.exchange(controller, "get-cards", |c| CardCount {
            controller: echo,
            cards: u32::try_from(c.cards.len()).unwrap_or(u32::MAX),
        })
        .await
    }

    async fn get_card(&self, controller: &Controller, card: u32) -> Result<CardRecord, Error> {
        let echo = self.echo(controller.id);
        self.exchange(controller, "get-card", |c| {
            let record = c.cards.get(&card).cloned().unwrap_or_else(|| c.absent_card());
            CardRecord {
                controller: echo,
                ..record
            }
        })
        .await
    }

    async fn get_card_by_index(
        &self,
        controller: &Controller,
        index: u32,
    ) -> Result<CardRecord, Error> {
        let echo = self.echo(controller.id);
        self.exchange(controller, "get-card-by-index", |c| {
            let record = usize::try_from(index)
                .ok()
                .and_then(|i| i.checked_sub(1))
                .and_then(|i| c.cards.values().nth(i).cloned())
                .unwrap_or_else(|| c.absent_card());
            CardRecord {
                controller: echo,
                ..record
            }
        })
        .await
    }

    async fn put_card(&self, controller: &Controller, card: &CardUpdate) -> Result<Ack, Error> {
        let echo = self.echo(controller.id);
        let update = card.clone();
        self.exchange(controller, "put-card", |c| {
            c.cards.insert(
                update.card,
                CardRecord {
                    controller: c.id,
                    card: update.card,
                    start_date: Some(update.start_date),
                    end_date: Some(update.end_date),
                    doors: update.doors,
                    pin: update.pin,
                },
            );
            Ack {
                controller: echo,
                ok: true,
            }
        })
        .await
    }

    async fn delete_card(&self, controller: &Controller, card: u32) -> Result<Ack, Error> {
        let echo = self.echo(controller.id);
        self.exchange(controller, "delete-card", |c| Ack {
            controller: echo,
            ok: c.cards.remove(&card).is_some(),
        })
        .await
    }

    async fn record_special_events(
        &self,
        controller: &Controller,
        enable: bool,
    ) -> Result<Ack, Error> {
        let echo = self.echo(controller.id);
        self.exchange(controller, "record-special-events", |c| {
            c.special_events = enable;
            Ack {
                controller: echo,
                ok: true,
            }
        })
        .await
    }

    async fn get_event(&self, controller: &Controller, index: u32) -> Result<EventReply, Error> {
        let echo = self.echo(controller.id);
        let hook = {
            let mut slot = self.event_hook.lock().expect("lock");
            match slot.take() {
                Some((at, hook)) if at == index => Some(hook),
                other => {
                    *slot = other;
                    None
                }
            }
        };
        if let Some(hook) = hook {
            hook();
        }
        let result = self
            .exchange(controller, "get-event", |c| c.events.get(&index).cloned())
            .await?;
        result
            .map(|event| EventReply {
                controller: echo,
                event,
            })
            .ok_or_else(|| Error::Rejected {
                controller: controller.id,
                message: format!("no event {index}"),
            })
    }

    async fn get_interlock(&self, controller: &Controller) -> Result<InterlockInfo, Error> {
        let echo = self.echo(controller.id);
        self.exchange(controller, "get-interlock", |c| InterlockInfo {
            controller: echo,
            interlock: c.interlock,
        })
        .await
    }

    async fn set_interlock(
        &self,
        controller: &Controller,
        interlock: Interlock,
    ) -> Result<InterlockInfo, Error> {
        let echo = self.echo(controller.id);
        self.exchange(controller, "set-interlock", |c| {
            c.interlock = interlock;
            InterlockInfo {
                controller: echo,
                interlock,
            }
        })
        .await
    }

    async fn get_antipassback(
        &self,
        controller: &Controller,
        late: Option<LateSender>,
    ) -> Result<AntiPassbackInfo, Error> {
        if let Some(result) = self.late_or(controller, late, |c| {
            LateReply::AntiPassback(AntiPassbackInfo {
                controller: c.id,
                antipassback: c.antipassback,
            })
        }) {
            return result;
        }
        let echo = self.echo(controller.id);
        self.exchange(controller, "get-antipassback", |c| AntiPassbackInfo {
            controller: echo,
            antipassback: c.antipassback,
        })
        .await
    }

    async fn set_antipassback(
        &self,
        controller: &Controller,
        antipassback: AntiPassback,
    ) -> Result<AntiPassbackInfo, Error> {
        let echo = self.echo(controller.id);
        self.exchange(controller, "set-antipassback", |c| {
            c.antipassback = antipassback;
            AntiPassbackInfo {
                controller: echo,
                antipassback,
            }
        })
        .await
    }
}

// ── Registry helpers ────────────────────────────────────────────────

/// Registry over the two-controller fleet, not started.
pub fn registry(fake: &Arc<FakeTransport>) -> portier_core::Registry {
    registry_with(fake, fleet_config())
}

pub fn registry_with(fake: &Arc<FakeTransport>, config: RegistryConfig) -> portier_core::Registry {
    let transport: Arc<dyn Transport> = Arc::clone(fake) as Arc<dyn Transport>;
    let decoder: Arc<dyn portier_api::EventDecoder> = Arc::new(TestDecoder);
    portier_core::Registry::new(config, transport, Some(decoder))
        .expect("valid registry config")
}

/// Poll `check` every 10ms until it holds, for at most two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Test decoder: bytes 0..4 are the controller id (LE), byte 4 the relays,
/// bytes 5..9 the event index (LE, optional).
pub struct TestDecoder;

impl portier_api::EventDecoder for TestDecoder {
    fn decode(&self, datagram: &[u8]) -> Result<Status, Error> {
        let (Some(id), Some(&relays)) = (datagram.get(..4), datagram.get(4)) else {
            return Err(Error::Decode {
                message: format!("short datagram ({} bytes)", datagram.len()),
            });
        };
        let id: [u8; 4] = id.try_into().map_err(|_| Error::Decode {
            message: "bad id".into(),
        })?;
        let event = datagram
            .get(5..9)
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .map(|b| swipe(u32::from_le_bytes(b)));
        Ok(status(u32::from_le_bytes(id), relays, event))
    }
}

pub fn datagram(controller: u32, relays: u8, index: u32) -> Vec<u8> {
    let mut bytes = controller.to_le_bytes().to_vec();
    bytes.push(relays);
    bytes.extend_from_slice(&index.to_le_bytes());
    bytes
}
