// src/testkit.rs
//! Shared test doubles: a recording STUN subsystem, a hand-driven timer,
//! and a recording handler, wired into an agent by `rig()`. Tests drive
//! the schedule themselves by feeding `handle_timeout` the fire built by
//! `fire_for`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::agent::{IceAgent, IceConfig, IceHandler};
use crate::candidate::{Candidate, TransportProtocol};
use crate::error::IceResult;
use crate::stun::{
    GatherRequest, OutboundCheck, OutboundResponse, StunSubsystem, TransactionId,
};
use crate::timer::{Timer, TimerFire, TimerHandle, TimerKey};
use std::net::SocketAddr;

/// STUN subsystem that records everything and never fails
pub struct RecordingStun {
    pub checks: Arc<Mutex<Vec<(TransactionId, OutboundCheck)>>>,
    pub gathers: Arc<Mutex<Vec<(TransactionId, GatherRequest)>>>,
    pub responses: Arc<Mutex<Vec<OutboundResponse>>>,
    pub cancelled: Arc<Mutex<Vec<TransactionId>>>,
}

impl RecordingStun {
    pub fn new() -> Self {
        Self {
            checks: Arc::new(Mutex::new(Vec::new())),
            gathers: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl StunSubsystem for RecordingStun {
    fn send_check(&mut self, check: OutboundCheck) -> IceResult<TransactionId> {
        let id = TransactionId::new();
        self.checks.lock().unwrap().push((id, check));
        Ok(id)
    }

    fn send_gather(&mut self, request: GatherRequest) -> IceResult<TransactionId> {
        let id = TransactionId::new();
        self.gathers.lock().unwrap().push((id, request));
        Ok(id)
    }

    fn send_response(&mut self, response: OutboundResponse) -> IceResult<()> {
        self.responses.lock().unwrap().push(response);
        Ok(())
    }

    fn cancel(&mut self, id: TransactionId) {
        self.cancelled.lock().unwrap().push(id);
    }
}

/// Timer that only records starts/stops; tests drive ticks by calling
/// handle_timeout directly
pub struct ManualTimer {
    pub started: Arc<Mutex<Vec<(TimerHandle, TimerKey)>>>,
    pub stopped: Arc<Mutex<Vec<TimerHandle>>>,
    next: TimerHandle,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self {
            started: Arc::new(Mutex::new(Vec::new())),
            stopped: Arc::new(Mutex::new(Vec::new())),
            next: 1,
        }
    }
}

impl Timer for ManualTimer {
    fn start(&mut self, _interval: Duration, key: TimerKey) -> TimerHandle {
        let handle = self.next;
        self.next += 1;
        self.started.lock().unwrap().push((handle, key));
        handle
    }

    fn stop(&mut self, handle: TimerHandle) {
        self.stopped.lock().unwrap().push(handle);
    }

    fn shutdown(&mut self) {}
}

#[derive(Default)]
pub struct RecordingHandlerState {
    pub sent: Vec<(TransportProtocol, SocketAddr, SocketAddr, Vec<u8>)>,
    pub data: Vec<(u32, u32, SocketAddr, Vec<u8>)>,
    pub connected: Vec<(u64, u64)>,
}

pub struct RecordingHandler {
    pub state: Arc<Mutex<RecordingHandlerState>>,
}

impl IceHandler for RecordingHandler {
    fn send(
        &mut self,
        transport: TransportProtocol,
        local: SocketAddr,
        remote: SocketAddr,
        data: &[u8],
    ) -> IceResult<()> {
        self.state
            .lock()
            .unwrap()
            .sent
            .push((transport, local, remote, data.to_vec()));
        Ok(())
    }

    fn auth(&mut self, _username: &str) -> Option<String> {
        None
    }

    fn on_data(&mut self, stream_id: u32, component_id: u32, source: SocketAddr, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .data
            .push((stream_id, component_id, source, data.to_vec()));
    }

    fn on_connected(&mut self, success_mask: u64, all_mask: u64) {
        self.state.lock().unwrap().connected.push((success_mask, all_mask));
    }
}

pub struct TestRig {
    pub agent: IceAgent,
    pub checks: Arc<Mutex<Vec<(TransactionId, OutboundCheck)>>>,
    pub gathers: Arc<Mutex<Vec<(TransactionId, GatherRequest)>>>,
    pub responses: Arc<Mutex<Vec<OutboundResponse>>>,
    pub handler: Arc<Mutex<RecordingHandlerState>>,
    pub timers_started: Arc<Mutex<Vec<(TimerHandle, TimerKey)>>>,
    pub timers_stopped: Arc<Mutex<Vec<TimerHandle>>>,
}

pub fn rig(controlling: bool, config: IceConfig) -> TestRig {
    let stun = RecordingStun::new();
    let checks = stun.checks.clone();
    let gathers = stun.gathers.clone();
    let responses = stun.responses.clone();
    let timer = ManualTimer::new();
    let timers_started = timer.started.clone();
    let timers_stopped = timer.stopped.clone();
    let handler_state = Arc::new(Mutex::new(RecordingHandlerState::default()));
    let handler = RecordingHandler { state: handler_state.clone() };

    let agent = IceAgent::new(
        controlling,
        config,
        Box::new(stun),
        Box::new(timer),
        Box::new(handler),
    )
    .unwrap();

    TestRig {
        agent,
        checks,
        gathers,
        responses,
        handler: handler_state,
        timers_started,
        timers_stopped,
    }
}

pub fn host(stream: u32, component: u32, addr: &str) -> Candidate {
    Candidate::new_host(stream, component, TransportProtocol::Udp, addr.parse().unwrap())
}

/// Current timer fire for a stream, reconstructed from the checklist
pub fn fire_for(agent: &IceAgent, stream_id: u32) -> Option<TimerFire> {
    agent.streams.get(&stream_id).and_then(|s| {
        s.check_list.timer_handle.map(|handle| TimerFire {
            handle,
            key: TimerKey::Checklist { stream_id },
        })
    })
}
