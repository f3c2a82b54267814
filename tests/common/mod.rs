#![allow(dead_code)]

use mthermal_lib::{
    config::TransportConfig, scan::CancelFlag, tokio_sync::Link,
    tokio_sync_safe_client::SafeClient,
};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_modbus::ExceptionCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Read { address: u16, quantity: u16 },
    WriteSingle { address: u16, word: u16 },
    WriteMultiple { address: u16, quantity: u16 },
}

#[derive(Default)]
struct State {
    registers: BTreeMap<u16, u16>,
    requests: Vec<Request>,
    bulk_rejected: Vec<RangeInclusive<u16>>,
    clamp: BTreeMap<u16, u16>,
    timeouts: usize,
    read_only: Vec<u16>,
    write_only: Vec<u16>,
    cancel_after: Option<(usize, CancelFlag)>,
}

/// In-memory heat pump answering like the real device: the configuration
/// block rejects multi-register reads and addresses without a register
/// answer with an exception.
#[derive(Clone)]
pub struct FakeHeatPump(Arc<Mutex<State>>);

impl FakeHeatPump {
    pub fn new() -> Self {
        let registers = (0..=22)
            .chain(100..=199)
            .chain(200..=290)
            .map(|address| (address, 0))
            .collect();
        Self(Arc::new(Mutex::new(State {
            registers,
            bulk_rejected: vec![200..=290],
            ..State::default()
        })))
    }

    pub fn set(&self, address: u16, word: u16) -> &Self {
        self.0.lock().unwrap().registers.insert(address, word);
        self
    }

    pub fn get(&self, address: u16) -> u16 {
        self.0.lock().unwrap().registers[&address]
    }

    pub fn remove(&self, address: u16) -> &Self {
        self.0.lock().unwrap().registers.remove(&address);
        self
    }

    pub fn reject_bulk(&self, range: RangeInclusive<u16>) -> &Self {
        self.0.lock().unwrap().bulk_rejected.push(range);
        self
    }

    /// Stores at most `max` when `address` is written.
    pub fn clamp(&self, address: u16, max: u16) -> &Self {
        self.0.lock().unwrap().clamp.insert(address, max);
        self
    }

    /// Lets the next `count` requests time out.
    pub fn time_out(&self, count: usize) -> &Self {
        self.0.lock().unwrap().timeouts = count;
        self
    }

    /// Rejects writes to `address`.
    pub fn read_only(&self, address: u16) -> &Self {
        self.0.lock().unwrap().read_only.push(address);
        self
    }

    /// Rejects reads of `address`.
    pub fn write_only(&self, address: u16) -> &Self {
        self.0.lock().unwrap().write_only.push(address);
        self
    }

    /// Cancels `flag` once `reads` read requests have been answered.
    pub fn cancel_after(&self, reads: usize, flag: CancelFlag) -> &Self {
        self.0.lock().unwrap().cancel_after = Some((reads, flag));
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.0.lock().unwrap().requests.clone()
    }

    pub fn reads(&self) -> Vec<(u16, u16)> {
        self.requests()
            .into_iter()
            .filter_map(|request| match request {
                Request::Read { address, quantity } => Some((address, quantity)),
                _ => None,
            })
            .collect()
    }

    pub fn client(&self) -> SafeClient<FakeLink> {
        let config = TransportConfig {
            retry_delay: Duration::ZERO,
            delay: Duration::ZERO,
            ..TransportConfig::default()
        };
        let device = self.clone();
        SafeClient::with_connector(move || Ok(FakeLink(device.clone())), &config)
    }
}

pub struct FakeLink(FakeHeatPump);

impl FakeLink {
    fn timed_out(state: &mut State) -> bool {
        if state.timeouts > 0 {
            state.timeouts -= 1;
            true
        } else {
            false
        }
    }
}

fn timeout<T>() -> tokio_modbus::Result<T> {
    Err(tokio_modbus::Error::Transport(
        std::io::ErrorKind::TimedOut.into(),
    ))
}

impl Link for FakeLink {
    fn read_holding_registers(
        &mut self,
        address: u16,
        quantity: u16,
    ) -> tokio_modbus::Result<Vec<u16>> {
        let mut state = self.0 .0.lock().unwrap();
        state.requests.push(Request::Read { address, quantity });
        if Self::timed_out(&mut state) {
            return timeout();
        }
        let reads = state
            .requests
            .iter()
            .filter(|request| matches!(request, Request::Read { .. }))
            .count();
        if let Some((after, flag)) = &state.cancel_after {
            if reads >= *after {
                flag.cancel();
            }
        }
        let last = address + quantity - 1;
        if (address..=last).any(|address| state.write_only.contains(&address)) {
            return Ok(Err(ExceptionCode::IllegalDataAddress));
        }
        if quantity > 1
            && state
                .bulk_rejected
                .iter()
                .any(|range| range.start() <= &last && &address <= range.end())
        {
            return Ok(Err(ExceptionCode::IllegalDataAddress));
        }
        let words: Option<Vec<u16>> = (address..=last)
            .map(|address| state.registers.get(&address).copied())
            .collect();
        Ok(words.ok_or(ExceptionCode::IllegalDataAddress))
    }

    fn write_single_register(&mut self, address: u16, word: u16) -> tokio_modbus::Result<()> {
        let mut state = self.0 .0.lock().unwrap();
        state.requests.push(Request::WriteSingle { address, word });
        if Self::timed_out(&mut state) {
            return timeout();
        }
        if state.read_only.contains(&address) || !state.registers.contains_key(&address) {
            return Ok(Err(ExceptionCode::IllegalDataAddress));
        }
        let word = state.clamp.get(&address).map_or(word, |max| word.min(*max));
        state.registers.insert(address, word);
        Ok(Ok(()))
    }

    fn write_multiple_registers(
        &mut self,
        address: u16,
        words: &[u16],
    ) -> tokio_modbus::Result<()> {
        let mut state = self.0 .0.lock().unwrap();
        state.requests.push(Request::WriteMultiple {
            address,
            quantity: words.len() as u16,
        });
        if Self::timed_out(&mut state) {
            return timeout();
        }
        for (offset, word) in words.iter().enumerate() {
            state.registers.insert(address + offset as u16, *word);
        }
        Ok(Ok(()))
    }

    fn set_slave(&mut self, _slave: u8) {}
}
