//! Scripted stand-in for the transport collaborator.
//!
//! Every option set, `perform` and `reset` is recorded in a shared `Log`.
//! The handle also watches for state leaking between calls: any option set
//! or `perform` issued after a `perform` without an intervening `reset` is
//! recorded in `Log::leaks`.

#![allow(dead_code)]

use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::Mutex;
use tether_core::interrupt::Progress;
use tether_core::transport::{Feature, TransferIo};
use tether_core::{
    ConfigError, InfoKey, InfoValue, NativeHandle, OptionKey, OptionValue, ResultCode, Session,
    SessionRegistry, Transport,
};

pub type Script = Arc<dyn Fn(&mut dyn TransferIo, &[(OptionKey, OptionValue)]) -> ResultCode + Send + Sync>;

#[derive(Debug, Default)]
pub struct Log {
    /// Options set since the last reset.
    pub options: Vec<(OptionKey, OptionValue)>,
    /// Every option ever set, in order.
    pub history: Vec<(OptionKey, OptionValue)>,
    pub opened: usize,
    pub performs: usize,
    pub resets: usize,
    pub leaks: Vec<String>,
}

impl Log {
    pub fn option(&self, key: OptionKey) -> Option<&OptionValue> {
        self.options
            .iter()
            .rev()
            .find(|(set, _)| *set == key)
            .map(|(_, value)| value)
    }
}

pub struct StubTransport {
    pub log: Arc<Mutex<Log>>,
    script: Script,
}

impl StubTransport {
    pub fn new(
        script: impl Fn(&mut dyn TransferIo, &[(OptionKey, OptionValue)]) -> ResultCode
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            log: Arc::new(Mutex::new(Log::default())),
            script: Arc::new(script),
        }
    }

    /// Transport that answers every call with `200 OK` and `body`.
    pub fn ok(body: &'static [u8]) -> Self {
        Self::new(move |io, _| {
            io.write_header(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n");
            io.write_body(body);
            ResultCode::OK
        })
    }

    /// Transport that fails every call with `code` and `message`.
    pub fn failing(code: ResultCode, message: &'static str) -> Self {
        Self::new(move |io, _| {
            io.report_error(message);
            code
        })
    }
}

impl Transport for StubTransport {
    type Handle = StubHandle;

    fn open(&self) -> Result<StubHandle, ResultCode> {
        self.log.lock().opened += 1;
        Ok(StubHandle {
            log: Arc::clone(&self.log),
            script: Arc::clone(&self.script),
            dirty: false,
            last_url: None,
        })
    }

    fn supports(&self, _feature: Feature) -> bool {
        true
    }
}

pub struct StubHandle {
    log: Arc<Mutex<Log>>,
    script: Script,
    /// Set by `perform`, cleared by `reset`.
    dirty: bool,
    last_url: Option<String>,
}

impl NativeHandle for StubHandle {
    fn set_option(&mut self, key: OptionKey, value: OptionValue) -> Result<(), ConfigError> {
        let mut log = self.log.lock();
        if self.dirty {
            log.leaks.push(format!("{key} set before reset"));
        }
        if key == OptionKey::Url {
            self.last_url = value.as_text().map(str::to_string);
        }
        log.options.push((key, value.clone()));
        log.history.push((key, value));
        Ok(())
    }

    fn info(&self, key: InfoKey) -> Option<InfoValue> {
        match key {
            InfoKey::EffectiveUrl => self.last_url.clone().map(InfoValue::Text),
            InfoKey::ResponseCode => Some(InfoValue::Int(200)),
            InfoKey::RedirectCount => Some(InfoValue::Int(0)),
            _ => None,
        }
    }

    fn perform(&mut self, io: &mut dyn TransferIo) -> ResultCode {
        let options = {
            let mut log = self.log.lock();
            if self.dirty {
                log.leaks.push("perform before reset".to_string());
            }
            log.performs += 1;
            log.options.clone()
        };
        self.dirty = true;
        (self.script)(io, &options)
    }

    fn reset(&mut self) {
        let mut log = self.log.lock();
        log.options.clear();
        log.resets += 1;
        self.dirty = false;
    }
}

/// Session on a private registry, plus the stub's log.
pub fn session(transport: StubTransport) -> (Session<StubTransport>, Arc<Mutex<Log>>) {
    let log = Arc::clone(&transport.log);
    let session = Session::with_registry(transport, Arc::new(SessionRegistry::new()));
    (session, log)
}

/// Report `progress` until the engine says stop or `rounds` run out.
pub fn progress_until_break(
    io: &mut dyn TransferIo,
    rounds: usize,
    pause: std::time::Duration,
) -> ResultCode {
    for round in 0..rounds {
        let progress = Progress {
            download_now: round as u64,
            ..Progress::default()
        };
        if let ControlFlow::Break(()) = io.progress(progress) {
            return ResultCode::ABORTED_BY_CALLBACK;
        }
        std::thread::sleep(pause);
    }
    ResultCode::OK
}
