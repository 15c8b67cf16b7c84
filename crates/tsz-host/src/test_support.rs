//! In-memory server process and helpers shared by the unit tests.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tsz_host_wire::{Event, Message, Request, Response};

use crate::process::{ExitStatus, ProcessError, ProcessEvent, TsServerProcess};
use crate::server::ProcessBasedTsServer;
use crate::telemetry::TelemetryReporter;

/// Records every request written and never answers on its own.
#[derive(Clone, Default)]
pub struct FakeProcess {
    written: Arc<Mutex<Vec<Request>>>,
    killed: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl FakeProcess {
    pub fn written(&self) -> Vec<Request> {
        self.written.lock().unwrap().clone()
    }

    pub fn written_seqs(&self) -> Vec<u64> {
        self.written().iter().map(|request| request.seq).collect()
    }

    pub fn written_commands(&self) -> Vec<String> {
        self.written()
            .into_iter()
            .map(|request| request.command)
            .collect()
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }
}

impl TsServerProcess for FakeProcess {
    fn write(&mut self, request: &Request) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        }
        self.written.lock().unwrap().push(request.clone());
        Ok(())
    }

    fn kill(&mut self) {
        self.killed.store(true, Ordering::SeqCst);
    }
}

/// A [`ProcessBasedTsServer`] over a [`FakeProcess`], plus the sending end of
/// its process event channel.
pub struct FakeServer {
    pub server: Arc<ProcessBasedTsServer>,
    pub process: FakeProcess,
    pub events: mpsc::UnboundedSender<ProcessEvent>,
}

pub fn fake_server(id: &str) -> FakeServer {
    fake_server_with(id, |builder| builder)
}

pub fn fake_server_with(
    id: &str,
    configure: impl FnOnce(
        crate::server::ProcessBasedTsServerBuilder,
    ) -> crate::server::ProcessBasedTsServerBuilder,
) -> FakeServer {
    let process = FakeProcess::default();
    let (events, receiver) = mpsc::unbounded_channel();
    let builder = ProcessBasedTsServer::builder(id, Box::new(process.clone()), receiver)
        .version("5.4.0-test");
    let server = Arc::new(configure(builder).start());
    FakeServer {
        server,
        process,
        events,
    }
}

impl FakeServer {
    pub fn send(&self, message: Message) {
        self.events.send(ProcessEvent::Message(message)).unwrap();
    }

    pub fn respond(&self, request_seq: u64, command: &str, body: Value) {
        self.send(Message::Response(success(request_seq, command, body)));
    }

    pub fn fail(&self, request_seq: u64, command: &str, message: &str) {
        self.send(Message::Response(failure(request_seq, command, message)));
    }

    pub fn emit_event(&self, name: &str, body: Value) {
        self.send(Message::Event(Event::new(name, Some(body))));
    }

    pub fn request_completed(&self, request_seq: u64) {
        self.emit_event(
            "requestCompleted",
            serde_json::json!({ "request_seq": request_seq }),
        );
    }

    pub fn exit(&self, code: i32) {
        let status = ExitStatus {
            code: Some(code),
            signal: None,
        };
        self.events.send(ProcessEvent::Exit(status)).unwrap();
    }

    pub fn error(&self, message: &str) {
        self.events
            .send(ProcessEvent::Error(ProcessError(message.to_string())))
            .unwrap();
    }
}

pub fn success(request_seq: u64, command: &str, body: Value) -> Response {
    Response {
        seq: 0,
        request_seq,
        command: command.to_string(),
        success: true,
        message: None,
        body: Some(body),
    }
}

pub fn failure(request_seq: u64, command: &str, message: &str) -> Response {
    Response {
        seq: 0,
        request_seq,
        command: command.to_string(),
        success: false,
        message: Some(message.to_string()),
        body: None,
    }
}

/// Let spawned tasks on the current-thread test runtime run to quiescence.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }
}

impl TelemetryReporter for RecordingTelemetry {
    fn log_telemetry(&self, event_name: &str, properties: Value) {
        self.events
            .lock()
            .unwrap()
            .push((event_name.to_string(), properties));
    }
}

/// Collects everything an emitter delivers.
pub fn collect<T: Clone + Send + 'static>(
    emitter: &crate::events::Emitter<T>,
) -> (Arc<Mutex<Vec<T>>>, crate::events::Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = emitter.subscribe(move |value: &T| sink.lock().unwrap().push(value.clone()));
    (seen, subscription)
}
