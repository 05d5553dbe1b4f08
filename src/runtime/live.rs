//! Live runtime: NDJSON over stdio with real timers.
//!
//! Each input line is one [`WireMessage`]: a control command, a renderer
//! event, or a scene update. Render commands and notifications are written
//! to the output as one JSON object per line. Timers run as spawned sleeps,
//! each guarded by a child of the loop's cancellation token so cancelling
//! a timer or shutting the loop down never leaves a stray wake-up.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PacketwalkError, WireError};
use crate::observability::{Event, EventEmitter};
use crate::phase::{Command, Effect, Input, PhaseOrchestrator, RendererEvent, Room, TimerId};
use crate::topology::{Anchor, Position};

/// Longest accepted input line in bytes.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

const INBOX_CAPACITY: usize = 64;

// ============================================================================
// Wire format
// ============================================================================

/// One line of input.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireMessage {
    /// `{"command": {"op": "start"}}`
    Command(Command),
    /// `{"renderer": {"event": "arrival", "hop": "dns:1:3", "generation": 3}}`
    Renderer(RendererEvent),
    /// `{"scene": {"op": "place", "anchor": "web1", "position": [1, 0, 2]}}`
    Scene(SceneUpdate),
}

/// Change to the scene reported by the renderer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SceneUpdate {
    /// An anchor appeared or moved
    Place {
        /// Anchor name
        anchor: Anchor,
        /// `[x, y, z]`
        position: [f64; 3],
    },
    /// An anchor left the scene
    Remove {
        /// Anchor name
        anchor: Anchor,
    },
}

/// Decodes one input line. Blank lines decode to `None`.
///
/// # Errors
///
/// Returns [`WireError::Malformed`] if the line is not a known message.
pub fn decode_line(line: u64, text: &str) -> Result<Option<WireMessage>, WireError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|source| WireError::Malformed { line, source })
}

// ============================================================================
// Loop
// ============================================================================

/// What to do when the input reaches end of file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EofPolicy {
    /// Keep running until every pending timer has fired or been cancelled
    #[default]
    Drain,
    /// Stop immediately
    Exit,
}

#[derive(Debug)]
enum Inbound {
    Timer(TimerId),
    Anchor(Anchor, Position),
}

/// Live runtime for one room.
pub struct LiveLoop<W> {
    orchestrator: PhaseOrchestrator,
    timers: HashMap<TimerId, CancellationToken>,
    tx: mpsc::Sender<Inbound>,
    rx: mpsc::Receiver<Inbound>,
    cancel: CancellationToken,
    out: W,
    events: EventEmitter,
    eof: EofPolicy,
    epoch: Instant,
}

impl<W> std::fmt::Debug for LiveLoop<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveLoop")
            .field("room", &self.orchestrator.room().name)
            .field("timers", &self.timers.len())
            .field("eof", &self.eof)
            .finish_non_exhaustive()
    }
}

impl<W: AsyncWrite + Unpin> LiveLoop<W> {
    /// Creates a loop writing effects to `out` until `cancel` fires.
    #[must_use]
    pub fn new(room: Room, out: W, cancel: CancellationToken) -> Self {
        let scene = room.initial_scene();
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        Self {
            orchestrator: PhaseOrchestrator::new(room, scene),
            timers: HashMap::new(),
            tx,
            rx,
            cancel,
            out,
            events: EventEmitter::noop(),
            eof: EofPolicy::default(),
            epoch: Instant::now(),
        }
    }

    /// Sends structured events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    /// Sets the end-of-input policy.
    #[must_use]
    pub const fn with_eof_policy(mut self, eof: EofPolicy) -> Self {
        self.eof = eof;
        self
    }

    /// The orchestrator being driven.
    #[must_use]
    pub const fn orchestrator(&self) -> &PhaseOrchestrator {
        &self.orchestrator
    }

    /// Runs until cancelled or until input ends (see [`EofPolicy`]).
    ///
    /// Malformed lines are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if reading input or writing output fails.
    pub async fn run<R: AsyncRead + Unpin>(&mut self, input: R) -> Result<(), PacketwalkError> {
        self.epoch = Instant::now();
        self.events
            .emit(Event::session_started(&self.orchestrator.room().name));
        self.schedule_late_anchors();

        let mut lines = FramedRead::new(input, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let mut line_no: u64 = 0;
        let mut input_open = true;

        let reason = loop {
            if !input_open && (self.eof == EofPolicy::Exit || self.timers.is_empty()) {
                break "input closed";
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break "cancelled",
                Some(inbound) = self.rx.recv() => self.inbound(inbound).await?,
                line = lines.next(), if input_open => match line {
                    None => {
                        debug!(lines = line_no, pending_timers = self.timers.len(), "input closed");
                        input_open = false;
                    }
                    Some(Ok(text)) => {
                        line_no += 1;
                        match decode_line(line_no, &text) {
                            Ok(Some(message)) => self.message(message).await?,
                            Ok(None) => {}
                            Err(e) => warn!(error = %e, "skipping malformed input"),
                        }
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        line_no += 1;
                        let e = WireError::LineTooLong { line: line_no, limit: MAX_LINE_LENGTH };
                        warn!(error = %e, "skipping oversized input");
                    }
                    Some(Err(LinesCodecError::Io(e))) => return Err(e.into()),
                },
            }
        };

        for (_, token) in self.timers.drain() {
            token.cancel();
        }
        self.out.flush().await?;
        info!(reason, lines = line_no, "live loop stopped");
        self.events.emit(Event::session_stopped(reason));
        Ok(())
    }

    async fn message(&mut self, message: WireMessage) -> Result<(), PacketwalkError> {
        match message {
            WireMessage::Command(command) => self.handle(Input::Command(command)).await,
            WireMessage::Renderer(event) => self.handle(Input::Renderer(event)).await,
            WireMessage::Scene(SceneUpdate::Place { anchor, position: [x, y, z] }) => {
                debug!(%anchor, "anchor placed");
                self.orchestrator
                    .topology_mut()
                    .place(anchor, Position::new(x, y, z));
                Ok(())
            }
            WireMessage::Scene(SceneUpdate::Remove { anchor }) => {
                debug!(%anchor, "anchor removed");
                self.orchestrator.topology_mut().remove(&anchor);
                Ok(())
            }
        }
    }

    async fn inbound(&mut self, inbound: Inbound) -> Result<(), PacketwalkError> {
        match inbound {
            Inbound::Timer(id) => {
                // a timer cancelled after its sleep finished is still in the channel
                if self.timers.remove(&id).is_none() {
                    debug!(?id, "dropping cancelled timer");
                    return Ok(());
                }
                self.handle(Input::TimerFired(id)).await
            }
            Inbound::Anchor(anchor, position) => {
                debug!(%anchor, "anchor appeared");
                self.orchestrator.topology_mut().place(anchor, position);
                Ok(())
            }
        }
    }

    async fn handle(&mut self, input: Input) -> Result<(), PacketwalkError> {
        let now = self.epoch.elapsed();
        self.orchestrator.set_time(now);
        let effects = self.orchestrator.handle(input);
        self.events.emit_effects(&effects, now);

        for effect in effects {
            match effect {
                Effect::StartTimer { id, after } => self.start_timer(id, after),
                Effect::CancelTimer { id } => {
                    if let Some(token) = self.timers.remove(&id) {
                        token.cancel();
                    }
                }
                Effect::Render(_) | Effect::Notify(_) => self.write(&effect).await?,
            }
        }
        Ok(())
    }

    fn start_timer(&mut self, id: TimerId, after: Duration) {
        if let Some(previous) = self.timers.remove(&id) {
            previous.cancel();
        }
        let token = self.cancel.child_token();
        self.timers.insert(id.clone(), token.clone());
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(after) => {
                    let _ = tx.send(Inbound::Timer(id)).await;
                }
            }
        });
    }

    fn schedule_late_anchors(&self) {
        for (name, spec) in self.orchestrator.room().late_anchors() {
            let tx = self.tx.clone();
            let cancel = self.cancel.child_token();
            let inbound = Inbound::Anchor(name.clone(), spec.position);
            let after = spec.appears_after;
            tokio::spawn(async move {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(after) => {
                        let _ = tx.send(inbound).await;
                    }
                }
            });
        }
    }

    async fn write(&mut self, effect: &Effect) -> Result<(), PacketwalkError> {
        let mut line = serde_json::to_vec(effect)?;
        line.push(b'\n');
        self.out.write_all(&line).await?;
        self.out.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::{FirewallRule, RuleAction, Zone};
    use crate::phase::room::Segment;
    use serde_json::Value;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    fn room() -> Room {
        let mut room = Room::new("lab", "https")
            .with_phase("https", vec![Segment::new("pc", "fw"), Segment::new("fw", "web")])
            .with_anchor("pc", Position::new(0.0, 0.0, 0.0), Some(Zone::Lan))
            .with_anchor("fw", Position::new(2.0, 0.0, 0.0), None)
            .with_anchor("web", Position::new(4.0, 0.0, 0.0), Some(Zone::Wan))
            .with_inspection_node("fw");
        room.rules = vec![FirewallRule {
            id: "web-out".to_string(),
            order: 0,
            src_zone: Zone::Lan,
            dst_zone: Zone::Wan,
            protocol: "TCP".to_string(),
            port: 443,
            action: RuleAction::Allow,
        }];
        room
    }

    struct Client {
        input: DuplexStream,
        output: tokio::io::Lines<BufReader<DuplexStream>>,
    }

    impl Client {
        async fn send(&mut self, line: &str) {
            self.input.write_all(line.as_bytes()).await.unwrap();
            self.input.write_all(b"\n").await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            let line = self.output.next_line().await.unwrap().expect("output closed");
            serde_json::from_str(&line).unwrap()
        }

        async fn recv_until(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
            loop {
                let value = self.recv().await;
                if pred(&value) {
                    return value;
                }
            }
        }

        /// Closes input and reads output until the loop drops its writer.
        async fn finish(self) -> Vec<Value> {
            let Self { input, mut output } = self;
            drop(input);
            let mut rest = Vec::new();
            while let Some(line) = output.next_line().await.unwrap() {
                rest.push(serde_json::from_str(&line).unwrap());
            }
            rest
        }
    }

    fn spawn(
        room: Room,
        eof: EofPolicy,
        cancel: CancellationToken,
    ) -> (Client, tokio::task::JoinHandle<Result<(), PacketwalkError>>) {
        let (input, server_in) = tokio::io::duplex(MAX_LINE_LENGTH);
        let (server_out, output) = tokio::io::duplex(MAX_LINE_LENGTH);
        let mut live = LiveLoop::new(room, server_out, cancel).with_eof_policy(eof);
        let handle = tokio::spawn(async move { live.run(server_in).await });
        let client = Client {
            input,
            output: BufReader::new(output).lines(),
        };
        (client, handle)
    }

    #[test]
    fn test_decode_line() {
        let msg = decode_line(1, r#"{"command": {"op": "set_phase", "phase": "vpn"}}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(msg, WireMessage::Command(Command::SetPhase { .. })));

        let msg = decode_line(2, r#"{"scene": {"op": "remove", "anchor": "web1"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            msg,
            WireMessage::Scene(SceneUpdate::Remove {
                anchor: Anchor::new("web1")
            })
        );

        assert!(decode_line(3, "   ").unwrap().is_none());
        let err = decode_line(4, "{not json").unwrap_err();
        assert!(matches!(err, WireError::Malformed { line: 4, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_dispatches_first_hop() {
        let (mut client, handle) = spawn(room(), EofPolicy::Exit, CancellationToken::new());
        client.send(r#"{"command": {"op": "start"}}"#).await;

        let first = client.recv().await;
        assert_eq!(first["effect"], "render");
        assert_eq!(first["command"], "dispatch");
        assert_eq!(first["from"], "pc");
        assert_eq!(first["to"], "fw");

        client.finish().await;
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_lines_are_skipped() {
        let (mut client, handle) = spawn(room(), EofPolicy::Exit, CancellationToken::new());
        client.send("this is not json").await;
        client.send(r#"{"command": {"op": "launch"}}"#).await;
        client.send(r#"{"command": {"op": "start"}}"#).await;

        let first = client.recv().await;
        assert_eq!(first["command"], "dispatch");

        client.finish().await;
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_fallback_timer_fires() {
        let (mut client, handle) = spawn(room(), EofPolicy::Drain, CancellationToken::new());
        client.send(r#"{"command": {"op": "start"}}"#).await;
        let dispatch = client.recv().await;
        let hop = dispatch["hop_id"].as_str().unwrap().to_string();

        client
            .send(&format!(r#"{{"renderer": {{"event": "hold_start", "hop": "{hop}"}}}}"#))
            .await;

        // the paused clock jumps to the fallback deadline
        let decision = client
            .recv_until(|v| v["notification"] == "decision_made")
            .await;
        assert_eq!(decision["decision"]["action"], "allow");

        let next = client.recv_until(|v| v["command"] == "dispatch").await;
        assert_eq!(next["from"], "fw");

        // draining on close lets the approval indicator revert
        let rest = client.finish().await;
        let last = rest.last().unwrap();
        assert_eq!(last["notification"], "approval_changed");
        assert_eq!(last["indicator"]["value"], "none");
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_loop_with_input_open() {
        let cancel = CancellationToken::new();
        let (client, handle) = spawn(room(), EofPolicy::Drain, cancel.clone());
        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(client.finish().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_anchor_arrives_from_scene_update() {
        let mut r = room();
        r.anchors.shift_remove(&Anchor::new("fw"));
        let (mut client, handle) = spawn(r, EofPolicy::Exit, CancellationToken::new());

        client.send(r#"{"command": {"op": "start"}}"#).await;
        client
            .send(r#"{"scene": {"op": "place", "anchor": "fw", "position": [2, 0, 0]}}"#)
            .await;

        let dispatch = client.recv_until(|v| v["command"] == "dispatch").await;
        assert_eq!(dispatch["to"], "fw");

        client.finish().await;
        handle.await.unwrap().unwrap();
    }
}
