//! Discord gateway session: identify, heartbeat, dispatch, reconnect.
//!
//! Runs one websocket session at a time and forwards the dispatches the
//! watcher cares about over an mpsc channel. Sessions are never resumed; a
//! reconnect identifies from scratch.

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::discord::Message;

/// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
pub const WATCHER_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 15);

/// Delay before reconnecting after a dropped session.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// Close codes after which reconnecting cannot succeed
/// (authentication failed, invalid shard, sharding required, invalid API
/// version, invalid intents, disallowed intents).
const FATAL_CLOSE_CODES: &[u16] = &[4004, 4010, 4011, 4012, 4013, 4014];

/// Raw gateway frame.
#[derive(Debug, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

/// Dispatches forwarded to the watcher.
#[derive(Debug)]
pub enum GatewayEvent {
    Ready { user_id: String },
    MessageCreate(Box<Message>),
}

/// How a single session ended.
#[derive(Debug, PartialEq)]
enum SessionEnd {
    Reconnect,
    Fatal(u16),
    Shutdown,
}

pub fn parse_payload(text: &str) -> Result<GatewayPayload> {
    serde_json::from_str(text).context("malformed gateway payload")
}

pub fn heartbeat_payload(seq: Option<u64>) -> String {
    json!({ "op": OP_HEARTBEAT, "d": seq }).to_string()
}

pub fn identify_payload(token: &str, intents: u64) -> String {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": intents,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "resell-watcher",
                "device": "resell-watcher"
            }
        }
    })
    .to_string()
}

/// Translate a dispatch (op 0) into a watcher event, if it is one we handle.
pub fn dispatch_event(kind: &str, data: Value) -> Result<Option<GatewayEvent>> {
    match kind {
        "READY" => {
            let user_id = data
                .get("user")
                .and_then(|u| u.get("id"))
                .and_then(Value::as_str)
                .context("READY without user id")?
                .to_string();
            Ok(Some(GatewayEvent::Ready { user_id }))
        }
        "MESSAGE_CREATE" => {
            let msg: Message =
                serde_json::from_value(data).context("malformed MESSAGE_CREATE")?;
            Ok(Some(GatewayEvent::MessageCreate(Box::new(msg))))
        }
        _ => Ok(None),
    }
}

/// What the session loop does after a frame or heartbeat tick.
#[derive(Debug)]
enum Step {
    Forward(GatewayEvent),
    SendHeartbeat,
    End(SessionEnd),
    Nothing,
}

/// Map a close frame's code to how the session ends.
fn close_action(code: Option<u16>) -> SessionEnd {
    match code {
        Some(c) if FATAL_CLOSE_CODES.contains(&c) => SessionEnd::Fatal(c),
        _ => SessionEnd::Reconnect,
    }
}

/// Sequence and heartbeat-ack tracking for one session.
#[derive(Debug)]
struct SessionState {
    seq: Option<u64>,
    acked: bool,
}

impl SessionState {
    fn new() -> Self {
        Self {
            seq: None,
            acked: true,
        }
    }

    /// A beat with the previous one still unacknowledged means a zombie
    /// connection.
    fn on_heartbeat_tick(&mut self) -> Step {
        if !self.acked {
            warn!("No heartbeat ack since last beat, dropping connection");
            return Step::End(SessionEnd::Reconnect);
        }
        self.acked = false;
        Step::SendHeartbeat
    }

    fn on_payload(&mut self, payload: GatewayPayload) -> Step {
        if payload.s.is_some() {
            self.seq = payload.s;
        }
        match payload.op {
            OP_DISPATCH => {
                let kind = payload.t.unwrap_or_default();
                match dispatch_event(&kind, payload.d) {
                    Ok(Some(event)) => Step::Forward(event),
                    Ok(None) => Step::Nothing,
                    Err(e) => {
                        warn!("Skipping {kind} dispatch: {e:#}");
                        Step::Nothing
                    }
                }
            }
            OP_HEARTBEAT => Step::SendHeartbeat,
            OP_HEARTBEAT_ACK => {
                self.acked = true;
                Step::Nothing
            }
            OP_RECONNECT => Step::End(SessionEnd::Reconnect),
            OP_INVALID_SESSION => {
                warn!("Gateway invalidated the session");
                Step::End(SessionEnd::Reconnect)
            }
            other => {
                debug!("Ignoring gateway op {other}");
                Step::Nothing
            }
        }
    }
}

/// Keep a gateway connection alive until shutdown or a fatal close.
///
/// Returns `Ok(())` once the event receiver is dropped.
pub async fn run(
    url: &str,
    token: &str,
    intents: u64,
    events: mpsc::Sender<GatewayEvent>,
) -> Result<()> {
    run_with_delay(url, token, intents, events, RECONNECT_DELAY).await
}

async fn run_with_delay(
    url: &str,
    token: &str,
    intents: u64,
    events: mpsc::Sender<GatewayEvent>,
    reconnect_delay: Duration,
) -> Result<()> {
    loop {
        match run_session(url, token, intents, &events).await {
            Ok(SessionEnd::Shutdown) => return Ok(()),
            Ok(SessionEnd::Fatal(code)) => {
                anyhow::bail!("gateway closed with fatal code {code}");
            }
            Ok(SessionEnd::Reconnect) => {
                info!("Gateway session ended, reconnecting in {reconnect_delay:?}");
            }
            Err(e) => {
                warn!("Gateway session error: {e:#}, reconnecting in {reconnect_delay:?}");
            }
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn run_session(
    url: &str,
    token: &str,
    intents: u64,
    events: &mpsc::Sender<GatewayEvent>,
) -> Result<SessionEnd> {
    let (ws_stream, _) = connect_async(url)
        .await
        .context("failed to connect to gateway")?;
    let (mut write, mut read) = ws_stream.split();

    // First frame must be Hello
    let hello = loop {
        match read.next().await {
            Some(Ok(WsMessage::Text(text))) => break parse_payload(text.as_str())?,
            Some(Ok(WsMessage::Close(_))) | None => return Ok(SessionEnd::Reconnect),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    };
    if hello.op != OP_HELLO {
        anyhow::bail!("expected Hello, got op {}", hello.op);
    }
    let interval_ms = hello
        .d
        .get("heartbeat_interval")
        .and_then(Value::as_u64)
        .context("Hello without heartbeat_interval")?;
    let period = Duration::from_millis(interval_ms);
    debug!("Gateway hello, heartbeat every {period:?}");

    write
        .send(WsMessage::Text(identify_payload(token, intents).into()))
        .await?;

    let mut heartbeat = interval_at(Instant::now() + period, period);
    let mut state = SessionState::new();

    loop {
        let step = tokio::select! {
            _ = heartbeat.tick() => state.on_heartbeat_tick(),
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(close))) => {
                        let code = close.map(|f| u16::from(f.code));
                        info!("Gateway closed (code: {code:?})");
                        return Ok(close_action(code));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(SessionEnd::Reconnect),
                };
                match parse_payload(text.as_str()) {
                    Ok(payload) => state.on_payload(payload),
                    Err(e) => {
                        warn!("{e:#}");
                        continue;
                    }
                }
            }
        };

        match step {
            Step::Forward(event) => {
                if events.send(event).await.is_err() {
                    return Ok(SessionEnd::Shutdown);
                }
            }
            Step::SendHeartbeat => {
                write
                    .send(WsMessage::Text(heartbeat_payload(state.seq).into()))
                    .await?;
            }
            Step::End(end) => return Ok(end),
            Step::Nothing => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn parses_hello() {
        let p = parse_payload(r#"{"op":10,"d":{"heartbeat_interval":41250},"s":null,"t":null}"#)
            .unwrap();
        assert_eq!(p.op, OP_HELLO);
        assert_eq!(p.d["heartbeat_interval"].as_u64(), Some(41250));
        assert!(p.s.is_none());
    }

    #[test]
    fn parses_ack_without_data() {
        let p = parse_payload(r#"{"op":11}"#).unwrap();
        assert_eq!(p.op, OP_HEARTBEAT_ACK);
        assert!(p.d.is_null());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_payload("not json").is_err());
    }

    #[test]
    fn heartbeat_carries_sequence() {
        let v: Value = serde_json::from_str(&heartbeat_payload(Some(42))).unwrap();
        assert_eq!(v, json!({ "op": 1, "d": 42 }));
        let v: Value = serde_json::from_str(&heartbeat_payload(None)).unwrap();
        assert_eq!(v, json!({ "op": 1, "d": null }));
    }

    #[test]
    fn identify_includes_token_and_intents() {
        let v: Value = serde_json::from_str(&identify_payload("abc", WATCHER_INTENTS)).unwrap();
        assert_eq!(v["op"], 2);
        assert_eq!(v["d"]["token"], "abc");
        assert_eq!(v["d"]["intents"].as_u64(), Some(33281));
    }

    #[test]
    fn dispatch_ready() {
        let event = dispatch_event("READY", json!({ "v": 10, "user": { "id": "77" } }))
            .unwrap()
            .unwrap();
        match event {
            GatewayEvent::Ready { user_id } => assert_eq!(user_id, "77"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn dispatch_message_create() {
        let data = json!({
            "id": "1",
            "channel_id": "5",
            "author": { "id": "9" },
            "embeds": [{ "title": "Thing" }]
        });
        let event = dispatch_event("MESSAGE_CREATE", data).unwrap().unwrap();
        match event {
            GatewayEvent::MessageCreate(msg) => {
                assert_eq!(msg.channel_id, "5");
                assert_eq!(msg.embeds[0].title.as_deref(), Some("Thing"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn dispatch_ignores_other_events() {
        assert!(dispatch_event("TYPING_START", json!({})).unwrap().is_none());
    }

    #[test]
    fn dispatch_ready_requires_user() {
        assert!(dispatch_event("READY", json!({})).is_err());
    }

    // ── session decisions ──────────────────────────────────────────

    fn payload(text: &str) -> GatewayPayload {
        parse_payload(text).unwrap()
    }

    #[test]
    fn fatal_close_codes_stop() {
        for code in [4004, 4010, 4011, 4012, 4013, 4014] {
            assert_eq!(close_action(Some(code)), SessionEnd::Fatal(code));
        }
    }

    #[test]
    fn other_close_codes_reconnect() {
        for code in [1000, 1001, 4000, 4007, 4009] {
            assert_eq!(close_action(Some(code)), SessionEnd::Reconnect);
        }
        assert_eq!(close_action(None), SessionEnd::Reconnect);
    }

    #[test]
    fn reconnect_and_invalid_session_end_session() {
        let mut state = SessionState::new();
        assert!(matches!(
            state.on_payload(payload(r#"{"op":7}"#)),
            Step::End(SessionEnd::Reconnect)
        ));
        assert!(matches!(
            state.on_payload(payload(r#"{"op":9,"d":false}"#)),
            Step::End(SessionEnd::Reconnect)
        ));
    }

    #[test]
    fn server_heartbeat_request_answered() {
        let mut state = SessionState::new();
        assert!(matches!(state.on_payload(payload(r#"{"op":1}"#)), Step::SendHeartbeat));
    }

    #[test]
    fn unacked_heartbeat_reconnects() {
        let mut state = SessionState::new();
        assert!(matches!(state.on_heartbeat_tick(), Step::SendHeartbeat));
        assert!(matches!(
            state.on_heartbeat_tick(),
            Step::End(SessionEnd::Reconnect)
        ));
    }

    #[test]
    fn acked_heartbeat_keeps_session() {
        let mut state = SessionState::new();
        assert!(matches!(state.on_heartbeat_tick(), Step::SendHeartbeat));
        assert!(matches!(state.on_payload(payload(r#"{"op":11}"#)), Step::Nothing));
        assert!(matches!(state.on_heartbeat_tick(), Step::SendHeartbeat));
    }

    #[test]
    fn dispatch_tracks_sequence_and_forwards() {
        let mut state = SessionState::new();
        let step = state.on_payload(payload(
            r#"{"op":0,"s":12,"t":"READY","d":{"user":{"id":"77"}}}"#,
        ));
        assert!(matches!(step, Step::Forward(GatewayEvent::Ready { .. })));
        assert_eq!(state.seq, Some(12));

        // Frames without a sequence keep the last one
        state.on_payload(payload(r#"{"op":11}"#));
        assert_eq!(state.seq, Some(12));

        let step = state.on_payload(payload(r#"{"op":0,"s":13,"t":"READY","d":{}}"#));
        assert!(matches!(step, Step::Nothing));
        assert_eq!(state.seq, Some(13));
    }

    // ── live session against a local server ────────────────────────

    type ServerStream = WebSocketStream<TcpStream>;

    async fn accept(listener: &TcpListener) -> ServerStream {
        let (tcp, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        tokio_tungstenite::accept_async(tcp).await.unwrap()
    }

    async fn next_json(ws: &mut ServerStream) -> Value {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("no frame from client");
            match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    return serde_json::from_str(text.as_str()).unwrap();
                }
                Some(Ok(_)) => continue,
                other => panic!("client connection ended: {other:?}"),
            }
        }
    }

    async fn send_json(ws: &mut ServerStream, value: Value) {
        ws.send(WsMessage::Text(value.to_string().into())).await.unwrap();
    }

    async fn send_close(ws: &mut ServerStream, code: u16) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        let _ = ws.send(WsMessage::Close(Some(frame))).await;
    }

    /// Hello, then expect Identify with the test token.
    async fn handshake(ws: &mut ServerStream, heartbeat_ms: u64) {
        send_json(ws, json!({ "op": 10, "d": { "heartbeat_interval": heartbeat_ms } })).await;
        let identify = next_json(ws).await;
        assert_eq!(identify["op"], 2);
        assert_eq!(identify["d"]["token"], "tok");
    }

    async fn local_gateway() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    #[tokio::test]
    async fn session_forwards_events_and_stops_on_fatal_close() {
        let (listener, url) = local_gateway().await;
        let (tx, mut rx) = mpsc::channel(8);
        let client = tokio::spawn(async move {
            run_with_delay(&url, "tok", WATCHER_INTENTS, tx, Duration::from_millis(10)).await
        });

        let mut ws = accept(&listener).await;
        handshake(&mut ws, 60_000).await;
        send_json(
            &mut ws,
            json!({ "op": 0, "s": 1, "t": "READY", "d": { "user": { "id": "77" } } }),
        )
        .await;
        send_json(
            &mut ws,
            json!({
                "op": 0, "s": 2, "t": "MESSAGE_CREATE",
                "d": { "id": "1", "channel_id": "5", "author": { "id": "9" } }
            }),
        )
        .await;

        match rx.recv().await {
            Some(GatewayEvent::Ready { user_id }) => assert_eq!(user_id, "77"),
            other => panic!("unexpected event {other:?}"),
        }
        match rx.recv().await {
            Some(GatewayEvent::MessageCreate(msg)) => assert_eq!(msg.channel_id, "5"),
            other => panic!("unexpected event {other:?}"),
        }

        send_close(&mut ws, 4004).await;
        let result = tokio::time::timeout(Duration::from_secs(5), client)
            .await
            .expect("gateway kept running after fatal close")
            .unwrap();
        let err = result.unwrap_err();
        assert!(format!("{err}").contains("4004"));
    }

    #[tokio::test]
    async fn session_answers_server_heartbeat_immediately() {
        let (listener, url) = local_gateway().await;
        let (tx, _rx) = mpsc::channel(8);
        let client = tokio::spawn(async move {
            run_with_delay(&url, "tok", WATCHER_INTENTS, tx, Duration::from_millis(10)).await
        });

        let mut ws = accept(&listener).await;
        // Long interval so only the server's request can trigger a beat
        handshake(&mut ws, 60_000).await;
        send_json(&mut ws, json!({ "op": 11 })).await;
        send_json(&mut ws, json!({ "op": 0, "s": 3, "t": "TYPING_START", "d": {} })).await;
        send_json(&mut ws, json!({ "op": 1 })).await;

        let beat = next_json(&mut ws).await;
        assert_eq!(beat, json!({ "op": 1, "d": 3 }));
        client.abort();
    }

    #[tokio::test]
    async fn session_reconnects_until_fatal_close() {
        let (listener, url) = local_gateway().await;
        let (tx, _rx) = mpsc::channel(8);
        let client = tokio::spawn(async move {
            run_with_delay(&url, "tok", WATCHER_INTENTS, tx, Duration::from_millis(10)).await
        });

        // Reconnect request
        let mut ws = accept(&listener).await;
        handshake(&mut ws, 60_000).await;
        send_json(&mut ws, json!({ "op": 7, "d": null })).await;

        // Invalid session
        let mut ws = accept(&listener).await;
        handshake(&mut ws, 60_000).await;
        send_json(&mut ws, json!({ "op": 9, "d": false })).await;

        // Non-fatal close code
        let mut ws = accept(&listener).await;
        handshake(&mut ws, 60_000).await;
        send_close(&mut ws, 4000).await;

        // Zombie: heartbeats go unacknowledged
        let mut ws = accept(&listener).await;
        handshake(&mut ws, 30).await;
        let beat = next_json(&mut ws).await;
        assert_eq!(beat["op"], 1);

        let mut ws = accept(&listener).await;
        handshake(&mut ws, 60_000).await;
        send_close(&mut ws, 4014).await;

        let result = tokio::time::timeout(Duration::from_secs(5), client)
            .await
            .expect("gateway kept running after fatal close")
            .unwrap();
        assert!(format!("{}", result.unwrap_err()).contains("4014"));
    }

    #[tokio::test]
    async fn session_shuts_down_when_receiver_dropped() {
        let (listener, url) = local_gateway().await;
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let client = tokio::spawn(async move {
            run_with_delay(&url, "tok", WATCHER_INTENTS, tx, Duration::from_millis(10)).await
        });

        let mut ws = accept(&listener).await;
        handshake(&mut ws, 60_000).await;
        send_json(
            &mut ws,
            json!({ "op": 0, "s": 1, "t": "READY", "d": { "user": { "id": "77" } } }),
        )
        .await;

        let result = tokio::time::timeout(Duration::from_secs(5), client)
            .await
            .expect("gateway kept running without a receiver")
            .unwrap();
        assert!(result.is_ok());
    }
}
