//! Background ↔ UI round trip over an in-memory port.
//!
//! The background process owns three controllers behind restricted views.
//! The UI process reaches them only through its port, scoped by the
//! capability the background grants it.

use anyhow::{bail, ensure, Context, Result};
use bytes::Bytes;
use relay_bus::{Capability, MessageBus};
use relay_port::{
    ChunkCodec, MemoryPort, PortTransport, TransportConfig, TransportError, DEFAULT_BUFFER_SIZE,
};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

const SELECTED: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
const WAIT: Duration = Duration::from_secs(10);

fn none() -> Vec<&'static str> {
    Vec::new()
}

/// What the UI observed.
#[derive(Debug)]
pub struct Report {
    pub chain_id: Value,
    pub accounts: Value,
    pub refused_code: String,
    pub event: Value,
    pub snapshot_bytes: usize,
    pub snapshot_frames: usize,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Network:getChainId  -> {}", self.chain_id)?;
        writeln!(f, "Accounts:list       -> {}", self.accounts)?;
        writeln!(f, "Keyring:exportKey   -> refused ({})", self.refused_code)?;
        writeln!(f, "Accounts:changed    <- {}", self.event)?;
        write!(
            f,
            "state snapshot      <- {} bytes in {} frame(s)",
            self.snapshot_bytes, self.snapshot_frames
        )
    }
}

/// Wires both processes, exercises every envelope kind, then closes.
pub async fn run(config: TransportConfig, snapshot_size: usize) -> Result<Report> {
    let (bg_port, ui_port) = MemoryPort::pair(config.max_message_size, DEFAULT_BUFFER_SIZE);

    let background = MessageBus::new();
    let accounts = background.get_restricted("Accounts", none(), none())?;
    accounts.register_action_handler("Accounts:list", |_| async { Ok(json!([SELECTED])) })?;
    let network = background.get_restricted("Network", none(), none())?;
    network.register_action_handler("Network:getChainId", |_| async { Ok(json!("0x1")) })?;
    let keyring = background.get_restricted("Keyring", none(), none())?;
    keyring.register_action_handler("Keyring:exportKey", |_| async { Ok(json!("redacted")) })?;

    let ui_may = Capability::new("Ui", ["Accounts:list", "Network:getChainId"], none())?;
    let (bg, _) = PortTransport::new(bg_port, background.clone(), ui_may, config.clone())?;

    let ui_bus = MessageBus::new();
    let bg_may = Capability::new("Background", none(), ["Accounts:changed"])?;
    let (ui, mut snapshots) = PortTransport::new(ui_port, ui_bus.clone(), bg_may, config.clone())?;
    ui.on_disconnect(|reason| info!(?reason, "UI port disconnected"));

    bg.open()?;
    ui.open()?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    ui_bus.subscribe("Accounts:changed".parse()?, move |payload| {
        event_tx
            .send(payload.clone())
            .map_err(|e| e.to_string().into())
    });
    bg.forward_event("Accounts:changed".parse()?)?;

    let chain_id = ui.call(&"Network:getChainId".parse()?, Value::Null).await?;
    let accounts_list = ui.call(&"Accounts:list".parse()?, Value::Null).await?;
    let refused_code = match ui.call(&"Keyring:exportKey".parse()?, Value::Null).await {
        Err(TransportError::Remote { code, .. }) => code,
        Err(other) => return Err(other.into()),
        Ok(_) => bail!("Keyring:exportKey answered outside the UI capability"),
    };

    accounts.publish("Accounts:changed", json!({ "selected": SELECTED }))?;
    let event = tokio::time::timeout(WAIT, event_rx.recv())
        .await?
        .context("UI event channel closed")?;

    let snapshot = build_snapshot(snapshot_size)?;
    let snapshot_frames = ChunkCodec::new(config.max_frame_payload())?.frame_count(snapshot.len());
    let sent = bg.send_snapshot(snapshot.clone()).await?;
    let received = tokio::time::timeout(WAIT, snapshots.recv())
        .await?
        .context("UI snapshot channel closed")?;
    ensure!(
        received.message_id == sent && received.data == snapshot,
        "snapshot changed in transit"
    );

    ui.close().await;
    bg.close().await;

    Ok(Report {
        chain_id,
        accounts: accounts_list,
        refused_code,
        event,
        snapshot_bytes: snapshot.len(),
        snapshot_frames,
    })
}

/// A JSON state document padded to roughly `size` bytes.
fn build_snapshot(size: usize) -> Result<Bytes> {
    let state = json!({
        "selectedAddress": SELECTED,
        "chainId": "0x1",
        "padding": "0".repeat(size),
    });
    Ok(Bytes::from(serde_json::to_vec(&state)?))
}
