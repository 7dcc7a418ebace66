// src/notification_hub.rs

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use actix::prelude::*;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Role;

/// Event names pushed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    NewOrder,
    OrderUpdate,
    UpdateOrderStatus,
    NewPayment,
    UpdatePaymentStatusProof,
    UpdatePaymentStatus,
    NewFeedback,
    NewMessage,
    MachineUpdate,
    /// The client missed events the hub no longer holds and must reload.
    Resync,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::NewOrder => "new-order",
            EventKind::OrderUpdate => "order-update",
            EventKind::UpdateOrderStatus => "update-order-status",
            EventKind::NewPayment => "new-payment",
            EventKind::UpdatePaymentStatusProof => "update-payment-status-proof",
            EventKind::UpdatePaymentStatus => "update-payment-status",
            EventKind::NewFeedback => "new-feedback",
            EventKind::NewMessage => "new-message",
            EventKind::MachineUpdate => "machine-update",
            EventKind::Resync => "resync",
        }
    }
}

/// Channels without sessions drop their backlog after this long.
const IDLE_BACKLOG_TTL: Duration = Duration::from_secs(15 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Per-user channel name, e.g. `admin-<id>` or `customer-<id>`.
pub fn channel_for(role: Role, id: &str) -> String {
    format!("{}-{}", role.as_str(), id)
}

#[derive(Message, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[rtype(result = "()")]
pub struct Envelope {
    pub channel: String,
    /// Identifies the hub instance that numbered `seq`; changes on restart.
    pub epoch: String,
    /// Increases by one per event on a channel.
    pub seq: u64,
    pub event: EventKind,
    pub payload: serde_json::Value,
    pub sent_at: DateTime<Utc>,
}

#[derive(Message)]
#[rtype(result = "u64")]
pub struct Publish {
    pub channel: String,
    pub event: EventKind,
    pub payload: serde_json::Value,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Subscribe {
    pub session_id: String,
    pub channel: String,
    /// Epoch of the last envelope the client saw.
    pub epoch: Option<String>,
    /// Last seq the client saw; retained envelopes after it are replayed.
    pub since: Option<u64>,
    pub addr: Recipient<Envelope>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Unsubscribe {
    pub session_id: String,
    pub channel: String,
}

struct ChannelState {
    last_seq: u64,
    backlog: VecDeque<Envelope>,
    sessions: HashMap<String, Recipient<Envelope>>,
    last_active: Instant,
}

impl Default for ChannelState {
    fn default() -> Self {
        ChannelState {
            last_seq: 0,
            backlog: VecDeque::new(),
            sessions: HashMap::new(),
            last_active: Instant::now(),
        }
    }
}

impl ChannelState {
    /// Envelopes to send a client reconnecting after `since`, or `None` when
    /// the backlog can no longer cover the gap.
    fn replay_after(&self, since: u64) -> Option<Vec<Envelope>> {
        if since > self.last_seq {
            return None;
        }
        if since == self.last_seq {
            return Some(Vec::new());
        }
        match self.backlog.front() {
            Some(oldest) if oldest.seq <= since + 1 => Some(
                self.backlog
                    .iter()
                    .filter(|e| e.seq > since)
                    .cloned()
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// Fans events out to WebSocket sessions subscribed per user channel.
///
/// Channel state lives only in memory. A channel's `last_seq` is kept for
/// the life of the hub so numbering never restarts within an epoch; its
/// backlog is dropped once the channel has been idle for a while.
pub struct NotificationHub {
    epoch: String,
    channels: HashMap<String, ChannelState>,
    backlog_limit: usize,
}

impl NotificationHub {
    pub fn new(backlog_limit: usize) -> Self {
        NotificationHub {
            epoch: Uuid::new_v4().to_string(),
            channels: HashMap::new(),
            backlog_limit: backlog_limit.max(1),
        }
    }

    pub fn epoch(&self) -> &str {
        &self.epoch
    }

    /// Drops the backlog of channels with no sessions and no activity since
    /// `now - IDLE_BACKLOG_TTL`. Returns how many backlogs were dropped.
    fn sweep_idle(&mut self, now: Instant) -> usize {
        let mut dropped = 0;
        for state in self.channels.values_mut() {
            if state.sessions.is_empty()
                && !state.backlog.is_empty()
                && now.duration_since(state.last_active) >= IDLE_BACKLOG_TTL
            {
                state.backlog = VecDeque::new();
                dropped += 1;
            }
        }
        dropped
    }
}

impl Actor for NotificationHub {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Notification hub started (epoch {})", self.epoch);
        ctx.run_interval(SWEEP_INTERVAL, |act, _| {
            let dropped = act.sweep_idle(Instant::now());
            if dropped > 0 {
                debug!("Dropped {} idle channel backlog(s)", dropped);
            }
        });
    }
}

impl Handler<Publish> for NotificationHub {
    type Result = MessageResult<Publish>;

    fn handle(&mut self, msg: Publish, _: &mut Context<Self>) -> Self::Result {
        let state = self.channels.entry(msg.channel.clone()).or_default();
        state.last_seq += 1;
        state.last_active = Instant::now();

        let envelope = Envelope {
            channel: msg.channel,
            epoch: self.epoch.clone(),
            seq: state.last_seq,
            event: msg.event,
            payload: msg.payload,
            sent_at: Utc::now(),
        };

        for addr in state.sessions.values() {
            addr.do_send(envelope.clone());
        }
        debug!(
            "Published {} #{} on {} to {} session(s)",
            envelope.event.as_str(),
            envelope.seq,
            envelope.channel,
            state.sessions.len()
        );

        state.backlog.push_back(envelope);
        while state.backlog.len() > self.backlog_limit {
            state.backlog.pop_front();
        }
        MessageResult(state.last_seq)
    }
}

impl Handler<Subscribe> for NotificationHub {
    type Result = ();

    fn handle(&mut self, msg: Subscribe, _: &mut Context<Self>) {
        info!("Session {} subscribed to {}", msg.session_id, msg.channel);
        let same_epoch = msg.epoch.as_deref() == Some(self.epoch.as_str());
        let state = self.channels.entry(msg.channel.clone()).or_default();
        state.last_active = Instant::now();

        if let Some(since) = msg.since {
            // A cursor from another epoch counts positions the hub no longer knows.
            let missed = if same_epoch { state.replay_after(since) } else { None };
            match missed {
                Some(missed) => {
                    for envelope in missed {
                        msg.addr.do_send(envelope);
                    }
                }
                None => {
                    info!(
                        "Session {} asked for {} after #{} (epoch {:?}); cannot replay, requesting resync",
                        msg.session_id, msg.channel, since, msg.epoch
                    );
                    msg.addr.do_send(Envelope {
                        channel: msg.channel.clone(),
                        epoch: self.epoch.clone(),
                        seq: state.last_seq,
                        event: EventKind::Resync,
                        payload: serde_json::json!({ "last_seq": state.last_seq }),
                        sent_at: Utc::now(),
                    });
                }
            }
        }

        state.sessions.insert(msg.session_id, msg.addr);
    }
}

impl Handler<Unsubscribe> for NotificationHub {
    type Result = ();

    fn handle(&mut self, msg: Unsubscribe, _: &mut Context<Self>) {
        info!("Session {} left {}", msg.session_id, msg.channel);
        if let Some(state) = self.channels.get_mut(&msg.channel) {
            state.sessions.remove(&msg.session_id);
            state.last_active = Instant::now();
        }
    }
}
