//! Client-side order state fed by hub envelopes.
//!
//! One reconciler for every view that shows orders: envelopes are merged by
//! order id, a lower `version` never overwrites a higher one, and holes in
//! the channel sequence are reported so the caller can reload from the REST
//! API and reconnect with [`OrderFeed::epoch`] and [`OrderFeed::since`].
//! Sequence numbers are only comparable within one hub epoch; a new epoch
//! means the server restarted and the feed must be reloaded.

use std::collections::HashMap;

use log::debug;

use crate::models::Order;
use crate::notification_hub::{Envelope, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Updated,
    /// The feed already holds the same or a newer version of the order.
    Stale,
    /// The envelope's seq was already processed.
    Duplicate,
    /// Not an order event, or an unreadable payload.
    Ignored,
    /// The hub could not replay what was missed; reload everything.
    Resync,
}

#[derive(Debug, Default)]
pub struct OrderFeed {
    orders: HashMap<String, Order>,
    epoch: Option<String>,
    last_seq: Option<u64>,
    needs_backfill: bool,
}

fn carries_order(event: EventKind) -> bool {
    matches!(
        event,
        EventKind::NewOrder
            | EventKind::OrderUpdate
            | EventKind::UpdateOrderStatus
            | EventKind::NewPayment
            | EventKind::UpdatePaymentStatusProof
            | EventKind::UpdatePaymentStatus
    )
}

impl OrderFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets from an authoritative listing. `seq` is the channel position
    /// the listing corresponds to, if known.
    pub fn replace_all(&mut self, orders: Vec<Order>, seq: Option<u64>) {
        self.orders = orders.into_iter().map(|o| (o.id.clone(), o)).collect();
        if seq.is_some() {
            self.last_seq = seq;
        }
        self.needs_backfill = false;
    }

    pub fn apply(&mut self, envelope: &Envelope) -> Applied {
        if self.epoch.as_deref() != Some(envelope.epoch.as_str()) {
            if self.epoch.is_some() {
                debug!("Hub epoch changed on {}, reload required", envelope.channel);
                self.needs_backfill = true;
                self.last_seq = None;
            }
            self.epoch = Some(envelope.epoch.clone());
        }

        if envelope.event == EventKind::Resync {
            self.last_seq = Some(envelope.seq);
            self.needs_backfill = true;
            return Applied::Resync;
        }

        if let Some(last) = self.last_seq {
            if envelope.seq <= last {
                return Applied::Duplicate;
            }
            if envelope.seq > last + 1 {
                debug!(
                    "Gap on {}: expected #{}, got #{}",
                    envelope.channel,
                    last + 1,
                    envelope.seq
                );
                self.needs_backfill = true;
            }
        }
        self.last_seq = Some(envelope.seq);

        if !carries_order(envelope.event) {
            return Applied::Ignored;
        }
        let incoming: Order = match serde_json::from_value(envelope.payload.clone()) {
            Ok(order) => order,
            Err(e) => {
                debug!("Unreadable order payload in #{}: {}", envelope.seq, e);
                return Applied::Ignored;
            }
        };

        match self.orders.get(&incoming.id) {
            Some(current) if current.version >= incoming.version => Applied::Stale,
            Some(_) => {
                self.orders.insert(incoming.id.clone(), incoming);
                Applied::Updated
            }
            None => {
                self.orders.insert(incoming.id.clone(), incoming);
                Applied::Inserted
            }
        }
    }

    /// Epoch to pass alongside `since` when reconnecting.
    pub fn epoch(&self) -> Option<&str> {
        self.epoch.as_deref()
    }

    /// Seq to pass as `since` when reconnecting.
    pub fn since(&self) -> Option<u64> {
        self.last_seq
    }

    pub fn needs_backfill(&self) -> bool {
        self.needs_backfill
    }

    pub fn get(&self, order_id: &str) -> Option<&Order> {
        self.orders.get(order_id)
    }

    /// Newest first.
    pub fn orders(&self) -> Vec<&Order> {
        let mut orders: Vec<&Order> = self.orders.values().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }
}
