//! Event routing
//!
//! Decoded feed events are fanned out to the per-channel subscriptions the
//! leg handles created. Call-start events go to the dispatcher instead.

use crate::domain::call::{CallStart, LegEvent, LegEventKind, LegState};
use crate::domain::shared::value_objects::LegId;
use crate::domain::signaling::Subscription;
use crate::infrastructure::ari::model::AriEvent;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Destroyed channels remembered for late subscribers
const RECENTLY_DESTROYED: usize = 1024;

type Subscribers = Vec<(LegEventKind, mpsc::UnboundedSender<LegEvent>)>;

#[derive(Default)]
struct Routes {
    subscriptions: HashMap<LegId, Subscribers>,
    destroyed: VecDeque<LegId>,
}

impl Routes {
    fn remember_destroyed(&mut self, leg: LegId) {
        if self.destroyed.len() == RECENTLY_DESTROYED {
            self.destroyed.pop_front();
        }
        self.destroyed.push_back(leg);
    }

    fn prune(&mut self) {
        self.subscriptions.retain(|_, subscribers| {
            subscribers.retain(|(_, tx)| !tx.is_closed());
            !subscribers.is_empty()
        });
    }
}

pub struct EventRouter {
    routes: Mutex<Routes>,
    calls: Mutex<Option<mpsc::UnboundedSender<CallStart>>>,
    /// Only call-starts of this application are dispatched
    application: Option<String>,
}

impl EventRouter {
    pub fn new(calls: mpsc::UnboundedSender<CallStart>) -> Self {
        Self {
            routes: Mutex::new(Routes::default()),
            calls: Mutex::new(Some(calls)),
            application: None,
        }
    }

    /// Dispatch call-starts of `application` only. Outbound legs entering
    /// their own application are not new calls.
    pub fn accept_calls_for(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    fn routes(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Subscribe to one kind of event of a channel. A channel destroyed
    /// recently gets a subscription that yields its final event and ends.
    pub fn subscribe(&self, leg: &LegId, kind: LegEventKind) -> Subscription {
        let (tx, subscription) = Subscription::channel(kind);
        let mut routes = self.routes();

        if routes.destroyed.contains(leg) {
            let last = match kind {
                LegEventKind::StateChange => {
                    LegEvent::state_changed(leg.clone(), Some(LegState::Down))
                }
                LegEventKind::Teardown => LegEvent::teardown(leg.clone(), None),
            };
            let _ = tx.send(last);
            trace!("Subscription to destroyed channel {} ends immediately", leg);
            return subscription;
        }

        routes.prune();
        routes.subscriptions.entry(leg.clone()).or_default().push((kind, tx));
        subscription
    }

    /// Live subscriptions of a channel
    pub fn subscription_count(&self, leg: &LegId) -> usize {
        self.routes()
            .subscriptions
            .get(leg)
            .map(|subs| subs.iter().filter(|(_, tx)| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Channels with at least one subscription entry
    pub fn tracked_channels(&self) -> usize {
        self.routes().subscriptions.len()
    }

    pub fn route(&self, event: AriEvent) {
        match event {
            AriEvent::StasisStart {
                channel,
                args,
                application,
            } => {
                if let Some(ours) = &self.application {
                    if *ours != application {
                        trace!("Channel {} entered {}, not a new call", channel.id, application);
                        return;
                    }
                }
                let start = CallStart::new(LegId::new(channel.id), channel.caller.number, args)
                    .with_application(application);
                debug!("Call-start on {} with args {:?}", start.leg, start.args);

                let calls = self.calls.lock().unwrap_or_else(|p| p.into_inner());
                let delivered = match calls.as_ref() {
                    Some(tx) => tx.send(start).is_ok(),
                    None => false,
                };
                if !delivered {
                    warn!("Call-start dropped, nobody is dispatching");
                }
            }
            AriEvent::ChannelStateChange { channel } => {
                let leg = LegId::new(channel.id.as_str());
                let state = channel.leg_state();
                self.publish(&leg, LegEvent::state_changed(leg.clone(), Some(state)));
            }
            AriEvent::ChannelHangupRequest { channel, cause } => {
                let leg = LegId::new(channel.id);
                self.publish(&leg, LegEvent::teardown(leg.clone(), cause.map(|c| c.to_string())));
            }
            AriEvent::ChannelDestroyed {
                channel, cause_txt, ..
            } => {
                let leg = LegId::new(channel.id);
                self.publish(&leg, LegEvent::state_changed(leg.clone(), Some(LegState::Down)));
                self.publish(&leg, LegEvent::teardown(leg.clone(), cause_txt));
                // dropping the senders ends every subscription of the channel
                let mut routes = self.routes();
                if routes.subscriptions.remove(&leg).is_some() {
                    debug!("Closed subscriptions of destroyed channel {}", leg);
                }
                routes.remember_destroyed(leg);
            }
            AriEvent::StasisEnd { channel } => trace!("Channel {} left the application", channel.id),
            AriEvent::Unknown => trace!("Ignoring unhandled event"),
        }
    }

    fn publish(&self, leg: &LegId, event: LegEvent) {
        let kind = event.kind();
        let mut routes = self.routes();
        let Some(subscribers) = routes.subscriptions.get_mut(leg) else {
            trace!("No subscribers for {}", leg);
            return;
        };

        subscribers.retain(|(_, tx)| !tx.is_closed());
        for (_, tx) in subscribers.iter().filter(|(k, _)| *k == kind) {
            let _ = tx.send(event.clone());
        }
        if subscribers.is_empty() {
            routes.subscriptions.remove(leg);
        }
    }

    /// The feed is gone: end every subscription and the call-start stream
    pub fn close(&self) {
        self.routes().subscriptions.clear();
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).take();
    }
}
