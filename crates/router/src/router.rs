//! PushMessage dispatch: the four delivery paths (unicast, global broadcast,
//! rule-matched broadcast, session multicast) plus the remote-message
//! policy gate, grounded on `crates/service/src/forwarding.rs`'s
//! dispatch-by-lookup style.

use std::sync::Arc;

use log::{debug, warn};

use crate::endpoint::{Endpoint, EndpointId, EndpointKind, EndpointRegistry};
use crate::message::{Message, MessageFlags, MessageType};
use crate::name_table::NameTable;
use crate::rule_table::RuleTable;
use crate::session_cast::SessionCastTable;

const ERROR_SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
const ERROR_BLOCKED: &str = "org.alljoyn.Bus.Blocked";

pub struct Router {
    pub names: Arc<NameTable>,
    pub rules: Arc<RuleTable>,
    pub sessions: Arc<SessionCastTable>,
    pub endpoints: Arc<EndpointRegistry>,
}

impl Router {
    pub fn new(
        names: Arc<NameTable>,
        rules: Arc<RuleTable>,
        sessions: Arc<SessionCastTable>,
        endpoints: Arc<EndpointRegistry>,
    ) -> Self {
        Self {
            names,
            rules,
            sessions,
            endpoints,
        }
    }

    pub fn push_message(&self, sender: EndpointId, message: Message) {
        if !message.destination.is_empty() {
            self.unicast(sender, message);
        } else if message.session_id != 0 {
            self.session_multicast(sender, message);
        } else if message.flags.global_broadcast {
            self.global_broadcast(sender, message);
        } else {
            self.rule_broadcast(sender, message);
        }
    }

    fn unicast(&self, sender: EndpointId, message: Message) {
        let Some(sender_ep) = self.endpoints.get(sender) else {
            return;
        };

        let Some(dest_id) = self.names.find_endpoint(&message.destination) else {
            self.unicast_miss(&sender_ep, message);
            return;
        };

        let Some(dest_ep) = self.endpoints.get(dest_id) else {
            self.unicast_miss(&sender_ep, message);
            return;
        };

        if !remote_policy_allows(&sender_ep, &dest_ep) {
            self.deliver_blocked_reply(&sender_ep, &message);
            return;
        }

        if dest_ep.kind == EndpointKind::Virtual
            && message.reply_expected()
            && !sender_ep.allow_remote_messages
        {
            self.deliver_blocked_reply(&sender_ep, &message);
            return;
        }

        self.deliver(dest_id, &dest_ep, &message);
    }

    /// Destination name has no current owner.
    fn unicast_miss(&self, sender_ep: &Endpoint, message: Message) {
        let sender_is_auto_start_eligible =
            sender_ep.kind != EndpointKind::BusToBus && sender_ep.kind != EndpointKind::Null;

        if message.flags.auto_start && sender_is_auto_start_eligible {
            debug!(
                "service launch requested for unknown name {:?} (launcher out of scope)",
                message.destination
            );
            return;
        }

        if message.reply_expected() {
            self.deliver_error(sender_ep, &message, ERROR_SERVICE_UNKNOWN);
        }
    }

    fn global_broadcast(&self, sender: EndpointId, message: Message) {
        self.dispatch_rule_matches(sender, &message, false);

        for dest_id in self.endpoints.kind_ids(EndpointKind::BusToBus) {
            if dest_id == sender {
                continue;
            }

            if let Some(dest_ep) = self.endpoints.get(dest_id) {
                self.deliver(dest_id, &dest_ep, &message);
            }
        }
    }

    fn rule_broadcast(&self, sender: EndpointId, message: Message) {
        self.dispatch_rule_matches(sender, &message, true);
    }

    fn dispatch_rule_matches(&self, sender: EndpointId, message: &Message, gate_remote: bool) {
        let Some(sender_ep) = self.endpoints.get(sender) else {
            return;
        };

        let rules = self.rules.lock();
        let mut idx = 0;

        while idx < rules.len() {
            let (dest_id, rule) = &rules[idx];

            if *dest_id == sender || !rule.matches(message) {
                idx += 1;
                continue;
            }

            if let Some(dest_ep) = self.endpoints.get(*dest_id) {
                if !gate_remote || remote_policy_allows(&sender_ep, &dest_ep) {
                    self.deliver(*dest_id, &dest_ep, message);
                }
            }

            idx = RuleTable::skip_endpoint(&rules, idx);
        }
    }

    fn session_multicast(&self, sender: EndpointId, message: Message) {
        for dest_id in self.sessions.destinations(message.session_id, sender) {
            if let Some(dest_ep) = self.endpoints.get(dest_id) {
                self.deliver(dest_id, &dest_ep, &message);
            }
        }
    }

    fn deliver(&self, dest_id: EndpointId, dest_ep: &Endpoint, message: &Message) {
        let reservation = matches!(
            dest_ep.kind,
            EndpointKind::RemoteClient | EndpointKind::BusToBus
        )
        .then(|| self.endpoints.reserve(dest_id))
        .flatten();

        if let Err(err) = dest_ep.push(message) {
            warn!("delivery to endpoint failed: {err}");
        }

        drop(reservation);
    }

    fn deliver_error(&self, sender_ep: &Endpoint, message: &Message, error_name: &str) {
        let reply = error_reply(message, error_name);

        if let Err(err) = sender_ep.push(&reply) {
            warn!("error reply delivery failed: {err}");
        }
    }

    fn deliver_blocked_reply(&self, sender_ep: &Endpoint, message: &Message) {
        if message.reply_expected() {
            self.deliver_error(sender_ep, message, ERROR_BLOCKED);
        }
    }
}

fn remote_policy_allows(sender_ep: &Endpoint, dest_ep: &Endpoint) -> bool {
    !(sender_ep.features.is_bus_to_bus && !dest_ep.allow_remote_messages)
}

fn error_reply(message: &Message, error_name: &str) -> Message {
    Message {
        r#type: MessageType::Error,
        flags: MessageFlags::default(),
        sender: String::new(),
        destination: message.sender.clone(),
        session_id: 0,
        interface: error_name.to_string(),
        member: String::new(),
        path: String::new(),
        call_serial: message.call_serial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Endpoint, EndpointFeatures, EndpointSink};
    use crate::rule::parse_rule;
    use parking_lot::Mutex;

    struct CapturingSink {
        received: Arc<Mutex<Vec<Message>>>,
    }

    impl EndpointSink for CapturingSink {
        fn push(&self, message: &Message) -> Result<(), crate::Error> {
            self.received.lock().push(message.clone());
            Ok(())
        }
    }

    fn router() -> Router {
        Router::new(
            Arc::new(NameTable::new(1)),
            Arc::new(RuleTable::new()),
            Arc::new(SessionCastTable::new()),
            Arc::new(EndpointRegistry::new()),
        )
    }

    fn add_endpoint(
        router: &Router,
        kind: EndpointKind,
        allow_remote: bool,
        features: EndpointFeatures,
    ) -> (EndpointId, Arc<Mutex<Vec<Message>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let id = router.endpoints.insert(Endpoint::new(
            kind,
            allow_remote,
            features,
            Box::new(CapturingSink {
                received: received.clone(),
            }),
        ));
        (id, received)
    }

    fn method_call(sender: &str, destination: &str, serial: u32) -> Message {
        Message {
            r#type: MessageType::MethodCall,
            flags: MessageFlags::default(),
            sender: sender.to_string(),
            destination: destination.to_string(),
            session_id: 0,
            interface: "com.example.Foo".to_string(),
            member: "DoThing".to_string(),
            path: "/".to_string(),
            call_serial: serial,
        }
    }

    #[test]
    fn scenario_1_unicast_happy_path() {
        let router = router();
        let (sender_id, _) = add_endpoint(&router, EndpointKind::Local, true, Default::default());
        let (dest_id, dest_received) =
            add_endpoint(&router, EndpointKind::Local, true, Default::default());

        router.names.add_unique(":1.0".to_string(), sender_id);
        router.names.add_unique(":1.1".to_string(), dest_id);

        let message = method_call(":1.0", ":1.1", 42);
        router.push_message(sender_id, message);

        let received = dest_received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].call_serial, 42);
    }

    #[test]
    fn scenario_2_unknown_destination_synthesizes_service_unknown() {
        let router = router();
        let (sender_id, sender_received) =
            add_endpoint(&router, EndpointKind::Local, true, Default::default());
        router.names.add_unique(":1.0".to_string(), sender_id);

        let message = method_call(":1.0", ":1.99", 7);
        router.push_message(sender_id, message);

        let received = sender_received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].r#type, MessageType::Error);
        assert_eq!(received[0].interface, ERROR_SERVICE_UNKNOWN);
        assert_eq!(received[0].call_serial, 7);
    }

    #[test]
    fn scenario_4_rule_broadcast_honors_remote_policy() {
        let router = router();
        let features = EndpointFeatures {
            is_bus_to_bus: true,
            ..Default::default()
        };
        let (sender_id, _) = add_endpoint(&router, EndpointKind::BusToBus, true, features);
        let (dest_id, dest_received) =
            add_endpoint(&router, EndpointKind::Local, false, Default::default());

        router
            .rules
            .add_rule(dest_id, parse_rule("interface='com.example.Foo'").unwrap());

        let message = Message {
            r#type: MessageType::Signal,
            flags: MessageFlags::default(),
            sender: ":2.0".to_string(),
            destination: String::new(),
            session_id: 0,
            interface: "com.example.Foo".to_string(),
            member: "Ping".to_string(),
            path: "/".to_string(),
            call_serial: 1,
        };

        router.push_message(sender_id, message);

        assert!(dest_received.lock().is_empty());
    }

    #[test]
    fn scenario_5_session_multicast_delivers_once() {
        let router = router();
        let (a, _) = add_endpoint(&router, EndpointKind::Virtual, true, Default::default());
        let (b, b_received) = add_endpoint(&router, EndpointKind::Virtual, true, Default::default());

        router.sessions.establish_session(99, a, b, None, None);

        let message = Message {
            r#type: MessageType::Signal,
            flags: MessageFlags::default(),
            sender: ":1.0".to_string(),
            destination: String::new(),
            session_id: 99,
            interface: "com.example.Stream".to_string(),
            member: "Data".to_string(),
            path: "/".to_string(),
            call_serial: 1,
        };

        router.push_message(a, message);

        assert_eq!(b_received.lock().len(), 1);
    }
}
