//! Rule table: every installed match rule, kept sorted by owning endpoint so
//! a full scan can skip an endpoint's whole group in O(log n) via
//! `partition_point` instead of visiting each rule individually.

use parking_lot::{RwLock, RwLockReadGuard};

use crate::endpoint::EndpointId;
use crate::rule::Rule;

#[derive(Default)]
pub struct RuleTable {
    rules: RwLock<Vec<(EndpointId, Rule)>>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&self, endpoint: EndpointId, rule: Rule) {
        let mut rules = self.rules.write();
        let insert_at = rules.partition_point(|(id, _)| *id <= endpoint);
        rules.insert(insert_at, (endpoint, rule));
    }

    /// Removes the first rule equal to `rule` owned by `endpoint`. Returns
    /// whether one was found.
    pub fn remove_rule(&self, endpoint: EndpointId, rule: &Rule) -> bool {
        let mut rules = self.rules.write();
        let start = rules.partition_point(|(id, _)| *id < endpoint);
        let end = rules.partition_point(|(id, _)| *id <= endpoint);

        for index in start..end {
            if rules[index].1 == *rule {
                rules.remove(index);
                return true;
            }
        }

        false
    }

    /// Removes every rule owned by `endpoint`, e.g. on disconnect.
    pub fn remove_all(&self, endpoint: EndpointId) {
        self.rules.write().retain(|(id, _)| *id != endpoint);
    }

    pub fn lock(&self) -> RwLockReadGuard<'_, Vec<(EndpointId, Rule)>> {
        self.rules.read()
    }

    /// Advances past the contiguous group belonging to the endpoint at
    /// `rules[idx]`, via binary search rather than a linear walk.
    pub fn skip_endpoint(rules: &[(EndpointId, Rule)], idx: usize) -> usize {
        let endpoint = rules[idx].0;
        idx + rules[idx..].partition_point(|(id, _)| *id == endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, MessageType};
    use crate::rule::parse_rule;

    fn id(index: u32) -> EndpointId {
        // EndpointId's fields are private; round-trip through a registry
        // in router-level tests. Here we only need distinct orderable
        // values, so drive everything through the real registry instead.
        let registry = crate::endpoint::EndpointRegistry::new();
        for _ in 0..index {
            let placeholder = registry.insert(crate::endpoint::Endpoint::new(
                crate::endpoint::EndpointKind::Local,
                true,
                Default::default(),
                Box::new(NullSink),
            ));
            registry.remove(placeholder);
        }
        registry.insert(crate::endpoint::Endpoint::new(
            crate::endpoint::EndpointKind::Local,
            true,
            Default::default(),
            Box::new(NullSink),
        ))
    }

    struct NullSink;
    impl crate::endpoint::EndpointSink for NullSink {
        fn push(&self, _message: &Message) -> Result<(), crate::Error> {
            Ok(())
        }
    }

    #[test]
    fn skip_endpoint_advances_past_whole_group() {
        let table = RuleTable::new();
        let a = id(0);
        let b = id(0);

        table.add_rule(a, parse_rule("member='One'").unwrap());
        table.add_rule(a, parse_rule("member='Two'").unwrap());
        table.add_rule(b, parse_rule("member='Three'").unwrap());

        let rules = table.lock();
        let next = RuleTable::skip_endpoint(&rules, 0);
        assert_eq!(next, 2);
        assert_eq!(rules[next].0, b);
    }

    #[test]
    fn remove_rule_only_removes_matching_owner_and_rule() {
        let table = RuleTable::new();
        let a = id(0);
        let rule = parse_rule("member='Ping'").unwrap();

        table.add_rule(a, rule.clone());
        assert!(table.remove_rule(a, &rule));
        assert!(!table.remove_rule(a, &rule));
    }

    #[test]
    fn rule_matching_respects_type_wildcard() {
        let rule = parse_rule("interface='com.example.Foo'").unwrap();
        let message = Message {
            r#type: MessageType::MethodCall,
            flags: Default::default(),
            sender: ":1.0".to_string(),
            destination: ":1.1".to_string(),
            session_id: 0,
            interface: "com.example.Foo".to_string(),
            member: "DoThing".to_string(),
            path: "/".to_string(),
            call_serial: 1,
        };

        assert!(rule.matches(&message));
    }
}
