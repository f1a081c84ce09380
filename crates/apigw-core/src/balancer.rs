//! Round-robin instance selection.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::registry::ServiceInstance;

/// Round-robin over the healthy instances of each service.
///
/// Every service owns its own cursor behind its own mutex, so selections for
/// different services never contend. The cursor is an index into whatever
/// healthy list the caller passes in: when instances join, leave or change
/// health between calls, the next pick is taken modulo the new length and
/// may skip or repeat an instance once. Selection does not track instance
/// identity.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    cursors: DashMap<String, Arc<Mutex<usize>>>,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Picks the next healthy instance of `service_name`.
    ///
    /// Returns `None` when no instance is healthy; the cursor is left alone
    /// in that case.
    pub fn select(
        &self,
        service_name: &str,
        instances: &[ServiceInstance],
    ) -> Option<ServiceInstance> {
        let healthy: Vec<&ServiceInstance> = instances.iter().filter(|i| i.healthy).collect();
        if healthy.is_empty() {
            return None;
        }

        let cursor = self.cursor(service_name);
        let index = {
            let mut next = cursor.lock();
            let index = *next % healthy.len();
            *next = (index + 1) % healthy.len();
            index
        };

        let selected = healthy[index];
        trace!(
            service = service_name,
            index,
            healthy = healthy.len(),
            addr = %selected.authority(),
            "Selected instance"
        );
        Some(selected.clone())
    }

    /// Current cursor of `service_name`, if it has been selected from before.
    pub fn cursor_position(&self, service_name: &str) -> Option<usize> {
        self.cursors.get(service_name).map(|c| *c.lock())
    }

    fn cursor(&self, service_name: &str) -> Arc<Mutex<usize>> {
        if let Some(cursor) = self.cursors.get(service_name) {
            return Arc::clone(cursor.value());
        }
        Arc::clone(
            self.cursors
                .entry(service_name.to_string())
                .or_default()
                .value(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn instances(hosts: &[(&str, bool)]) -> Vec<ServiceInstance> {
        hosts
            .iter()
            .map(|(host, healthy)| ServiceInstance::new("orders", *host, 8080).with_healthy(*healthy))
            .collect()
    }

    fn pick(lb: &RoundRobinBalancer, list: &[ServiceInstance]) -> String {
        lb.select("orders", list).unwrap().host
    }

    #[test]
    fn test_unhealthy_instances_are_skipped() {
        let lb = RoundRobinBalancer::new();
        let list = instances(&[("A", true), ("B", false), ("C", true)]);

        assert_eq!(pick(&lb, &list), "A");
        assert_eq!(pick(&lb, &list), "C");
        assert_eq!(pick(&lb, &list), "A");
    }

    #[test]
    fn test_each_instance_visited_once_per_cycle() {
        let lb = RoundRobinBalancer::new();
        let list = instances(&[("A", true), ("B", true), ("C", true), ("D", true)]);

        // Start mid-rotation.
        pick(&lb, &list);

        let cycle: Vec<String> = (0..list.len()).map(|_| pick(&lb, &list)).collect();
        assert_eq!(cycle, vec!["B", "C", "D", "A"]);
        let distinct: HashSet<_> = cycle.iter().collect();
        assert_eq!(distinct.len(), list.len());
    }

    #[test]
    fn test_no_healthy_instance() {
        let lb = RoundRobinBalancer::new();
        let down = instances(&[("A", false), ("B", false)]);

        for _ in 0..3 {
            assert!(lb.select("orders", &down).is_none());
        }
        assert!(lb.select("orders", &[]).is_none());

        let recovered = instances(&[("A", false), ("B", true)]);
        assert_eq!(pick(&lb, &recovered), "B");
    }

    #[test]
    fn test_cursor_wraps_when_list_shrinks() {
        let lb = RoundRobinBalancer::new();
        let three = instances(&[("A", true), ("B", true), ("C", true)]);
        pick(&lb, &three);
        pick(&lb, &three);
        assert_eq!(lb.cursor_position("orders"), Some(2));

        let one = instances(&[("A", true)]);
        assert_eq!(pick(&lb, &one), "A");
        assert_eq!(lb.cursor_position("orders"), Some(0));
    }

    #[test]
    fn test_services_have_independent_cursors() {
        let lb = RoundRobinBalancer::new();
        let orders = instances(&[("A", true), ("B", true)]);
        let users: Vec<ServiceInstance> = ["X", "Y"]
            .iter()
            .map(|h| ServiceInstance::new("users", *h, 8080))
            .collect();

        assert_eq!(pick(&lb, &orders), "A");
        assert_eq!(lb.select("users", &users).unwrap().host, "X");
        assert_eq!(pick(&lb, &orders), "B");
        assert_eq!(lb.select("users", &users).unwrap().host, "Y");
        assert_eq!(lb.cursor_position("payments"), None);
    }

    #[test]
    fn test_concurrent_selections_spread_evenly() {
        let lb = Arc::new(RoundRobinBalancer::new());
        let list = Arc::new(instances(&[("A", true), ("B", true), ("C", true), ("D", true)]));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lb = Arc::clone(&lb);
                let list = Arc::clone(&list);
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| lb.select("orders", &list).unwrap().host)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts = std::collections::HashMap::new();
        for handle in handles {
            for host in handle.join().unwrap() {
                *counts.entry(host).or_insert(0usize) += 1;
            }
        }

        // 800 selections over 4 instances: an atomic cursor hands out exactly 200 each.
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&n| n == 200));
    }
}
