//! Cluster node registry.
//!
//! One record per process in the cluster, keyed by lower-case name.
//! The registry distinguishes the designated local node and the
//! current leader. Records are immutable snapshots behind `Arc`;
//! liveness state lives in interior atomics so a touch never clones
//! the registry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

/// A node is alive while its last touch is younger than this.
const NODE_LIFESPAN: Duration = Duration::from_secs(60);

static NODES: Lazy<Mutex<BTreeMap<String, Arc<Node>>>> = Lazy::new(|| Mutex::new(BTreeMap::new()));
static LOCAL: Lazy<ArcSwap<Node>> = Lazy::new(|| ArcSwap::from_pointee(Node::default()));
static LEADER: Lazy<ArcSwap<Node>> = Lazy::new(|| ArcSwap::from_pointee(Node::default()));

/// One process in the cluster.
#[derive(Debug, Default)]
pub struct Node {
    /// Display name; the registry key is the lower-case form.
    pub name: String,
    /// IPv4 address or host name.
    pub host: String,
    pub http_port: u16,
    pub remote_port: u16,
    pub replication_port: u16,
    activated: AtomicBool,
    touched: Mutex<Option<Instant>>,
}

impl Clone for Node {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            host: self.host.clone(),
            http_port: self.http_port,
            remote_port: self.remote_port,
            replication_port: self.replication_port,
            activated: AtomicBool::new(self.activated.load(Ordering::Acquire)),
            touched: Mutex::new(*self.touched.lock()),
        }
    }
}

impl Node {
    /// New inactive node record.
    pub fn new(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry key.
    pub fn lower_name(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn is_activated(&self) -> bool {
        self.activated.load(Ordering::Acquire)
    }

    /// Touched recently enough to be considered alive.
    pub fn is_alive(&self) -> bool {
        match *self.touched.lock() {
            Some(touched) => touched.elapsed() < NODE_LIFESPAN,
            None => false,
        }
    }

    /// Activated and alive.
    pub fn is_active(&self) -> bool {
        self.is_activated() && self.is_alive()
    }

    /// Update the liveness timestamp. Monotonic: an older caller never
    /// rolls it back.
    pub fn touch(&self) {
        let now = Instant::now();
        let mut touched = self.touched.lock();
        *touched = Some(match *touched {
            Some(last) => last.max(now),
            None => now,
        });
    }

    /// The designated local node.
    pub fn local() -> Arc<Node> {
        LOCAL.load_full()
    }

    pub fn set_local(node: Node) {
        debug!("local node is \"{}\"", node.name);
        let node = Arc::new(node);
        LOCAL.store(node.clone());
        NODES.lock().insert(node.lower_name(), node);
    }

    /// The current cluster leader.
    pub fn leader() -> Arc<Node> {
        LEADER.load_full()
    }

    pub fn set_leader(node: Node) {
        debug!("leader node is \"{}\"", node.name);
        LEADER.store(Arc::new(node));
    }

    /// Fetch a node by name.
    pub fn get_node(name: &str) -> Option<Arc<Node>> {
        NODES.lock().get(&name.to_lowercase()).cloned()
    }

    /// Upsert a node record by lower-case name.
    ///
    /// A record that doesn't conflict with the existing one is merged
    /// into it (missing endpoints filled in). A conflicting record
    /// replaces an inactive slot but is refused while the slot is
    /// active. Returns the record now in the registry and whether the
    /// logical record changed.
    pub fn touch_node(node: &Node, activate: bool, touch: bool) -> (Option<Arc<Node>>, bool) {
        let key = node.lower_name();
        if key.is_empty() {
            return (None, false);
        }

        let mut nodes = NODES.lock();

        if let Some(existing) = nodes.get(&key).cloned() {
            if compatible(&existing, node) {
                let mut modified = false;

                let filled = fills_missing(&existing, node);
                let record = if filled {
                    let merged = Arc::new(merge(&existing, node));
                    nodes.insert(key, merged.clone());
                    modified = true;
                    merged
                } else {
                    existing
                };

                if activate && !record.activated.swap(true, Ordering::AcqRel) {
                    modified = true;
                }
                if touch || record.is_active() {
                    record.touch();
                }

                update_singletons(&record);
                return (Some(record), modified);
            } else if existing.is_active() {
                debug!("refusing conflicting record for active node \"{}\"", key);
                return (None, false);
            }
        }

        let record = Arc::new(node.clone());
        if activate {
            record.activated.store(true, Ordering::Release);
        }
        if touch || record.is_active() {
            record.touch();
        }
        nodes.insert(key, record.clone());
        update_singletons(&record);

        (Some(record), true)
    }

    /// Clear a node's endpoints without removing its name slot.
    pub fn drop_node(name: &str) {
        let key = name.to_lowercase();
        let mut nodes = NODES.lock();

        if let Some(existing) = nodes.get(&key) {
            let dropped = Node::new(&existing.name);
            dropped.activated.store(false, Ordering::Release);
            let dropped = Arc::new(dropped);
            nodes.insert(key, dropped.clone());
            update_singletons(&dropped);
        }
    }

    /// All known nodes, ordered by name.
    pub fn nodes() -> Vec<Arc<Node>> {
        NODES.lock().values().cloned().collect()
    }

    /// (total, alive, active) counts.
    pub fn counts() -> (usize, usize, usize) {
        let nodes = NODES.lock();
        let alive = nodes.values().filter(|n| n.is_alive()).count();
        let active = nodes.values().filter(|n| n.is_active()).count();
        (nodes.len(), alive, active)
    }

    /// Forget everything. Test hook.
    pub fn reset() {
        NODES.lock().clear();
        LOCAL.store(Arc::new(Node::default()));
        LEADER.store(Arc::new(Node::default()));
    }
}

/// The records describe the same node without contradicting each other.
fn compatible(existing: &Node, node: &Node) -> bool {
    fn field_ok(a: &str, b: &str) -> bool {
        a.is_empty() || b.is_empty() || a == b
    }
    fn port_ok(a: u16, b: u16) -> bool {
        a == 0 || b == 0 || a == b
    }

    field_ok(&existing.host, &node.host)
        && port_ok(existing.http_port, node.http_port)
        && port_ok(existing.remote_port, node.remote_port)
        && port_ok(existing.replication_port, node.replication_port)
}

/// The new record carries endpoints the existing one is missing.
fn fills_missing(existing: &Node, node: &Node) -> bool {
    (existing.host.is_empty() && !node.host.is_empty())
        || (existing.http_port == 0 && node.http_port != 0)
        || (existing.remote_port == 0 && node.remote_port != 0)
        || (existing.replication_port == 0 && node.replication_port != 0)
}

fn merge(existing: &Node, node: &Node) -> Node {
    let merged = existing.clone();
    Node {
        host: if merged.host.is_empty() {
            node.host.clone()
        } else {
            merged.host
        },
        http_port: if existing.http_port == 0 {
            node.http_port
        } else {
            existing.http_port
        },
        remote_port: if existing.remote_port == 0 {
            node.remote_port
        } else {
            existing.remote_port
        },
        replication_port: if existing.replication_port == 0 {
            node.replication_port
        } else {
            existing.replication_port
        },
        name: existing.name.clone(),
        activated: AtomicBool::new(existing.is_activated()),
        touched: Mutex::new(*existing.touched.lock()),
    }
}

/// Keep the local and leader singletons pointing at the freshest
/// record for their name.
fn update_singletons(record: &Arc<Node>) {
    let local = LOCAL.load();
    if !local.name.is_empty() && local.lower_name() == record.lower_name() {
        LOCAL.store(record.clone());
    }
    let leader = LEADER.load();
    if !leader.name.is_empty() && leader.lower_name() == record.lower_name() {
        LEADER.store(record.clone());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use parking_lot::MutexGuard;

    // The registry is process-global; tests that touch it run under
    // one lock.
    static GUARD: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    fn serial() -> MutexGuard<'static, ()> {
        GUARD.lock()
    }

    fn node(name: &str, host: &str, remote_port: u16) -> Node {
        Node {
            name: name.into(),
            host: host.into(),
            remote_port,
            ..Default::default()
        }
    }

    #[test]
    fn test_touch_inserts_and_merges() {
        let _guard = serial();
        Node::reset();

        let (first, modified) = Node::touch_node(&node("Alpha", "", 0), false, true);
        assert!(modified);
        let first = first.unwrap();
        assert_eq!(first.lower_name(), "alpha");
        assert!(first.is_alive());
        assert!(!first.is_activated());

        // Same node learned with endpoints: merged, modified.
        let (second, modified) = Node::touch_node(&node("Alpha", "10.0.0.1", 8880), true, true);
        assert!(modified);
        let second = second.unwrap();
        assert_eq!(second.host, "10.0.0.1");
        assert_eq!(second.remote_port, 8880);
        assert!(second.is_activated());

        // Nothing new: unchanged.
        let (_, modified) = Node::touch_node(&node("alpha", "10.0.0.1", 8880), true, true);
        assert!(!modified);
    }

    #[test]
    fn test_conflicting_active_record_refused() {
        let _guard = serial();
        Node::reset();

        Node::touch_node(&node("beta", "10.0.0.1", 8880), true, true);
        let (refused, modified) = Node::touch_node(&node("beta", "10.0.0.2", 8880), true, true);
        assert!(refused.is_none());
        assert!(!modified);
    }

    #[test]
    fn test_single_record_per_lower_name() {
        let _guard = serial();
        Node::reset();

        Node::touch_node(&node("Gamma", "", 0), false, true);
        Node::touch_node(&node("GAMMA", "", 0), false, true);
        assert_eq!(Node::nodes().len(), 1);
    }

    #[test]
    fn test_drop_node_keeps_slot() {
        let _guard = serial();
        Node::reset();

        Node::touch_node(&node("delta", "10.0.0.3", 8880), true, true);
        Node::drop_node("delta");

        let dropped = Node::get_node("delta").unwrap();
        assert_eq!(dropped.name, "delta");
        assert!(dropped.host.is_empty());
        assert_eq!(dropped.remote_port, 0);
        assert!(!dropped.is_activated());
        assert!(!dropped.is_alive());
    }

    #[test]
    fn test_local_node_tracks_registry() {
        let _guard = serial();
        Node::reset();

        Node::set_local(node("epsilon", "127.0.0.1", 8880));
        Node::touch_node(&node("epsilon", "127.0.0.1", 8880), true, true);
        assert!(Node::local().is_activated());
    }
}
