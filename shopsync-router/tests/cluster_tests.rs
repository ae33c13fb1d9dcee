//! End-to-end scenarios over loopback TCP: two routers in active/standby
//! fronting four storage nodes, driven by a minimal test client speaking
//! the client half of the protocol (one tagged request, one tagged reply,
//! retry on the other router after a timeout).

use shopsync_crdt::ShoppingList;
use shopsync_node::{NodeConfig, NodeService};
use shopsync_proto::{Message, TcpTransport, Transport};
use shopsync_ring::HashRing;
use shopsync_router::{RouterConfig, RouterRole, RouterService, StateLink};
use shopsync_storage::ListStore;
use shopsync_types::{ListId, NodeAddr, ReplicaId};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

const VNODES: usize = 8;
const REPLICATION: usize = 4;

fn node_config() -> NodeConfig {
    NodeConfig {
        replication: REPLICATION,
        read_quorum: 2,
        write_quorum: 3,
        vnodes: VNODES,
        quorum_timeout: Duration::from_millis(800),
        min_retry_interval: Duration::from_millis(200),
        hint_flush_interval: Duration::from_millis(300),
        health_check_timeout: Duration::from_millis(120),
    }
}

fn router_config() -> RouterConfig {
    RouterConfig {
        replication: REPLICATION,
        vnodes: VNODES,
        monitor_interval: Duration::from_secs(5),
        timeout_threshold: Duration::from_secs(120),
        coordinator_health_check_timeout: Duration::from_millis(300),
        bstar_heartbeat: Duration::from_millis(100),
    }
}

struct Cluster {
    routers: Vec<NodeAddr>,
    router_handles: Vec<JoinHandle<()>>,
    node_addrs: Vec<NodeAddr>,
    node_handles: Vec<JoinHandle<()>>,
    _dirs: Vec<tempfile::TempDir>,
}

impl Cluster {
    /// Boots a primary/backup router pair and `nodes` storage nodes, waiting
    /// for the pair to settle and every node to register.
    async fn start(nodes: usize) -> Self {
        // Bind both halves of the state link before either router starts so
        // each knows the other's beat address.
        let beat_a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let beat_b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let beat_a_addr = beat_a.local_addr().unwrap().to_string();
        let beat_b_addr = beat_b.local_addr().unwrap().to_string();
        let link_a = StateLink::from_socket(beat_a, &beat_b_addr);
        let link_b = StateLink::from_socket(beat_b, &beat_a_addr);

        let primary_transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let backup_transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let routers = vec![
            primary_transport.local_addr().clone(),
            backup_transport.local_addr().clone(),
        ];

        let primary = RouterService::new(
            Arc::new(primary_transport),
            link_a,
            router_config(),
            RouterRole::Primary,
        );
        let backup = RouterService::new(
            Arc::new(backup_transport),
            link_b,
            router_config(),
            RouterRole::Backup,
        );
        let router_handles = vec![
            tokio::spawn(async move {
                let _ = primary.run(std::future::pending::<()>()).await;
            }),
            tokio::spawn(async move {
                let _ = backup.run(std::future::pending::<()>()).await;
            }),
        ];

        // A few beats let the primary hear the backup and go ACTIVE.
        tokio::time::sleep(Duration::from_millis(400)).await;

        let mut cluster = Self {
            routers,
            router_handles,
            node_addrs: Vec::new(),
            node_handles: Vec::new(),
            _dirs: Vec::new(),
        };
        for _ in 0..nodes {
            cluster.spawn_node().await;
        }
        // Let registrations propagate to both routers.
        tokio::time::sleep(Duration::from_millis(300)).await;
        cluster
    }

    async fn spawn_node(&mut self) {
        let dir = tempfile::tempdir().unwrap();
        let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().clone();
        let store = ListStore::open(dir.path().join("node.db")).unwrap();
        let node = NodeService::new(
            Arc::new(transport),
            store,
            node_config(),
            self.routers.clone(),
        );
        node.start().await.unwrap();
        self.node_addrs.push(addr);
        self._dirs.push(dir);
        self.node_handles.push(tokio::spawn(async move {
            let _ = node.run(std::future::pending::<()>()).await;
        }));
    }

    /// Kills a node process (listener closes with it).
    fn kill_node(&self, addr: &NodeAddr) {
        let index = self.node_addrs.iter().position(|a| a == addr).unwrap();
        self.node_handles[index].abort();
    }

    fn kill_primary_router(&self) {
        self.router_handles[0].abort();
    }

    /// The ideal owner set of a key, computed on an identical local ring.
    fn owners(&self, key: &ListId) -> Vec<NodeAddr> {
        let ring = HashRing::with_nodes(VNODES, REPLICATION, &self.node_addrs);
        ring.ideal_replicas(&key.to_string())
    }

    async fn client(&self) -> TestClient {
        TestClient {
            transport: TcpTransport::bind("127.0.0.1:0").await.unwrap(),
            routers: self.routers.clone(),
            active: 0,
        }
    }
}

/// Minimal client adapter: sends one tagged request to the active router
/// and waits for the single tagged reply, switching routers on timeout or
/// connection failure.
struct TestClient {
    transport: TcpTransport,
    routers: Vec<NodeAddr>,
    active: usize,
}

const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);

impl TestClient {
    async fn put(&mut self, list: &ShoppingList) -> bool {
        let key = list.id();
        let request = Message::Put {
            key,
            value: list.to_json().unwrap(),
            quorum_id: None,
        };
        match self.request(request, key).await {
            Some(Message::PutResponse { value, .. }) => value,
            _ => false,
        }
    }

    async fn get(&mut self, key: ListId) -> Option<ShoppingList> {
        let request = Message::Get {
            key,
            quorum_id: None,
        };
        match self.request(request, key).await {
            Some(Message::GetResponse { value, .. }) => {
                value.map(|raw| ShoppingList::from_json(&raw).unwrap())
            }
            _ => None,
        }
    }

    async fn delete(&mut self, key: ListId) -> bool {
        let request = Message::Delete {
            key,
            quorum_id: None,
        };
        match self.request(request, key).await {
            Some(Message::DeleteResponse { value, .. }) => value.unwrap_or(false),
            _ => false,
        }
    }

    /// Sends the request, waiting for a matching response; retries each
    /// router twice before giving up.
    async fn request(&mut self, request: Message, key: ListId) -> Option<Message> {
        for _ in 0..(2 * self.routers.len()) {
            let router = self.routers[self.active].clone();
            if self.transport.send(&router, request.clone()).await.is_err() {
                self.active = (self.active + 1) % self.routers.len();
                continue;
            }
            if let Some(response) = self.recv_matching(&request, key).await {
                return Some(response);
            }
            self.active = (self.active + 1) % self.routers.len();
        }
        None
    }

    /// Waits for the response matching this request, discarding strays
    /// (e.g. a late answer to a request that already timed out).
    async fn recv_matching(&mut self, request: &Message, key: ListId) -> Option<Message> {
        let deadline = tokio::time::Instant::now() + CLIENT_TIMEOUT;
        loop {
            let envelope =
                tokio::time::timeout_at(deadline, self.transport.recv()).await.ok()??;
            let matches = matches!(
                (request, &envelope.message),
                (Message::Get { .. }, Message::GetResponse { key: k, .. })
                | (Message::Put { .. }, Message::PutResponse { key: k, .. })
                | (Message::Delete { .. }, Message::DeleteResponse { key: k, .. })
                if *k == key
            );
            if matches {
                return Some(envelope.message);
            }
        }
    }
}

fn replica(s: &str) -> ReplicaId {
    ReplicaId::new(s).unwrap()
}

#[tokio::test]
async fn concurrent_adds_converge_through_the_store() {
    let cluster = Cluster::start(4).await;
    let mut client = cluster.client().await;

    // Two clients fork the same empty list while offline.
    let base = ShoppingList::new("groceries");
    let key = base.id();
    let mut at_a = base.clone();
    at_a.add_item("milk", 2, &replica("alice")).unwrap();
    let mut at_b = base.clone();
    at_b.add_item("milk", 1, &replica("bob")).unwrap();
    at_b.add_item("bread", 3, &replica("bob")).unwrap();

    assert!(client.put(&at_a).await);
    assert!(client.put(&at_b).await);

    let merged = client.get(key).await.expect("list should be readable");
    assert_eq!(merged.quantity("milk"), 3);
    assert_eq!(merged.quantity("bread"), 3);
}

#[tokio::test]
async fn delete_racing_a_concurrent_increment() {
    let cluster = Cluster::start(4).await;
    let mut client = cluster.client().await;

    let mut seeded = ShoppingList::new("groceries");
    seeded.add_item("apple", 5, &replica("seed")).unwrap();
    let key = seeded.id();
    assert!(client.put(&seeded).await);

    // Fork the seeded state: one side deletes, the other adds two.
    let mut deleting = seeded.clone();
    deleting.remove_item("apple", &replica("alice"));
    let mut bumping = seeded.clone();
    bumping.change_quantity("apple", 2, &replica("bob")).unwrap();

    assert!(client.put(&deleting).await);
    assert!(client.put(&bumping).await);

    let merged = client.get(key).await.expect("list should be readable");
    assert_eq!(merged.quantity("apple"), 2);
}

#[tokio::test]
async fn write_survives_one_dead_replica() {
    let cluster = Cluster::start(4).await;
    let mut client = cluster.client().await;

    let mut list = ShoppingList::new("groceries");
    list.add_item("milk", 2, &replica("alice")).unwrap();
    let key = list.id();
    let owners = cluster.owners(&key);

    // Kill one non-primary owner; W = 3 of the remaining copies still holds.
    cluster.kill_node(&owners[1]);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(client.put(&list).await);

    // R = 2 read settles from the surviving replicas.
    let fetched = client.get(key).await.expect("read quorum should hold");
    assert_eq!(fetched.quantity("milk"), 2);
}

#[tokio::test]
async fn write_fails_with_two_dead_replicas() {
    let cluster = Cluster::start(4).await;
    let mut client = cluster.client().await;

    let mut list = ShoppingList::new("groceries");
    list.add_item("milk", 2, &replica("alice")).unwrap();
    let key = list.id();
    let owners = cluster.owners(&key);

    cluster.kill_node(&owners[1]);
    cluster.kill_node(&owners[2]);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!client.put(&list).await, "W = 3 cannot hold with 2 acks");
}

#[tokio::test]
async fn replica_coordinates_when_the_primary_is_down() {
    let cluster = Cluster::start(4).await;
    let mut client = cluster.client().await;

    let mut list = ShoppingList::new("groceries");
    list.add_item("milk", 2, &replica("alice")).unwrap();
    let key = list.id();
    let owners = cluster.owners(&key);

    // The election probe finds the primary dead; the first responding
    // replica coordinates instead.
    cluster.kill_node(&owners[0]);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(client.put(&list).await);
    let fetched = client.get(key).await.expect("read should succeed");
    assert_eq!(fetched.quantity("milk"), 2);
}

#[tokio::test]
async fn backup_router_takes_over_after_primary_dies() {
    let cluster = Cluster::start(4).await;
    let mut client = cluster.client().await;

    let mut list = ShoppingList::new("groceries");
    list.add_item("milk", 2, &replica("alice")).unwrap();
    let key = list.id();

    assert!(client.put(&list).await);

    cluster.kill_primary_router();
    // Two missed beats and the backup's peer expires.
    tokio::time::sleep(Duration::from_millis(600)).await;

    // The client's first attempt hits the dead router and fails over; the
    // backup promotes itself on the request and completes it.
    let fetched = client.get(key).await.expect("backup should serve the read");
    assert_eq!(fetched.quantity("milk"), 2);
}

#[tokio::test]
async fn delete_through_the_full_stack() {
    let cluster = Cluster::start(4).await;
    let mut client = cluster.client().await;

    let mut list = ShoppingList::new("groceries");
    list.add_item("milk", 2, &replica("alice")).unwrap();
    let key = list.id();

    assert!(client.put(&list).await);
    assert!(client.delete(key).await);
    assert!(client.get(key).await.is_none());
}
