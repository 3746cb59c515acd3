//! Term-based majority election for the Inventory Guardian role.
//!
//! A follower becomes a candidate on election timeout (with 20% jitter) and a
//! leader on a strict majority of the configured cluster. Each node grants at
//! most one vote per term: a vote is granted only for a term strictly higher
//! than anything seen, and granting adopts that term.

use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cluster::membership::{LeaderAdvertiser, PeerRegistry};
use crate::config::NodeConfig;
use crate::metrics::NodeMetrics;
use crate::rpc::{AnnounceLeaderRequest, PeerRpc, VoteRequest};
use crate::types::PeerAddr;

#[derive(Debug)]
struct LeaderState {
    term: u64,
    leader: Option<PeerAddr>,
    is_leader: bool,
    last_evidence: Instant,
}

pub struct Elector {
    self_addr: PeerAddr,
    config: NodeConfig,
    state: Mutex<LeaderState>,
    registry: Arc<PeerRegistry>,
    rpc: Arc<dyn PeerRpc>,
    metrics: Arc<NodeMetrics>,
}

impl Elector {
    pub fn new(
        config: NodeConfig,
        registry: Arc<PeerRegistry>,
        rpc: Arc<dyn PeerRpc>,
        metrics: Arc<NodeMetrics>,
    ) -> Self {
        Self {
            self_addr: config.addr.clone(),
            config,
            state: Mutex::new(LeaderState {
                term: 0,
                leader: None,
                is_leader: false,
                last_evidence: Instant::now(),
            }),
            registry,
            rpc,
            metrics,
        }
    }

    #[must_use]
    pub fn term(&self) -> u64 {
        self.state.lock().term
    }

    #[must_use]
    pub fn leader(&self) -> Option<PeerAddr> {
        self.state.lock().leader.clone()
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.state.lock().is_leader
    }

    /// Vote rule: grant iff the candidate's term is strictly higher than any
    /// term seen, adopting it. Everything else is denied with our term.
    pub fn handle_vote(&self, candidate: &PeerAddr, term: u64) -> (bool, u64) {
        let mut state = self.state.lock();
        if term > state.term {
            state.term = term;
            state.is_leader = false;
            state.leader = None;
            state.last_evidence = Instant::now();
            tracing::info!(candidate = %candidate, term, "vote granted");
            self.publish_metrics(&state);
            (true, term)
        } else {
            tracing::debug!(candidate = %candidate, term, own_term = state.term, "vote denied");
            (false, state.term)
        }
    }

    /// Announcement rule: adopt any leader with term >= ours.
    pub fn handle_announce(&self, leader: &PeerAddr, term: u64) {
        let mut state = self.state.lock();
        if term >= state.term {
            state.term = term;
            state.leader = Some(leader.clone());
            state.is_leader = *leader == self.self_addr;
            state.last_evidence = Instant::now();
            tracing::info!(leader = %leader, term, "leader announced");
            self.publish_metrics(&state);
        } else {
            tracing::debug!(leader = %leader, term, own_term = state.term, "stale leader announcement ignored");
        }
    }

    /// Leader evidence carried on heartbeats.
    pub fn observe_heartbeat(&self, term: u64, leader: Option<&PeerAddr>) {
        let mut state = self.state.lock();
        if term > state.term {
            state.term = term;
            state.is_leader = false;
            state.leader = None;
        }
        if let Some(leader) = leader {
            if term >= state.term {
                state.term = term;
                state.leader = Some(leader.clone());
                state.is_leader = *leader == self.self_addr;
                state.last_evidence = Instant::now();
            }
        }
        self.publish_metrics(&state);
    }

    fn publish_metrics(&self, state: &LeaderState) {
        self.metrics.term.set(state.term as i64);
        self.metrics.is_leader.set(i64::from(state.is_leader));
    }

    /// Candidate transition check loop.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let timeout = self.jittered_timeout();
            let should_run = {
                let state = self.state.lock();
                !state.is_leader && state.last_evidence.elapsed() > timeout
            };
            if should_run {
                self.run_election().await;
            }
        }
    }

    fn jittered_timeout(&self) -> Duration {
        let factor = rand::thread_rng().gen_range(0.8..1.2);
        self.config.election_timeout.mul_f64(factor)
    }

    /// One candidacy: bump term, vote for self, solicit the cluster in
    /// parallel, and take leadership on a strict majority of the configured
    /// membership.
    async fn run_election(&self) {
        let candidate_term = {
            let mut state = self.state.lock();
            state.term += 1;
            state.is_leader = false;
            state.leader = None;
            state.last_evidence = Instant::now();
            self.publish_metrics(&state);
            state.term
        };
        self.metrics.elections_started.inc();
        tracing::info!(term = candidate_term, "starting election");

        let peers = self.registry.known_peers();
        let requests = peers.iter().map(|peer| {
            let req = VoteRequest {
                candidate: self.self_addr.clone(),
                term: candidate_term,
            };
            async move { self.rpc.request_vote(peer, req).await }
        });
        let responses = futures::future::join_all(requests).await;

        let mut votes = 1usize; // self-vote
        let mut highest_term = candidate_term;
        for response in responses.into_iter().flatten() {
            if response.granted && response.term == candidate_term {
                votes += 1;
            }
            highest_term = highest_term.max(response.term);
        }

        if highest_term > candidate_term {
            // a stale candidate steps down to the higher term
            let mut state = self.state.lock();
            if highest_term > state.term {
                state.term = highest_term;
                state.is_leader = false;
                state.leader = None;
                self.publish_metrics(&state);
            }
            tracing::info!(term = highest_term, "stepping down: higher term observed");
            return;
        }

        let majority = self.config.cluster_size() / 2 + 1;
        if votes < majority {
            tracing::info!(term = candidate_term, votes, majority, "election lost, waiting for next timeout");
            return;
        }

        let won = {
            let mut state = self.state.lock();
            if state.term == candidate_term && state.leader.is_none() {
                state.is_leader = true;
                state.leader = Some(self.self_addr.clone());
                state.last_evidence = Instant::now();
                self.publish_metrics(&state);
                true
            } else {
                false
            }
        };
        if !won {
            return;
        }
        tracing::info!(term = candidate_term, votes, "election won, announcing leadership");

        let announcements = peers.iter().map(|peer| {
            let req = AnnounceLeaderRequest {
                leader: self.self_addr.clone(),
                term: candidate_term,
            };
            async move { self.rpc.announce_leader(peer, req).await }
        });
        for result in futures::future::join_all(announcements).await {
            if let Err(e) = result {
                tracing::debug!(error = %e, "leader announcement failed");
            }
        }
    }
}

impl LeaderAdvertiser for Elector {
    fn advertisement(&self) -> (u64, Option<PeerAddr>) {
        let state = self.state.lock();
        (state.term, state.leader.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DuelError;
    use crate::rpc::*;
    use async_trait::async_trait;
    use parking_lot::RwLock;
    use std::collections::HashMap;

    fn make_config(host: &str, peers: &[&str]) -> NodeConfig {
        NodeConfig {
            server_id: host.to_string(),
            addr: PeerAddr::new(host, 8080),
            peers: peers.iter().map(|p| PeerAddr::new(*p, 8080)).collect(),
            ..Default::default()
        }
    }

    /// Routes vote and announce calls to sibling electors in-process.
    #[derive(Default)]
    struct VoteMesh {
        electors: RwLock<HashMap<PeerAddr, Arc<Elector>>>,
    }

    #[async_trait]
    impl PeerRpc for VoteMesh {
        async fn register(
            &self,
            peer: &PeerAddr,
            _req: RegisterRequest,
        ) -> Result<RegisterResponse, DuelError> {
            Err(DuelError::PeerUnavailable {
                address: peer.clone(),
                source: None,
            })
        }

        async fn heartbeat(&self, _peer: &PeerAddr, _req: HeartbeatRequest) -> Result<(), DuelError> {
            Ok(())
        }

        async fn request_vote(
            &self,
            peer: &PeerAddr,
            req: VoteRequest,
        ) -> Result<VoteResponse, DuelError> {
            let elector = self
                .electors
                .read()
                .get(peer)
                .cloned()
                .ok_or(DuelError::PeerUnavailable {
                    address: peer.clone(),
                    source: None,
                })?;
            let (granted, term) = elector.handle_vote(&req.candidate, req.term);
            Ok(VoteResponse { granted, term })
        }

        async fn announce_leader(
            &self,
            peer: &PeerAddr,
            req: AnnounceLeaderRequest,
        ) -> Result<(), DuelError> {
            if let Some(elector) = self.electors.read().get(peer).cloned() {
                elector.handle_announce(&req.leader, req.term);
            }
            Ok(())
        }

        async fn buy_pack(
            &self,
            peer: &PeerAddr,
            _req: BuyPackRequest,
        ) -> Result<BuyPackResponse, DuelError> {
            Err(DuelError::PeerUnavailable {
                address: peer.clone(),
                source: None,
            })
        }

        async fn inventory_status(
            &self,
            peer: &PeerAddr,
        ) -> Result<InventoryStatusResponse, DuelError> {
            Err(DuelError::PeerUnavailable {
                address: peer.clone(),
                source: None,
            })
        }

        async fn request_opponent(
            &self,
            _peer: &PeerAddr,
            _req: OpponentRequest,
        ) -> Result<OpponentResponse, DuelError> {
            Ok(OpponentResponse::not_found())
        }

        async fn submit_event(
            &self,
            peer: &PeerAddr,
            _req: GameEventRequest,
        ) -> Result<GameEventResponse, DuelError> {
            Err(DuelError::PeerUnavailable {
                address: peer.clone(),
                source: None,
            })
        }

        async fn replicate(
            &self,
            peer: &PeerAddr,
            _req: ReplicateRequest,
        ) -> Result<ReplicateResponse, DuelError> {
            Err(DuelError::PeerUnavailable {
                address: peer.clone(),
                source: None,
            })
        }

        async fn notify_player(
            &self,
            _peer: &PeerAddr,
            _req: NotifyPlayerRequest,
        ) -> Result<(), DuelError> {
            Ok(())
        }
    }

    fn make_cluster(hosts: &[&str]) -> (Arc<VoteMesh>, Vec<Arc<Elector>>) {
        let mesh = Arc::new(VoteMesh::default());
        let mut electors = Vec::new();
        for host in hosts {
            let peers: Vec<&str> = hosts.iter().filter(|h| *h != host).copied().collect();
            let config = make_config(host, &peers);
            let metrics = Arc::new(NodeMetrics::unregistered());
            let registry = Arc::new(PeerRegistry::new(config.addr.clone(), Arc::clone(&metrics)));
            for peer in &config.peers {
                registry.observe(peer);
            }
            let elector = Arc::new(Elector::new(
                config,
                registry,
                mesh.clone() as Arc<dyn PeerRpc>,
                metrics,
            ));
            mesh.electors
                .write()
                .insert(elector.self_addr.clone(), Arc::clone(&elector));
            electors.push(elector);
        }
        (mesh, electors)
    }

    #[test]
    fn vote_granted_only_for_higher_terms() {
        let (_mesh, electors) = make_cluster(&["s1", "s2"]);
        let elector = &electors[0];
        let candidate = PeerAddr::new("s2", 8080);

        assert_eq!(elector.handle_vote(&candidate, 1), (true, 1));
        // one vote per term: same term is denied
        assert_eq!(elector.handle_vote(&candidate, 1), (false, 1));
        assert_eq!(elector.handle_vote(&candidate, 0), (false, 1));
        assert_eq!(elector.handle_vote(&candidate, 2), (true, 2));
    }

    #[test]
    fn announce_adopts_equal_or_higher_terms() {
        let (_mesh, electors) = make_cluster(&["s1", "s2"]);
        let elector = &electors[0];
        let leader = PeerAddr::new("s2", 8080);

        elector.handle_announce(&leader, 3);
        assert_eq!(elector.term(), 3);
        assert_eq!(elector.leader(), Some(leader.clone()));
        assert!(!elector.is_leader());

        // stale announcement is ignored
        elector.handle_announce(&PeerAddr::new("s3", 8080), 2);
        assert_eq!(elector.leader(), Some(leader));
    }

    #[test]
    fn announce_of_self_sets_leader_flag() {
        let (_mesh, electors) = make_cluster(&["s1", "s2"]);
        let elector = &electors[0];
        elector.handle_announce(&PeerAddr::new("s1", 8080), 1);
        assert!(elector.is_leader());
    }

    #[tokio::test]
    async fn candidate_wins_with_majority() {
        let (_mesh, electors) = make_cluster(&["s1", "s2", "s3"]);
        electors[0].run_election().await;

        assert!(electors[0].is_leader());
        assert_eq!(electors[0].term(), 1);
        // announcements propagated
        assert_eq!(electors[1].leader(), Some(PeerAddr::new("s1", 8080)));
        assert_eq!(electors[2].leader(), Some(PeerAddr::new("s1", 8080)));
    }

    #[tokio::test]
    async fn at_most_one_leader_per_term() {
        let (_mesh, electors) = make_cluster(&["s1", "s2", "s3"]);

        // two candidacies in sequence: the second runs at a higher term
        electors[0].run_election().await;
        electors[1].run_election().await;

        for term in 1..=2 {
            let leaders: Vec<_> = electors
                .iter()
                .filter(|e| e.is_leader() && e.term() == term)
                .collect();
            assert!(
                leaders.len() <= 1,
                "term {term} has {} leaders",
                leaders.len()
            );
        }
    }

    #[tokio::test]
    async fn candidate_without_majority_does_not_win() {
        let (mesh, electors) = make_cluster(&["s1", "s2", "s3"]);
        // isolate the candidate: remove both voters from the mesh
        mesh.electors.write().remove(&PeerAddr::new("s2", 8080));
        mesh.electors.write().remove(&PeerAddr::new("s3", 8080));

        electors[0].run_election().await;
        assert!(!electors[0].is_leader());
    }

    #[tokio::test]
    async fn majority_survives_one_node_loss() {
        let (mesh, electors) = make_cluster(&["s1", "s2", "s3"]);
        mesh.electors.write().remove(&PeerAddr::new("s3", 8080));

        electors[0].run_election().await;
        assert!(electors[0].is_leader(), "2 of 3 votes is a strict majority");
    }

    #[test]
    fn heartbeat_evidence_adopts_leader() {
        let (_mesh, electors) = make_cluster(&["s1", "s2"]);
        let elector = &electors[0];
        let leader = PeerAddr::new("s2", 8080);

        elector.observe_heartbeat(5, Some(&leader));
        assert_eq!(elector.term(), 5);
        assert_eq!(elector.leader(), Some(leader));

        // higher term without leader clears current leadership knowledge
        elector.observe_heartbeat(7, None);
        assert_eq!(elector.term(), 7);
        assert_eq!(elector.leader(), None);
    }
}
