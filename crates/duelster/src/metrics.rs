use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Node-level prometheus metrics.
pub struct NodeMetrics {
    /// Number of peers this node has ever seen.
    pub peers_known: IntGauge,
    /// Number of peers currently marked alive.
    pub peers_alive: IntGauge,
    /// Whether this node believes it is the leader (0/1).
    pub is_leader: IntGauge,
    /// Current election term.
    pub term: IntGauge,
    /// Elections this node has started.
    pub elections_started: IntCounter,
    /// Players connected to this node.
    pub players: IntGauge,
    /// Players waiting in the local queue.
    pub queue_depth: IntGauge,
    /// Matches currently tracked by this node (as Host or Shadow).
    pub matches: IntGauge,
    /// Packs allocated by this node while leader.
    pub packs_allocated: IntCounter,
    /// Cards remaining in the local inventory pool.
    pub cards_remaining: IntGauge,
    /// Events applied by this node as Host.
    pub events_applied: IntCounter,
    /// Shadow-to-Host promotions performed by this node.
    pub failovers: IntCounter,
}

impl NodeMetrics {
    /// Create metrics and register them with the given prometheus registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self::build()?;
        registry.register(Box::new(metrics.peers_known.clone()))?;
        registry.register(Box::new(metrics.peers_alive.clone()))?;
        registry.register(Box::new(metrics.is_leader.clone()))?;
        registry.register(Box::new(metrics.term.clone()))?;
        registry.register(Box::new(metrics.elections_started.clone()))?;
        registry.register(Box::new(metrics.players.clone()))?;
        registry.register(Box::new(metrics.queue_depth.clone()))?;
        registry.register(Box::new(metrics.matches.clone()))?;
        registry.register(Box::new(metrics.packs_allocated.clone()))?;
        registry.register(Box::new(metrics.cards_remaining.clone()))?;
        registry.register(Box::new(metrics.events_applied.clone()))?;
        registry.register(Box::new(metrics.failovers.clone()))?;
        Ok(metrics)
    }

    /// Create metrics without registering them (tests).
    pub fn unregistered() -> Self {
        Self::build().expect("metric construction cannot fail")
    }

    fn build() -> Result<Self, prometheus::Error> {
        Ok(Self {
            peers_known: IntGauge::with_opts(Opts::new(
                "duel_peers_known",
                "Number of peers this node has ever seen",
            ))?,
            peers_alive: IntGauge::with_opts(Opts::new(
                "duel_peers_alive",
                "Number of peers currently marked alive",
            ))?,
            is_leader: IntGauge::with_opts(Opts::new(
                "duel_is_leader",
                "Whether this node believes it is the leader (0/1)",
            ))?,
            term: IntGauge::with_opts(Opts::new("duel_term", "Current election term"))?,
            elections_started: IntCounter::with_opts(Opts::new(
                "duel_elections_started",
                "Elections this node has started",
            ))?,
            players: IntGauge::with_opts(Opts::new(
                "duel_players",
                "Players connected to this node",
            ))?,
            queue_depth: IntGauge::with_opts(Opts::new(
                "duel_queue_depth",
                "Players waiting in the local queue",
            ))?,
            matches: IntGauge::with_opts(Opts::new(
                "duel_matches",
                "Matches currently tracked by this node",
            ))?,
            packs_allocated: IntCounter::with_opts(Opts::new(
                "duel_packs_allocated",
                "Packs allocated by this node while leader",
            ))?,
            cards_remaining: IntGauge::with_opts(Opts::new(
                "duel_cards_remaining",
                "Cards remaining in the local inventory pool",
            ))?,
            events_applied: IntCounter::with_opts(Opts::new(
                "duel_events_applied",
                "Events applied by this node as Host",
            ))?,
            failovers: IntCounter::with_opts(Opts::new(
                "duel_failovers",
                "Shadow-to-Host promotions performed by this node",
            ))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_once() {
        let registry = Registry::new();
        let metrics = NodeMetrics::new(&registry).unwrap();
        metrics.matches.set(3);
        metrics.events_applied.inc();

        let families = registry.gather();
        assert!(families.iter().any(|f| f.get_name() == "duel_matches"));
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = Registry::new();
        let _first = NodeMetrics::new(&registry).unwrap();
        assert!(NodeMetrics::new(&registry).is_err());
    }

    #[test]
    fn unregistered_metrics_work() {
        let metrics = NodeMetrics::unregistered();
        metrics.failovers.inc();
        assert_eq!(metrics.failovers.get(), 1);
    }
}
