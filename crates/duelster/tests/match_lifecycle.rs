//! Single-node match lifecycle: login, queueing, pack purchase, trick play,
//! trades, and stale-match reclamation.

use std::sync::Arc;
use std::time::Duration;

use duelster::broker::{CommandSink, InboundTopic};
use duelster::engine::{MatchCommand, MatchPhase};
use duelster::node::Node;
use duelster::protocol::{ClientCommand, ClientEvent};
use duelster::rpc::AnnounceLeaderRequest;
use duelster::testing::{MemoryBus, TestMesh};
use duelster::types::{Card, ClientId, MatchId, PeerAddr, Rarity, Suit};
use duelster::NodeConfig;

fn single_node() -> (TestMesh, Arc<Node>, Arc<MemoryBus>) {
    let mesh = TestMesh::new();
    let config = NodeConfig {
        server_id: "s1".to_string(),
        addr: PeerAddr::new("s1", 8080),
        ..Default::default()
    };
    let (node, bus) = mesh.add_node(config);
    // single configured node: announcing itself makes it Inventory Guardian
    node.handle_announce(AnnounceLeaderRequest {
        leader: node.config.addr.clone(),
        term: 1,
    });
    (mesh, node, bus)
}

async fn login(node: &Arc<Node>, bus: &MemoryBus, temp_id: &str, name: &str) -> ClientId {
    node.handle_inbound(
        InboundTopic::Login {
            temp_id: temp_id.to_string(),
        },
        ClientCommand::Login {
            name: name.to_string(),
        },
    )
    .await;
    match bus.client_events(temp_id).last() {
        Some(ClientEvent::LoginOk { client_id, .. }) => *client_id,
        other => panic!("expected LOGIN_OK, got {other:?}"),
    }
}

async fn enqueue(node: &Arc<Node>, client_id: ClientId) {
    node.handle_inbound(InboundTopic::Enqueue, ClientCommand::Enqueue { client_id })
        .await;
}

fn found_match(bus: &MemoryBus, client: ClientId) -> MatchId {
    bus.client_events(&client.to_string())
        .iter()
        .find_map(|e| match e {
            ClientEvent::MatchFound { match_id, .. } => Some(*match_id),
            _ => None,
        })
        .expect("MATCH_FOUND not delivered")
}

async fn buy_pack(node: &Arc<Node>, client_id: ClientId) {
    node.handle_inbound(
        InboundTopic::MatchCommands {
            match_id: MatchId::new(),
        },
        ClientCommand::BuyPack { client_id },
    )
    .await;
}

fn card(name: &str, suit: Suit, power: i32) -> Card {
    Card::new(name, suit, power, Rarity::Common)
}

#[tokio::test]
async fn login_rejects_empty_names() {
    let (_mesh, node, bus) = single_node();
    node.handle_inbound(
        InboundTopic::Login {
            temp_id: "tmp".to_string(),
        },
        ClientCommand::Login {
            name: "   ".to_string(),
        },
    )
    .await;
    assert!(matches!(
        bus.client_events("tmp").last(),
        Some(ClientEvent::Error { .. })
    ));
}

#[tokio::test]
async fn first_player_waits_second_pairs() {
    let (_mesh, node, bus) = single_node();
    let alice = login(&node, &bus, "tmp-a", "alice").await;
    let bob = login(&node, &bus, "tmp-b", "bob").await;

    enqueue(&node, alice).await;
    assert!(matches!(
        bus.client_events(&alice.to_string()).last(),
        Some(ClientEvent::WaitingOpponent { .. })
    ));
    assert_eq!(node.matchmaker.depth(), 1);

    enqueue(&node, bob).await;
    assert_eq!(node.matchmaker.depth(), 0);

    let match_id = found_match(&bus, alice);
    assert_eq!(found_match(&bus, bob), match_id);

    let state = node.engine.snapshot(match_id).unwrap();
    assert_eq!(state.phase, MatchPhase::AwaitingPurchase);
    assert_eq!(state.shadow, None);
    assert_eq!(state.host, node.config.addr);
}

#[tokio::test]
async fn duplicate_enqueue_is_ignored() {
    let (_mesh, node, bus) = single_node();
    let alice = login(&node, &bus, "tmp-a", "alice").await;

    enqueue(&node, alice).await;
    enqueue(&node, alice).await;
    assert_eq!(node.matchmaker.depth(), 1, "no self-pairing");
}

#[tokio::test]
async fn pack_purchase_seats_hands_and_starts_match() {
    let (_mesh, node, bus) = single_node();
    let alice = login(&node, &bus, "tmp-a", "alice").await;
    let bob = login(&node, &bus, "tmp-b", "bob").await;
    enqueue(&node, alice).await;
    enqueue(&node, bob).await;
    let match_id = found_match(&bus, alice);

    let stock_before = node.inventory.remaining();
    buy_pack(&node, alice).await;

    let pack = bus
        .client_events(&alice.to_string())
        .iter()
        .find_map(|e| match e {
            ClientEvent::PackResult { cards, .. } => Some(cards.clone()),
            _ => None,
        })
        .expect("PACK_RESULT not delivered");
    assert_eq!(pack.len(), 5);
    assert_eq!(node.inventory.remaining(), stock_before - 5);

    // one ready: still awaiting the second purchase
    let state = node.engine.snapshot(match_id).unwrap();
    assert_eq!(state.phase, MatchPhase::AwaitingPurchase);
    assert_eq!(state.hands[&alice].len(), 5);

    buy_pack(&node, bob).await;
    let state = node.engine.snapshot(match_id).unwrap();
    assert_eq!(state.phase, MatchPhase::Playing);
    assert!(state.turn_owner.is_some());
    assert_eq!(node.inventory.remaining(), stock_before - 10);

    let started = bus.match_events(match_id);
    assert!(started
        .iter()
        .any(|e| matches!(e, ClientEvent::MatchStarted { .. })));
}

#[tokio::test]
async fn out_of_turn_play_is_rejected_without_mutation() {
    let (_mesh, node, bus) = single_node();
    let alice = login(&node, &bus, "tmp-a", "alice").await;
    let bob = login(&node, &bus, "tmp-b", "bob").await;
    enqueue(&node, alice).await;
    enqueue(&node, bob).await;
    let match_id = found_match(&bus, alice);
    buy_pack(&node, alice).await;
    buy_pack(&node, bob).await;

    let state = node.engine.snapshot(match_id).unwrap();
    let turn_owner = state.turn_owner.unwrap();
    let waiter = if turn_owner == alice { bob } else { alice };
    let waiter_card = state.hands[&waiter][0].id;
    let seq_before = state.event_seq;

    let result = node
        .engine
        .submit(match_id, waiter, MatchCommand::PlayCard { card_id: waiter_card })
        .await;
    assert!(result.is_err());

    let state = node.engine.snapshot(match_id).unwrap();
    assert_eq!(state.event_seq, seq_before, "no state mutation on rejection");
    assert!(state.table.is_empty());
    assert!(matches!(
        bus.client_events(&waiter.to_string()).last(),
        Some(ClientEvent::Error { .. })
    ));

    // the turn owner's play is accepted
    let owner_card = state.hands[&turn_owner][0].id;
    node.engine
        .submit(match_id, turn_owner, MatchCommand::PlayCard { card_id: owner_card })
        .await
        .unwrap();
    let state = node.engine.snapshot(match_id).unwrap();
    assert_eq!(state.table.len(), 1);
    assert_eq!(state.event_seq, seq_before + 1);
}

/// Seats crafted hands directly so trick outcomes are deterministic.
async fn crafted_match(
    node: &Arc<Node>,
    bus: &MemoryBus,
    alice_cards: Vec<Card>,
    bob_cards: Vec<Card>,
) -> (MatchId, ClientId, ClientId) {
    let alice = login(node, bus, "tmp-a", "alice").await;
    let bob = login(node, bus, "tmp-b", "bob").await;
    enqueue(node, alice).await;
    enqueue(node, bob).await;
    let match_id = found_match(bus, alice);

    node.engine
        .submit(match_id, alice, MatchCommand::Ready { cards: alice_cards })
        .await
        .unwrap();
    node.engine
        .submit(match_id, bob, MatchCommand::Ready { cards: bob_cards })
        .await
        .unwrap();
    (match_id, alice, bob)
}

async fn play_trick(
    node: &Arc<Node>,
    match_id: MatchId,
    first: ClientId,
    second: ClientId,
) {
    for player in [first, second] {
        let state = node.engine.snapshot(match_id).unwrap();
        let card_id = state.hands[&player][0].id;
        node.engine
            .submit(match_id, player, MatchCommand::PlayCard { card_id })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn equal_power_trick_falls_to_suit_rank() {
    let (_mesh, node, bus) = single_node();
    let (match_id, alice, bob) = crafted_match(
        &node,
        &bus,
        vec![card("Cavaleiro", Suit::Hearts, 60)],
        vec![card("Paladino", Suit::Diamonds, 60)],
    )
    .await;

    let state = node.engine.snapshot(match_id).unwrap();
    let first = state.turn_owner.unwrap();
    let second = if first == alice { bob } else { alice };
    play_trick(&node, match_id, first, second).await;

    let state = node.engine.snapshot(match_id).unwrap();
    assert_eq!(state.phase, MatchPhase::Finished);
    // hearts outrank diamonds: alice takes the trick and the match
    assert_eq!(state.round_points.get("alice"), Some(&1));
    assert_eq!(state.round_points.get("bob"), None);
    assert_eq!(state.turn_owner, Some(alice));

    let ended = bus
        .match_events(match_id)
        .iter()
        .find_map(|e| match e {
            ClientEvent::MatchEnded { winner, .. } => Some(winner.clone()),
            _ => None,
        })
        .expect("MATCH_ENDED not delivered");
    assert_eq!(ended, Some("alice".to_string()));
}

#[tokio::test]
async fn identical_cards_draw_and_keep_turn_owner() {
    let (_mesh, node, bus) = single_node();
    let (match_id, alice, bob) = crafted_match(
        &node,
        &bus,
        vec![card("Anjo", Suit::Spades, 90), card("Golem", Suit::Clubs, 5)],
        vec![card("Demônio", Suit::Spades, 90), card("Grifo", Suit::Clubs, 9)],
    )
    .await;

    let state = node.engine.snapshot(match_id).unwrap();
    let first = state.turn_owner.unwrap();
    let second = if first == alice { bob } else { alice };
    play_trick(&node, match_id, first, second).await;

    let state = node.engine.snapshot(match_id).unwrap();
    assert_eq!(state.phase, MatchPhase::Playing);
    assert!(state.round_points.is_empty(), "drawn trick awards no point");
    assert_eq!(state.turn_owner, Some(first), "draw keeps the turn owner");
    assert!(state.table.is_empty(), "table cleared after resolution");
}

#[tokio::test]
async fn full_match_keeps_log_signed_and_sequential() {
    let (_mesh, node, bus) = single_node();
    let (match_id, _alice, _bob) = crafted_match(
        &node,
        &bus,
        vec![
            card("Dragão", Suit::Spades, 100),
            card("Mago", Suit::Hearts, 40),
        ],
        vec![
            card("Ladino", Suit::Clubs, 10),
            card("Titã", Suit::Diamonds, 80),
        ],
    )
    .await;

    // turn_owner always names the next player to act while Playing
    while node.engine.snapshot(match_id).unwrap().phase == MatchPhase::Playing {
        let state = node.engine.snapshot(match_id).unwrap();
        let current = state.turn_owner.unwrap();
        let card_id = state.hands[&current][0].id;
        node.engine
            .submit(match_id, current, MatchCommand::PlayCard { card_id })
            .await
            .unwrap();
    }

    let state = node.engine.snapshot(match_id).unwrap();
    assert_eq!(state.phase, MatchPhase::Finished);
    let auth = duelster::auth::ClusterAuth::new(&node.config.cluster_secret);
    for (i, event) in state.event_log.iter().enumerate() {
        assert_eq!(event.seq, i as u64 + 1, "event seqs are dense");
        event.verify(&auth).unwrap();
    }
    assert!(state
        .event_log
        .iter()
        .any(|e| matches!(e.kind, duelster::engine::EventKind::MatchFinished { .. })));
}

#[tokio::test]
async fn trade_swaps_cards_atomically() {
    let (_mesh, node, bus) = single_node();
    let (match_id, alice, bob) = crafted_match(
        &node,
        &bus,
        vec![card("Mago", Suit::Hearts, 40), card("Golem", Suit::Clubs, 20)],
        vec![card("Hidra", Suit::Spades, 70), card("Vampiro", Suit::Diamonds, 30)],
    )
    .await;

    let state = node.engine.snapshot(match_id).unwrap();
    let offered = state.hands[&alice][0].id;
    let desired = state.hands[&bob][1].id;

    node.engine
        .submit(
            match_id,
            alice,
            MatchCommand::Trade {
                target_id: bob,
                offered_card_id: offered,
                desired_card_id: desired,
            },
        )
        .await
        .unwrap();

    let state = node.engine.snapshot(match_id).unwrap();
    assert!(state.hands[&bob].iter().any(|c| c.id == offered));
    assert!(state.hands[&alice].iter().any(|c| c.id == desired));
    assert_eq!(state.hands[&alice].len(), 2);
    assert_eq!(state.hands[&bob].len(), 2);

    for client in [alice, bob] {
        assert!(
            bus.client_events(&client.to_string())
                .iter()
                .any(|e| matches!(e, ClientEvent::TradeDone { .. })),
            "TRADE_DONE not delivered to {client}"
        );
    }

    // trading a card that is not in the hand is rejected
    let bogus = node
        .engine
        .submit(
            match_id,
            alice,
            MatchCommand::Trade {
                target_id: bob,
                offered_card_id: offered, // now owned by bob
                desired_card_id: desired,
            },
        )
        .await;
    assert!(bogus.is_err());
}

#[tokio::test]
async fn chat_is_broadcast_on_the_match_topic() {
    let (_mesh, node, bus) = single_node();
    let (match_id, alice, _bob) = crafted_match(
        &node,
        &bus,
        vec![card("Mago", Suit::Hearts, 40)],
        vec![card("Hidra", Suit::Spades, 70)],
    )
    .await;

    node.handle_inbound(
        InboundTopic::MatchCommands { match_id },
        ClientCommand::Chat {
            client_id: alice,
            text: "boa sorte!".to_string(),
        },
    )
    .await;

    let chat = bus
        .match_events(match_id)
        .iter()
        .find_map(|e| match e {
            ClientEvent::ChatReceived { player_name, text } => {
                Some((player_name.clone(), text.clone()))
            }
            _ => None,
        })
        .expect("CHAT_RECEIVED not delivered");
    assert_eq!(chat, ("alice".to_string(), "boa sorte!".to_string()));
}

#[tokio::test]
async fn unpurchased_match_is_reclaimed_and_players_requeued() {
    let (_mesh, node, bus) = single_node();
    let alice = login(&node, &bus, "tmp-a", "alice").await;
    let bob = login(&node, &bus, "tmp-b", "bob").await;
    enqueue(&node, alice).await;
    enqueue(&node, bob).await;
    let match_id = found_match(&bus, alice);

    // neither player bought a pack; the sweep reclaims the match
    let seats = node.engine.expire_stale(Duration::ZERO).await;
    assert_eq!(seats.len(), 2);
    assert!(node.engine.snapshot(match_id).is_none());
    assert_eq!(node.players.match_of(alice).unwrap(), None);

    node.matchmaker.requeue_front(&seats);
    assert_eq!(node.matchmaker.depth(), 2);

    for client in [alice, bob] {
        assert!(
            bus.client_events(&client.to_string())
                .iter()
                .any(|e| matches!(e, ClientEvent::Error { .. })),
            "abort notice missing for {client}"
        );
    }
}

#[tokio::test]
async fn buy_pack_without_a_match_reports_an_error() {
    let (_mesh, node, bus) = single_node();
    let alice = login(&node, &bus, "tmp-a", "alice").await;
    buy_pack(&node, alice).await;
    assert!(matches!(
        bus.client_events(&alice.to_string()).last(),
        Some(ClientEvent::Error { .. })
    ));
}
