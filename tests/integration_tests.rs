//! Integration tests for the session core and command correlator.
//!
//! These run a real mock game server over TCP and validate the connect
//! handshake, push dispatch, command correlation, and timeout settlement.

use client::socket::{read_message, write_message};
use client::{ClientConfig, ClientError, Context, Credentials, Session, SessionStatus};
use pathfinder::PathfinderBuilder;
use shared::data::{GameData, MapData, MapGeometry, MonsterData, SpawnPoint};
use shared::messages::{
    ActionData, CharacterSnapshot, ClientMessage, EntitiesData, EntitySnapshot, GameResponse,
    PlayerSnapshot, RefreshKind, ServerPush, StartData, WelcomeData,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

fn game_data() -> Arc<GameData> {
    let mut data = GameData::default();
    data.geometry.insert(
        "main".to_string(),
        MapGeometry {
            min_x: -100,
            min_y: -100,
            max_x: 100,
            max_y: 100,
            x_lines: vec![],
            y_lines: vec![],
        },
    );
    data.maps.insert(
        "main".to_string(),
        MapData {
            spawns: vec![SpawnPoint {
                x: 0.0,
                y: 0.0,
                facing: None,
            }],
            ..Default::default()
        },
    );
    data.monsters.insert(
        "phoenix".to_string(),
        MonsterData {
            hp: 300000.0,
            mp: 100.0,
            speed: 20.0,
            attack: 500.0,
            range: 20.0,
            frequency: 1.0,
            xp: 20000.0,
            damage_type: Some("magical".to_string()),
        },
    );
    Arc::new(data)
}

fn test_context() -> Arc<Context> {
    let data = game_data();
    let pathfinder = Arc::new(PathfinderBuilder::new(Arc::clone(&data)).prepare("main"));
    let config = ClientConfig {
        command_timeout: Duration::from_millis(300),
        connect_timeout: Duration::from_millis(1000),
        ping_every: Duration::from_secs(60),
        ..Default::default()
    };
    Arc::new(Context::new(data, pathfinder).with_config(config))
}

fn credentials() -> Credentials {
    Credentials {
        user_id: "user1".to_string(),
        user_auth: "secret".to_string(),
        character_id: "char1".to_string(),
    }
}

fn character_snapshot() -> CharacterSnapshot {
    CharacterSnapshot {
        id: "me".to_string(),
        map: "main".to_string(),
        x: 0.0,
        y: 0.0,
        speed: 50.0,
        hp: 1000.0,
        max_hp: 1000.0,
        mp: 500.0,
        max_mp: 600.0,
        mp_cost: 10.0,
        level: 10,
        ctype: "ranger".to_string(),
        gold: 10_000,
        range: 30.0,
        attack: 100.0,
        items: vec![None; 10],
        ..Default::default()
    }
}

fn welcome() -> ServerPush {
    ServerPush::Welcome(WelcomeData {
        region: "EU".to_string(),
        name: "I".to_string(),
        map: "main".to_string(),
        x: 0.0,
        y: 0.0,
        pvp: false,
    })
}

fn monster(id: &str, kind: &str, x: f64) -> EntitySnapshot {
    EntitySnapshot {
        id: id.to_string(),
        kind: kind.to_string(),
        map: None,
        x,
        y: 0.0,
        going_x: x,
        going_y: 0.0,
        moving: false,
        hp: None,
        max_hp: None,
        mp: None,
        speed: None,
        attack: None,
        range: None,
        level: None,
        xp: None,
        target: None,
        s: HashMap::new(),
    }
}

/// Performs the server side of the handshake: welcome, consume the loaded
/// acknowledgment and auth payload, then deliver the initial snapshot.
async fn serve_handshake(stream: &mut TcpStream, character: CharacterSnapshot) {
    write_message(stream, &welcome()).await.unwrap();

    let mut saw_auth = false;
    while !saw_auth {
        let message: ClientMessage = read_message(stream).await.unwrap();
        match message {
            ClientMessage::Loaded { success, .. } => assert!(success),
            ClientMessage::Auth { user, auth, .. } => {
                assert_eq!(user, "user1");
                assert_eq!(auth, "secret");
                saw_auth = true;
            }
            other => panic!("unexpected pre-start message: {:?}", other),
        }
    }

    write_message(
        stream,
        &ServerPush::Start(StartData {
            character,
            entities: None,
            server_info: HashMap::new(),
        }),
    )
    .await
    .unwrap();
}

async fn bind_server() -> (TcpListener, String) {
    let _ = env_logger::builder().is_test(true).try_init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    #[test]
    fn message_serialization_roundtrip() {
        let messages = vec![
            ClientMessage::Attack {
                id: "goo1".to_string(),
            },
            ClientMessage::Move {
                x: 0.0,
                y: 0.0,
                going_x: 25.0,
                going_y: -30.0,
                m: 2,
            },
            ClientMessage::Ping { id: 99 },
            ClientMessage::Respawn,
        ];

        for message in messages {
            let bytes = bincode::serialize(&message).unwrap();
            let decoded: ClientMessage = bincode::deserialize(&bytes).unwrap();
            match (&message, &decoded) {
                (ClientMessage::Attack { .. }, ClientMessage::Attack { .. }) => {}
                (ClientMessage::Move { .. }, ClientMessage::Move { .. }) => {}
                (ClientMessage::Ping { .. }, ClientMessage::Ping { .. }) => {}
                (ClientMessage::Respawn, ClientMessage::Respawn) => {}
                _ => panic!("message kind changed across the wire"),
            }
        }
    }

    #[test]
    fn push_serialization_roundtrip() {
        let push = ServerPush::Start(StartData {
            character: character_snapshot(),
            entities: Some(EntitiesData {
                kind: RefreshKind::Full,
                map: "main".to_string(),
                monsters: vec![monster("p1", "phoenix", -12.5)],
                players: vec![],
            }),
            server_info: HashMap::new(),
        });

        let bytes = bincode::serialize(&push).unwrap();
        let decoded: ServerPush = bincode::deserialize(&bytes).unwrap();
        match decoded {
            ServerPush::Start(start) => {
                assert_eq!(start.character.id, "me");
                let entities = start.entities.unwrap();
                assert_eq!(entities.monsters[0].kind, "phoenix");
                assert_eq!(entities.monsters[0].x, -12.5);
            }
            other => panic!("wrong push decoded: {:?}", other),
        }
    }
}

/// CONNECT HANDSHAKE TESTS
mod handshake_tests {
    use super::*;

    #[tokio::test]
    async fn connect_resolves_on_start_snapshot() {
        let (listener, addr) = bind_server().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            serve_handshake(&mut stream, character_snapshot()).await;
            // Keep the connection open until the client is done.
            let _ = read_message::<ClientMessage, _>(&mut stream).await;
        });

        let session = Session::connect(test_context(), &addr, credentials())
            .await
            .unwrap();
        assert_eq!(session.status(), SessionStatus::Ready);

        let character = session.character().await.unwrap();
        assert_eq!(character.id, "me");
        assert_eq!(character.map, "main");
        assert!(!character.moving);

        session.disconnect().await;
        server.abort();
    }

    #[tokio::test]
    async fn connect_times_out_without_start() {
        let (listener, addr) = bind_server().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            write_message(&mut stream, &welcome()).await.unwrap();
            // Never send the start snapshot.
            loop {
                if read_message::<ClientMessage, _>(&mut stream).await.is_err() {
                    break;
                }
            }
        });

        let result = Session::connect(test_context(), &addr, credentials()).await;
        assert!(matches!(result, Err(ClientError::Timeout { .. })));
    }

    #[tokio::test]
    async fn connect_rejects_on_game_error() {
        let (listener, addr) = bind_server().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            write_message(&mut stream, &welcome()).await.unwrap();
            loop {
                match read_message::<ClientMessage, _>(&mut stream).await {
                    Ok(ClientMessage::Auth { .. }) => {
                        write_message(
                            &mut stream,
                            &ServerPush::GameError {
                                message: "wrong password".to_string(),
                            },
                        )
                        .await
                        .unwrap();
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });

        let result = Session::connect(test_context(), &addr, credentials()).await;
        match result {
            Err(ClientError::Connection(message)) => {
                assert!(message.contains("wrong password"), "message: {}", message)
            }
            other => panic!("expected connection rejection, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn observer_connects_on_welcome_alone() {
        let (listener, addr) = bind_server().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            write_message(&mut stream, &welcome()).await.unwrap();
            loop {
                if read_message::<ClientMessage, _>(&mut stream).await.is_err() {
                    break;
                }
            }
        });

        let session = Session::observe(test_context(), &addr).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Ready);
        assert!(session.character().await.is_none());
        let position = session.position().await.unwrap();
        assert_eq!(position.map, "main");
        session.disconnect().await;
    }
}

/// COMMAND CORRELATION TESTS
mod command_tests {
    use super::*;

    /// Serves the handshake, then answers attacks per `on_attack` and
    /// counts how many attack messages arrived.
    async fn attack_server(
        listener: TcpListener,
        character: CharacterSnapshot,
        attacks_seen: Arc<AtomicUsize>,
        on_attack: impl Fn(u32, &str) -> Option<ServerPush> + Send + 'static,
    ) {
        let (mut stream, _) = listener.accept().await.unwrap();
        serve_handshake(&mut stream, character).await;

        loop {
            match read_message::<ClientMessage, _>(&mut stream).await {
                Ok(ClientMessage::Attack { id }) => {
                    let n = attacks_seen.fetch_add(1, Ordering::SeqCst) as u32;
                    if let Some(push) = on_attack(n, &id) {
                        write_message(&mut stream, &push).await.unwrap();
                    }
                }
                Ok(ClientMessage::Ping { id }) => {
                    write_message(&mut stream, &ServerPush::PingAck { id })
                        .await
                        .unwrap();
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }

    #[tokio::test]
    async fn attack_resolves_on_action_push() {
        let (listener, addr) = bind_server().await;
        let attacks = Arc::new(AtomicUsize::new(0));
        tokio::spawn(attack_server(
            listener,
            character_snapshot(),
            Arc::clone(&attacks),
            |_, target| {
                Some(ServerPush::Action(ActionData {
                    attacker: "me".to_string(),
                    target: target.to_string(),
                    kind: "attack".to_string(),
                    pid: "projectile1".to_string(),
                }))
            },
        ));

        let session = Session::connect(test_context(), &addr, credentials())
            .await
            .unwrap();
        let pid = session.attack("goo1").await.unwrap();
        assert_eq!(pid, "projectile1");
        session.disconnect().await;
    }

    #[tokio::test]
    async fn attack_with_insufficient_mp_rejects_without_traffic() {
        let (listener, addr) = bind_server().await;
        let attacks = Arc::new(AtomicUsize::new(0));
        let mut character = character_snapshot();
        character.mp = 5.0; // attack costs 10

        tokio::spawn(attack_server(
            listener,
            character,
            Arc::clone(&attacks),
            |_, _| None,
        ));

        let session = Session::connect(test_context(), &addr, credentials())
            .await
            .unwrap();

        let result = session.attack("goo1").await;
        assert!(matches!(result, Err(ClientError::Precondition(_))));

        // Nothing may have been emitted for the rejected command.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(attacks.load(Ordering::SeqCst), 0);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn attack_rejection_is_mapped() {
        let (listener, addr) = bind_server().await;
        let attacks = Arc::new(AtomicUsize::new(0));
        tokio::spawn(attack_server(
            listener,
            character_snapshot(),
            Arc::clone(&attacks),
            |_, target| {
                Some(ServerPush::GameResponse(GameResponse {
                    response: "too_far".to_string(),
                    id: Some(target.to_string()),
                    dist: Some(450.0),
                    ..Default::default()
                }))
            },
        ));

        let session = Session::connect(test_context(), &addr, credentials())
            .await
            .unwrap();
        let result = session.attack("goo1").await;
        match result {
            Err(ClientError::GameRejection(reason)) => {
                assert!(reason.contains("too far"), "reason: {}", reason)
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        session.disconnect().await;
    }

    #[tokio::test]
    async fn timed_out_command_settles_once_and_session_survives() {
        let (listener, addr) = bind_server().await;
        // First attack: no answer until after the client's deadline, then a
        // late success. Second attack: answered promptly.
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            serve_handshake(&mut stream, character_snapshot()).await;

            let mut seen = 0u32;
            loop {
                match read_message::<ClientMessage, _>(&mut stream).await {
                    Ok(ClientMessage::Attack { id }) => {
                        seen += 1;
                        let action = ServerPush::Action(ActionData {
                            attacker: "me".to_string(),
                            target: id,
                            kind: "attack".to_string(),
                            pid: format!("pid{}", seen),
                        });
                        if seen == 1 {
                            // Past the 300ms command deadline.
                            tokio::time::sleep(Duration::from_millis(450)).await;
                        }
                        write_message(&mut stream, &action).await.unwrap();
                    }
                    Ok(ClientMessage::Ping { id }) => {
                        write_message(&mut stream, &ServerPush::PingAck { id })
                            .await
                            .unwrap();
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });

        let session = Session::connect(test_context(), &addr, credentials())
            .await
            .unwrap();

        // The first settlement is the timeout; the late success is a no-op.
        let first = session.attack("goo1").await;
        assert!(matches!(first, Err(ClientError::Timeout { .. })));

        // The session and its correlator are still fully functional.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let second = session.attack("goo2").await.unwrap();
        assert_eq!(second, "pid2");
        session.disconnect().await;
    }
}

/// MIRRORED STATE TESTS
mod state_tests {
    use super::*;

    #[tokio::test]
    async fn entities_push_feeds_mirror_and_sighting_store() {
        let (listener, addr) = bind_server().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            serve_handshake(&mut stream, character_snapshot()).await;

            let push = ServerPush::Entities(EntitiesData {
                kind: RefreshKind::Incremental,
                map: "main".to_string(),
                monsters: vec![monster("p1", "phoenix", 50.0)],
                players: vec![PlayerSnapshot {
                    id: "ally".to_string(),
                    map: None,
                    x: 25.0,
                    y: 0.0,
                    going_x: 25.0,
                    going_y: 0.0,
                    moving: false,
                    speed: 60.0,
                    hp: 2000.0,
                    max_hp: 2000.0,
                    level: 50,
                    rip: false,
                    ctype: "priest".to_string(),
                    npc: None,
                    target: None,
                    s: HashMap::new(),
                    slots: HashMap::new(),
                }],
            });
            write_message(&mut stream, &push).await.unwrap();

            loop {
                if read_message::<ClientMessage, _>(&mut stream).await.is_err() {
                    break;
                }
            }
        });

        let context = test_context();
        let session = Session::connect(Arc::clone(&context), &addr, credentials())
            .await
            .unwrap();

        // Let the dispatcher process the push.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let entities = session.entities().await;
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].kind, "phoenix");
        // Soft-filled from the reference dataset.
        assert_eq!(entities[0].hp, 300000.0);

        let players = session.players().await;
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].id, "ally");

        // The rare monster and the player were published for other sessions.
        let sighting = context.sightings.entity("phoenix", "EU-I").unwrap();
        assert_eq!(sighting.map, "main");
        assert_eq!(sighting.x, 50.0);
        assert_eq!(context.sightings.player("ally").unwrap().x, 25.0);

        session.disconnect().await;
    }

    #[tokio::test]
    async fn eval_push_sets_cooldown() {
        let (listener, addr) = bind_server().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            serve_handshake(&mut stream, character_snapshot()).await;
            write_message(
                &mut stream,
                &ServerPush::Eval {
                    code: "skill_timeout('attack', 500)".to_string(),
                },
            )
            .await
            .unwrap();
            loop {
                if read_message::<ClientMessage, _>(&mut stream).await.is_err() {
                    break;
                }
            }
        });

        let session = Session::connect(test_context(), &addr, credentials())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let remaining = session.cooldown_remaining("attack").await;
        assert!(remaining > Duration::ZERO);
        assert!(remaining <= Duration::from_millis(500));
        session.disconnect().await;
    }
}

/// MOVEMENT TESTS
mod movement_tests {
    use super::*;

    #[tokio::test]
    async fn move_completes_via_extrapolation() {
        let (listener, addr) = bind_server().await;
        let moves_seen = Arc::new(AtomicUsize::new(0));
        let moves_for_server = Arc::clone(&moves_seen);
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut character = character_snapshot();
            character.speed = 1000.0;
            serve_handshake(&mut stream, character).await;
            loop {
                match read_message::<ClientMessage, _>(&mut stream).await {
                    Ok(ClientMessage::Move { going_x, going_y, .. }) => {
                        assert_eq!((going_x, going_y), (10.0, 0.0));
                        moves_for_server.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });

        let session = Session::connect(test_context(), &addr, credentials())
            .await
            .unwrap();

        let arrived = session.move_to(10.0, 0.0).await.unwrap();
        assert_eq!((arrived.x, arrived.y), (10.0, 0.0));
        assert_eq!(moves_seen.load(Ordering::SeqCst), 1);

        // The mirror clamped at the goal and stopped.
        let character = session.character().await.unwrap();
        assert_eq!((character.x, character.y), (10.0, 0.0));
        assert!(!character.moving);
        session.disconnect().await;
    }

    #[tokio::test]
    async fn smart_move_same_map_walks_straight() {
        let (listener, addr) = bind_server().await;
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut character = character_snapshot();
            character.speed = 1000.0;
            serve_handshake(&mut stream, character).await;
            loop {
                if read_message::<ClientMessage, _>(&mut stream).await.is_err() {
                    break;
                }
            }
        });

        let session = Session::connect(test_context(), &addr, credentials())
            .await
            .unwrap();

        let arrived = session
            .smart_move(
                shared::Position::new("main", 40.0, 40.0),
                client::SmartMoveOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(arrived.map, "main");
        assert_eq!((arrived.x, arrived.y), (40.0, 40.0));
        session.disconnect().await;
    }
}
