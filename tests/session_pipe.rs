//! Session engine behaviour over in-memory pipes: the STARTDT lifecycle,
//! both window bounds, the protocol timers and full-load sequence wrap.

use std::time::Duration;

use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::time::Instant;

use iec60870::error::IecError;
use iec60870::iec104::{Apci, Apdu, Iec104Config, Level, Outbound, Session, UFunction};

fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn cfg(k: u16, w: u16) -> Iec104Config {
    let mut cfg = Iec104Config::default();
    cfg.k = k;
    cfg.w = w;
    cfg
}

fn pair(a: Iec104Config, b: Iec104Config) -> (Session, Session) {
    let (left, right) = duplex(1 << 16);
    (
        Session::spawn(left, a).unwrap(),
        Session::spawn(right, b).unwrap(),
    )
}

async fn wait_level(session: &mut Session, want: Level) {
    while session.level() != want {
        session.level_changed().await.expect("engine gone");
    }
}

#[tokio::test]
async fn startdt_handshake_carries_data() {
    trace_init();
    let (mut ctl, mut rtu) = pair(cfg(12, 8), cfg(12, 8));

    ctl.bring_up().await.unwrap();
    assert_eq!(ctl.level(), Level::Up);
    wait_level(&mut rtu, Level::Up).await;

    ctl.send(vec![1, 2, 3, 4]).await.unwrap();
    assert_eq!(rtu.recv().await.unwrap(), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn remote_stopdt_reenters_down() {
    let (mut ctl, mut rtu) = pair(cfg(12, 8), cfg(12, 8));
    ctl.bring_up().await.unwrap();
    wait_level(&mut rtu, Level::Up).await;

    rtu.bring_down().await.unwrap();
    assert_eq!(rtu.level(), Level::Down);
    wait_level(&mut ctl, Level::Down).await;
}

#[tokio::test(start_paused = true)]
async fn send_window_blocks_until_peer_acks() {
    // k = 2 on the sending side; the receiver acknowledges at t2 only.
    let (mut ctl, mut rtu) = pair(cfg(2, 8), cfg(12, 8));
    ctl.bring_up().await.unwrap();
    tokio::spawn(async move { while rtu.recv().await.is_some() {} });

    let queue = ctl.class1();
    let start = Instant::now();
    let mut confirms = Vec::new();
    for i in 0..4u8 {
        let (done, confirmed) = oneshot::channel();
        queue
            .send(Outbound {
                payload: vec![i],
                done,
            })
            .await
            .unwrap();
        confirms.push(confirmed);
    }

    let mut elapsed = Vec::new();
    for confirmed in confirms {
        confirmed.await.unwrap().unwrap();
        elapsed.push(start.elapsed());
    }

    // The first two ride the t2 acknowledgement; the second two could only
    // leave after it.
    assert!(elapsed[1] >= Duration::from_secs(10), "{elapsed:?}");
    assert!(elapsed[2] >= Duration::from_secs(20), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn recv_window_acks_immediately_at_w() {
    let (mut ctl, mut rtu) = pair(cfg(12, 8), cfg(12, 4));
    ctl.bring_up().await.unwrap();
    tokio::spawn(async move { while rtu.recv().await.is_some() {} });

    // Exactly w frames: the w-th triggers an S-frame without waiting t2.
    let queue = ctl.class1();
    let start = Instant::now();
    let mut confirms = Vec::new();
    for i in 0..4u8 {
        let (done, confirmed) = oneshot::channel();
        queue
            .send(Outbound {
                payload: vec![i],
                done,
            })
            .await
            .unwrap();
        confirms.push(confirmed);
    }
    for confirmed in confirms {
        confirmed.await.unwrap().unwrap();
    }
    assert!(start.elapsed() < Duration::from_secs(5));

    // Below w the confirmations have to sit out the peer's t2.
    let start = Instant::now();
    let mut confirms = Vec::new();
    for i in 0..3u8 {
        let (done, confirmed) = oneshot::channel();
        queue
            .send(Outbound {
                payload: vec![i],
                done,
            })
            .await
            .unwrap();
        confirms.push(confirmed);
    }
    for confirmed in confirms {
        confirmed.await.unwrap().unwrap();
    }
    assert!(start.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn unanswered_keep_alive_closes_connection() {
    let (io, mut peer) = duplex(1 << 12);
    let mut cfg = cfg(12, 8);
    cfg.idle_timeout = Duration::from_secs(1);
    cfg.send_timeout = Duration::from_secs(2);
    let mut session = Session::spawn(io, cfg).unwrap();

    // The idle timer asks for a sign of life; nobody answers.
    let mut frame = [0u8; 6];
    peer.read_exact(&mut frame).await.unwrap();
    assert_eq!(
        Apdu::decode(&frame).unwrap().apci,
        Apci::U(UFunction::TestFrAct)
    );

    assert!(matches!(
        session.next_error().await,
        Some(IecError::AckTimeout)
    ));
    wait_level(&mut session, Level::Exit).await;
}

#[tokio::test]
async fn inbound_sequence_disruption_is_fatal() {
    let (io, mut peer) = duplex(1 << 12);
    let mut session = Session::spawn(io, cfg(12, 8)).unwrap();

    let rogue = Apdu::new_i(5, 0, vec![0xAA]).encode().unwrap();
    peer.write_all(&rogue).await.unwrap();

    assert!(matches!(
        session.next_error().await,
        Some(IecError::SeqDisruption { expect: 0, got: 5 })
    ));
}

#[tokio::test]
async fn ack_beyond_sent_is_fatal() {
    let (io, mut peer) = duplex(1 << 12);
    let mut session = Session::spawn(io, cfg(12, 8)).unwrap();

    peer.write_all(&Apdu::new_s(3).encode().unwrap())
        .await
        .unwrap();

    assert!(matches!(
        session.next_error().await,
        Some(IecError::AckBeyondSent { ack: 3 })
    ));
}

#[tokio::test]
async fn unknown_u_function_is_fatal() {
    let (io, mut peer) = duplex(1 << 12);
    let mut session = Session::spawn(io, cfg(12, 8)).unwrap();

    peer.write_all(&[0x68, 0x04, 0xFF, 0x00, 0x00, 0x00])
        .await
        .unwrap();

    assert!(matches!(
        session.next_error().await,
        Some(IecError::UnknownUFunction(0xFF))
    ));
}

#[tokio::test]
async fn lost_peer_fails_in_flight_outbounds() {
    let (io, peer) = duplex(1 << 12);
    let mut session = Session::spawn(io, cfg(12, 8)).unwrap();

    // Fake the peer's STARTDT side so the session comes up.
    let (mut peer_rd, mut peer_wr) = tokio::io::split(peer);
    let up = tokio::spawn(async move {
        let mut frame = [0u8; 6];
        peer_rd.read_exact(&mut frame).await.unwrap();
        assert_eq!(
            Apdu::decode(&frame).unwrap().apci,
            Apci::U(UFunction::StartDtAct)
        );
        peer_wr
            .write_all(&Apdu::new_u(UFunction::StartDtCon).encode().unwrap())
            .await
            .unwrap();
        (peer_rd, peer_wr)
    });
    session.bring_up().await.unwrap();
    let halves = up.await.unwrap();

    let queue = session.class1();
    let (done, confirmed) = oneshot::channel();
    queue
        .send(Outbound {
            payload: vec![9],
            done,
        })
        .await
        .unwrap();

    // The peer disappears without acknowledging anything.
    drop(halves);
    assert!(matches!(confirmed.await.unwrap(), Err(IecError::ConnectionLost)));
}

/// Scenario: both directions push past the 15-bit sequence space; every
/// payload arrives once, in order, and the session still closes cleanly.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sequence_numbers_wrap_under_load() {
    trace_init();
    const N: u32 = (1 << 15) + 99;

    let mut fast_ack = cfg(1024, 512);
    fast_ack.recv_ack_delay = Duration::from_secs(1);
    let (mut ctl, mut rtu) = pair(fast_ack.clone(), fast_ack);
    ctl.bring_up().await.unwrap();
    wait_level(&mut rtu, Level::Up).await;

    fn payload(i: u32) -> Vec<u8> {
        i.to_le_bytes().to_vec()
    }

    async fn push(queue: tokio::sync::mpsc::Sender<Outbound>) {
        let mut confirms = Vec::with_capacity(N as usize);
        for i in 0..N {
            let (done, confirmed) = oneshot::channel();
            queue
                .send(Outbound {
                    payload: payload(i),
                    done,
                })
                .await
                .unwrap();
            confirms.push(confirmed);
        }
        for confirmed in confirms {
            confirmed.await.unwrap().unwrap();
        }
    }

    let push_ctl = tokio::spawn(push(ctl.class1()));
    let push_rtu = tokio::spawn(push(rtu.class1()));

    let drain_rtu = tokio::spawn(async move {
        for i in 0..N {
            assert_eq!(rtu.recv().await.unwrap(), payload(i));
        }
        rtu
    });
    let drain_ctl = tokio::spawn(async move {
        for i in 0..N {
            assert_eq!(ctl.recv().await.unwrap(), payload(i));
        }
        ctl
    });

    push_ctl.await.unwrap();
    push_rtu.await.unwrap();
    let ctl = drain_ctl.await.unwrap();
    let mut rtu = drain_rtu.await.unwrap();

    ctl.stop().await;
    wait_level(&mut rtu, Level::Exit).await;
}
