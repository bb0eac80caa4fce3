//! Message ordering, the name registry, links, monitors and delivery through
//! a transport, exercised through the public API.

use beamless::runtime::{self, RegistryError};
use beamless::{
    Atom, Content, DeliveryOutcome, ExitReason, Message, Pid, Runtime, RuntimeHandle, Term,
    Transport,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

fn idle() -> impl std::future::Future<Output = ()> {
    async { while runtime::recv().await.is_ok() {} }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn messages_between_a_pair_arrive_in_send_order() {
    let rt = Runtime::new("fifo@test").handle();
    let (tx, rx) = oneshot::channel();
    let receiver = rt.spawn(move || async move {
        let mut seen = Vec::new();
        while seen.len() < 500 {
            if let Ok(Message { content: Content::Info(term), .. }) = runtime::recv().await {
                seen.push(u32::decode(&term).unwrap());
            }
        }
        let _ = tx.send(seen);
    });

    rt.spawn(move || async move {
        for i in 0..500u32 {
            runtime::send(receiver, &i).unwrap();
        }
    });

    let seen = rx.await.unwrap();
    assert_eq!(seen, (0..500).collect::<Vec<_>>());
}

#[tokio::test]
async fn a_taken_name_keeps_its_binding() {
    let rt = Runtime::new("names@test").handle();
    let first = rt.spawn(idle);
    let second = rt.spawn(idle);

    rt.registry().register("db", first).unwrap();
    assert_eq!(
        rt.registry().register("db", second),
        Err(RegistryError::NameTaken {
            name: "db".into(),
            holder: first,
        })
    );
    assert_eq!(rt.registry().whereis("db"), Some(first));

    rt.exit(first, ExitReason::Killed);
    rt.join(first).await;
    rt.registry().register("db", second).unwrap();
    assert_eq!(rt.registry().whereis("db"), Some(second));
}

#[tokio::test]
async fn links_carry_exits_both_ways() {
    let rt = Runtime::new("links@test").handle();

    let victim = rt.spawn(idle);
    rt.spawn_link(victim, || async { ExitReason::error("boom") });
    assert_eq!(rt.join(victim).await, ExitReason::error("boom"));

    let (tx, rx) = oneshot::channel();
    let trapper = rt.spawn(move || async move {
        runtime::context().set_trap_exit(true);
        let child = runtime::context().spawn_link(|| async { ExitReason::error("boom") });
        let message = runtime::recv().await.unwrap();
        let _ = tx.send((child, message));
        idle().await;
    });

    let (child, message) = rx.await.unwrap();
    assert_eq!(message.from, child);
    assert!(matches!(message.content, Content::Exit(ExitReason::Error(ref e)) if e == "boom"));
    assert!(rt.is_alive(trapper));
}

#[tokio::test]
async fn normal_exits_do_not_kill_linked_peers() {
    let rt = Runtime::new("normal@test").handle();
    let peer = rt.spawn(idle);
    let quitter = rt.spawn_link(peer, || async {});
    rt.join(quitter).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rt.is_alive(peer));
}

#[tokio::test]
async fn a_monitor_reports_one_down() {
    let rt = Runtime::new("monitors@test").handle();
    let (tx, rx) = oneshot::channel();
    rt.spawn(move || async move {
        let (pid, reference) = runtime::context().spawn_monitor(|| async { ExitReason::Shutdown });
        let down = runtime::recv().await.unwrap();
        let again = runtime::recv_timeout(Duration::from_millis(50)).await;
        let _ = tx.send((pid, reference, down, again.is_err()));
    });

    let (pid, reference, down, nothing_more) = rx.await.unwrap();
    assert_eq!(down.from, pid);
    assert!(matches!(
        down.content,
        Content::Down { reference: r, reason: ExitReason::Shutdown } if r == reference
    ));
    assert!(nothing_more);
}

/// Two runtimes wired back to back in memory.
struct Wire {
    local: Atom,
    peer: Mutex<Option<RuntimeHandle>>,
}

impl Transport for Wire {
    fn local_node_name(&self) -> Atom {
        self.local
    }

    fn deliver_remote(&self, _to: Pid, message: Message) -> DeliveryOutcome {
        match &*self.peer.lock() {
            Some(peer) => peer.deliver_incoming(message),
            None => DeliveryOutcome::NodeUnreachable,
        }
    }
}

#[tokio::test]
async fn remote_pids_go_through_the_transport() {
    let a_wire = Arc::new(Wire {
        local: Atom::new("a@wire"),
        peer: Mutex::new(None),
    });
    let b_wire = Arc::new(Wire {
        local: Atom::new("b@wire"),
        peer: Mutex::new(None),
    });
    let a = Runtime::with_transport(a_wire.clone()).handle();
    let b = Runtime::with_transport(b_wire.clone()).handle();

    let (tx, rx) = oneshot::channel();
    let listener = b.spawn(move || async move {
        let message = runtime::recv().await.unwrap();
        let _ = tx.send(message);
    });

    assert!(matches!(
        a.send(listener, &"hello".to_string()),
        Err(beamless::runtime::SendError::NodeUnreachable(node)) if node == Atom::new("b@wire")
    ));

    *a_wire.peer.lock() = Some(b.clone());
    *b_wire.peer.lock() = Some(a.clone());

    let sender = a.spawn(move || async move {
        runtime::send(listener, &"hello".to_string()).unwrap();
    });

    let message = rx.await.unwrap();
    assert_eq!(message.from, sender);
    assert_eq!(message.from.node(), Atom::new("a@wire"));
    match message.content {
        Content::Info(term) => assert_eq!(String::decode(&term).unwrap(), "hello"),
        other => panic!("expected Info, got {other:?}"),
    }

    b.join(listener).await;
    assert!(matches!(
        a.send(listener, &"late".to_string()),
        Err(beamless::runtime::SendError::NoProc(pid)) if pid == listener
    ));
}
