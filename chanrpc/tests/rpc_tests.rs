//! Integration tests: clients on their own threads against a server driven by
//! an owner loop.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use chanrpc::{CallError, Callback, Server, ServerConfig, Value};
use common::{Owner, init_tracing};

fn arith_server(capacity: usize) -> Server<&'static str, i64> {
    let mut server: Server<&'static str, i64> = Server::new(capacity);
    server.register_one("add", |args| args[0] + args[1]);
    server.register_zero("boom", |_| panic!("boom"));
    server.register_many("range", |args| (0..args[0]).collect());
    server.register_one("echo", |args| args[0]);
    server
}

#[test]
fn test_sync_add() {
    init_tracing();
    let owner = Owner::spawn(arith_server(16));

    let mut client = owner.handle().open_client(0);
    assert_eq!(client.call1("add", vec![2, 3]), Ok(5));
    assert_eq!(client.calln("range", vec![4]), Ok(vec![0, 1, 2, 3]));
    client.close();

    assert_eq!(owner.stop(), 2);
}

#[test]
fn test_panicking_operation_keeps_server_alive() {
    init_tracing();
    let owner = Owner::spawn(arith_server(16));

    let mut client = owner.handle().open_client(0);
    let err = client.call0("boom", vec![]).unwrap_err();
    assert!(err.is_fault());
    assert_eq!(err.to_string(), "boom");

    assert_eq!(client.call1("add", vec![40, 2]), Ok(42));
    client.close();
    owner.stop();
}

#[inline(never)]
fn exploding_operation(_args: Vec<i64>) {
    panic!("boom")
}

#[test]
fn test_fault_trace_capture() {
    init_tracing();
    let mut server: Server<&'static str, i64> =
        Server::with_config(ServerConfig::new(4).with_trace_len(256));
    server.register_zero("boom", |_| panic!("boom"));
    let owner = Owner::spawn(server);

    let mut client = owner.handle().open_client(0);
    match client.call0("boom", vec![]) {
        Err(CallError::Fault {
            message,
            trace: Some(trace),
        }) => {
            assert_eq!(message, "boom");
            assert!(!trace.is_empty() && trace.len() <= 256);
        }
        other => panic!("expected a traced fault, got {other:?}"),
    }
    client.close();
    owner.stop();
}

#[test]
fn test_fault_trace_names_failing_operation() {
    init_tracing();
    let mut server: Server<&'static str, i64> =
        Server::with_config(ServerConfig::new(4).with_trace_len(1 << 20));
    server.register_zero("explode", exploding_operation);
    let owner = Owner::spawn(server);

    let mut client = owner.handle().open_client(0);
    match client.call0("explode", vec![]) {
        Err(CallError::Fault {
            trace: Some(trace), ..
        }) => assert!(trace.contains("exploding_operation"), "{trace}"),
        other => panic!("expected a traced fault, got {other:?}"),
    }
    client.close();
    owner.stop();
}

#[test]
fn test_async_calls_acknowledged_on_close() {
    init_tracing();
    let owner = Owner::spawn(arith_server(64));
    let acked = Arc::new(AtomicUsize::new(0));

    let mut client = owner.handle().open_client(64);
    for i in 0..50 {
        let a = Arc::clone(&acked);
        client.async_call1("add", vec![i, i], move |r| {
            assert_eq!(r, Ok(2 * i));
            a.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(client.pending(), 50);
    client.close();

    assert_eq!(acked.load(Ordering::SeqCst), 50);
    owner.stop();
}

#[test]
fn test_async_results_are_fifo_per_client() {
    init_tracing();
    let num_clients = 4;
    let calls_per_client = 500;
    let owner = Owner::spawn(arith_server(num_clients * calls_per_client));

    let handles: Vec<_> = (0..num_clients)
        .map(|c| {
            let server = owner.handle().clone();
            thread::spawn(move || {
                let (seen_tx, seen_rx) = crossbeam_channel::unbounded();
                let mut client = server.open_client(calls_per_client);

                for i in 0..calls_per_client as i64 {
                    let seen = seen_tx.clone();
                    client.async_call1("echo", vec![c as i64 * 100_000 + i], move |r| {
                        seen.send(r.unwrap()).unwrap();
                    });
                    if i % 64 == 0 {
                        client.drain_ready();
                    }
                }
                client.close();
                drop(seen_tx);

                seen_rx.iter().collect::<Vec<i64>>()
            })
        })
        .collect();

    for (c, h) in handles.into_iter().enumerate() {
        let seen = h.join().unwrap();
        let expected: Vec<i64> = (0..calls_per_client as i64)
            .map(|i| c as i64 * 100_000 + i)
            .collect();
        assert_eq!(seen, expected);
    }

    assert_eq!(owner.stop(), num_clients * calls_per_client);
}

#[test]
fn test_concurrent_sync_clients() {
    init_tracing();
    // Small queue: sync pushes have to wait for space.
    let owner = Owner::spawn(arith_server(1));

    let handles: Vec<_> = (0..8)
        .map(|c| {
            let server = owner.handle().clone();
            thread::spawn(move || {
                let mut client = server.open_client(0);
                let mut sum = 0;
                for i in 0..100 {
                    sum += client.call1("add", vec![c, i]).unwrap();
                }
                client.close();
                sum
            })
        })
        .collect();

    for (c, h) in handles.into_iter().enumerate() {
        let c = c as i64;
        assert_eq!(h.join().unwrap(), 100 * c + (0..100).sum::<i64>());
    }
    owner.stop();
}

#[test]
fn test_server_close_fails_queued_sync_calls() {
    init_tracing();
    let server = arith_server(8);
    let blocked = 3;

    let handles: Vec<_> = (0..blocked)
        .map(|_| {
            let mut client = server.open_client(0);
            thread::spawn(move || client.call1("add", vec![1, 1]))
        })
        .collect();

    // Nobody dispatches; wait until every call is sitting in the queue.
    while server.len() < blocked {
        thread::sleep(Duration::from_millis(1));
    }
    server.close();

    for h in handles {
        assert_eq!(h.join().unwrap(), Err(CallError::ServerClosed));
    }
}

#[test]
fn test_server_close_fails_queued_async_calls() {
    init_tracing();
    let server = arith_server(8);
    let mut client = server.open_client(8);
    let failed = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
        let f = Arc::clone(&failed);
        client.async_call(
            "add",
            vec![1, 2],
            Callback::one(move |r| {
                assert_eq!(r, Err(CallError::ServerClosed));
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }
    assert_eq!(server.len(), 5);

    server.close();
    client.close();

    assert_eq!(failed.load(Ordering::SeqCst), 5);
}

#[test]
fn test_sync_push_blocked_on_full_queue_wakes_on_close() {
    init_tracing();
    let server = arith_server(1);
    server.go("add", vec![0, 0]);
    assert_eq!(server.len(), 1);

    let mut client = server.open_client(0);
    let caller = thread::spawn(move || client.call1("add", vec![1, 1]));

    thread::sleep(Duration::from_millis(20));
    server.close();

    assert_eq!(caller.join().unwrap(), Err(CallError::ServerClosed));
}

#[test]
fn test_go_from_handle() {
    init_tracing();
    let hits = Arc::new(AtomicUsize::new(0));
    let mut server: Server<&'static str, i64> = Server::new(16);

    let h = Arc::clone(&hits);
    server.register_zero("count", move |_| {
        h.fetch_add(1, Ordering::SeqCst);
    });
    let owner = Owner::spawn(server);

    // A handle can schedule work that nobody waits for.
    for _ in 0..10 {
        owner.handle().go("count", vec![]);
    }
    owner.handle().go("unknown", vec![]);

    let mut client = owner.handle().open_client(0);
    // Queue is FIFO: once this returns the ten self-submitted calls ran.
    client.call0("count", vec![]).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 11);
    client.close();
    owner.stop();
}

#[test]
fn test_dynamic_values() {
    init_tracing();
    let mut server: Server<String, Value> = Server::new(8);
    server.register_one("greet".to_string(), |args| {
        let name = args[0].downcast_ref::<String>().unwrap();
        let times = *args[1].downcast_ref::<usize>().unwrap();
        Box::new(format!("hello {}", name.repeat(times))) as Value
    });
    let owner = Owner::spawn(server);

    let mut client = owner.handle().open_client(0);
    let reply = client
        .call1(
            "greet",
            vec![Box::new("ab".to_string()) as Value, Box::new(2usize) as Value],
        )
        .unwrap();
    assert_eq!(reply.downcast_ref::<String>().unwrap(), "hello abab");
    client.close();
    owner.stop();
}
