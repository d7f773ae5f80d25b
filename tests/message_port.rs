use revent::{Error, EventContext, EventFlags, EventKind, MessagePort};

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[test]
fn test_put_get_preserves_fifo_order() {
    let port = MessagePort::new();

    for n in 0..10u32 {
        port.put(n);
    }
    assert_eq!(port.len(), 10, "Queue length should count queued payloads");

    for n in 0..10u32 {
        let got = port
            .get(Some(Duration::ZERO))
            .expect("Non-empty port should yield immediately");
        assert_eq!(got, n, "Payloads must come out in the order they went in");
    }
    assert!(port.is_empty());
}

#[test]
fn test_get_zero_timeout_on_empty_port_times_out() {
    let port: MessagePort<u32> = MessagePort::new();

    let started = Instant::now();
    let result = port.get(Some(Duration::ZERO));

    assert!(
        matches!(result, Err(Error::TimedOut)),
        "Zero timeout on an empty port should report TimedOut"
    );
    assert!(
        started.elapsed() < Duration::from_millis(50),
        "Zero timeout must not block"
    );
}

#[test]
fn test_get_times_out_after_bound() {
    let port: MessagePort<u32> = MessagePort::new();

    let started = Instant::now();
    let result = port.get(Some(Duration::from_millis(50)));
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(Error::TimedOut)));
    assert!(
        elapsed >= Duration::from_millis(50),
        "Timed get should wait out its bound"
    );
    assert!(
        elapsed < Duration::from_millis(500),
        "Timed get should not overshoot wildly"
    );
}

#[test]
fn test_blocking_get_wakes_on_put() {
    let port: MessagePort<u32> = MessagePort::new();

    let producer = {
        let port = port.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            port.put(7);
        })
    };

    let got = port.get(None).expect("Blocking get should return on put");
    assert_eq!(got, 7);

    producer.join().unwrap();
}

#[test]
fn test_second_binding_is_busy_until_first_is_canceled() {
    let ctx = EventContext::new();
    let port: MessagePort<u32> = MessagePort::new();

    let first = ctx
        .register(EventKind::port(&port), EventFlags::default(), || {})
        .expect("First binding should succeed");

    let second = ctx.register(EventKind::port(&port), EventFlags::default(), || {});
    assert!(
        matches!(second, Err(Error::Busy)),
        "Binding a second live event to a port must fail with Busy"
    );

    first.unregister();

    let third = ctx
        .register(EventKind::port(&port), EventFlags::default(), || {})
        .expect("Binding should succeed again once the first event is canceled");
    third.unregister();
}

#[test]
fn test_recurring_port_event_is_invalid() {
    let ctx = EventContext::new();
    let port: MessagePort<u32> = MessagePort::new();

    let result = ctx.register(
        EventKind::port(&port),
        EventFlags {
            recurring: true,
            ..Default::default()
        },
        || {},
    );

    assert!(
        matches!(result, Err(Error::InvalidArgument)),
        "Recurring port events should be rejected"
    );
}

/// Re-arms a port event that drains every queued payload into `seen`.
/// The binding is one-shot, so the callback registers its successor
/// after draining; a payload that lands in between is picked up by the
/// dispatcher's direct queue-length check.
fn arm_drain(ctx: &EventContext, port: &MessagePort<u32>, seen: &Arc<Mutex<Vec<u32>>>) {
    let cb_ctx = ctx.clone();
    let cb_port = port.clone();
    let cb_seen = seen.clone();

    ctx.register(EventKind::port(port), EventFlags::default(), move || {
        while let Ok(v) = cb_port.get(Some(Duration::ZERO)) {
            cb_seen.lock().unwrap().push(v);
        }
        arm_drain(&cb_ctx, &cb_port, &cb_seen);
    })
    .expect("re-arming the port event should succeed");
}

#[test]
fn test_concurrent_puts_all_drained_exactly_once() {
    const THREADS: u32 = 10;
    const PER_THREAD: u32 = 10;

    let ctx = EventContext::new();
    let port: MessagePort<u32> = MessagePort::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    arm_drain(&ctx, &port, &seen);

    let producers: Vec<_> = (0..THREADS)
        .map(|t| {
            let port = port.clone();
            std::thread::spawn(move || {
                for i in 0..PER_THREAD {
                    port.put(t * PER_THREAD + i);
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if seen.lock().unwrap().len() as u32 == THREADS * PER_THREAD {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    let mut drained = seen.lock().unwrap().clone();
    drained.sort_unstable();
    let expected: Vec<u32> = (0..THREADS * PER_THREAD).collect();
    assert_eq!(
        drained, expected,
        "Every payload must be drained exactly once, with no loss or duplication"
    );
}

#[test]
fn test_port_arrival_wakes_context() {
    let ctx = EventContext::new();
    let port: MessagePort<&'static str> = MessagePort::new();
    let (tx, rx) = std::sync::mpsc::channel();

    let cb_port = port.clone();
    ctx.register(EventKind::port(&port), EventFlags::default(), move || {
        let payload = cb_port
            .get(Some(Duration::ZERO))
            .expect("arrival event implies a queued payload");
        let _ = tx.send(payload);
    })
    .expect("registration should succeed");

    port.put("hello");

    let payload = rx
        .recv_timeout(Duration::from_millis(500))
        .expect("Arrival should wake the context and service the event");
    assert_eq!(payload, "hello");
}

#[test]
fn test_put_racing_registration_is_serviced() {
    // A put may land in the window between the port binding and the
    // registration taking the context lock; the arrival must still be
    // serviced even with unrelated pending work ahead of it in the
    // queue. Repeated with a producer burst to give the window a real
    // chance of being hit.
    for _ in 0..300 {
        let ctx = EventContext::new();

        // Pending head that never occurs, so a mis-ordered arrival
        // cannot be rescued by reaching the queue front on its own.
        let head = ctx
            .register(EventKind::manual(), EventFlags::default(), || {})
            .expect("registration should succeed");

        let port: MessagePort<u32> = MessagePort::new();
        let (tx, rx) = std::sync::mpsc::channel();

        let producer = {
            let port = port.clone();
            std::thread::spawn(move || {
                for n in 0..8u32 {
                    port.put(n);
                }
            })
        };

        ctx.register(EventKind::port(&port), EventFlags::default(), move || {
            let _ = tx.send(());
        })
        .expect("registration should succeed");

        producer.join().unwrap();

        rx.recv_timeout(Duration::from_secs(2))
            .expect("A payload arriving during registration must be serviced");

        head.unregister();
    }
}

#[test]
fn test_serviced_port_event_releases_binding() {
    let ctx = EventContext::new();
    let port: MessagePort<u32> = MessagePort::new();
    let (tx, rx) = std::sync::mpsc::channel();

    // Payload present before binding, so the event is serviced through
    // the dispatcher's queue-length check and no put detaches the
    // binding.
    port.put(1);

    let sentinel = Arc::new(());
    let cb_sentinel = sentinel.clone();
    ctx.register(EventKind::port(&port), EventFlags::default(), move || {
        let _ = &cb_sentinel;
        let _ = tx.send(());
    })
    .expect("registration should succeed");

    rx.recv_timeout(Duration::from_millis(500))
        .expect("Pre-queued payload should be serviced");

    // Once serviced, nothing may keep the event or its callback alive;
    // a retained binding would hold the sentinel through the port.
    let watch = Arc::downgrade(&sentinel);
    drop(sentinel);

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && watch.upgrade().is_some() {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(
        watch.upgrade().is_none(),
        "A serviced port event must not stay bound to the port"
    );
}

#[test]
fn test_messages_queued_before_binding_are_seen() {
    let ctx = EventContext::new();
    let port: MessagePort<u32> = MessagePort::new();
    let (tx, rx) = std::sync::mpsc::channel();

    // Payload arrives before any event is bound; the dispatcher's
    // level check must still mark the later registration occurred.
    port.put(99);

    let cb_port = port.clone();
    ctx.register(EventKind::port(&port), EventFlags::default(), move || {
        let _ = tx.send(cb_port.get(Some(Duration::ZERO)).unwrap());
    })
    .expect("registration should succeed");

    let payload = rx
        .recv_timeout(Duration::from_millis(500))
        .expect("Pre-queued payload should be noticed at registration");
    assert_eq!(payload, 99);
}
