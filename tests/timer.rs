use revent::{EventContext, EventFlags, EventKind};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

#[test]
fn test_one_shot_timer_fires_after_delay() {
    let ctx = EventContext::new();
    let (tx, rx) = mpsc::channel();

    let registered_at = Instant::now();
    let handle = ctx
        .register(
            EventKind::timer(Duration::from_millis(50)),
            EventFlags::default(),
            move || {
                let _ = tx.send(Instant::now());
            },
        )
        .expect("registration should succeed");

    let fired_at = rx
        .recv_timeout(Duration::from_millis(500))
        .expect("Timer should fire within the slack bound");

    assert!(
        fired_at - registered_at >= Duration::from_millis(50),
        "Timer must not fire before its delay elapses"
    );
    assert!(!handle.is_active(), "One-shot timer should be consumed");
}

#[test]
fn test_one_shot_timer_fires_only_once() {
    let ctx = EventContext::new();
    let count = Arc::new(AtomicUsize::new(0));

    let cb_count = count.clone();
    ctx.register(
        EventKind::timer(Duration::from_millis(20)),
        EventFlags::default(),
        move || {
            cb_count.fetch_add(1, Ordering::SeqCst);
        },
    )
    .expect("registration should succeed");

    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(
        count.load(Ordering::SeqCst),
        1,
        "A non-recurring timer must fire exactly once"
    );
}

#[test]
fn test_recurring_timer_reregisters_and_keeps_cadence() {
    const DELAY: Duration = Duration::from_millis(20);
    const TICKS: usize = 5;

    let ctx = EventContext::new();
    let count = Arc::new(AtomicUsize::new(0));

    let registered_at = Instant::now();
    let cb_count = count.clone();
    let handle = ctx
        .register(
            EventKind::timer(DELAY),
            EventFlags {
                recurring: true,
                ..Default::default()
            },
            move || {
                cb_count.fetch_add(1, Ordering::SeqCst);
            },
        )
        .expect("registration should succeed");

    let deadline = Instant::now() + Duration::from_secs(5);
    while count.load(Ordering::SeqCst) < TICKS && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    let elapsed = registered_at.elapsed();

    let ticks = count.load(Ordering::SeqCst);
    assert!(ticks >= TICKS, "Recurring timer should keep firing");

    // Each firing waits out its full delay before the next is armed, so
    // N firings cannot complete in less than N * delay.
    assert!(
        elapsed >= DELAY * TICKS as u32,
        "Gap between successive firings must never undercut the delay"
    );

    assert!(
        handle.is_active(),
        "Recurring timer should still be registered after firing"
    );

    handle.unregister();
    std::thread::sleep(Duration::from_millis(100));
    let settled = count.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(
        count.load(Ordering::SeqCst),
        settled,
        "Recurring timer must stop once unregistered"
    );
}

#[test]
fn test_trigger_fires_timer_early() {
    let ctx = EventContext::new();
    let (tx, rx) = mpsc::channel();

    let handle = ctx
        .register(
            EventKind::timer(Duration::from_secs(60)),
            EventFlags::default(),
            move || {
                let _ = tx.send(());
            },
        )
        .expect("registration should succeed");

    handle.trigger();

    rx.recv_timeout(Duration::from_millis(500))
        .expect("Triggering should service a timer ahead of its deadline");
}
