use std::{sync::Arc, time::Duration};

use config::{
    LongPress, MacroStep, Mapping, PadAction, PadColor, Profile, Repeat, VelocityRule,
};
use padgrid_engine::{Engine, EngineConfig, MockInjector, MockTransport};
use padgrid_protocol::Event;

const VEL_TABLE_PAD: u8 = 11;
const REPEAT_PAD: u8 = 12;
const LONG_PRESS_PAD: u8 = 13;
const MACRO_PAD: u8 = 14;
const PUSH_PAD: u8 = 15;
const FALLBACK_PAD: u8 = 16;
const POP_PAD: u8 = 19;

/// A profile exercising every action kind: velocity table, repeat,
/// long press, macro, and layer push/pop.
fn test_profile() -> Profile {
    let mut p = Profile::new("Test", "Base");

    let mut vel = Mapping::key(VEL_TABLE_PAD, "fallback", PadColor::Palette("green".into()));
    vel.action = PadAction::Key {
        combo: "fallback".into(),
        velocity: vec![
            VelocityRule {
                lo: 0,
                hi: 42,
                combo: "a".into(),
            },
            VelocityRule {
                lo: 43,
                hi: 84,
                combo: "b".into(),
            },
            VelocityRule {
                lo: 85,
                hi: 127,
                combo: "c".into(),
            },
        ],
        repeat: None,
    };
    p.add_mapping(vel, None);

    let mut rep = Mapping::key(REPEAT_PAD, "held", PadColor::Palette("red".into()));
    rep.action = PadAction::Key {
        combo: "held".into(),
        velocity: Vec::new(),
        repeat: Some(Repeat {
            initial_delay_ms: 100,
            interval_ms: 50,
        }),
    };
    p.add_mapping(rep, None);

    let mut lp = Mapping::key(LONG_PRESS_PAD, "short", PadColor::Palette("blue".into()));
    lp.long_press = Some(LongPress {
        combo: "long".into(),
        threshold_ms: 500,
    });
    p.add_mapping(lp, None);

    let mut mac = Mapping::key(MACRO_PAD, "", PadColor::Palette("orange".into()));
    mac.action = PadAction::Macro {
        steps: vec![
            MacroStep {
                combo: "m1".into(),
                delay_after_ms: 50,
            },
            MacroStep {
                combo: "m2".into(),
                delay_after_ms: 0,
            },
        ],
    };
    p.add_mapping(mac, None);

    let mut push = Mapping::key(PUSH_PAD, "", PadColor::Palette("white".into()));
    push.action = PadAction::LayerPush {
        target: "Upper".into(),
    };
    p.add_mapping(push, None);

    let mut narrow = Mapping::key(FALLBACK_PAD, "fallback", PadColor::Palette("cyan".into()));
    narrow.action = PadAction::Key {
        combo: "fallback".into(),
        velocity: vec![VelocityRule {
            lo: 50,
            hi: 60,
            combo: "x".into(),
        }],
        repeat: None,
    };
    p.add_mapping(narrow, None);

    let mut pop = Mapping::key(POP_PAD, "", PadColor::Palette("pink".into()));
    pop.action = PadAction::LayerPop;
    p.add_mapping(pop, Some("Upper"));

    p
}

fn test_engine() -> (Engine, MockTransport, MockInjector) {
    let transport = MockTransport::new();
    let injector = MockInjector::new();
    let engine = Engine::with_config(
        Arc::new(transport.clone()),
        Arc::new(injector.clone()),
        test_profile(),
        EngineConfig::default(),
    );
    (engine, transport, injector)
}

fn press_release(engine: &Engine, note: u8, velocity: u8) {
    engine.on_press(note, velocity);
    engine.on_release(note);
}

#[tokio::test(start_paused = true)]
async fn test_velocity_table_selects_by_range() {
    let (engine, _transport, injector) = test_engine();
    for vel in [0, 42, 43, 84, 85, 127] {
        press_release(&engine, VEL_TABLE_PAD, vel);
    }
    assert_eq!(injector.injected(), vec!["a", "a", "b", "b", "c", "c"]);
}

#[tokio::test(start_paused = true)]
async fn test_velocity_outside_ranges_uses_default_combo() {
    let (engine, _transport, injector) = test_engine();
    press_release(&engine, FALLBACK_PAD, 30);
    press_release(&engine, FALLBACK_PAD, 55);
    assert_eq!(injector.injected(), vec!["fallback", "x"]);
}

#[tokio::test(start_paused = true)]
async fn test_layer_stack_depth_and_current() {
    let (engine, _transport, _injector) = test_engine();
    assert_eq!(engine.current_layer(), "Base");
    assert_eq!(engine.stack_depth(), 1);

    // Popping the base layer is a safe no-op.
    assert_eq!(engine.pop_layer(), "Base");
    assert_eq!(engine.stack_depth(), 1);

    press_release(&engine, PUSH_PAD, 100);
    assert_eq!(engine.current_layer(), "Upper");
    assert_eq!(engine.stack_depth(), 2);

    press_release(&engine, POP_PAD, 100);
    assert_eq!(engine.current_layer(), "Base");
    assert_eq!(engine.stack_depth(), 1);

    engine.push_layer("A");
    engine.push_layer("B");
    assert_eq!(engine.set_layer("C"), "C");
    assert_eq!(engine.stack_depth(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_repeat_loop_is_idempotent_per_pad() {
    let (engine, _transport, injector) = test_engine();
    engine.on_press(REPEAT_PAD, 100);
    // A duplicate press while held must not spawn a second loop.
    engine.on_press(REPEAT_PAD, 100);
    assert_eq!(engine.active_repeat_count(), 1);

    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(260)).await;
    tokio::task::yield_now().await;
    let ticks = injector
        .injected()
        .iter()
        .filter(|c| c.as_str() == "held")
        .count();
    // One immediate injection plus repeats from a single loop.
    assert!(ticks >= 2 && ticks <= 6, "ticks = {ticks}");

    engine.on_release(REPEAT_PAD);
    assert_eq!(engine.active_repeat_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_of_absent_repeat_is_noop() {
    let (engine, _transport, _injector) = test_engine();
    engine.on_release(REPEAT_PAD);
    assert_eq!(engine.active_repeat_count(), 0);
    assert_eq!(engine.held_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_short_press_fires_only_primary() {
    let (engine, _transport, injector) = test_engine();
    engine.on_press(LONG_PRESS_PAD, 100);
    tokio::time::advance(Duration::from_millis(200)).await;
    tokio::task::yield_now().await;
    engine.on_release(LONG_PRESS_PAD);

    // Give a stale timer every chance to misfire.
    tokio::time::advance(Duration::from_millis(1000)).await;
    tokio::task::yield_now().await;
    assert_eq!(injector.injected(), vec!["short"]);
    assert_eq!(engine.background_task_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_long_press_fires_only_alternate() {
    let (engine, _transport, injector) = test_engine();
    let mut events = engine.subscribe();
    engine.on_press(LONG_PRESS_PAD, 100);
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(600)).await;
    tokio::task::yield_now().await;
    engine.on_release(LONG_PRESS_PAD);

    assert_eq!(injector.injected(), vec!["long"]);
    let mut saw_long_press = false;
    while let Ok(ev) = events.try_recv() {
        if matches!(ev, Event::LongPress { .. }) {
            saw_long_press = true;
        }
    }
    assert!(saw_long_press);
    assert_eq!(engine.background_task_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_macro_runs_in_order_off_the_event_path() {
    let (engine, _transport, injector) = test_engine();
    press_release(&engine, MACRO_PAD, 100);
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_millis(100)).await;
    tokio::task::yield_now().await;
    assert_eq!(injector.injected(), vec!["m1", "m2"]);
}

#[tokio::test(start_paused = true)]
async fn test_import_rejection_leaves_profile_untouched() {
    let (engine, _transport, _injector) = test_engine();

    let mut oversized = Profile::new("Too Big", "Base");
    for i in 0..60 {
        oversized.ensure_layer(&format!("L{i}"));
    }
    let json = oversized.to_json().unwrap();
    assert!(engine.import_profile(&json).is_err());

    // The live profile is unchanged and fully queryable.
    assert_eq!(engine.current_layer(), "Base");
    assert!(engine.get_mapping(VEL_TABLE_PAD, None).is_some());
    let exported = engine.export_profile().unwrap();
    assert!(exported.contains("\"name\": \"Test\""));
}

#[tokio::test(start_paused = true)]
async fn test_import_swaps_atomically_and_rebases_stack() {
    let (engine, _transport, _injector) = test_engine();
    engine.push_layer("Upper");
    assert_eq!(engine.stack_depth(), 2);

    let mut next = Profile::new("Next", "Home");
    next.add_mapping(
        Mapping::key(21, "n", PadColor::Palette("lime".into())),
        None,
    );
    engine.import_profile(&next.to_json().unwrap()).unwrap();

    assert_eq!(engine.current_layer(), "Home");
    assert_eq!(engine.stack_depth(), 1);
    assert!(engine.get_mapping(21, None).is_some());
    assert!(engine.get_mapping(VEL_TABLE_PAD, None).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_emulate_press_reports_resolved_action() {
    let (engine, _transport, injector) = test_engine();

    let summary = engine.emulate_press(VEL_TABLE_PAD, 100, true).unwrap();
    assert_eq!(summary.combo.as_deref(), Some("c"));
    assert_eq!(summary.layer, "Base");
    assert_eq!(injector.injected(), vec!["c"]);

    let summary = engine.emulate_press(PUSH_PAD, 100, true).unwrap();
    assert_eq!(summary.layer, "Upper");

    assert!(engine.emulate_press(77, 100, true).is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_partial_connect_reports_missing_side() {
    let transport = MockTransport::new();
    transport.set_fail_output(true);
    let engine = Engine::with_config(
        Arc::new(transport.clone()),
        Arc::new(MockInjector::new()),
        test_profile(),
        EngineConfig::default(),
    );
    let outcome = engine
        .connect(None, None, 0, Duration::from_millis(10))
        .await;
    assert!(outcome.success);
    assert!(outcome.input_connected);
    assert!(!outcome.output_connected);
    assert!(!outcome.errors.is_empty());
    assert!(engine.start());
    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disconnect_then_connect_leaves_no_orphans() {
    let (engine, transport, injector) = test_engine();
    let outcome = engine
        .connect(None, None, 0, Duration::from_millis(10))
        .await;
    assert!(outcome.success && outcome.input_connected && outcome.output_connected);
    assert!(engine.start());

    // Build up held state: a repeat loop, an armed long press, a macro.
    engine.on_press(REPEAT_PAD, 100);
    engine.on_press(LONG_PRESS_PAD, 100);
    engine.on_press(MACRO_PAD, 100);
    engine.start_rainbow();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(engine.background_task_count() > 0);

    engine.disconnect().await;
    assert_eq!(engine.background_task_count(), 0);
    assert_eq!(engine.held_count(), 0);
    assert!(!engine.connected());

    // Every task was joined: nothing injects after the teardown, not even
    // the long-press timer whose threshold has yet to elapse.
    let quiesced = injector.injected();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(injector.injected(), quiesced);

    // Reconnecting with the same ids works immediately.
    let outcome = engine
        .connect(Some("Pad Grid"), Some("Pad Grid"), 0, Duration::from_millis(10))
        .await;
    assert!(outcome.success);
    assert_eq!(transport.inputs_opened(), 2);
    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_idle_animation_fires_once_and_resets() {
    let transport = MockTransport::new();
    let cfg = EngineConfig {
        idle_timeout: Duration::from_millis(200),
        idle_check_interval: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let engine = Engine::with_config(
        Arc::new(transport.clone()),
        Arc::new(MockInjector::new()),
        test_profile(),
        cfg,
    );
    let outcome = engine
        .connect(None, None, 0, Duration::from_millis(10))
        .await;
    assert!(outcome.output_connected);

    // Cross the threshold; many checks run but the show starts once.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(engine.background_task_count(), 1);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.background_task_count(), 1);

    transport.clear_sent();
    engine.reset_activity();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.background_task_count(), 0);
    // The mapping state was repainted after the idle show stopped, and no
    // late face frame paints over it.
    assert!(!transport.sent().is_empty());
    let settled = transport.sent();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.sent(), settled);

    // With activity refreshed, the show does not come back right away.
    engine.on_press(VEL_TABLE_PAD, 10);
    engine.on_release(VEL_TABLE_PAD);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.background_task_count(), 0);
    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_connect_and_reconnect_never_double_open() {
    let transport = MockTransport::new().with_open_delay(Duration::from_millis(100));
    let cfg = EngineConfig {
        reconnect_interval: Duration::from_millis(30),
        ..EngineConfig::default()
    };
    let engine = Engine::with_config(
        Arc::new(transport.clone()),
        Arc::new(MockInjector::new()),
        test_profile(),
        cfg,
    );

    // Seed last-known ids, then drop the connection.
    let outcome = engine
        .connect(None, None, 0, Duration::from_millis(10))
        .await;
    assert!(outcome.success);
    engine.disconnect().await;
    engine.set_auto_reconnect(true, Duration::from_millis(30));

    // Explicit connects race the auto-reconnect loop for a while.
    for _ in 0..3 {
        let _ = engine
            .connect(None, None, 0, Duration::from_millis(10))
            .await;
        engine.disconnect().await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(transport.max_opens_in_flight() <= 1);
    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reconnect_interval_applies_at_runtime() {
    let (engine, transport, _injector) = test_engine();
    let outcome = engine
        .connect(None, None, 0, Duration::from_millis(10))
        .await;
    assert!(outcome.success);
    engine.disconnect().await;
    assert!(!engine.connected());

    // The engine was built with the seconds-scale default interval; the
    // interval passed here must take effect without a rebuild.
    engine.set_auto_reconnect(true, Duration::from_millis(50));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(engine.connected());
    assert!(transport.inputs_opened() >= 2);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_events_reach_subscribers() {
    let (engine, _transport, _injector) = test_engine();
    let mut rx = engine.subscribe();
    press_release(&engine, PUSH_PAD, 90);

    let mut kinds = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        kinds.push(ev);
    }
    assert!(matches!(kinds[0], Event::PadPress { note, velocity }
        if note == PUSH_PAD && velocity == 90));
    assert!(
        kinds
            .iter()
            .any(|e| matches!(e, Event::LayerChange { layer } if layer == "Upper"))
    );
    assert!(
        kinds
            .iter()
            .any(|e| matches!(e, Event::PadRelease { note } if *note == PUSH_PAD))
    );
}
