//! Loopback mode: drives the engine against the in-memory transport so
//! profiles can be exercised without hardware attached.
//!
//! Raw messages are fed through the mock transport's input callback, so
//! presses travel the same dispatch path they would from the device. Key
//! injections print to stdout instead of reaching the OS.

use std::{fs, sync::Arc, time::Duration};

use config::Profile;
use padgrid_engine::{Engine, EngineConfig, KeyInjector, MockTransport, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Injector that prints combos instead of touching the OS.
struct PrintInjector;

impl KeyInjector for PrintInjector {
    fn inject(&self, combo: &str) -> Result<()> {
        println!("inject: {combo}");
        Ok(())
    }
}

const NOTE_ON: u8 = 0x90;

/// Run the interactive loopback session until EOF or `quit`.
pub async fn run(profile: Profile) -> Result<()> {
    let transport = MockTransport::new();
    let engine = Engine::with_config(
        Arc::new(transport.clone()),
        Arc::new(PrintInjector),
        profile,
        EngineConfig::default(),
    );
    let outcome = engine
        .connect(None, None, 0, Duration::from_millis(100))
        .await;
    info!(message = %outcome.message, "loopback transport ready");
    engine.start();

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                println!("event: {json}");
            }
        }
    });

    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !handle(&engine, &transport, line.trim()) {
            break;
        }
    }
    engine.shutdown().await;
    Ok(())
}

fn print_help() {
    println!("commands:");
    println!("  press <note> [velocity]    raw press through the transport");
    println!("  release <note>             raw release");
    println!("  tap <note> [velocity]      resolve and perform, print the action");
    println!("  layer push <name> | pop | set <name>");
    println!("  import <path> | export");
    println!("  status | help | quit");
}

/// Handle one command line; returns false to end the session.
fn handle(engine: &Engine, transport: &MockTransport, line: &str) -> bool {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        [] => {}
        ["quit" | "exit"] => return false,
        ["help"] => print_help(),
        ["press", note, rest @ ..] => {
            if let Some(note) = parse_note(note) {
                let velocity = rest.first().and_then(|v| v.parse().ok()).unwrap_or(100);
                transport.emit(&[NOTE_ON, note, velocity]);
            }
        }
        ["release", note] => {
            if let Some(note) = parse_note(note) {
                transport.emit(&[NOTE_ON, note, 0]);
            }
        }
        ["tap", note, rest @ ..] => {
            if let Some(note) = parse_note(note) {
                let velocity = rest.first().and_then(|v| v.parse().ok()).unwrap_or(100);
                match engine.emulate_press(note, velocity, false) {
                    Ok(summary) => match serde_json::to_string(&summary) {
                        Ok(json) => println!("action: {json}"),
                        Err(e) => println!("error: {e}"),
                    },
                    Err(e) => println!("error: {e}"),
                }
            }
        }
        ["layer", "push", name] => {
            println!("layer: {}", engine.push_layer(name));
        }
        ["layer", "pop"] => {
            println!("layer: {}", engine.pop_layer());
        }
        ["layer", "set", name] => {
            println!("layer: {}", engine.set_layer(name));
        }
        ["import", path] => match fs::read_to_string(path) {
            Ok(raw) => match engine.import_profile(&raw) {
                Ok(()) => println!("imported"),
                Err(e) => println!("error: {e}"),
            },
            Err(e) => println!("error: {e}"),
        },
        ["export"] => match engine.export_profile() {
            Ok(json) => println!("{json}"),
            Err(e) => println!("error: {e}"),
        },
        ["status"] => {
            println!(
                "layer {} (depth {}), held {}, repeats {}, background tasks {}",
                engine.current_layer(),
                engine.stack_depth(),
                engine.held_count(),
                engine.active_repeat_count(),
                engine.background_task_count()
            );
        }
        _ => println!("unknown command, try `help`"),
    }
    true
}

fn parse_note(raw: &str) -> Option<u8> {
    match raw.parse() {
        Ok(note) => Some(note),
        Err(_) => {
            println!("bad note: {raw}");
            None
        }
    }
}
