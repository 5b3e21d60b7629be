//! Integration tests for the execution boundary.
//!
//! Each test drives a real worker thread through [`SimulatorProxy`].

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{initialized_proxy, wait_until};
use microbit_sandbox::{ProxyError, SimulatorProxy, ToneEvent};
use microbit_sandbox_core::SimulatorConfig;
use microbit_sandbox_types::{ButtonId, InputEvent, PinKind};
use parking_lot::Mutex;

const SETTLE: Duration = Duration::from_secs(2);

/// Test that a program runs across the boundary and its output comes back.
#[tokio::test]
async fn test_run_relays_output_and_events() {
    let (proxy, recorded) = initialized_proxy().await;
    let result = proxy
        .run("led.plot(0, 0)\nprint('hello')\n")
        .await
        .unwrap();
    assert_eq!(result, "");
    assert!(wait_until(SETTLE, || recorded.has_line("hello")).await);
    assert!(wait_until(SETTLE, || recorded.event_count("led-change") == 1).await);
    assert_eq!(proxy.get_states().await.unwrap().leds[0][0], 255);
}

/// Test that program errors are diagnostics, not proxy errors.
#[tokio::test]
async fn test_program_failure_is_a_diagnostic() {
    let (proxy, _) = initialized_proxy().await;
    let result = proxy.run("print(1 + 'a')").await.unwrap();
    assert!(result.starts_with("TypeError"), "{}", result);
}

/// Test that every call before initialize fails locally with a clear error.
#[tokio::test]
async fn test_calls_before_initialize() {
    let proxy = SimulatorProxy::new(SimulatorConfig::default()).unwrap();
    assert_eq!(proxy.run("x = 1").await, Err(ProxyError::NotInitialized));
    assert_eq!(
        proxy
            .simulate_input(InputEvent::Logo { pressed: true })
            .await,
        Err(ProxyError::NotInitialized)
    );
    assert_eq!(
        proxy
            .set_external_pin_value("P0".parse().unwrap(), 1, PinKind::Digital)
            .await,
        Err(ProxyError::NotInitialized)
    );
}

/// Test that initializing again routes output to the new callbacks.
#[tokio::test]
async fn test_reinitialize_replaces_callbacks() {
    let proxy = SimulatorProxy::new(SimulatorConfig::default()).unwrap();
    let first = Arc::new(Mutex::new(Vec::<String>::new()));
    let second = Arc::new(Mutex::new(Vec::<String>::new()));

    let sink = first.clone();
    proxy
        .initialize(move |line| sink.lock().push(line.to_string()), |_| {}, None)
        .await
        .unwrap();
    let sink = second.clone();
    proxy
        .initialize(move |line| sink.lock().push(line.to_string()), |_| {}, None)
        .await
        .unwrap();

    assert_eq!(proxy.run("print('hi')").await.unwrap(), "");
    assert!(wait_until(SETTLE, || second.lock().len() == 1).await);
    assert_eq!(second.lock()[0], "hi");
    assert!(first.lock().is_empty());
}

/// Test that initialization failure carries its cause.
#[tokio::test]
async fn test_initialize_failure_reports_cause() {
    let mut config = SimulatorConfig::default();
    config.runtime.local_path = Some("/nonexistent/microbit-runtime.py".into());
    config.runtime.remote_url = Some("http://127.0.0.1:9/runtime.py".into());
    let proxy = SimulatorProxy::new(config).unwrap();
    let err = proxy.initialize(|_| {}, |_| {}, None).await.unwrap_err();
    match err {
        ProxyError::Initialization { cause } => {
            assert!(cause.contains("runtime bundle unavailable"), "{}", cause)
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!proxy.is_initialized());
}

/// Test that reset reaches the worker while a long program is suspended.
#[tokio::test]
async fn test_reset_interrupts_long_program() {
    let (proxy, _) = initialized_proxy().await;
    let runner = proxy.clone();
    let started = Instant::now();
    let run = tokio::spawn(async move { runner.run("basic.pause(60000)\nprint('late')").await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    proxy.reset().await.unwrap();
    let result = run.await.unwrap().unwrap();
    assert_eq!(result, "");
    assert!(started.elapsed() < Duration::from_secs(10));
}

/// Test that tones play on the host device and block the program for their duration.
#[tokio::test]
async fn test_audio_is_relayed_to_host() {
    let (proxy, recorded) = initialized_proxy().await;
    let started = Instant::now();
    let result = proxy.run("music.play_tone(440, 0.2)\n").await.unwrap();
    assert_eq!(result, "");
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(wait_until(SETTLE, || recorded.tones.events().contains(&ToneEvent::Stop)).await);
    assert!(recorded.tones.events().contains(&ToneEvent::Start(440.0)));
}

/// Test that button handlers run when input is simulated through the proxy.
#[tokio::test]
async fn test_simulated_button_press() {
    let (proxy, recorded) = initialized_proxy().await;
    let source = "def pressed():\n    print('A!')\ninput.on_button_pressed(Button.A, pressed)\n";
    assert_eq!(proxy.run(source).await.unwrap(), "");
    proxy
        .simulate_input(InputEvent::Button {
            button: ButtonId::A,
            pressed: true,
        })
        .await
        .unwrap();
    assert!(wait_until(SETTLE, || recorded.has_line("A!")).await);
    assert!(proxy.get_states().await.unwrap().buttons.a);

    let rejected = proxy
        .simulate_input(InputEvent::Gesture {
            name: "spin".into(),
        })
        .await;
    assert!(matches!(rejected, Err(ProxyError::Rejected(_))));
}

/// Test that ultrasonic triggers reach the host-side callback.
#[tokio::test]
async fn test_ultrasonic_trigger_across_boundary() {
    let (proxy, recorded) = initialized_proxy().await;
    let hits = Arc::new(Mutex::new(Vec::new()));
    let sink = hits.clone();
    proxy
        .register_ultrasonic_sensor("front", "P1".parse().unwrap(), "P2".parse().unwrap(), move |t| {
            sink.lock().push(t.sensor_id.clone())
        })
        .await
        .unwrap();

    let source = "pins.digital_write_pin(DigitalPin.P1, 1)\ncontrol.wait_micros(10)\npins.digital_write_pin(DigitalPin.P1, 0)\n";
    assert_eq!(proxy.run(source).await.unwrap(), "");
    assert!(wait_until(SETTLE, || hits.lock().len() == 1).await);
    assert_eq!(recorded.event_count("ultrasonic-trigger"), 1);

    assert!(proxy.unregister_ultrasonic_sensor("front").await.unwrap());
    assert_eq!(proxy.run(source).await.unwrap(), "");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hits.lock().len(), 1);
}

/// Test that an external pin value wins over the program's writes.
#[tokio::test]
async fn test_external_pin_override() {
    let (proxy, recorded) = initialized_proxy().await;
    proxy
        .set_external_pin_value("P0".parse().unwrap(), 700, PinKind::Analog)
        .await
        .unwrap();
    let source = "pins.analog_write_pin(AnalogPin.P0, 5)\nprint(pins.analog_read_pin(AnalogPin.P0), pins.digital_read_pin(DigitalPin.P0))\n";
    assert_eq!(proxy.run(source).await.unwrap(), "");
    assert!(wait_until(SETTLE, || recorded.has_line("700 1")).await);
    assert!(proxy
        .clear_external_pin_value("P0".parse().unwrap())
        .await
        .unwrap());
}

/// Test that dispose_and_reload recovers from a program that never yields.
#[tokio::test]
async fn test_dispose_and_reload_recovers() {
    let (proxy, recorded) = initialized_proxy().await;
    let runner = proxy.clone();
    let stuck = tokio::spawn(async move { runner.run("while True:\n    pass\n").await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    proxy.dispose_and_reload().await.unwrap();
    assert!(proxy.is_initialized());
    // The stuck program was terminated; whatever it reports, it must finish.
    tokio::time::timeout(SETTLE, stuck).await.unwrap().unwrap().ok();

    assert_eq!(proxy.run("print('back')").await.unwrap(), "");
    assert!(wait_until(SETTLE, || recorded.has_line("back")).await);
    let state = proxy.get_states().await.unwrap();
    assert!(state.display_is_blank());
}
