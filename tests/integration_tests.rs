/*
 * Integration tests for PiPower
 *
 * These tests drive the hat facade, scheduler and socket server together
 * against the simulated board and against a fake sysfs tree.
 */

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pipower::config::{GpioLineConfig, GpioMode, HardwarePaths, Settings, TemperatureSensorConfig};
use pipower::data::{FanView, GpioLineValue, SensorReading};
use pipower::hat::{Command, HatState, PowerHat};
use pipower::hw::{BackendKind, Peripherals};
use pipower::mock::SimulatedBoard;
use pipower::poller::HatService;
use pipower::server::run_server;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::watch;

fn psu_settings() -> Settings {
    Settings {
        temperature_sensors: vec![TemperatureSensorConfig::new("28-AA", "PSU")],
        gpio_options: vec![
            GpioLineConfig::new(16, "Relay", GpioMode::Output),
            GpioLineConfig::new(26, "Door", GpioMode::Input),
        ],
        ..Settings::default()
    }
}

fn ready_hat(board: SimulatedBoard, settings: &Settings) -> PowerHat {
    let hat = PowerHat::new(board.build()).with_kick_delay(Duration::ZERO);
    hat.initialize(settings).unwrap();
    hat
}

#[test]
fn test_fixed_probe_reading_end_to_end() {
    let settings = psu_settings();
    let hat = ready_hat(SimulatedBoard::new(1).with_fixed_temperature("28-AA", 42.3), &settings);

    let snap = hat.read_all(&settings).unwrap();
    assert_eq!(
        snap.temperatures,
        vec![SensorReading { sensor_id: "28-AA".into(), caption: "PSU".into(), value: Some(42.3) }]
    );
}

#[test]
fn test_gpio_output_latch_and_input_sample() {
    let settings = psu_settings();
    let hat = ready_hat(SimulatedBoard::new(2), &settings);

    let snap = hat.apply_command(&Command::SetGpio { pin: 16, value: true }, &settings).unwrap();
    assert_eq!(snap.gpio_values.len(), 2);
    assert_eq!(snap.gpio_values[0], GpioLineValue { pin: 16, value: Some(1) });
    assert_eq!(snap.gpio_values[1].pin, 26);
    assert!(matches!(snap.gpio_values[1].value, Some(0) | Some(1)));

    for _ in 0..5 {
        let snap = hat.read_all(&settings).unwrap();
        assert_eq!(snap.gpio_values[0].value, Some(1));
    }
}

#[test]
fn test_low_speed_start_kicks_then_settles() {
    let settings = psu_settings();
    let board = SimulatedBoard::new(3);
    let duties = board.duty_log();
    let hat = ready_hat(board, &settings);

    let cmd = Command::SetFan { fan_id: 0, enabled: true, speed: 20 };
    hat.apply_command(&cmd, &settings).unwrap();
    let snap = hat.read_all(&settings).unwrap();

    assert_eq!(
        snap.fans[0],
        FanView {
            fan_id: 0,
            caption: "Cooling Fan".into(),
            state: true,
            speed: 20,
            set_speed: 20
        }
    );
    assert_eq!(snap.fans[2], FanView::always_on("Fan 2"));
    assert_eq!(*duties.lock(), vec![(0, 100), (0, 20)]);
}

#[test]
fn test_high_speed_start_skips_kick() {
    let settings = psu_settings();
    let board = SimulatedBoard::new(3);
    let duties = board.duty_log();
    let hat = ready_hat(board, &settings);

    hat.apply_command(&Command::SetFan { fan_id: 1, enabled: true, speed: 70 }, &settings)
        .unwrap();
    assert_eq!(*duties.lock(), vec![(1, 70)]);
}

#[test]
fn test_disable_keeps_speed_for_next_enable() {
    let settings = psu_settings();
    let board = SimulatedBoard::new(3);
    let duties = board.duty_log();
    let hat = ready_hat(board, &settings);

    hat.apply_command(&Command::SetFan { fan_id: 1, enabled: true, speed: 80 }, &settings)
        .unwrap();
    let snap = hat
        .apply_command(&Command::SetFanState { fan_id: 1, enabled: false }, &settings)
        .unwrap();
    assert_eq!(
        snap.fans[1],
        FanView { fan_id: 1, caption: "Pi Fan".into(), state: false, speed: 0, set_speed: 80 }
    );

    let snap = hat
        .apply_command(&Command::SetFanState { fan_id: 1, enabled: true }, &settings)
        .unwrap();
    assert_eq!(snap.fans[1].speed, 80);
    assert_eq!(*duties.lock(), vec![(1, 80), (1, 0), (1, 80)]);
}

#[test]
fn test_missing_light_sensor_partial_snapshot() {
    let settings = psu_settings();
    let hat = ready_hat(SimulatedBoard::new(4).without_light_sensor(), &settings);

    let snap = hat.read_all(&settings).unwrap();
    assert_eq!(snap.light_level, -1.0);
    assert_eq!(snap.temperatures.len(), 1);
    assert!(snap.power.is_some());
    assert_eq!(snap.fans.len(), 3);
    assert_eq!(snap.gpio_values.len(), 2);
}

#[test]
fn test_power_is_consistent_across_readings() {
    let settings = psu_settings();
    let hat = ready_hat(SimulatedBoard::new(5), &settings);

    for _ in 0..50 {
        let p = hat.read_all(&settings).unwrap().power.unwrap();
        let expected = (p.voltage_volts * p.current_milliamps / 1000.0 * 100.0).round() / 100.0;
        assert_eq!(p.power_watts, expected);
    }
}

#[test]
fn test_reconfigure_same_table_is_invisible() {
    let settings = psu_settings();
    let hat = ready_hat(SimulatedBoard::new(6), &settings);
    hat.apply_command(&Command::SetGpio { pin: 16, value: true }, &settings).unwrap();

    let before = hat.read_all(&settings).unwrap().gpio_values[0];
    hat.reconfigure_gpio(&settings.gpio_options).unwrap();
    hat.reconfigure_gpio(&settings.gpio_options).unwrap();
    let after = hat.read_all(&settings).unwrap().gpio_values[0];
    assert_eq!(before, after);
}

#[test]
fn test_disabled_line_ignores_commands() {
    let settings = Settings {
        gpio_options: vec![GpioLineConfig::new(16, "Spare", GpioMode::Disabled)],
        ..psu_settings()
    };
    let hat = ready_hat(SimulatedBoard::new(7), &settings);
    assert!(hat.apply_command(&Command::SetGpio { pin: 16, value: true }, &settings).is_err());
    assert_eq!(hat.read_all(&settings).unwrap().gpio_values[0].value, None);
    assert_eq!(hat.state(), HatState::Ready);
}

// ============================================================================
// Real sysfs backend against a fake tree
// ============================================================================

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn fake_sysfs(root: &Path) -> HardwarePaths {
    let hw = HardwarePaths::under(root);
    write(
        &hw.w1_devices.join("28-0000070e4078/w1_slave"),
        "50 05 4b 46 7f ff 0c 10 1c : crc=1c YES\n50 05 4b 46 7f ff 0c 10 1c t=21437\n",
    );
    fs::create_dir_all(hw.w1_devices.join("w1_bus_master1")).unwrap();
    write(&hw.hwmon.join("hwmon2/name"), "ina219\n");
    write(&hw.hwmon.join("hwmon2/in1_input"), "5120\n");
    write(&hw.hwmon.join("hwmon2/curr1_input"), "640\n");
    fs::create_dir_all(&hw.iio_devices).unwrap();
    write(&hw.gpio.join("export"), "");
    write(&hw.gpio.join("gpio16/direction"), "in\n");
    write(&hw.gpio.join("gpio16/value"), "0\n");
    write(&hw.pwm_chip.join("export"), "");
    fs::create_dir_all(hw.pwm_chip.join("pwm0")).unwrap();
    fs::create_dir_all(hw.pwm_chip.join("pwm1")).unwrap();
    hw
}

#[test]
fn test_sysfs_backend_full_cycle() {
    let root = tempfile::tempdir().unwrap();
    let hardware = fake_sysfs(root.path());
    let settings = Settings {
        temperature_sensors: vec![
            TemperatureSensorConfig::new("28-0000070e4078", "Internal Air"),
            TemperatureSensorConfig::new("28-000007538f5b", "PSU PCB"),
            TemperatureSensorConfig::new("", "Extra"),
        ],
        gpio_options: vec![GpioLineConfig::new(16, "Relay", GpioMode::Output)],
        pwm_frequency: 25_000,
        hardware: hardware.clone(),
        ..Settings::default()
    };

    let peripherals = Peripherals::hardware(&hardware).unwrap();
    assert_eq!(peripherals.kind, BackendKind::Hardware);
    let hat = PowerHat::new(peripherals).with_kick_delay(Duration::ZERO);
    hat.initialize(&settings).unwrap();

    assert_eq!(hat.discover_sensors(), vec!["", "28-0000070e4078"]);
    assert_eq!(fs::read_to_string(hardware.pwm_chip.join("pwm0/period")).unwrap(), "40000");
    assert_eq!(fs::read_to_string(hardware.gpio.join("gpio16/direction")).unwrap(), "out");

    let snap = hat.read_all(&settings).unwrap();
    assert_eq!(snap.temperatures[0].value, Some(21.4));
    assert_eq!(snap.temperatures[1].value, None);
    assert_eq!(snap.temperatures[2].value, None);
    let power = snap.power.unwrap();
    assert_eq!(power.voltage_volts, 5.1);
    assert_eq!(power.current_milliamps, 640.0);
    assert_eq!(power.power_watts, 3.26);
    assert_eq!(snap.light_level, -1.0);

    hat.apply_command(&Command::SetFan { fan_id: 1, enabled: true, speed: 30 }, &settings)
        .unwrap();
    assert_eq!(fs::read_to_string(hardware.pwm_chip.join("pwm1/duty_cycle")).unwrap(), "12000");
    hat.apply_command(&Command::SetGpio { pin: 16, value: true }, &settings).unwrap();
    assert_eq!(fs::read_to_string(hardware.gpio.join("gpio16/value")).unwrap(), "1");

    hat.shutdown();
    assert_eq!(fs::read_to_string(hardware.pwm_chip.join("pwm1/duty_cycle")).unwrap(), "0");
}

// ============================================================================
// Socket server
// ============================================================================

async fn request(stream: &mut BufReader<UnixStream>, line: Value) -> Value {
    let mut text = line.to_string();
    text.push('\n');
    stream.get_mut().write_all(text.as_bytes()).await.unwrap();
    read_response(stream).await
}

async fn read_response(stream: &mut BufReader<UnixStream>) -> Value {
    let mut reply = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_line(&mut reply))
        .await
        .unwrap()
        .unwrap();
    serde_json::from_str(&reply).unwrap()
}

async fn connect(path: &Path) -> BufReader<UnixStream> {
    for _ in 0..100 {
        if let Ok(s) = UnixStream::connect(path).await {
            return BufReader::new(s);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server did not come up at {}", path.display());
}

#[tokio::test]
async fn test_socket_query_command_and_subscribe() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("pipower.sock");
    let settings = psu_settings();
    let hat = ready_hat(SimulatedBoard::new(8).with_fixed_temperature("28-AA", 42.3), &settings);
    let service = Arc::new(HatService::new(Arc::new(hat), settings));

    let (tx, rx) = watch::channel(false);
    let server = tokio::spawn({
        let socket = socket.clone();
        let service = Arc::clone(&service);
        async move { run_server(&socket, service, rx).await }
    });

    let mut client = connect(&socket).await;
    let pong = request(&mut client, json!({"id": 1, "cmd": "Ping"})).await;
    assert_eq!(pong, json!({"id": 1, "status": "ok", "data": {"value": "pong"}}));

    let snap = request(&mut client, json!({"id": 2, "cmd": "GetSnapshot"})).await;
    assert_eq!(snap["data"]["snapshot"]["temperatures"][0]["value"], 42.3);

    let set = request(
        &mut client,
        json!({"id": 3, "cmd": "SetFan", "data": {"fan_id": 0, "state": true, "speed": 20}}),
    )
    .await;
    assert_eq!(set["status"], "ok");
    assert_eq!(
        set["data"]["snapshot"]["fans"][0],
        json!({"fanId": 0, "caption": "Cooling Fan", "state": true, "speed": 20, "setSpeed": 20})
    );

    let bad = request(
        &mut client,
        json!({"id": 4, "cmd": "SetFanSpeed", "data": {"fan_id": 5, "speed": 20}}),
    )
    .await;
    assert_eq!(bad["status"], "error");
    assert_eq!(bad["id"], 4);

    let sensors = request(&mut client, json!({"id": 5, "cmd": "ListTemperatureSensors"})).await;
    assert_eq!(sensors["data"]["sensors"][0], "");

    let mut subscriber = connect(&socket).await;
    let ack = request(&mut subscriber, json!({"id": 6, "cmd": "Subscribe"})).await;
    assert_eq!(ack["status"], "ok");
    request(
        &mut client,
        json!({"id": 7, "cmd": "SetGpio", "data": {"pin": 16, "value": true}}),
    )
    .await;
    let pushed = read_response(&mut subscriber).await;
    assert_eq!(pushed["id"], 6);
    assert_eq!(pushed["data"]["event"]["plugin"], "pipower");
    assert_eq!(pushed["data"]["event"]["topic"], "snapshot");
    assert_eq!(pushed["data"]["event"]["data"]["gpioValues"][0]["value"], 1);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap().unwrap();
    assert!(!socket.exists());
}
