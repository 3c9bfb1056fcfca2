//! Telemetry simulator: a background tick mutates a shared UAV state
//! (battery drain, GPS drift, attitude jitter, altitude ramps) and the
//! command surface flips flight modes the way a real autopilot would.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use resources::objects::uav::{
    AttitudeData, BatteryData, FlightData, GpsData, HealthData, MissionData, UavState,
};

pub const FLIGHT_MODES: [&str; 6] = ["MANUAL", "STABILIZE", "LOITER", "AUTO", "RTL", "LAND"];

const TICK: Duration = Duration::from_secs(1);
/// Percent per tick while armed.
const ARMED_DRAIN: f64 = 0.05;
const IDLE_DRAIN: f64 = 0.002;
const CLIMB_RATE: f64 = 2.5;

struct Inner {
    state: UavState,
    target_altitude: f64,
    home: (f64, f64),
}

#[derive(Clone)]
pub struct Simulator {
    inner: Arc<RwLock<Inner>>,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl Simulator {
    pub fn new(uav_id: &str, node_name: &str) -> Self {
        let now = Utc::now();
        // Hangzhou-ish home point, same for every simulated unit.
        let home = (30.2741, 120.1551);
        let state = UavState {
            uav_id: uav_id.to_string(),
            node_name: node_name.to_string(),
            system_time: Some(now),
            gps: GpsData {
                latitude: home.0,
                longitude: home.1,
                altitude: 12.0,
                satellite_count: 14,
                fix_type: 3,
                hdop: 0.8,
                timestamp: Some(now),
                ..Default::default()
            },
            attitude: AttitudeData {
                timestamp: Some(now),
                ..Default::default()
            },
            flight: FlightData {
                mode: "STABILIZE".to_string(),
                throttle_percent: 0.0,
                timestamp: Some(now),
                ..Default::default()
            },
            battery: BatteryData {
                voltage: 16.8,
                remaining_percent: 100.0,
                remaining_capacity: 5200.0,
                total_capacity: 5200.0,
                temperature: 25.0,
                cell_count: 4,
                time_remaining: 1800,
                timestamp: Some(now),
                ..Default::default()
            },
            mission: MissionData {
                mission_state: "IDLE".to_string(),
                timestamp: Some(now),
                ..Default::default()
            },
            health: HealthData {
                system_status: "OK".to_string(),
                last_heartbeat: Some(now),
                timestamp: Some(now),
                ..Default::default()
            },
        };

        let (stop_tx, _) = watch::channel(false);
        Simulator {
            inner: Arc::new(RwLock::new(Inner {
                state,
                target_altitude: 0.0,
                home,
            })),
            stop_tx: Arc::new(stop_tx),
        }
    }

    /// Spawn the update tick.
    pub fn start(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let mut stop = self.stop_tx.subscribe();
        info!("telemetry simulator started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK);
            loop {
                tokio::select! {
                    _ = stop.changed() => return,
                    _ = ticker.tick() => {
                        let mut guard = inner.write();
                        step(&mut guard);
                    }
                }
            }
        })
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
        info!("telemetry simulator stopped");
    }

    pub fn state(&self) -> UavState {
        self.inner.read().state.clone()
    }

    /// Arming needs a usable battery.
    pub fn arm(&self) -> Result<(), String> {
        let mut guard = self.inner.write();
        if guard.state.battery.remaining_percent < 20.0 {
            return Err(format!(
                "battery too low to arm ({:.1}%)",
                guard.state.battery.remaining_percent
            ));
        }
        guard.state.flight.armed = true;
        guard.state.flight.throttle_percent = 10.0;
        debug!("armed");
        Ok(())
    }

    pub fn disarm(&self) {
        let mut guard = self.inner.write();
        guard.state.flight.armed = false;
        guard.state.flight.throttle_percent = 0.0;
        guard.target_altitude = 0.0;
        debug!("disarmed");
    }

    pub fn take_off(&self, altitude: f64) -> Result<(), String> {
        let mut guard = self.inner.write();
        if !guard.state.flight.armed {
            return Err("cannot take off while disarmed".to_string());
        }
        guard.target_altitude = if altitude > 0.0 { altitude } else { 50.0 };
        guard.state.flight.mode = "AUTO".to_string();
        guard.state.flight.throttle_percent = 70.0;
        guard.state.mission.mission_state = "ACTIVE".to_string();
        debug!("taking off to {:.1}m", guard.target_altitude);
        Ok(())
    }

    pub fn land(&self) {
        let mut guard = self.inner.write();
        guard.target_altitude = 0.0;
        guard.state.flight.mode = "LAND".to_string();
        guard.state.mission.mission_state = "IDLE".to_string();
        debug!("landing");
    }

    pub fn return_to_launch(&self) {
        let mut guard = self.inner.write();
        guard.state.flight.mode = "RTL".to_string();
        guard.target_altitude = 0.0;
        let home = guard.home;
        guard.state.gps.latitude = home.0;
        guard.state.gps.longitude = home.1;
        debug!("returning to launch");
    }

    pub fn set_flight_mode(&self, mode: &str) -> Result<(), String> {
        let mode = mode.to_uppercase();
        if !FLIGHT_MODES.contains(&mode.as_str()) {
            return Err(format!("unknown flight mode: {mode}"));
        }
        self.inner.write().state.flight.mode = mode;
        Ok(())
    }
}

/// One simulation tick.
fn step(inner: &mut Inner) {
    let mut rng = rand::thread_rng();
    let now = Utc::now();
    let state = &mut inner.state;

    state.system_time = Some(now);

    // Battery drains faster under power.
    let drain = if state.flight.armed { ARMED_DRAIN } else { IDLE_DRAIN };
    state.battery.remaining_percent = (state.battery.remaining_percent - drain).max(0.0);
    state.battery.remaining_capacity =
        state.battery.total_capacity * state.battery.remaining_percent / 100.0;
    state.battery.voltage = 12.0 + 4.8 * state.battery.remaining_percent / 100.0;
    state.battery.current = if state.flight.armed { 18.0 } else { 0.4 };
    state.battery.time_remaining = if state.flight.armed {
        (state.battery.remaining_percent / ARMED_DRAIN) as i32
    } else {
        (state.battery.remaining_percent / IDLE_DRAIN) as i32
    };
    state.battery.timestamp = Some(now);

    // Altitude ramps toward the target.
    let delta = inner.target_altitude - state.gps.relative_altitude;
    let vertical = delta.clamp(-CLIMB_RATE, CLIMB_RATE);
    state.gps.relative_altitude = (state.gps.relative_altitude + vertical).max(0.0);
    state.gps.altitude = 12.0 + state.gps.relative_altitude;
    state.flight.vertical_speed = vertical;

    // Airborne units drift and keep some ground speed.
    if state.flight.armed && state.gps.relative_altitude > 0.5 {
        state.gps.latitude += rng.gen_range(-5e-6..5e-6);
        state.gps.longitude += rng.gen_range(-5e-6..5e-6);
        state.gps.ground_speed = rng.gen_range(3.0..8.0);
        state.gps.course_over_ground = (state.gps.course_over_ground + rng.gen_range(-2.0..2.0)
            + 360.0)
            % 360.0;
        state.attitude.roll = rng.gen_range(-4.0..4.0);
        state.attitude.pitch = rng.gen_range(-3.0..3.0);
        state.attitude.yaw = state.gps.course_over_ground;
    } else {
        state.gps.ground_speed = 0.0;
        state.attitude.roll = 0.0;
        state.attitude.pitch = 0.0;
    }
    state.flight.ground_speed = state.gps.ground_speed;
    state.flight.airspeed = state.gps.ground_speed * 1.05;
    state.gps.timestamp = Some(now);
    state.attitude.timestamp = Some(now);
    state.flight.timestamp = Some(now);

    state.health.system_status = match state.battery.remaining_percent {
        pct if pct < 10.0 => "CRITICAL".to_string(),
        pct if pct < 20.0 => "WARNING".to_string(),
        _ => "OK".to_string(),
    };
    if state.health.system_status != "OK" {
        state.health.warning_count += 1;
    }
    state.health.last_heartbeat = Some(now);
    state.health.timestamp = Some(now);
    state.mission.timestamp = Some(now);
}
