//! Whole episodes driven through the public `Simulation` surface.

use approx::assert_relative_eq;
use nalgebra::Vector2;
use racegym_sim::{SimError, Simulation, SimulationConfig, Track};

fn ring(radius: f64, segments: usize) -> Vec<[f64; 2]> {
    Track::circle(radius, segments, 12.0)
        .points()
        .iter()
        .map(|p| [p.x, p.y])
        .collect()
}

#[test]
fn straight_line_launch_stays_on_large_ring() {
    let mut sim = Simulation::default();
    sim.load_track(&ring(200.0, 24)).unwrap();
    let id = sim.add_vehicle(0.0).unwrap();
    sim.set_vehicle_control(id, 0.0, 1.0, 0.0).unwrap();

    let frame = sim.config().dt * sim.config().substeps as f64;
    let mut last_speed = 0.0;
    for n in 1..=30 {
        sim.step();

        assert!(!sim.is_vehicle_crashed(id).unwrap(), "crashed after frame {n}");
        assert!(!sim.is_vehicle_off_track(id).unwrap(), "off track after frame {n}");

        let body = sim.chassis(id).unwrap();
        let ground = Vector2::new(body.position.x, body.position.z);
        let track = sim.track().unwrap();
        assert!(track.distance_to_centerline(&ground) <= track.half_width());

        let speed = sim.vehicle_velocity(id).unwrap().norm();
        if n as f64 * frame > 0.3 {
            assert!(
                speed >= last_speed - 1e-2,
                "speed dropped from {last_speed} to {speed} at frame {n}"
            );
        }
        last_speed = speed;
    }

    assert!(last_speed > 3.0, "only reached {last_speed} m/s");
    assert!(sim.vehicle_track_position(id).unwrap() > 0.0);
}

/// Two 2 km straights joined by tight hairpins.
fn stadium() -> Vec<[f64; 2]> {
    vec![
        [0.0, 0.0],
        [0.0, 1000.0],
        [0.0, 2000.0],
        [50.0, 2100.0],
        [100.0, 2000.0],
        [100.0, 1000.0],
        [100.0, 0.0],
        [50.0, -100.0],
    ]
}

#[test]
fn full_throttle_speed_levels_off_on_long_straight() {
    let mut sim = Simulation::default();
    sim.load_track(&stadium()).unwrap();
    let id = sim.add_vehicle(0.0).unwrap();
    sim.set_vehicle_control(id, 0.0, 1.0, 0.0).unwrap();

    let mut speeds = Vec::new();
    for n in 1..=300 {
        sim.step();
        assert!(!sim.is_vehicle_crashed(id).unwrap(), "crashed after frame {n}");
        assert!(!sim.is_vehicle_off_track(id).unwrap(), "off track after frame {n}");
        speeds.push(sim.vehicle_velocity(id).unwrap().norm());
    }

    for (n, pair) in speeds.windows(2).enumerate().skip(3) {
        assert!(pair[1] >= pair[0] - 1e-2, "speed dropped at frame {n}: {pair:?}");
    }

    // Speed per second, sampled every ten frames.
    let at = |second: usize| speeds[second * 10 - 1];
    let early = at(10) - at(5);
    let late = at(30) - at(25);
    assert!(late < early / 2.0, "early gain {early}, late gain {late}");

    let params = &sim.config().vehicle;
    let terminal = (params.max_power / params.drag_coefficient).cbrt();
    assert!(at(30) > 40.0 && at(30) < terminal, "ended at {} m/s", at(30));
}

#[test]
fn observation_tracks_motion() {
    let mut sim = Simulation::default();
    sim.load_track(&ring(200.0, 24)).unwrap();
    let id = sim.add_vehicle(0.0).unwrap();
    sim.set_vehicle_control(id, 0.0, 1.0, 0.0).unwrap();

    for _ in 0..10 {
        sim.step();
    }
    let obs = sim.observation(id).unwrap();
    assert_eq!(obs.len(), sim.config().observation_len());

    let velocity = sim.vehicle_velocity(id).unwrap();
    // Driving straight: all speed is longitudinal.
    assert_relative_eq!(obs[80], velocity.norm() as f32, epsilon = 1e-2);
    assert!(obs[81].abs() < 0.1);
    assert!(obs[82].abs() < 0.05);

    // The first pair still straddles the car.
    assert!(obs[0] < -5.0 && obs[0] > -7.0);
    assert!(obs[2] > 5.0 && obs[2] < 7.0);
}

#[test]
fn full_brake_stops_the_car() {
    let mut sim = Simulation::default();
    sim.load_track(&ring(200.0, 24)).unwrap();
    let id = sim.add_vehicle(0.0).unwrap();

    sim.set_vehicle_control(id, 0.0, 1.0, 0.0).unwrap();
    for _ in 0..30 {
        sim.step();
    }
    let moving = sim.vehicle_velocity(id).unwrap().norm();
    assert!(moving > 3.0);

    sim.set_vehicle_control(id, 0.0, 0.0, 1.0).unwrap();
    for _ in 0..50 {
        sim.step();
    }
    assert!(sim.vehicle_velocity(id).unwrap().norm() < 0.5);
    assert!(!sim.is_vehicle_crashed(id).unwrap());
}

#[test]
fn track_file_round_trip_through_disk() {
    let dir = std::env::temp_dir().join(format!("racegym-sim-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("ring.json");
    let points: Vec<Vec<f64>> = ring(80.0, 10).iter().map(|p| p.to_vec()).collect();
    std::fs::write(&path, serde_json::json!({ "points": points }).to_string()).unwrap();

    let mut sim = Simulation::new(SimulationConfig {
        track_width: 10.0,
        ..SimulationConfig::default()
    });
    sim.load_track_file(&path).unwrap();
    assert_eq!(sim.track_length(), 10);
    assert_eq!(sim.track().unwrap().width(), 10.0);

    assert!(matches!(
        sim.load_track_file(dir.join("missing.json")),
        Err(SimError::Io { .. })
    ));
    assert!(sim.track().is_some());

    std::fs::remove_dir_all(&dir).unwrap();
}
