//! End-to-end runs of the laser guide star configuration with a physical uplink.

use std::fs;

use aosim::calibration::{MatrixKind, MatrixRecord};
use aosim::config;
use aosim::{Simulation, SimulationOptions};
use tempfile::TempDir;
use test_helpers::{conf_path, LGS_UPLINK_CONFIG};

fn lgs_config() -> aosim::SimulationConfig {
    config::load(conf_path(LGS_UPLINK_CONFIG).unwrap()).unwrap()
}

#[test]
fn test_only_the_laser_sensor_has_an_uplink() {
    let sim = Simulation::new(lgs_config(), SimulationOptions::default()).unwrap();
    let uplinks: Vec<bool> = sim.wavefront_sensors().iter().map(|w| w.has_uplink()).collect();
    assert_eq!(uplinks, vec![false, true]);
}

#[test]
fn test_lgs_run_produces_beacon_images() {
    let _ = env_logger::builder().is_test(true).try_init();

    let options = SimulationOptions {
        iterations: Some(3),
        seed: Some(21),
        ..Default::default()
    };
    let mut sim = Simulation::new(lgs_config(), options).unwrap();
    let report = sim.run().unwrap();
    assert_eq!(report.iterations, 3);
    assert_eq!(report.residual_slope_rms.len(), 2);
    assert!(report.residual_slope_rms.values().flatten().all(|v| v.is_finite()));

    let psfs = &sim.state().uplink_psfs;
    assert!(psfs[0].is_none());
    let beacon = psfs[1].as_ref().expect("LGS beacon image");
    assert!((beacon.sum() - 1.0).abs() < 1e-9);
    assert!(beacon.iter().all(|v| *v >= 0.0));
}

#[test]
fn test_lgs_run_is_reproducible_with_noise() {
    let run = || {
        let options = SimulationOptions {
            iterations: Some(2),
            seed: Some(8),
            ..Default::default()
        };
        let mut sim = Simulation::new(lgs_config(), options).unwrap();
        sim.run().unwrap()
    };
    assert_eq!(run().residual_slope_rms, run().residual_slope_rms);
}

#[test]
fn test_saved_outputs_and_reused_calibration() {
    let root = TempDir::new().unwrap();
    let options = SimulationOptions {
        iterations: Some(2),
        seed: Some(4),
        output_root: Some(root.path().to_path_buf()),
        ..Default::default()
    };
    let mut sim = Simulation::new(lgs_config(), options).unwrap();
    let report = sim.run().unwrap();

    let dir = report.output_dir.clone().expect("outputs saved");
    assert!(dir.starts_with(root.path().join("sh_8x8_lgs-uplink")));
    for file in [
        "config.yaml",
        "imat_dm0.json",
        "imat_dm1.json",
        "cmat_dm0.json",
        "cmat_dm1.json",
        "slopes.json",
        "dm_commands.json",
        "lgs_psf.json",
        "sci_psf.json",
        "report.json",
    ] {
        assert!(dir.join(file).exists(), "missing {file}");
    }

    let saved: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.join("report.json")).unwrap()).unwrap();
    assert_eq!(saved["iterations"], 2);

    let imat = MatrixRecord::load(dir.join(MatrixRecord::file_name(1, MatrixKind::Interaction))).unwrap();
    assert_eq!(imat.kind, MatrixKind::Interaction);

    let reuse = SimulationOptions {
        iterations: Some(1),
        seed: Some(4),
        interaction_matrices: Some(dir.clone()),
        ..Default::default()
    };
    let mut sim = Simulation::new(lgs_config(), reuse).unwrap();
    sim.calibrate().unwrap();
    let stored = imat.to_matrix();
    let loaded = sim.mirrors()[1].interaction_matrix().expect("loaded interaction matrix");
    assert_eq!(loaded.shape(), stored.shape());
    let scale = stored.amax().max(1e-12);
    assert!((loaded - &stored).amax() <= 1e-9 * scale);
}

#[test]
fn test_precompensated_launch_follows_mirrors() {
    let beacon = |precompensated: bool| {
        let mut config = lgs_config();
        let lgs = config
            .wfs
            .get_mut(&1)
            .and_then(|wfs| wfs.lgs.as_mut())
            .expect("LGS block on WFS 1");
        lgs.precompensated = precompensated;

        let options = SimulationOptions {
            iterations: Some(2),
            seed: Some(17),
            ..Default::default()
        };
        let mut sim = Simulation::new(config, options).unwrap();
        sim.run().unwrap();
        assert!(sim.mirrors().iter().any(|dm| dm.commands().amax() > 0.0));
        sim.state().uplink_psfs[1].clone().expect("LGS beacon image")
    };

    let plain = beacon(false);
    let steered = beacon(true);
    assert!((steered.sum() - 1.0).abs() < 1e-9);
    let change = plain
        .iter()
        .zip(steered.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max);
    assert!(change > 1e-9, "precompensation left the beacon unchanged");
}
