//! The bundled sample configurations load, validate and survive a YAML round trip.

use aosim::config::{self, DmType, PropagationMode, WfsType};
use test_helpers::{conf_path, LGS_UPLINK_CONFIG, NGS_CONFIG};

#[test]
fn test_sample_configs_load_identically_twice() {
    for name in [NGS_CONFIG, LGS_UPLINK_CONFIG] {
        let path = conf_path(name).unwrap();
        let first = config::load(&path).unwrap();
        let second = config::load(&path).unwrap();
        assert_eq!(first, second, "{name}");
    }
}

#[test]
fn test_sample_configs_round_trip() {
    for name in [NGS_CONFIG, LGS_UPLINK_CONFIG] {
        let loaded = config::load(conf_path(name).unwrap()).unwrap();
        let yaml = config::to_yaml_string(&loaded).unwrap();
        assert_eq!(config::from_yaml_str(&yaml).unwrap(), loaded, "{name}");
    }
}

#[test]
fn test_lgs_uplink_config_contents() {
    let config = config::load(conf_path(LGS_UPLINK_CONFIG).unwrap()).unwrap();
    assert_eq!(config.n_gs, 2);
    assert_eq!(config.atmosphere.scrn_heights, vec![0.0, 5000.0, 10000.0, 15000.0]);

    let ngs = &config.wfs[&0];
    assert!(!ngs.is_lgs());
    assert!(ngs.uplink().is_none());

    let lgs = &config.wfs[&1];
    assert_eq!(lgs.wfs_type, WfsType::ShackHartmann);
    assert!(lgs.remove_tt);
    let uplink = lgs.uplink().expect("LGS sensor has an uplink");
    assert_eq!(uplink.propagation_mode, PropagationMode::Physical);
    assert_eq!(uplink.pupil_diam, 0.3);

    assert_eq!(config.dm[&0].dm_type, DmType::TipTilt);
    assert_eq!(config.dm[&1].dm_type, DmType::Piezo);
    assert_eq!(config.dm_wfs_indices(), Some(vec![0, 1]));
}
