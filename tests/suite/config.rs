//! Configuration files feeding `Core` settings.

use std::fs;
use std::time::Duration;

use ringcore_config::{ConfigError, CoreConfig};
use ringcore_engine::{Core, CoreSettings};
use tempfile::tempdir;

#[test]
fn zero_based_ranks_from_file() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[kernel]
min_rank = 0
max_rank = 6

[evaluation]
timeout_ms = 750

[neighbors]
max_neighbors = 3

[logging]
filter = "ringcore_engine=debug"
"#,
    )
    .expect("write config");

    let config = CoreConfig::load_from(&path).expect("load");
    assert_eq!(config.logging.filter, "ringcore_engine=debug");

    let settings = CoreSettings::from_config(&config).expect("settings");
    assert_eq!(settings.compute_timeout, Duration::from_millis(750));
    assert_eq!(settings.max_neighbors, 3);
    assert_eq!(settings.channel_capacity, 64);

    let core = Core::new(settings);
    assert_eq!(core.current().rank(), 0);
    assert!(core.invoke(7).is_err());
    core.invoke(6).unwrap();
    let up = core.ascend().unwrap();
    assert_eq!((up.ring(), up.rank()), (1, 0));
}

#[test]
fn invalid_bounds_are_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    fs::write(&path, "[kernel]\nmin_rank = 7\nmax_rank = 1\n").expect("write config");

    let err = CoreConfig::load_from(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }));
    assert!(err.to_string().contains("min_rank"));
}

#[test]
fn unknown_sections_are_ignored() {
    let config = CoreConfig::parse("[extras]\nanything = true\n").expect("parse");
    assert_eq!(config, CoreConfig::default());
}
