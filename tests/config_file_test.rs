//! The shipped configuration file must stay in step with the built-in defaults.

use magsweep::config::{MagsweepConfig, DEFAULT_CONFIG_PATH};

#[test]
fn test_shipped_config_matches_defaults() {
    figment::Jail::expect_with(|jail| {
        let shipped = std::fs::read_to_string(
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH),
        )
        .unwrap();
        std::fs::create_dir_all(jail.directory().join("config")).unwrap();
        jail.create_file(DEFAULT_CONFIG_PATH, &shipped)?;

        let config = MagsweepConfig::load().unwrap();
        config.validate().unwrap();
        assert_eq!(config, MagsweepConfig::default());
        Ok(())
    });
}

#[test]
fn test_env_overrides_shipped_file() {
    figment::Jail::expect_with(|jail| {
        std::fs::create_dir_all(jail.directory().join("config")).unwrap();
        jail.create_file(
            DEFAULT_CONFIG_PATH,
            r#"
            [sweep]
            max_voltage = 15.0
            "#,
        )?;
        jail.set_env("MAGSWEEP_SWEEP__MAX_VOLTAGE", "10");
        jail.set_env("MAGSWEEP_POWER_SUPPLY__TRANSPORT", "visa");

        let config = MagsweepConfig::load().unwrap();
        assert_eq!(config.sweep.max_voltage, 10.0);
        assert_eq!(
            config.power_supply.transport,
            magsweep::config::SupplyTransport::Visa
        );
        Ok(())
    });
}
