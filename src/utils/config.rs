//! Configuration parameters struct parsing helper.

/// Composes a configuration struct from its default values, then overwrites
/// given fields by parsing from given TOML string if it's not `None`. Returns
/// an `Ok(config)` on success, and `Err(ChartpaxError)` on parser failure.
///
/// Example:
/// ```ignore
/// let config = parsed_config!(config_str => MyConfig; base_dir, rpc_timeout_ms)?;
/// ```
#[macro_export]
macro_rules! parsed_config {
    ($config_str:expr => $config_type:ty; $($field:ident),+) => {{
        let config_str: Option<&str> = $config_str;

        // closure helper for easier error returning
        let compose_config = || -> Result<$config_type, $crate::ChartpaxError> {
            let mut config: $config_type = Default::default();
            let config_str = match config_str {
                Some(s) => s,
                None => return Ok(config),
            };

            let mut table = config_str.parse::<toml::Table>()?;

            // traverse through all given field names
            $({
                // if field name found in table (and removed)
                if let Some(v) = table.remove(stringify!($field)) {
                    config.$field = v.try_into()?;
                }
            })+

            // if table is not empty at this time, some parsed keys are not
            // expected hence invalid
            if let Some(key) = table.keys().next() {
                return Err($crate::ChartpaxError(format!(
                    "invalid field name '{}' in config",
                    key,
                )));
            }

            Ok(config)
        };

        compose_config()
    }};
}

#[cfg(test)]
mod config_tests {
    use crate::utils::ChartpaxError;

    #[derive(Debug, PartialEq)]
    struct TestConfig {
        retries: u16,
        data_dir: String,
        backoff_factor: f64,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            TestConfig {
                retries: 3,
                data_dir: "/tmp/charts".into(),
                backoff_factor: 1.5,
            }
        }
    }

    #[test]
    fn parse_from_none() -> Result<(), ChartpaxError> {
        let config = parsed_config!(None => TestConfig;
                                    retries, data_dir, backoff_factor)?;
        let ref_config: TestConfig = Default::default();
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_from_partial() -> Result<(), ChartpaxError> {
        let config_str = Some("data_dir = '/var/charts'");
        let config = parsed_config!(config_str => TestConfig;
                                    data_dir, backoff_factor)?;
        let ref_config = TestConfig {
            retries: 3,
            data_dir: "/var/charts".into(),
            backoff_factor: 1.5,
        };
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_invalid_field() {
        let config_str = Some("batch_size = 999");
        assert!(parsed_config!(config_str => TestConfig; retries).is_err());
    }

    #[test]
    fn parse_wrong_type() {
        let config_str = Some("retries = 'three'");
        assert!(parsed_config!(config_str => TestConfig; retries).is_err());
    }
}
