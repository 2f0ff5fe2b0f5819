//! Run configuration parsed from the command line and environment.

use crate::error::Error;
use std::time::Duration;

/// Environment variable holding a default per-test timeout in milliseconds.
pub const TIMEOUT_ENV: &str = "RSTAP_TIMEOUT_MS";

/// Configuration parsed from command-line args.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunConfig {
    /// Only run top-level tests whose name contains this (case-insensitive).
    /// The others are reported as skipped.
    pub filter: Option<String>,
    /// Total number of assertions the whole run must report.
    pub plan: Option<usize>,
    /// Watchdog armed on every subtest when it starts.
    pub timeout: Option<Duration>,
}

impl RunConfig {
    /// Parse from the process args (compatible with `cargo test -- <args>`)
    /// and [`TIMEOUT_ENV`].
    pub fn from_args() -> Result<Self, Error> {
        let env_timeout = std::env::var(TIMEOUT_ENV).ok().filter(|v| !v.is_empty());
        Self::parse(std::env::args().skip(1), env_timeout)
    }

    /// Parse `args` (without the binary name). Unknown flags are ignored; a
    /// `--timeout` flag wins over `env_timeout`.
    pub fn parse<I>(args: I, env_timeout: Option<String>) -> Result<Self, Error>
    where
        I: IntoIterator<Item = String>,
    {
        let args: Vec<String> = args.into_iter().collect();
        let mut config = RunConfig::default();

        if let Some(value) = env_timeout {
            config.timeout = Some(parse_millis(TIMEOUT_ENV, &value)?);
        }

        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_str();
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
                _ => (arg, None),
            };
            match flag {
                "--plan" | "--timeout" => {
                    let value = match inline {
                        Some(value) => value,
                        None => {
                            i += 1;
                            args.get(i)
                                .cloned()
                                .ok_or_else(|| Error::MissingValue(flag.to_string()))?
                        }
                    };
                    if flag == "--plan" {
                        config.plan = Some(value.parse().map_err(|_| invalid(flag, &value))?);
                    } else {
                        config.timeout = Some(parse_millis(flag, &value)?);
                    }
                }
                arg if !arg.starts_with('-') => {
                    config.filter = Some(arg.to_string());
                }
                _ => {} // ignore unknown flags
            }
            i += 1;
        }

        Ok(config)
    }
}

fn parse_millis(flag: &str, value: &str) -> Result<Duration, Error> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| invalid(flag, value))
}

fn invalid(flag: &str, value: &str) -> Error {
    Error::InvalidArg {
        flag: flag.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_args_give_defaults() {
        assert_eq!(RunConfig::parse(args(&[]), None).unwrap(), RunConfig::default());
    }

    #[test]
    fn positional_arg_is_a_filter() {
        let config = RunConfig::parse(args(&["--quiet", "parser"]), None).unwrap();
        assert_eq!(config.filter.as_deref(), Some("parser"));
    }

    #[test]
    fn plan_and_timeout_flags() {
        let config = RunConfig::parse(args(&["--plan", "4", "--timeout=250"]), None).unwrap();
        assert_eq!(config.plan, Some(4));
        assert_eq!(config.timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn flag_overrides_env_timeout() {
        let config = RunConfig::parse(args(&["--timeout", "5"]), Some("900".into())).unwrap();
        assert_eq!(config.timeout, Some(Duration::from_millis(5)));

        let config = RunConfig::parse(args(&[]), Some("900".into())).unwrap();
        assert_eq!(config.timeout, Some(Duration::from_millis(900)));
    }

    #[test]
    fn bad_values_are_errors() {
        assert!(matches!(
            RunConfig::parse(args(&["--plan", "many"]), None),
            Err(Error::InvalidArg { .. })
        ));
        assert!(matches!(
            RunConfig::parse(args(&["--timeout"]), None),
            Err(Error::MissingValue(_))
        ));
        assert!(matches!(
            RunConfig::parse(args(&[]), Some("soon".into())),
            Err(Error::InvalidArg { .. })
        ));
    }
}
