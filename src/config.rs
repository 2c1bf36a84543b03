use crate::error::ConfigError;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::PathBuf;

lazy_static! {
    static ref USER_ID: Regex = Regex::new(r"^@[^:\s]+:[^\s]+$").expect("valid user id pattern");
    static ref EVENT_ID: Regex = Regex::new(r"^\$[^\s]+$").expect("valid event id pattern");
}

const DEFAULT_DATABASE_URL: &str = "sqlite:mpoll.db";

// A vote to cast on start-up: `<poll event id>=<answer id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRequest {
    pub poll_id: String,
    pub answer_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub user_id: String,
    pub import_path: Option<PathBuf>,
    pub vote: Option<VoteRequest>,
    pub watch_interval_seconds: Option<u64>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let user_id = non_empty("MPOLL_USER_ID").ok_or(ConfigError::Missing("MPOLL_USER_ID"))?;
        if !USER_ID.is_match(&user_id) {
            return Err(ConfigError::Invalid {
                name: "MPOLL_USER_ID",
                value: user_id,
            });
        }

        let vote = non_empty("MPOLL_VOTE").map(|raw| parse_vote(&raw)).transpose()?;

        let watch_interval_seconds = non_empty("MPOLL_WATCH_INTERVAL_SECONDS")
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .ok_or(ConfigError::Invalid {
                        name: "MPOLL_WATCH_INTERVAL_SECONDS",
                        value: raw,
                    })
            })
            .transpose()?;

        Ok(Self {
            database_url: non_empty("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            user_id,
            import_path: non_empty("MPOLL_IMPORT").map(PathBuf::from),
            vote,
            watch_interval_seconds,
        })
    }
}

fn parse_vote(raw: &str) -> Result<VoteRequest, ConfigError> {
    let invalid = || ConfigError::Invalid {
        name: "MPOLL_VOTE",
        value: raw.to_string(),
    };
    let (poll_id, answer_id) = raw.split_once('=').ok_or_else(invalid)?;
    let (poll_id, answer_id) = (poll_id.trim(), answer_id.trim());
    if !EVENT_ID.is_match(poll_id) || answer_id.is_empty() {
        return Err(invalid());
    }
    Ok(VoteRequest {
        poll_id: poll_id.to_string(),
        answer_id: answer_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[("MPOLL_USER_ID", "@me:example.org")]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.import_path, None);
        assert_eq!(config.vote, None);
        assert_eq!(config.watch_interval_seconds, None);
    }

    #[test]
    fn reads_every_setting() {
        let config = config(&[
            ("MPOLL_USER_ID", "@me:example.org"),
            ("DATABASE_URL", "sqlite:other.db"),
            ("MPOLL_IMPORT", "dump.json"),
            ("MPOLL_VOTE", "$poll=pizza"),
            ("MPOLL_WATCH_INTERVAL_SECONDS", "30"),
        ])
        .unwrap();
        assert_eq!(config.database_url, "sqlite:other.db");
        assert_eq!(config.import_path, Some(PathBuf::from("dump.json")));
        assert_eq!(
            config.vote,
            Some(VoteRequest {
                poll_id: "$poll".to_string(),
                answer_id: "pizza".to_string(),
            })
        );
        assert_eq!(config.watch_interval_seconds, Some(30));
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(config(&[]), Err(ConfigError::Missing("MPOLL_USER_ID")));
        assert!(matches!(
            config(&[("MPOLL_USER_ID", "me")]),
            Err(ConfigError::Invalid { name: "MPOLL_USER_ID", .. })
        ));
        assert!(matches!(
            config(&[("MPOLL_USER_ID", "@me:example.org"), ("MPOLL_VOTE", "poll=pizza")]),
            Err(ConfigError::Invalid { name: "MPOLL_VOTE", .. })
        ));
        assert!(matches!(
            config(&[("MPOLL_USER_ID", "@me:example.org"), ("MPOLL_WATCH_INTERVAL_SECONDS", "0")]),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
