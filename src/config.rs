use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};

pub const DEFAULT_IMAGE: &str = "leg100/etok:latest";
const DEFAULT_CLONE_DIR: &str = "etok-repos";

fn jaeger_arg() -> Arg {
    Arg::new("jaeger")
        .long("jaeger")
        .env("ETOK_JAEGER")
        .help("Export traces to a jaeger agent")
        .action(ArgAction::SetTrue)
}

fn seconds_arg(name: &'static str, env: &'static str, default: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .env(env)
        .value_name("SECONDS")
        .value_parser(value_parser!(u64).range(1..))
        .default_value(default)
}

fn seconds(matches: &ArgMatches, name: &str) -> anyhow::Result<Duration> {
    match matches.get_one::<u64>(name) {
        Some(secs) => Ok(Duration::from_secs(*secs)),
        None => Err(anyhow::anyhow!("--{} is required", name)),
    }
}

pub fn operator_command() -> Command {
    Command::new("operator")
        .about("reconciles etok workspaces and runs")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("image")
                .long("image")
                .env("ETOK_IMAGE")
                .help("Image for workspace and run pods")
                .default_value(DEFAULT_IMAGE),
        )
        .arg(jaeger_arg())
}

pub fn github_command() -> Command {
    Command::new("github")
        .about("runs checks against connected workspaces for a github app")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("app-id")
                .long("app-id")
                .env("ETOK_APP_ID")
                .help("GitHub app ID")
                .value_parser(value_parser!(u64))
                .required(true),
        )
        .arg(
            Arg::new("key-path")
                .long("key-path")
                .env("ETOK_KEY_PATH")
                .help("Path to the app's PEM encoded private key")
                .value_parser(value_parser!(PathBuf))
                .required(true),
        )
        .arg(
            Arg::new("webhook-secret")
                .long("webhook-secret")
                .env("ETOK_WEBHOOK_SECRET")
                .help("Secret used to sign webhook deliveries")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .env("ETOK_PORT")
                .help("Webhook listening port")
                .value_parser(value_parser!(u16))
                .default_value("9001"),
        )
        .arg(
            Arg::new("clone-dir")
                .long("clone-dir")
                .env("ETOK_CLONE_DIR")
                .help("Directory repositories are cloned into [default: <tmp>/etok-repos]")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("strip-refreshing")
                .long("strip-refreshing")
                .env("ETOK_STRIP_REFRESHING")
                .help("Strip 'Refreshing state...' lines from plan output")
                .action(ArgAction::SetTrue),
        )
        .arg(seconds_arg("monitor-interval", "ETOK_MONITOR_INTERVAL", "10"))
        .arg(seconds_arg("reaper-interval", "ETOK_REAPER_INTERVAL", "60"))
        .arg(seconds_arg("repo-ttl", "ETOK_REPO_TTL", "3600"))
        .arg(jaeger_arg())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    pub image: String,
    pub jaeger: bool,
}

impl OperatorConfig {
    pub fn from_matches(matches: &ArgMatches) -> anyhow::Result<Self> {
        let image = match matches.get_one::<String>("image") {
            Some(image) if !image.is_empty() => image.clone(),
            _ => return Err(anyhow::anyhow!("--image must not be empty")),
        };

        Ok(Self {
            image,
            jaeger: matches.get_flag("jaeger"),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GithubConfig {
    pub app_id: u64,
    pub key_path: PathBuf,
    pub webhook_secret: String,
    pub port: u16,
    pub clone_dir: PathBuf,
    pub strip_refreshing: bool,
    pub monitor_interval: Duration,
    pub reaper_interval: Duration,
    pub repo_ttl: Duration,
    pub jaeger: bool,
}

impl GithubConfig {
    pub fn from_matches(matches: &ArgMatches) -> anyhow::Result<Self> {
        let app_id = match matches.get_one::<u64>("app-id") {
            Some(0) | None => return Err(anyhow::anyhow!("--app-id is required")),
            Some(app_id) => *app_id,
        };

        let key_path = match matches.get_one::<PathBuf>("key-path") {
            Some(path) => path.clone(),
            None => return Err(anyhow::anyhow!("--key-path is required")),
        };

        let webhook_secret = match matches.get_one::<String>("webhook-secret") {
            Some(secret) if !secret.is_empty() => secret.clone(),
            _ => return Err(anyhow::anyhow!("--webhook-secret is required")),
        };

        let clone_dir = matches
            .get_one::<PathBuf>("clone-dir")
            .cloned()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_CLONE_DIR));

        Ok(Self {
            app_id,
            key_path,
            webhook_secret,
            port: matches.get_one::<u16>("port").copied().unwrap_or(9001),
            clone_dir,
            strip_refreshing: matches.get_flag("strip-refreshing"),
            monitor_interval: seconds(matches, "monitor-interval")?,
            reaper_interval: seconds(matches, "reaper-interval")?,
            repo_ttl: seconds(matches, "repo-ttl")?,
            jaeger: matches.get_flag("jaeger"),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn github(args: &[&str]) -> anyhow::Result<GithubConfig> {
        let matches = github_command().try_get_matches_from(
            ["github"].iter().chain(args.iter()).copied().collect::<Vec<_>>(),
        )?;
        GithubConfig::from_matches(&matches)
    }

    #[test]
    fn test_operator_defaults() -> anyhow::Result<()> {
        let matches = operator_command().try_get_matches_from(["operator"])?;
        let config = OperatorConfig::from_matches(&matches)?;

        assert_eq!(config.image, DEFAULT_IMAGE);
        assert!(!config.jaeger);

        Ok(())
    }

    #[test]
    fn test_github_defaults() -> anyhow::Result<()> {
        let config = github(&[
            "--app-id",
            "123",
            "--key-path",
            "/etc/etok/key.pem",
            "--webhook-secret",
            "s3cr3t",
        ])?;

        assert_eq!(config.app_id, 123);
        assert_eq!(config.key_path, PathBuf::from("/etc/etok/key.pem"));
        assert_eq!(config.port, 9001);
        assert_eq!(config.addr().port(), 9001);
        assert!(config.clone_dir.ends_with(DEFAULT_CLONE_DIR));
        assert!(!config.strip_refreshing);
        assert_eq!(config.monitor_interval, Duration::from_secs(10));
        assert_eq!(config.reaper_interval, Duration::from_secs(60));
        assert_eq!(config.repo_ttl, Duration::from_secs(3600));

        Ok(())
    }

    #[test]
    fn test_github_overrides() -> anyhow::Result<()> {
        let config = github(&[
            "--app-id",
            "123",
            "--key-path",
            "key.pem",
            "--webhook-secret",
            "s3cr3t",
            "--port",
            "8080",
            "--clone-dir",
            "/var/lib/etok",
            "--strip-refreshing",
            "--monitor-interval",
            "2",
            "--repo-ttl",
            "60",
        ])?;

        assert_eq!(config.port, 8080);
        assert_eq!(config.clone_dir, PathBuf::from("/var/lib/etok"));
        assert!(config.strip_refreshing);
        assert_eq!(config.monitor_interval, Duration::from_secs(2));
        assert_eq!(config.repo_ttl, Duration::from_secs(60));

        Ok(())
    }

    #[test]
    fn test_github_rejects_missing_and_zero_values() {
        assert!(github(&["--key-path", "key.pem", "--webhook-secret", "s"]).is_err());
        assert!(github(&["--app-id", "0", "--key-path", "key.pem", "--webhook-secret", "s"]).is_err());
        assert!(github(&["--app-id", "1", "--key-path", "key.pem", "--webhook-secret", ""]).is_err());
        assert!(github(&[
            "--app-id",
            "1",
            "--key-path",
            "key.pem",
            "--webhook-secret",
            "s",
            "--monitor-interval",
            "0",
        ])
        .is_err());
    }
}
