//! Command line front end for editing Angor project profiles. Supports
//! inspecting a profile, publishing edited state, key conversion, relay
//! configuration, and issuing the project member badge.

use std::{fs, sync::Arc};

use angor_profile::{
    badges::{self, AwardOutcome},
    config::{ensure_env_file, write_env_value, Settings},
    connection::RelayConnection,
    keys,
    records::{BadgeDefinition, MEMBER_BADGE_SLUG},
    ConnectionManager, EditableState, ProfileEditSession, RecordReader, RelayList,
    SigningCoordinator, SigningMethod, SigningRequest,
};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

/// Environment variable holding the private key used for signing.
const SECRET_KEY_VAR: &str = "NOSTR_SECRET_KEY";

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "angor-profile",
    author,
    version,
    about = "Edit Angor project profiles stored on Nostr relays"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Load a profile and print it as JSON.
    Show {
        /// npub or hex public key; defaults to the last profile shown.
        identity: Option<String>,
    },
    /// Sign and publish the sections present in a state file.
    Publish {
        /// JSON file with `profile`, `project`, `faq`, `members`, `media`, `relays`.
        state: String,
        /// Profile owner; defaults to the last profile shown, then the signing key.
        #[arg(long)]
        identity: Option<String>,
        /// Print the events instead of signing and publishing them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Convert between key encodings.
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },
    /// Manage the relay list.
    Relays {
        #[command(subcommand)]
        action: RelaysAction,
    },
    /// Check or issue the project member badge.
    Badges {
        #[command(subcommand)]
        action: BadgesAction,
    },
}

/// Operations available under `angor-profile keys`.
#[derive(Subcommand)]
enum KeysAction {
    /// Print the public key of a private key (nsec or hex).
    Public { key: String },
    /// Decode an npub to hex.
    Decode { npub: String },
    /// Encode a hex public key as npub.
    Encode { hex: String },
}

/// Operations available under `angor-profile relays`.
#[derive(Subcommand)]
enum RelaysAction {
    /// Print the configured relays.
    List,
    /// Add a relay after verifying connectivity.
    Add { url: String },
    /// Remove a relay from the configuration.
    Remove { url: String },
}

/// Operations available under `angor-profile badges`.
#[derive(Subcommand)]
enum BadgesAction {
    /// Report which members hold the issuer's member badge.
    Check {
        #[arg(long)]
        issuer: String,
        #[arg(required = true)]
        members: Vec<String>,
    },
    /// Award the member badge, publishing its definition first if needed.
    Award {
        #[arg(long)]
        issuer: String,
        member: String,
        #[arg(long, default_value = "")]
        image: String,
        #[arg(long, default_value = "")]
        thumb: String,
    },
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    match cli.command {
        Commands::Keys { action } => handle_keys(action)?,
        Commands::Relays { action } => handle_relays(action, &cli.env, &cfg).await?,
        Commands::Publish {
            state,
            identity,
            dry_run: true,
        } => {
            let identity = resolve_identity(identity, &cfg)?;
            let data = fs::read_to_string(&state).with_context(|| format!("reading {state}"))?;
            let state: EditableState = serde_json::from_str(&data)?;
            let request = SigningRequest::new(angor_profile::synthesize(&state)?, &identity)?;
            eprintln!("{}", request.preview());
            println!("{}", serde_json::to_string_pretty(&request.events)?);
        }
        command => {
            let manager = Arc::new(ConnectionManager::from_settings(&cfg));
            let result = run_networked(command, &cli.env, &cfg, manager.clone()).await;
            manager.disconnect().await;
            result?;
        }
    }
    Ok(())
}

async fn run_networked(
    command: Commands,
    env_path: &str,
    cfg: &Settings,
    manager: Arc<ConnectionManager>,
) -> anyhow::Result<()> {
    match command {
        Commands::Show { identity } => {
            let identity = identity
                .or_else(|| cfg.last_profile.clone())
                .context("no identity given and no LAST_PROFILE recorded")?;
            let mut session = ProfileEditSession::new(manager, &identity)?;
            session.load().await?;
            write_env_value(env_path, "LAST_PROFILE", session.identity())?;
            let member_profiles = session.member_profiles().await?;
            let out = json!({
                "pubkey": session.identity(),
                "npub": session.npub()?,
                "profile": session.profile,
                "project": session.project,
                "faq": session.faq,
                "members": session.members,
                "memberProfiles": member_profiles,
                "media": session.media,
                "relays": session.relays,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Publish {
            state, identity, ..
        } => {
            let secret = std::env::var(SECRET_KEY_VAR)
                .with_context(|| format!("{SECRET_KEY_VAR} must hold the private key"))?;
            let identity = match identity.or_else(|| cfg.last_profile.clone()) {
                Some(identity) => identity,
                None => keys::public_key_for(&secret)?,
            };
            let data = fs::read_to_string(&state).with_context(|| format!("reading {state}"))?;
            let state: EditableState = serde_json::from_str(&data)?;
            let coordinator = SigningCoordinator::new(manager);
            let request =
                coordinator.request_signature(angor_profile::synthesize(&state)?, &identity)?;
            eprintln!("{}", request.preview());
            let outcome = coordinator
                .complete(request, SigningMethod::PrivateKey(secret))
                .await?;
            for id in &outcome.published {
                println!("{id}");
            }
            info!(count = outcome.published.len(), "profile published");
        }
        Commands::Badges { action } => handle_badges(action, manager).await?,
        Commands::Keys { .. } | Commands::Relays { .. } => {
            bail!("keys and relays commands run without a relay session")
        }
    }
    Ok(())
}

/// Identity for a dry run: flag, then `LAST_PROFILE`, then the signing key.
fn resolve_identity(identity: Option<String>, cfg: &Settings) -> anyhow::Result<String> {
    if let Some(identity) = identity.or_else(|| cfg.last_profile.clone()) {
        return Ok(identity);
    }
    match std::env::var(SECRET_KEY_VAR) {
        Ok(secret) => Ok(keys::public_key_for(&secret)?),
        Err(_) => bail!("pass --identity or set {SECRET_KEY_VAR}"),
    }
}

fn handle_keys(action: KeysAction) -> anyhow::Result<()> {
    match action {
        KeysAction::Public { key } => {
            let hex_key = keys::public_key_for(&key)?;
            println!("{hex_key}");
            println!("{}", keys::encode_npub(&hex_key)?);
        }
        KeysAction::Decode { npub } => println!("{}", keys::decode_npub(&npub)?),
        KeysAction::Encode { hex } => println!("{}", keys::encode_npub(&hex)?),
    }
    Ok(())
}

async fn handle_relays(action: RelaysAction, env_path: &str, cfg: &Settings) -> anyhow::Result<()> {
    let mut relays = RelayList::new(&cfg.relays);
    match action {
        RelaysAction::List => {
            for relay in relays.as_slice() {
                println!("{relay}");
            }
        }
        RelaysAction::Add { url } => {
            if relays.as_slice().contains(&url) {
                bail!("relay already configured: {url}");
            }
            let conn = RelayConnection::connect(&url, cfg.tor_socks.as_deref(), cfg.query_timeout).await?;
            conn.close().await;
            relays.add(&url);
            write_env_value(env_path, "RELAYS", &relays.as_slice().join(","))?;
        }
        RelaysAction::Remove { url } => {
            if !relays.remove(&url) {
                bail!("relay not configured: {url}");
            }
            write_env_value(env_path, "RELAYS", &relays.as_slice().join(","))?;
        }
    }
    Ok(())
}

async fn handle_badges(action: BadgesAction, manager: Arc<ConnectionManager>) -> anyhow::Result<()> {
    let reader = RecordReader::new(manager.clone());
    match action {
        BadgesAction::Check { issuer, members } => {
            let members = members
                .iter()
                .map(|m| keys::normalize_identity(m))
                .collect::<Result<Vec<_>, _>>()?;
            let awards = reader
                .fetch_badge_awards(&issuer, &members, MEMBER_BADGE_SLUG)
                .await?;
            for (member, held) in awards {
                println!("{member} {}", if held { "awarded" } else { "not awarded" });
            }
        }
        BadgesAction::Award {
            issuer,
            member,
            image,
            thumb,
        } => {
            let secret = std::env::var(SECRET_KEY_VAR)
                .with_context(|| format!("{SECRET_KEY_VAR} must hold the issuer's private key"))?;
            let coordinator = SigningCoordinator::new(manager);
            let badge = BadgeDefinition::project_member(&image, &thumb);
            let coordinate = badges::ensure_definition(
                &reader,
                &coordinator,
                &issuer,
                &badge,
                SigningMethod::PrivateKey(secret.clone()),
            )
            .await?;
            let outcome = badges::award_badge(
                &reader,
                &coordinator,
                &issuer,
                &coordinate,
                &member,
                SigningMethod::PrivateKey(secret),
            )
            .await?;
            match outcome {
                AwardOutcome::AlreadyAwarded => println!("already awarded"),
                AwardOutcome::Awarded { event_id } => println!("{event_id}"),
            }
        }
    }
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::Value;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::{net::TcpListener, task};
    use tokio_tungstenite::{accept_async, tungstenite::Message as TMsg};

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: [&str; 5] = ["RELAYS", "TOR_SOCKS", "QUERY_TIMEOUT_SECS", "LAST_PROFILE", SECRET_KEY_VAR];

    fn clear_env() {
        for v in VARS {
            std::env::remove_var(v);
        }
    }

    fn write_env(dir: &TempDir, relays: &str) -> String {
        let env_path = dir.path().join(".env");
        fs::write(
            &env_path,
            format!("RELAYS={relays}\nTOR_SOCKS=\nQUERY_TIMEOUT_SECS=2\nLAST_PROFILE=\n"),
        )
        .unwrap();
        env_path.to_string_lossy().into_owned()
    }

    /// Relay that answers every REQ with EOSE and every EVENT with OK.
    async fn spawn_relay() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        task::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                task::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(TMsg::Text(txt))) = ws.next().await {
                        let msg: Value = serde_json::from_str(&txt).unwrap();
                        let reply = match msg[0].as_str() {
                            Some("REQ") => json!(["EOSE", msg[1]]),
                            Some("EVENT") => json!(["OK", msg[1]["id"], true, ""]),
                            _ => continue,
                        };
                        if ws.send(TMsg::Text(reply.to_string())).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn relays_add_validates_and_updates_env() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "ws://one");
        let url = spawn_relay().await;
        run(Cli {
            env: env_file.clone(),
            command: Commands::Relays {
                action: RelaysAction::Add { url: url.clone() },
            },
        })
        .await
        .unwrap();
        let data = fs::read_to_string(&env_file).unwrap();
        assert!(data.contains(&format!("RELAYS=ws://one,{url}")));
    }

    #[tokio::test]
    async fn relays_add_rejects_unreachable() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = TempDir::new().unwrap();
        let env_file = write_env(&dir, "ws://one");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let res = run(Cli {
            env: env_file.clone(),
            command: Commands::Relays {
                action: RelaysAction::Add {
                    url: format!("ws://{addr}"),
                },
            },
        })
        .await;
        assert!(res.is_err());
        assert!(fs::read_to_string(&env_file).unwrap().contains("RELAYS=ws://one\n"));
    }

    #[tokio::test]
    async fn show_remembers_last_profile() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = TempDir::new().unwrap();
        let relay = spawn_relay().await;
        let env_file = write_env(&dir, &relay);
        let npub = "npub1zutzeysacnf9rru6zqwmxd54mud0k44tst6l70ja5mhv8jjumytsd2x7nu";
        run(Cli {
            env: env_file.clone(),
            command: Commands::Show {
                identity: Some(npub.into()),
            },
        })
        .await
        .unwrap();
        let data = fs::read_to_string(&env_file).unwrap();
        assert!(data.contains(
            "LAST_PROFILE=17162c921dc4d2518f9a101db33695df1afb56ab82f5ff3e5da6eec3ca5cd917"
        ));

        // Falls back to the remembered identity.
        run(Cli {
            env: env_file,
            command: Commands::Show { identity: None },
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn publish_signs_with_env_key() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = TempDir::new().unwrap();
        let relay = spawn_relay().await;
        let env_file = write_env(&dir, &relay);
        let state_path = dir.path().join("state.json");
        fs::write(
            &state_path,
            r#"{"profile":{"name":"alice"},"faq":[{"question":"q","answer":"a"}]}"#,
        )
        .unwrap();
        std::env::set_var(
            SECRET_KEY_VAR,
            "nsec10allq0gjx7fddtzef0ax00mdps9t2kmtrldkyjfs8l5xruwvh2dq0lhhkp",
        );
        let res = run(Cli {
            env: env_file,
            command: Commands::Publish {
                state: state_path.to_string_lossy().into_owned(),
                identity: None,
                dry_run: false,
            },
        })
        .await;
        std::env::remove_var(SECRET_KEY_VAR);
        res.unwrap();
    }

    #[tokio::test]
    async fn publish_with_foreign_identity_fails() {
        let _g = ENV_MUTEX.lock().unwrap();
        clear_env();
        let dir = TempDir::new().unwrap();
        let relay = spawn_relay().await;
        let env_file = write_env(&dir, &relay);
        let state_path = dir.path().join("state.json");
        fs::write(&state_path, r#"{"profile":{"name":"alice"}}"#).unwrap();
        std::env::set_var(SECRET_KEY_VAR, "01".repeat(32));
        let res = run(Cli {
            env: env_file,
            command: Commands::Publish {
                state: state_path.to_string_lossy().into_owned(),
                identity: Some("17162c921dc4d2518f9a101db33695df1afb56ab82f5ff3e5da6eec3ca5cd917".into()),
                dry_run: false,
            },
        })
        .await;
        std::env::remove_var(SECRET_KEY_VAR);
        let err = res.unwrap_err();
        assert!(err.to_string().contains("identity mismatch"));
    }

    #[tokio::test]
    async fn local_commands_are_refused_by_networked_runner() {
        let cfg = Settings {
            relays: vec!["ws://127.0.0.1:9".into()],
            tor_socks: None,
            query_timeout: std::time::Duration::from_secs(1),
            last_profile: None,
        };
        let manager = Arc::new(ConnectionManager::from_settings(&cfg));
        let res = run_networked(
            Commands::Relays {
                action: RelaysAction::List,
            },
            ".env",
            &cfg,
            manager.clone(),
        )
        .await;
        assert!(res.is_err());
        assert_eq!(
            manager.state(),
            angor_profile::ConnectionState::Disconnected
        );
    }
}
