//!
//! picart persistent client
//! ------------------------
//! Command runner for the long-lived client context. Identity state lives in a
//! `FileChannel` under the state directory, so consecutive invocations behave
//! like one browser profile.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::{EnvFilter, fmt};

use picart::api::{Notice, Notifier, ReqwestTransport, Transport};
use picart::channel::{FileChannel, PersistedChannel};
use picart::config::SessionConfig;
use picart::context::IdentityContext;
use picart::session::{Navigator, RenderMode};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--state-dir <dir>] [--api <url>] <command>\n\nCommands:\n  consent accept|reject|reset     record or withdraw cookie consent\n  device                          show (and issue, with consent) the device id\n  login <token> [refresh] [--remember <username>]\n                                  install a credential and load the profile\n  whoami                          bootstrap and print the identity snapshot\n  route <path> [--auth]           show the route guard decision for a path\n  logout [--local]                log out; --local skips the server call\n\nDefaults:\n  --state-dir defaults to PICART_STATE_DIR or ./.picart\n  --api defaults to PICART_API_BASE_URL or http://127.0.0.1:3000/api/v1"
    );
}

struct PrintNavigator;

impl Navigator for PrintNavigator {
    fn redirect(&self, path: &str) {
        println!("redirect -> {}", path);
    }
}

fn drain_notices(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Notice>) {
    while let Ok(n) = rx.try_recv() {
        match n {
            Notice::Success(m) => println!("[ok] {}", m),
            Notice::Error(m) => eprintln!("[error] {}", m),
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Program name and remaining arguments. An empty argv falls back to the binary name.
fn split_program(mut argv: impl Iterator<Item = String>) -> (String, Vec<String>) {
    let program = argv.next().unwrap_or_else(|| "picart_client".to_string());
    (program, argv.collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let (program, args) = split_program(env::args());
    let mut config = SessionConfig::from_env();
    let mut rest: Vec<String> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--state-dir" => {
                i += 1;
                config.state_dir = Some(args.get(i).cloned().ok_or_else(|| anyhow!("--state-dir needs a value"))?);
            }
            "--api" => {
                i += 1;
                config.api_base_url = args.get(i).cloned().ok_or_else(|| anyhow!("--api needs a value"))?;
            }
            "-h" | "--help" => {
                print_usage(&program);
                return Ok(());
            }
            other => rest.push(other.to_string()),
        }
        i += 1;
    }
    if rest.is_empty() {
        print_usage(&program);
        return Err(anyhow!("missing command"));
    }

    let state_dir = PathBuf::from(config.state_dir.clone().unwrap_or_else(|| ".picart".to_string()));
    let channel: Arc<dyn PersistedChannel> = Arc::new(
        FileChannel::open(state_dir.join("identity.json"))
            .with_context(|| format!("opening state under {}", state_dir.display()))?,
    );
    let config = Arc::new(config);
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(config.clone())?);
    let (notifier, mut notices) = Notifier::with_listener();
    let ctx = IdentityContext::builder(RenderMode::Persistent, config, channel, transport)
        .notifier(notifier)
        .navigator(Arc::new(PrintNavigator))
        .build();

    let cmd = rest[0].as_str();
    let result = match cmd {
        "consent" => match rest.get(1).map(String::as_str) {
            Some("accept") => ctx.grant_consent(picart::consent::ConsentCategories::all()).await.map(|r| print_json(&r)),
            Some("reject") => ctx.grant_consent(picart::consent::ConsentCategories::necessary_only()).await.map(|r| print_json(&r)),
            Some("reset") => ctx.revoke_consent().map(|_| {
                println!("consent withdrawn");
                Ok::<(), anyhow::Error>(())
            }),
            _ => return Err(anyhow!("usage: consent accept|reject|reset")),
        },
        "device" => {
            match ctx.device.resolve().await {
                Some(id) => println!("{} ({:?})", id.id, id.origin),
                None => println!("no device id: necessary consent not granted"),
            }
            Ok(Ok(()))
        }
        "login" => {
            let token = rest.get(1).ok_or_else(|| anyhow!("usage: login <token> [refresh] [--remember <username>]"))?;
            let mut refresh: Option<&str> = None;
            let mut remember: Option<&str> = None;
            let mut j = 2;
            while j < rest.len() {
                if rest[j] == "--remember" {
                    j += 1;
                    remember = rest.get(j).map(String::as_str);
                } else {
                    refresh = Some(rest[j].as_str());
                }
                j += 1;
            }
            ctx.sign_in(token, refresh, remember).await.map(|r| print_json(&r))
        }
        "whoami" => {
            let report = ctx.bootstrap().await;
            print_json(&serde_json::json!({"bootstrap": report, "identity": ctx.snapshot()}))?;
            Ok(Ok(()))
        }
        "route" => {
            let path = rest.get(1).ok_or_else(|| anyhow!("usage: route <path> [--auth]"))?;
            let requires_auth = rest.iter().any(|a| a == "--auth");
            ctx.bootstrap().await;
            Ok(print_json(&ctx.route(path, requires_auth)))
        }
        "logout" => {
            let notify = !rest.iter().any(|a| a == "--local");
            Ok(print_json(&ctx.logout(notify).await))
        }
        other => {
            print_usage(&program);
            return Err(anyhow!("unknown command '{}'", other));
        }
    };
    drain_notices(&mut notices);
    match result {
        Ok(printed) => printed,
        Err(e) => Err(anyhow!("{}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_argv_uses_binary_name() {
        let (program, rest) = split_program(std::iter::empty::<String>());
        assert_eq!(program, "picart_client");
        assert!(rest.is_empty());

        let argv = ["/usr/bin/picart_client", "whoami"].map(String::from);
        let (program, rest) = split_program(argv.into_iter());
        assert_eq!(program, "/usr/bin/picart_client");
        assert_eq!(rest, vec!["whoami".to_string()]);
    }
}
