//!
//! gameshelf CLI binary
//! --------------------
//! Interactive client for a gameshelf API. Exercises the session lifecycle end to end:
//! silent refresh at startup, login/register, authenticated requests with transparent
//! token renewal, route guards and logout.

use std::env;
use std::io::{self, Write};

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::{EnvFilter, fmt};

use gameshelf::client::{HttpClient, LoginRequest, RegisterRequest};
use gameshelf::config::ClientConfig;
use gameshelf::identity::{enforce_with, GuardDecision, GuardOutcome, RouteGuard, SessionContext};
use gameshelf::nav::{Navigator, Route};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--api <url>] [--route <path>] [--user <u> --password <p>]\n\nFlags:\n  --api <url>              Backend base URL (default: $GAMESHELF_API_BASE or http://127.0.0.1:5000)\n  --route <path>           Route the client starts on (default: /dashboard)\n  --user <u>               Log in as <u> after startup\n  --password <p>           Password for --user\n  -h, --help               Show this help\n\nInteractive commands:\n  login <user> <password>             log in and start a session\n  register <user> <email> <password>  create an account and start a session\n  logout                              end the session (server call is best-effort)\n  me                                  fetch the current profile\n  get <path>                          authenticated GET, printed as JSON\n  goto <path>                         navigate, applying the route's guard\n  reload [path]                       simulate a full page load (reset, then silent refresh)\n  status                              show session phase, user and route\n  help                                show this help\n  quit | exit                         exit the interpreter\n\nExamples:\n  {program} --api http://127.0.0.1:5000 --user player --password player\n    > get /api/collection\n    > goto /admin"
    );
}

struct Args {
    api: Option<String>,
    route: String,
    user: Option<String>,
    password: Option<String>,
}

fn parse_args() -> Result<Option<Args>> {
    let mut args = Args { api: None, route: "/dashboard".to_string(), user: None, password: None };
    let mut it = env::args().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--api" => args.api = Some(it.next().ok_or_else(|| anyhow!("--api requires a value"))?),
            "--route" => args.route = it.next().ok_or_else(|| anyhow!("--route requires a value"))?,
            "--user" => args.user = Some(it.next().ok_or_else(|| anyhow!("--user requires a value"))?),
            "--password" => args.password = Some(it.next().ok_or_else(|| anyhow!("--password requires a value"))?),
            "-h" | "--help" => return Ok(None),
            other => return Err(anyhow!("unknown argument: {}", other)),
        }
    }
    Ok(Some(args))
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))?;
    fmt().with_env_filter(filter).with_writer(io::stderr).init();

    let program = env::args().next().unwrap_or_else(|| "gameshelf_cli".to_string());
    let args = match parse_args() {
        Ok(Some(a)) => a,
        Ok(None) => { print_usage(&program); return Ok(()); }
        Err(e) => { eprintln!("{}", e); print_usage(&program); std::process::exit(2); }
    };

    let config = match &args.api {
        Some(url) => ClientConfig::new(url),
        None => ClientConfig::from_env(),
    }
    .context("invalid client configuration")?;

    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let start = Route::from_path(&args.route);
    let navigator = Navigator::new(start.clone());
    let client = HttpClient::new(config, navigator).context("building HTTP client")?;
    let session = SessionContext::new(client);

    let phase = rt.block_on(session.bootstrap(&start));
    println!("session: {:?} at {}", phase, start.path());

    if let (Some(u), Some(p)) = (args.user.as_deref(), args.password.as_deref()) {
        if let Err(e) = rt.block_on(do_login(&session, u, p)) {
            eprintln!("login failed: {}", e);
        }
    }

    run_repl(&rt, &session)
}

async fn do_login(session: &SessionContext, user: &str, password: &str) -> Result<()> {
    let req = LoginRequest { username: user.to_string(), password: password.to_string() };
    let resp = session.account().login(&req).await?;
    println!("logged in as {}{}", resp.user.username, if resp.user.admin { " (admin)" } else { "" });
    session.login(resp.access_token, resp.user);
    Ok(())
}

async fn goto(session: &SessionContext, path: &str) {
    let route = Route::from_path(path);
    session.navigator().push(route.clone());
    let Some(guard) = RouteGuard::for_route(&route) else {
        println!("at {}", route.path());
        return;
    };
    let outcome = enforce_with(guard, session, |d| match d {
        GuardDecision::Loading => println!("loading..."),
        GuardDecision::Deny { message, after, .. } => println!("{} (redirecting in {}s)", message, after.as_secs()),
        _ => {}
    })
    .await;
    match outcome {
        GuardOutcome::Rendered => println!("at {}", route.path()),
        GuardOutcome::Redirected(to) | GuardOutcome::Denied { redirected_to: to, .. } => {
            println!("redirected to {}", to.path())
        }
    }
}

fn run_repl(rt: &tokio::runtime::Runtime, session: &SessionContext) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut input = String::new();
    println!("gameshelf interpreter. Type 'help' for commands.");
    loop {
        input.clear();
        print!("> "); let _ = stdout.flush();
        match stdin.read_line(&mut input) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = input.trim();
        if line.is_empty() { continue; }
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts[0].to_lowercase().as_str() {
            "quit" | "exit" => break,
            "help" => print_usage("gameshelf_cli"),
            "login" => {
                if parts.len() < 3 { eprintln!("usage: login <user> <password>"); continue; }
                if let Err(e) = rt.block_on(do_login(session, parts[1], parts[2])) { eprintln!("login failed: {}", e); }
            }
            "register" => {
                if parts.len() < 4 { eprintln!("usage: register <user> <email> <password>"); continue; }
                let req = RegisterRequest { username: parts[1].to_string(), email: parts[2].to_string(), password: parts[3].to_string() };
                match rt.block_on(session.account().register(&req)) {
                    Ok(resp) => {
                        println!("registered {}", resp.user.username);
                        session.login(resp.access_token, resp.user);
                    }
                    Err(e) => eprintln!("register failed: {}", e),
                }
            }
            "logout" => {
                rt.block_on(session.logout());
                println!("logged out; at {}", session.navigator().current().path());
            }
            "me" => match rt.block_on(session.account().me()) {
                Ok(u) => println!("{}", serde_json::to_string_pretty(&u).unwrap_or_else(|_| format!("{:?}", u))),
                Err(e) => eprintln!("error: {}", e),
            },
            "get" => {
                if parts.len() < 2 { eprintln!("usage: get <path>"); continue; }
                match rt.block_on(session.client().get_json::<serde_json::Value>(parts[1])) {
                    Ok(v) => println!("{}", serde_json::to_string_pretty(&v).unwrap_or_else(|_| v.to_string())),
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            "goto" => {
                if parts.len() < 2 { eprintln!("usage: goto <path>"); continue; }
                rt.block_on(goto(session, parts[1]));
            }
            "reload" => {
                let route = parts.get(1).map(|p| Route::from_path(p)).unwrap_or_else(|| session.navigator().current());
                let phase = rt.block_on(session.reload(route.clone()));
                println!("session: {:?} at {}", phase, route.path());
            }
            "status" => {
                let s = session.snapshot();
                let who = s.user.as_ref().map(|u| u.username.as_str()).unwrap_or("<none>");
                println!(
                    "phase: {:?}, user: {}, token: {}, route: {}, refreshes: {}",
                    s.phase(),
                    who,
                    if s.access_token.is_some() { "present" } else { "absent" },
                    session.navigator().current().path(),
                    session.tokens().refresh_count()
                );
            }
            other => eprintln!("unknown command: {} (try 'help')", other),
        }
    }
    Ok(())
}
