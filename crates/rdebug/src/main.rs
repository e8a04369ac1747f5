use std::error::Error;
use std::path::PathBuf;
use std::{fs, process};

use clap::{ArgGroup, Parser, ValueEnum};
use mlua::Lua;
use rdebug_core::global;
use rdebug_core::platform::lua::{attach_lua, detach_lua, init_internal_module, open_redirect, run_script};
use rdebug_core::types::Redirect;
use rdebug_core::Debugger;
use rdebug_net::{Endpoint, SocketClient, SocketServer, Transport};
use rdebug_utils::{error, info, init_logging, init_logging_with_level, warn, LogFormat, LogGuard, LogLevel};
use serde_json::{Map, Value};

/// Run a Lua script under a network-attached debugger.
#[derive(Parser, Debug)]
#[command(name = "rdebug")]
#[command(version)]
#[command(about = "Run a Lua script under a network-attached debugger", long_about = None)]
#[command(group(ArgGroup::new("transport").args(["listen", "connect"])))]
struct Cli
{
    /// Lua script to run
    script: PathBuf,

    /// Listen for the debugger frontend on this address (e.g. 127.0.0.1:4278)
    #[arg(long, value_name = "ADDR")]
    listen: Option<Endpoint>,

    /// Connect out to a listening frontend at this address
    #[arg(long, value_name = "ADDR")]
    connect: Option<Endpoint>,

    /// Block until a frontend is connected and configured before running
    #[arg(long, default_value_t = false)]
    wait: bool,

    /// Stop on the first line of the script
    #[arg(long, default_value_t = false)]
    stop_on_entry: bool,

    /// Host configuration as a JSON object
    #[arg(long, value_name = "JSON")]
    config: Option<String>,

    /// Configuration schema file
    #[arg(long, value_name = "PATH")]
    schema: Option<PathBuf>,

    /// Output to forward to the frontend (repeatable)
    #[arg(long = "redirect", value_enum, default_values_t = [Capture::Print, Capture::IoWrite])]
    redirects: Vec<Capture>,

    /// Log level; overrides RUST_LOG
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// Log format used with --log-level
    #[arg(long, value_name = "FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Capture
{
    Print,
    IoWrite,
    Stdout,
    Stderr,
}

impl From<Capture> for Redirect
{
    fn from(capture: Capture) -> Self
    {
        match capture {
            Capture::Print => Self::Print,
            Capture::IoWrite => Self::IoWrite,
            Capture::Stdout => Self::Stdout,
            Capture::Stderr => Self::Stderr,
        }
    }
}

fn main()
{
    let cli = Cli::parse();

    let logging = match cli.log_level {
        Some(level) => init_logging_with_level(level, cli.log_format),
        None => init_logging(),
    };
    let _guard: LogGuard = match logging {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(&cli) {
        error!("{e}");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>>
{
    let source = fs::read_to_string(&cli.script)?;
    let name = cli.script.to_string_lossy().into_owned();

    let mut debugger = Debugger::new();
    if let Some(transport) = open_transport(cli)? {
        debugger.set_transport(transport);
    }
    if let Some(path) = &cli.schema {
        debugger.open_schema(path)?;
    }
    debugger.set_config(0, &host_config(cli)?)?;

    let engine = global::create(debugger).ok_or("debug engine already created")?;
    // SAFETY: the agent runs a script its user chose to debug; stepping and
    // inspection need the `debug` library that `Lua::new` leaves out.
    let lua = unsafe { Lua::unsafe_new() };
    attach_lua(&lua, &engine)?;
    init_internal_module(&lua)?;
    for capture in &cli.redirects {
        open_redirect(&lua, Redirect::from(*capture))?;
    }

    if cli.wait {
        info!("waiting for frontend");
        if !engine.borrow_mut().wait_client() {
            warn!("no frontend configured the session; running without one");
        }
    }

    info!(script = %name, "running");
    let outcome = run_script(&lua, &name, &source);
    detach_lua(&lua, true)?;
    engine.borrow_mut().close();
    outcome?;
    Ok(())
}

fn open_transport(cli: &Cli) -> Result<Option<Box<dyn Transport>>, Box<dyn Error>>
{
    if let Some(endpoint) = &cli.listen {
        let server = SocketServer::listen(endpoint)?;
        info!(port = server.port(), "listening for frontend");
        return Ok(Some(Box::new(server)));
    }
    if let Some(endpoint) = &cli.connect {
        info!(%endpoint, "connecting to frontend");
        return Ok(Some(Box::new(SocketClient::connect(endpoint)?)));
    }
    Ok(None)
}

/// Level-0 configuration: `--config` with `--stop-on-entry` folded in.
fn host_config(cli: &Cli) -> Result<String, Box<dyn Error>>
{
    let mut map = match &cli.config {
        Some(text) => match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => map,
            _ => return Err("--config must be a JSON object".into()),
        },
        None => Map::new(),
    };
    if cli.stop_on_entry {
        map.insert("stopOnEntry".to_string(), Value::Bool(true));
    }
    Ok(Value::Object(map).to_string())
}
