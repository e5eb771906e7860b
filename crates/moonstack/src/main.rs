//! moonstack: run Lua 5.1 chunks on the moonstack VM.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use moonstack_compiler::disasm::listing;
use moonstack_core::string::StringInterner;
use moonstack_vm::debug::chunkid;
use moonstack_vm::{LuaResult, State, StateConfig, Status, VERSION};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "moonstack", about = "Run Lua 5.1 scripts on the moonstack VM", disable_version_flag = true)]
struct Cli {
    /// Execute a chunk of code; may be repeated
    #[arg(short = 'e', value_name = "CHUNK")]
    exec: Vec<String>,

    /// Print the bytecode listing instead of running
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Print version information
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Log filter when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    log_level: String,

    /// Start without the base library
    #[arg(long)]
    no_base: bool,

    /// Script to run; `-` reads standard input
    #[arg(value_name = "SCRIPT")]
    script: Option<PathBuf>,

    /// Arguments passed to the script as `arg` and `...`
    #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

/// Message handler for protected runs: append a traceback to string errors.
fn traceback_handler(s: &mut State) -> LuaResult<usize> {
    if !s.isstring(1) {
        // keep non-string error objects intact
        return Ok(1);
    }
    let msg = s.tostring_lossy(1).unwrap_or_default();
    let tb = s.traceback(1, Some(&msg));
    s.pushstring(&tb);
    Ok(1)
}

/// Run the function below `nargs` arguments on top of the stack.
fn docall(s: &mut State, nargs: usize) -> LuaResult<Status> {
    let base = s.gettop() - nargs as i32;
    s.pushcfunction(traceback_handler);
    s.insert(base);
    let status = s.pcall(nargs, 0, base);
    s.remove(base);
    status
}

/// Pop the error value and describe it.
fn error_text(s: &mut State) -> String {
    let text = match s.tostring_lossy(-1) {
        Some(msg) => msg,
        None => format!("(error object is a {} value)", s.type_name_at(-1)),
    };
    s.pop(1);
    text
}

fn report(s: &mut State, status: Status) -> Result<(), String> {
    if status == Status::Ok {
        Ok(())
    } else {
        Err(error_text(s))
    }
}

fn read_source(path: &Path) -> Result<(Vec<u8>, String), String> {
    if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .map_err(|e| format!("cannot read stdin: {e}"))?;
        return Ok((buf, "=stdin".to_owned()));
    }
    let buf = std::fs::read(path).map_err(|e| format!("cannot open {}: {e}", path.display()))?;
    Ok((buf, format!("@{}", path.display())))
}

/// Compile without running and print the listing of every function.
fn list(cli: &Cli) -> Result<(), String> {
    let mut chunks = Vec::new();
    for (i, chunk) in cli.exec.iter().enumerate() {
        chunks.push((chunk.clone().into_bytes(), format!("=(command line {})", i + 1)));
    }
    if let Some(path) = &cli.script {
        chunks.push(read_source(path)?);
    }
    for (source, name) in chunks {
        let mut strings = StringInterner::new();
        let source = strip_shebang(&source);
        let proto = moonstack_compiler::compile(source, &name, &mut strings)
            .map_err(|e| format!("{}:{}: {}", chunkid(name.as_bytes()), e.line, e.message))?;
        print!("{}", listing(&proto, &strings));
    }
    Ok(())
}

fn strip_shebang(source: &[u8]) -> &[u8] {
    if source.first() == Some(&b'#') {
        // keep the newline so line numbers stay right
        let end = source.iter().position(|&c| c == b'\n').unwrap_or(source.len());
        &source[end..]
    } else {
        source
    }
}

/// Build the global `arg` table: the script at 0, its arguments from 1 and
/// the interpreter name at -1.
fn set_arg_table(s: &mut State, script: Option<&Path>, args: &[String]) -> LuaResult<()> {
    s.createtable(args.len(), 2);
    s.pushstring("moonstack");
    s.rawseti(-2, -1);
    if let Some(path) = script {
        s.pushstring(&path.display().to_string());
        s.rawseti(-2, 0);
    }
    for (i, a) in args.iter().enumerate() {
        s.pushstring(a);
        s.rawseti(-2, i as i64 + 1);
    }
    s.setglobal("arg")
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = StateConfig {
        open_base_library: !cli.no_base,
        ..StateConfig::default()
    };
    let mut s = State::with_config(config);
    let result = run_in(&mut s, cli);
    s.close();
    result
}

fn run_in(s: &mut State, cli: &Cli) -> Result<(), String> {
    set_arg_table(s, cli.script.as_deref(), &cli.args).map_err(|e| e.to_string())?;

    for chunk in &cli.exec {
        let status = s.load(chunk.as_bytes(), "=(command line)", None).map_err(|e| e.to_string())?;
        report(s, status)?;
        let status = docall(s, 0).map_err(|e| e.to_string())?;
        report(s, status)?;
    }

    let script = match &cli.script {
        Some(path) => Some(read_source(path)?),
        // nothing else to do: read a chunk from stdin
        None if cli.exec.is_empty() => Some(read_source(Path::new("-"))?),
        None => None,
    };
    if let Some((source, name)) = script {
        let status = s
            .load(strip_shebang(&source), &name, None)
            .map_err(|e| e.to_string())?;
        report(s, status)?;
        for a in &cli.args {
            s.pushstring(a);
        }
        let status = docall(s, cli.args.len()).map_err(|e| e.to_string())?;
        report(s, status)?;
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    if cli.version {
        println!("moonstack {} ({VERSION})", env!("CARGO_PKG_VERSION"));
        if cli.exec.is_empty() && cli.script.is_none() {
            return;
        }
    }

    let result = if cli.list { list(&cli) } else { run(&cli) };
    if let Err(msg) = result {
        tracing::debug!(target: "moonstack::cli", error = %msg, "run failed");
        eprintln!("moonstack: {msg}");
        process::exit(1);
    }
}
