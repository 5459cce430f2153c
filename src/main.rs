use std::path::PathBuf;
use std::sync::{Arc, Weak};
use clap::{Parser, Subcommand};
use runtime_context::{hooks, runtime_env, BoxError, Env, RuntimeContext};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Walkthroughs of dynamically scoped context variables.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Log engine activity (`RUST_LOG` takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Toggle a `dry_run` flag across nested scopes
    DryRun,
    /// Load settings from a JSON file whenever `config_file` changes
    Env {
        /// JSON object whose keys are applied as context variables
        #[arg(long)]
        config: PathBuf,
    },
}

runtime_env! {
    /// Settings the demo application can override per scope.
    struct AppEnv {
        dry_run: bool = false,
        db_name: Option<String> = None,
        config_file: Option<String> = None,
    }
}

fn do_something(rc: &RuntimeContext, i: u32) {
    if rc.get_or("dry_run", false).as_bool().unwrap_or(false) {
        println!("{i} - dry run");
    } else {
        println!("{i} - for real");
    }
}

fn dry_run() -> runtime_context::Result<()> {
    let rc = RuntimeContext::new();

    rc.scope([("dry_run", false)], || -> runtime_context::Result<()> {
        do_something(&rc, 1); // for real

        rc.scope([("dry_run", true)], || -> runtime_context::Result<()> {
            do_something(&rc, 2); // dry run
            rc.set("dry_run", false)?;
            do_something(&rc, 3); // for real
            Ok(())
        })??;

        rc.empty_context().run(|| -> runtime_context::Result<()> {
            do_something(&rc, 4); // for real
            rc.set("dry_run", true)?;
            do_something(&rc, 5); // dry run
            Ok(())
        })??;

        do_something(&rc, 6); // for real
        Ok(())
    })?
}

fn reload_config(env: &Env<AppEnv>) -> Result<(), BoxError> {
    let Some(path) = env.get_as::<Option<String>>("config_file")? else {
        return Ok(());
    };
    info!(%path, "reloading config");
    println!("Reloading config from {path}");
    let text = std::fs::read_to_string(&path)?;
    let config: serde_json::Map<String, Value> = serde_json::from_str(&text)?;
    for (k, v) in config {
        env.set(&k, v)?;
    }
    Ok(())
}

fn env_demo(config: PathBuf) -> runtime_context::Result<()> {
    let env = Arc::new(Env::<AppEnv>::from_default());

    let weak: Weak<Env<AppEnv>> = Arc::downgrade(&env);
    env.context_var_set().listener_when(hooks::name_is("config_file"), move |_| {
        match weak.upgrade() {
            Some(env) => reload_config(&env),
            None => Ok(()),
        }
    });

    env.empty_context().run(|| -> runtime_context::Result<()> {
        println!("dry_run = {}", env.get("dry_run")?);
        println!("db_name = {}", env.get("db_name")?);

        env.set("config_file", config.display().to_string())?;
        println!("db_name = {}", env.get("db_name")?);

        env.scope([("dry_run", true)], || -> runtime_context::Result<()> {
            println!("dry_run = {}", env.get("dry_run")?);
            Ok(())
        })??;
        Ok(())
    })??;

    println!("db_name = {}", env.get("db_name")?);
    Ok(())
}

fn main() {
    // Parse CLI arguments.
    let args = Args::parse();

    let fallback = if args.verbose { "runtime_context=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with_writer(std::io::stderr)
        .init();

    let result = match args.command {
        Command::DryRun => dry_run(),
        Command::Env { config } => env_demo(config),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
