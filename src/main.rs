use std::process::exit;
use std::sync::Arc;

use clap::{ArgMatches, CommandFactory, FromArgMatches};
use tracing::warn;

use gsh::{
    logging, Cli, Engine, GshError, HookRegistry, HookSet, LoaderRegistry, LocalTransport,
    MachinePrinter, PlainPrinter, Settings, SshTransport, Transport,
};

/// Exit status for errors before any command ran.
const STARTUP_FAILURE: i32 = 2;
/// Exit status when the operator interrupts twice.
const FORCED_EXIT: i32 = 130;

async fn run(cli: &Cli, loaders: &LoaderRegistry, matches: &ArgMatches) -> Result<i32, GshError> {
    let hook_registry = HookRegistry::builtin();
    if cli.list_hooks {
        for name in hook_registry.option_names() {
            println!("{}", name);
        }
        return Ok(0);
    }

    let settings = Settings::load(cli)?;
    let hosts = loaders.load(matches)?;

    // Without a command, just report what the loaders found.
    if cli.command.is_empty() {
        for host in &hosts {
            println!("{}", host);
        }
        return Ok(0);
    }
    if hosts.is_empty() {
        return Err(GshError::NoHosts);
    }

    let mut hooks = HookSet::new();
    if settings.print_machines {
        hooks.push("MachinePrinter", Arc::new(MachinePrinter::new(&hosts)));
    } else {
        hooks.push("PlainPrinter", Arc::new(PlainPrinter::new()));
    }
    for name in hook_registry.select(settings.hooks.iter().map(String::as_str), &mut hooks) {
        warn!(hook = %name, "Unknown hook, ignoring");
    }

    let transport: Arc<dyn Transport> = if cli.local {
        Arc::new(LocalTransport)
    } else {
        Arc::new(
            SshTransport::new()
                .with_options(settings.ssh_options.clone())
                .with_tty(cli.ssh_tty),
        )
    };
    let config = settings.run_config(hosts, cli.command.clone(), hooks);
    let handle = Engine::new(transport).start(config);

    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("[Gsh] Ctrl-c detected. Stopping all hosts.");
            cancel.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                exit(FORCED_EXIT);
            }
        }
    });

    let result = handle.wait().await?;
    Ok(result.aggregate_exit_code)
}

#[tokio::main]
async fn main() {
    let loaders = LoaderRegistry::builtin();
    let matches = loaders.augment_args(Cli::command()).get_matches();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };
    logging::init(cli.verbose);

    let code = match run(&cli, &loaders, &matches).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("[Gsh] {}", e);
            STARTUP_FAILURE
        }
    };
    exit(code);
}
