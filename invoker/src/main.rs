use std::sync::Arc;

use anyhow::Context;
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "solve-invoker", about = "Judging daemon of the contest server")]
struct Args {
    #[structopt(subcommand)]
    command: Option<Command>,
}

#[derive(StructOpt)]
enum Command {
    /// Container init process; spawned by the sandbox runner, not by
    /// hand.
    Init,
}

fn main() -> anyhow::Result<()> {
    let args = Args::from_args();
    if let Some(Command::Init) = args.command {
        safeexec::init::main();
    }
    util::log::setup();

    let config = config::load().context("cannot load config")?;
    let core = Arc::new(solve_core::Core::new(config).context("cannot create core")?);
    models::schema::create_tables(&core.db).context("cannot create tables")?;
    core.init().context("cannot init core")?;
    core.start();

    let invoker = Arc::new(invoker::Invoker::new(core.clone()).context("cannot create invoker")?);
    invoker.start();
    log::info!("invoker started");

    let (interrupt, interrupted) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        interrupt.try_send(()).ok();
    })
    .context("cannot install signal handler")?;
    interrupted.recv().ok();

    log::info!("received shutdown request; exiting gracefully");
    core.stop();
    Ok(())
}
